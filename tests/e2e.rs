#[path = "e2e/session_establishment.rs"]
mod session_establishment;

//! Connection drivers (§4.7): the outer loops that own a channel's lifetime.
//!
//! The client driver dials a transport, runs the handshake, and reconnects
//! with bounded jittered backoff on disconnect. The server driver accepts
//! transports, runs the handshake and handler loop per connection, and
//! coordinates a graceful shutdown. Both are built on the handshake drivers
//! in [`crate::channel`] and the dispatch contract in [`crate::handler`].

pub mod client;
pub mod server;

pub use client::{ClientDriver, TransportFactory};
pub use server::{Listener, ServerDriver};

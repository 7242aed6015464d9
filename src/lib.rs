//! LIME session core: a JSON-framed, transport-neutral messaging session.
//!
//! [`channel::Channel`] is the heart of the system — a per-connection state
//! machine with per-kind receive queues and request/response correlation.
//! [`channel::client::ClientChannel`] and [`channel::server::ServerChannel`]
//! drive a channel through the handshake to `established`; [`driver`] owns
//! the outer connection lifecycle (client reconnect, server accept loop and
//! graceful shutdown) on top of them. [`handler`] defines the dispatch
//! contract the drivers consume to turn received envelopes into application
//! behavior; concrete [`transport::Transport`] implementations (TCP/TLS,
//! WebSocket, in-process) are the pluggable byte pipe underneath it all.

pub mod auth;
pub mod channel;
pub mod codec;
pub mod driver;
pub mod envelope;
pub mod handler;
pub mod identity;
pub mod transport;

pub use auth::{Authenticate, Authenticator, DomainRole, GuestAuthenticator, Register, StaticAuthenticator};
pub use channel::client::ClientChannel;
pub use channel::server::ServerChannel;
pub use channel::{Channel, ChannelError};
pub use driver::{ClientDriver, Listener, ServerDriver, TransportFactory};
pub use envelope::{
    Authentication, AuthenticationScheme, Command, CompressionOption, EncryptionOption, Envelope,
    EnvelopeBase, EnvelopeKind, Event, Message, Method, Notification, Reason, RequestCommand,
    ResponseCommand, SessionEnvelope, SessionState, Status,
};
pub use handler::{
    HandlerError, HandlerSet, MessageHandler, NotificationHandler, RequestCommandHandler,
    ResponseCommandHandler,
};
pub use identity::{Identity, Node};
pub use transport::{Transport, TransportError};

//! Transport contract: a framed, ordered, bidirectional envelope pipe.
//!
//! Concrete transports (TCP/TLS, WebSocket, in-process) are external
//! collaborators per spec.md §1; this module defines only the contract the
//! rest of the crate (and third-party transports) build against.

pub mod in_process;
pub mod tcp;
pub mod websocket;

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::codec::CodecError;
use crate::envelope::{CompressionOption, EncryptionOption, Envelope};

pub use in_process::InProcessTransport;
pub use tcp::TcpTransport;
pub use websocket::WebSocketTransport;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("transport is not connected")]
    NotConnected,
    #[error("deadline elapsed before the operation completed")]
    Deadline,
    #[error("transport is closed")]
    Closed,
    #[error("failed to decode an incoming envelope: {0}")]
    Decode(#[from] CodecError),
    #[error("io error: {0}")]
    Io(String),
    #[error("{0} is not supported by this transport")]
    Unsupported(&'static str),
}

/// A framed, ordered, bidirectional envelope pipe.
///
/// Implementations guarantee in-order delivery of `send`-ed envelopes and
/// must not interleave partial JSON objects from concurrent callers (the
/// [`crate::channel::Channel`] serializes writes with a mutex so a single
/// implementation only ever needs to be correct for one writer at a time).
#[async_trait]
pub trait Transport: Send {
    /// Enqueues one envelope for delivery. `deadline` bounds how long the
    /// call may block; `None` blocks until the transport accepts the write.
    async fn send(&mut self, envelope: Envelope, deadline: Option<Duration>) -> Result<(), TransportError>;

    /// Blocks until one envelope arrives, or `deadline` elapses.
    async fn receive(&mut self, deadline: Option<Duration>) -> Result<Envelope, TransportError>;

    fn supported_compression(&self) -> Vec<CompressionOption>;
    fn compression(&self) -> CompressionOption;
    async fn set_compression(
        &mut self,
        compression: CompressionOption,
        deadline: Option<Duration>,
    ) -> Result<(), TransportError>;

    fn supported_encryption(&self) -> Vec<EncryptionOption>;
    fn encryption(&self) -> EncryptionOption;
    /// May perform an in-band handshake (e.g. TLS over the existing byte
    /// stream). Must only be called while the byte stream is otherwise
    /// quiescent (§4.1).
    async fn set_encryption(
        &mut self,
        encryption: EncryptionOption,
        deadline: Option<Duration>,
    ) -> Result<(), TransportError>;

    /// Idempotent from the caller's perspective: a second call may return
    /// `NotConnected` rather than erroring loudly.
    async fn close(&mut self) -> Result<(), TransportError>;

    fn connected(&self) -> bool;
    fn local_addr(&self) -> Option<String>;
    fn remote_addr(&self) -> Option<String>;
}

/// Runs `fut`, failing with [`TransportError::Deadline`] if `deadline`
/// elapses first. `None` awaits indefinitely.
pub(crate) async fn with_deadline<T, F>(
    deadline: Option<Duration>,
    fut: F,
) -> Result<T, TransportError>
where
    F: std::future::Future<Output = Result<T, TransportError>>,
{
    match deadline {
        Some(d) => tokio::time::timeout(d, fut)
            .await
            .map_err(|_| TransportError::Deadline)?,
        None => fut.await,
    }
}

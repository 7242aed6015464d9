//! Errors surfaced by [`super::Channel`] and its handshake drivers (§7).

use thiserror::Error;

use crate::codec::CodecError;
use crate::envelope::Reason;
use crate::transport::TransportError;

#[derive(Debug, Error)]
pub enum ChannelError {
    /// Operation not allowed in the channel's current session state.
    #[error("invalid state for this operation")]
    InvalidState,
    /// Established-mode sender surface called before the handshake reached
    /// `established` (§4.3). Distinct from `InvalidState`, which covers a
    /// terminated channel.
    #[error("the channel has not reached the established state")]
    NotEstablished,
    /// Caller violated a precondition that is not a programmer fault
    /// (e.g. an empty request id arriving over the wire).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("failed to decode an incoming envelope: {0}")]
    Decode(#[from] CodecError),
    #[error("the transport closed")]
    TransportClosed,
    #[error("deadline elapsed before the operation completed")]
    Deadline,
    #[error("operation was cancelled")]
    Cancelled,
    #[error("a request with this id is already awaiting a response")]
    DuplicateRequest,
    #[error("the peer failed the session: {0:?}")]
    SessionFailed(Reason),
    #[error("the peer picked an option that was not offered")]
    NegotiationRejected,
    #[error("authentication was rejected")]
    AuthenticationRejected,
}

impl From<TransportError> for ChannelError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Deadline => ChannelError::Deadline,
            TransportError::Closed | TransportError::NotConnected => ChannelError::TransportClosed,
            TransportError::Decode(e) => ChannelError::Decode(e),
            TransportError::Io(e) => ChannelError::InvalidArgument(e),
            TransportError::Unsupported(what) => ChannelError::InvalidArgument(what.to_string()),
        }
    }
}

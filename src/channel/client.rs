//! Client-side handshake driver (§4.4): drives a freshly-created [`Channel`]
//! from `new` through negotiation and authentication to `established`, and
//! later back down through `finishing` to `finished`.

use std::sync::Arc;

use crate::auth::Authenticator;
use crate::envelope::{CompressionOption, EncryptionOption, SessionEnvelope, SessionState};
use crate::identity::{Identity, Node};
use crate::transport::Transport;

use super::{Channel, ChannelError};

/// Picks no compression, regardless of what's on offer — the default selector
/// when a caller doesn't care to negotiate one.
pub fn no_compression(_offered: &[CompressionOption]) -> CompressionOption {
    CompressionOption::None
}

/// Picks no encryption, regardless of what's on offer.
pub fn no_encryption(_offered: &[EncryptionOption]) -> EncryptionOption {
    EncryptionOption::None
}

/// Wraps a [`Channel`] and drives the client side of the session handshake.
pub struct ClientChannel {
    channel: Arc<Channel>,
}

impl ClientChannel {
    pub fn new(transport: Box<dyn Transport>) -> Self {
        Self {
            channel: Channel::new(transport),
        }
    }

    /// Wraps an already-constructed channel (e.g. one shared with other
    /// drivers in tests).
    pub fn from_channel(channel: Arc<Channel>) -> Self {
        Self { channel }
    }

    pub fn channel(&self) -> &Arc<Channel> {
        &self.channel
    }

    /// Runs the handshake to completion, returning the `established` envelope
    /// on success or the failure reason otherwise (§4.4).
    ///
    /// `compression_selector`/`encryption_selector` are called with the
    /// server's offered options and must return one of them; `authenticator`
    /// is invoked once per authenticating round-trip with the scheme options
    /// currently on offer and the server's previous round-trip payload.
    pub async fn establish_session(
        &self,
        identity: Identity,
        instance: Option<String>,
        compression_selector: impl Fn(&[CompressionOption]) -> CompressionOption,
        encryption_selector: impl Fn(&[EncryptionOption]) -> EncryptionOption,
        authenticator: &dyn Authenticator,
    ) -> Result<SessionEnvelope, ChannelError> {
        self.channel.ensure_state(SessionState::New)?;
        self.channel
            .send_session(SessionEnvelope::new(SessionState::New))
            .await?;

        let mut local_state = SessionState::New;
        let mut scheme_options = Vec::new();

        loop {
            let received = self.channel.receive_session().await?;

            if self.channel.session_id().is_none() {
                if let Some(id) = received.base.id.clone() {
                    self.channel.set_session_id(Some(id));
                }
            }

            match received.state {
                SessionState::Negotiating => {
                    if local_state.step() < SessionState::Negotiating.step() {
                        self.channel.set_state(SessionState::Negotiating).await;
                        local_state = SessionState::Negotiating;
                    }

                    if received.compression_options.is_some() || received.encryption_options.is_some() {
                        let offered_compression = received.compression_options.unwrap_or_default();
                        let offered_encryption = received.encryption_options.unwrap_or_default();
                        let compression = compression_selector(&offered_compression);
                        let encryption = encryption_selector(&offered_encryption);

                        let mut reply = SessionEnvelope::new(SessionState::Negotiating);
                        reply.base.id = self.channel.session_id();
                        reply.compression = Some(compression);
                        reply.encryption = Some(encryption);
                        self.channel.send_session(reply).await?;
                    } else if let (Some(compression), Some(encryption)) =
                        (received.compression, received.encryption)
                    {
                        if compression != self.channel.transport_compression().await {
                            self.channel.set_transport_compression(compression).await?;
                        }
                        if encryption != self.channel.transport_encryption().await {
                            self.channel.set_transport_encryption(encryption).await?;
                        }
                    }
                    self.channel.resume_reader();
                }
                SessionState::Authenticating => {
                    if local_state.step() < SessionState::Authenticating.step() {
                        self.channel.set_state(SessionState::Authenticating).await;
                        local_state = SessionState::Authenticating;
                    }
                    if let Some(options) = &received.scheme_options {
                        scheme_options = options.clone();
                    }

                    let authentication = authenticator
                        .authenticate(&scheme_options, received.authentication.as_ref())
                        .await;

                    let mut reply = SessionEnvelope::new(SessionState::Authenticating);
                    reply.base.id = self.channel.session_id();
                    reply.base.from = Some(Node {
                        identity: identity.clone(),
                        instance: instance.clone(),
                    });
                    reply.scheme = Some(authentication.scheme());
                    reply.authentication = Some(authentication);
                    self.channel.send_session(reply).await?;
                    self.channel.resume_reader();
                }
                SessionState::Established => {
                    let local_node = received.base.to.clone().unwrap_or(Node {
                        identity: identity.clone(),
                        instance: instance.clone(),
                    });
                    self.channel.set_local_node(Some(local_node));
                    self.channel.set_remote_node(received.base.from.clone());
                    self.channel.set_state(SessionState::Established).await;
                    // Established is not terminal; without this the reader
                    // would stay parked forever after the envelope that
                    // brought us here.
                    self.channel.resume_reader();
                    return Ok(received);
                }
                SessionState::Failed => {
                    let reason = received.reason.clone();
                    self.channel.set_terminal_reason(reason.clone());
                    self.channel.set_state(SessionState::Failed).await;
                    return Err(reason
                        .map(ChannelError::SessionFailed)
                        .unwrap_or(ChannelError::InvalidState));
                }
                other => {
                    return Err(ChannelError::InvalidArgument(format!(
                        "unexpected session state {other} during establishment"
                    )));
                }
            }
        }
    }

    /// Sends `finishing` and awaits the server's `finished` reply (§4.4).
    pub async fn finish_session(&self) -> Result<SessionEnvelope, ChannelError> {
        self.channel.ensure_established()?;

        let mut envelope = SessionEnvelope::new(SessionState::Finishing);
        envelope.base.id = self.channel.session_id();
        self.channel.set_state(SessionState::Finishing).await;
        self.channel.send_session(envelope).await?;

        loop {
            let received = self.channel.receive_session().await?;
            match received.state {
                SessionState::Finished => {
                    self.channel.set_state(SessionState::Finished).await;
                    return Ok(received);
                }
                SessionState::Failed => {
                    let reason = received.reason.clone();
                    self.channel.set_terminal_reason(reason.clone());
                    self.channel.set_state(SessionState::Failed).await;
                    return Err(reason
                        .map(ChannelError::SessionFailed)
                        .unwrap_or(ChannelError::InvalidState));
                }
                _ => {
                    self.channel.resume_reader();
                    continue;
                }
            }
        }
    }
}

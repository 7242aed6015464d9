//! Server-side handshake driver (§4.5): awaits a client's `new`, negotiates
//! transport options, runs the authentication loop, and brings the channel to
//! `established` — or fails it with a reason at the first violation.

use std::sync::Arc;

use uuid::Uuid;

use crate::auth::{Authenticate, Register};
use crate::envelope::{
    AuthenticationScheme, CompressionOption, EncryptionOption, Reason, SessionEnvelope,
    SessionState,
};
use crate::transport::Transport;

use super::{Channel, ChannelError};

/// Wraps a [`Channel`] and drives the server side of the session handshake
/// for one accepted connection.
pub struct ServerChannel {
    channel: Arc<Channel>,
}

impl ServerChannel {
    pub fn new(transport: Box<dyn Transport>) -> Self {
        Self {
            channel: Channel::new(transport),
        }
    }

    pub fn from_channel(channel: Arc<Channel>) -> Self {
        Self { channel }
    }

    pub fn channel(&self) -> &Arc<Channel> {
        &self.channel
    }

    /// Runs the handshake to completion (§4.5). `compression_options`,
    /// `encryption_options` and `scheme_options` are what this server is
    /// willing to offer; the actual negotiated set is further narrowed by
    /// what the transport reports as supported.
    pub async fn establish_session(
        &self,
        compression_options: &[CompressionOption],
        encryption_options: &[EncryptionOption],
        scheme_options: &[AuthenticationScheme],
        authenticate: &dyn Authenticate,
        register: &dyn Register,
    ) -> Result<SessionEnvelope, ChannelError> {
        self.channel.ensure_state(SessionState::New)?;

        let received = self.channel.receive_session().await?;
        if received.state != SessionState::New {
            return Err(self
                .reject(Reason {
                    code: 1,
                    description: "expected a new session envelope".into(),
                })
                .await);
        }
        if received.base.id.as_deref().is_some_and(|id| !id.is_empty()) {
            return Err(self
                .reject(Reason {
                    code: 2,
                    description: "a client must not assign its own session id".into(),
                })
                .await);
        }

        let session_id = Uuid::new_v4().to_string();
        self.channel.set_session_id(Some(session_id.clone()));
        self.channel.set_state(SessionState::Negotiating).await;
        self.channel.resume_reader();

        let (compression, encryption) = self
            .negotiate_transport_options(&session_id, compression_options, encryption_options)
            .await?;

        if compression != self.channel.transport_compression().await {
            self.channel.set_transport_compression(compression).await?;
        }
        if encryption != self.channel.transport_encryption().await {
            self.channel.set_transport_encryption(encryption).await?;
        }

        self.channel.set_state(SessionState::Authenticating).await;
        self.authenticate_loop(&session_id, scheme_options, authenticate, register)
            .await
    }

    /// Computes offered ∩ transport-supported for both axes; skips the
    /// negotiating round-trip when both resulting sets have at most one
    /// member (there is nothing to pick between).
    async fn negotiate_transport_options(
        &self,
        session_id: &str,
        compression_options: &[CompressionOption],
        encryption_options: &[EncryptionOption],
    ) -> Result<(CompressionOption, EncryptionOption), ChannelError> {
        let supported_compression = self.channel.transport_supported_compression().await;
        let supported_encryption = self.channel.transport_supported_encryption().await;

        let negotiable_compression: Vec<CompressionOption> = compression_options
            .iter()
            .copied()
            .filter(|c| supported_compression.contains(c))
            .collect();
        let negotiable_encryption: Vec<EncryptionOption> = encryption_options
            .iter()
            .copied()
            .filter(|e| supported_encryption.contains(e))
            .collect();

        let (compression, encryption) = if negotiable_compression.len() <= 1 && negotiable_encryption.len() <= 1 {
            // Nothing to pick between: skip the negotiating round-trip
            // entirely per §4.5 step 2 and S1's literal wire trace, which
            // goes straight from `new` to `authenticating`.
            (
                negotiable_compression.first().copied().unwrap_or(CompressionOption::None),
                negotiable_encryption.first().copied().unwrap_or(EncryptionOption::None),
            )
        } else {
            let mut offer = SessionEnvelope::new(SessionState::Negotiating);
            offer.base.id = Some(session_id.to_string());
            offer.compression_options = Some(negotiable_compression.clone());
            offer.encryption_options = Some(negotiable_encryption.clone());
            self.channel.send_session(offer).await?;

            let picked = self.channel.receive_session().await?;
            if picked.state != SessionState::Negotiating {
                return Err(self
                    .reject(Reason {
                        code: 3,
                        description: "expected a negotiating session envelope".into(),
                    })
                    .await);
            }
            let compression = picked.compression.unwrap_or(CompressionOption::None);
            let encryption = picked.encryption.unwrap_or(EncryptionOption::None);
            if !negotiable_compression.contains(&compression) || !negotiable_encryption.contains(&encryption) {
                return Err(self
                    .reject(Reason {
                        code: 4,
                        description: "client picked an option that was not offered".into(),
                    })
                    .await);
            }

            let mut confirm = SessionEnvelope::new(SessionState::Negotiating);
            confirm.base.id = Some(session_id.to_string());
            confirm.compression = Some(compression);
            confirm.encryption = Some(encryption);
            self.channel.send_session(confirm).await?;

            (compression, encryption)
        };

        self.channel.resume_reader();
        Ok((compression, encryption))
    }

    async fn authenticate_loop(
        &self,
        session_id: &str,
        scheme_options: &[AuthenticationScheme],
        authenticate: &dyn Authenticate,
        register: &dyn Register,
    ) -> Result<SessionEnvelope, ChannelError> {
        loop {
            let mut offer = SessionEnvelope::new(SessionState::Authenticating);
            offer.base.id = Some(session_id.to_string());
            offer.scheme_options = Some(scheme_options.to_vec());
            self.channel.send_session(offer).await?;

            let attempt = self.channel.receive_session().await?;
            if attempt.state != SessionState::Authenticating {
                return Err(self
                    .reject(Reason {
                        code: 5,
                        description: "expected an authenticating session envelope".into(),
                    })
                    .await);
            }
            let from = match attempt.base.from.clone() {
                Some(from) => from,
                None => {
                    return Err(self
                        .reject(Reason {
                            code: 6,
                            description: "authenticating envelope is missing an identity".into(),
                        })
                        .await)
                }
            };
            let authentication = match attempt.authentication {
                Some(authentication) => authentication,
                None => {
                    return Err(self
                        .reject(Reason {
                            code: 7,
                            description: "authenticating envelope is missing its authentication payload".into(),
                        })
                        .await)
                }
            };

            let (role, next_round_trip) = authenticate.authenticate(&from, &authentication).await;

            if let Some(challenge) = next_round_trip {
                let mut round_trip = SessionEnvelope::new(SessionState::Authenticating);
                round_trip.base.id = Some(session_id.to_string());
                round_trip.scheme = Some(challenge.scheme());
                round_trip.authentication = Some(challenge);
                self.channel.send_session(round_trip).await?;
                self.channel.resume_reader();
                continue;
            }

            if !role.is_known() {
                self.reject(Reason {
                    code: 8,
                    description: "authentication failed".into(),
                })
                .await;
                return Err(ChannelError::AuthenticationRejected);
            }

            let registered = register.register(&from).await;
            self.channel.set_remote_node(Some(registered.clone()));

            let mut established = SessionEnvelope::new(SessionState::Established);
            established.base.id = Some(session_id.to_string());
            established.base.to = Some(registered);
            self.channel.send_session(established.clone()).await?;
            self.channel.set_state(SessionState::Established).await;
            // Established is not terminal; without this the reader would
            // stay parked forever after the envelope that brought us here.
            self.channel.resume_reader();
            return Ok(established);
        }
    }

    /// Sends `finished` in reply to the client's `finishing` (§4.5).
    pub async fn finish_session(&self) -> Result<SessionEnvelope, ChannelError> {
        self.channel.ensure_established()?;

        let received = self.channel.receive_session().await?;
        if received.state != SessionState::Finishing {
            return Err(ChannelError::InvalidState);
        }
        self.channel.set_state(SessionState::Finishing).await;

        let mut envelope = SessionEnvelope::new(SessionState::Finished);
        envelope.base.id = self.channel.session_id();
        self.channel.send_session(envelope.clone()).await?;
        self.channel.set_state(SessionState::Finished).await;
        Ok(envelope)
    }

    /// Fails the session with `reason`, idempotently: a channel that is
    /// already terminal returns `InvalidState` rather than failing twice.
    pub async fn fail_session(&self, reason: Reason) -> Result<(), ChannelError> {
        if self.channel.state().is_terminal() {
            return Err(ChannelError::InvalidState);
        }
        self.channel.set_terminal_reason(Some(reason.clone()));
        let mut envelope = SessionEnvelope::failed(reason);
        envelope.base.id = self.channel.session_id();
        let _ = self.channel.send_session(envelope).await;
        self.channel.set_state(SessionState::Failed).await;
        Ok(())
    }

    /// Fails the session and returns the error its caller should propagate.
    async fn reject(&self, reason: Reason) -> ChannelError {
        let _ = self.fail_session(reason.clone()).await;
        ChannelError::SessionFailed(reason)
    }
}

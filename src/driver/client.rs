//! Client connection driver (§4.7): dials a transport through a factory,
//! drives the handshake, runs the handler loop while established, and
//! reconnects with jittered, capped exponential backoff on disconnect.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use tokio::sync::oneshot;
use tracing::{info, warn};

use crate::auth::Authenticator;
use crate::channel::client::{no_compression, no_encryption, ClientChannel};
use crate::envelope::{CompressionOption, EncryptionOption};
use crate::handler::HandlerSet;
use crate::identity::Identity;
use crate::transport::{Transport, TransportError};

const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Dials a fresh transport on each (re)connect attempt. Implementations
/// typically wrap `TcpTransport::connect`, `WebSocketTransport::connect`, or
/// `in_process::dial`.
#[async_trait]
pub trait TransportFactory: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn Transport>, TransportError>;
}

/// Drives the client side of one logical connection: establish, run the
/// handler loop, and on disconnect reconnect with backoff until `stop` fires.
pub struct ClientDriver<F: TransportFactory> {
    factory: F,
    identity: Identity,
    instance: Option<String>,
    compression_selector: Box<dyn Fn(&[CompressionOption]) -> CompressionOption + Send + Sync>,
    encryption_selector: Box<dyn Fn(&[EncryptionOption]) -> EncryptionOption + Send + Sync>,
    authenticator: Arc<dyn Authenticator>,
    handlers: Arc<HandlerSet>,
}

impl<F: TransportFactory> ClientDriver<F> {
    pub fn new(
        factory: F,
        identity: Identity,
        instance: Option<String>,
        authenticator: Arc<dyn Authenticator>,
        handlers: Arc<HandlerSet>,
    ) -> Self {
        Self {
            factory,
            identity,
            instance,
            compression_selector: Box::new(no_compression),
            encryption_selector: Box::new(no_encryption),
            authenticator,
            handlers,
        }
    }

    pub fn with_compression_selector(
        mut self,
        selector: impl Fn(&[CompressionOption]) -> CompressionOption + Send + Sync + 'static,
    ) -> Self {
        self.compression_selector = Box::new(selector);
        self
    }

    pub fn with_encryption_selector(
        mut self,
        selector: impl Fn(&[EncryptionOption]) -> EncryptionOption + Send + Sync + 'static,
    ) -> Self {
        self.encryption_selector = Box::new(selector);
        self
    }

    /// Runs until `stop` resolves. Each iteration connects, establishes the
    /// session, and serves the handler loop; any failure along the way falls
    /// through to a jittered, capped exponential backoff before retrying.
    pub async fn run(&self, mut stop: oneshot::Receiver<()>) {
        let mut backoff = INITIAL_BACKOFF;

        loop {
            if stop.try_recv().is_ok() {
                return;
            }

            match self.factory.connect().await {
                Ok(transport) => {
                    let client = ClientChannel::new(transport);
                    match client
                        .establish_session(
                            self.identity.clone(),
                            self.instance.clone(),
                            |opts| (self.compression_selector)(opts),
                            |opts| (self.encryption_selector)(opts),
                            self.authenticator.as_ref(),
                        )
                        .await
                    {
                        Ok(_established) => {
                            info!(target: "lime::driver", "session established");
                            backoff = INITIAL_BACKOFF;
                            self.run_handler_loop(&client, &mut stop).await;
                        }
                        Err(error) => {
                            warn!(target: "lime::driver", %error, "failed to establish session");
                        }
                    }
                }
                Err(error) => {
                    warn!(target: "lime::driver", %error, "failed to connect");
                }
            }

            let jitter = Duration::from_millis(rand::thread_rng().gen_range(0..1000));
            tokio::select! {
                _ = tokio::time::sleep(backoff + jitter) => {}
                _ = &mut stop => return,
            }
            backoff = (backoff * 2).min(MAX_BACKOFF);
        }
    }

    async fn run_handler_loop(&self, client: &ClientChannel, stop: &mut oneshot::Receiver<()>) {
        let channel = client.channel();
        while channel.established() {
            tokio::select! {
                message = channel.receive_message() => {
                    match message {
                        Ok(message) => {
                            if let Err(error) = self.handlers.dispatch_message(message, channel).await {
                                warn!(target: "lime::driver", %error, "message handler failed");
                                return;
                            }
                        }
                        Err(_) => return,
                    }
                }
                notification = channel.receive_notification() => {
                    match notification {
                        Ok(notification) => {
                            if let Err(error) = self.handlers.dispatch_notification(notification, channel).await {
                                warn!(target: "lime::driver", %error, "notification handler failed");
                                return;
                            }
                        }
                        Err(_) => return,
                    }
                }
                request = channel.receive_request_command() => {
                    match request {
                        Ok(request) => {
                            if let Err(error) = self.handlers.dispatch_request_command(request, channel).await {
                                warn!(target: "lime::driver", %error, "command handler failed");
                                return;
                            }
                        }
                        Err(_) => return,
                    }
                }
                response = channel.receive_response_command() => {
                    match response {
                        Ok(response) => {
                            if let Err(error) = self.handlers.dispatch_response_command(response, channel).await {
                                warn!(target: "lime::driver", %error, "response handler failed");
                                return;
                            }
                        }
                        Err(_) => return,
                    }
                }
                _ = &mut *stop => return,
            }
        }
    }
}

//! Server connection driver (§4.7): accepts transports, drives the handshake
//! and handler loop per connection, and coordinates a graceful shutdown —
//! stop accepting, let active channels drain under a grace deadline, then
//! fail whatever remains.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{oneshot, Mutex};
use tracing::warn;

use crate::auth::{Authenticate, Register};
use crate::channel::server::ServerChannel;
use crate::channel::Channel;
use crate::envelope::{AuthenticationScheme, CompressionOption, EncryptionOption};
use crate::handler::HandlerSet;
use crate::transport::in_process::InProcessListener;
use crate::transport::tcp::TcpTransportListener;
use crate::transport::websocket::WebSocketListener;
use crate::transport::{Transport, TransportError};

/// A source of inbound transports. Implemented here for the crate's own
/// listener types; a custom transport can implement it directly.
#[async_trait]
pub trait Listener: Send {
    async fn accept(&mut self) -> Result<Box<dyn Transport>, TransportError>;
}

#[async_trait]
impl Listener for InProcessListener {
    async fn accept(&mut self) -> Result<Box<dyn Transport>, TransportError> {
        let transport = InProcessListener::accept(self).await?;
        Ok(Box::new(transport))
    }
}

#[async_trait]
impl Listener for TcpTransportListener {
    async fn accept(&mut self) -> Result<Box<dyn Transport>, TransportError> {
        let transport = TcpTransportListener::accept(self).await?;
        Ok(Box::new(transport))
    }
}

#[async_trait]
impl Listener for WebSocketListener {
    async fn accept(&mut self) -> Result<Box<dyn Transport>, TransportError> {
        let transport = WebSocketListener::accept(self).await?;
        Ok(Box::new(transport))
    }
}

/// Drives the server side of every connection a [`Listener`] hands it.
pub struct ServerDriver {
    compression_options: Vec<CompressionOption>,
    encryption_options: Vec<EncryptionOption>,
    scheme_options: Vec<AuthenticationScheme>,
    authenticate: Arc<dyn Authenticate>,
    register: Arc<dyn Register>,
    handlers: Arc<HandlerSet>,
}

impl ServerDriver {
    pub fn new(
        compression_options: Vec<CompressionOption>,
        encryption_options: Vec<EncryptionOption>,
        scheme_options: Vec<AuthenticationScheme>,
        authenticate: Arc<dyn Authenticate>,
        register: Arc<dyn Register>,
        handlers: Arc<HandlerSet>,
    ) -> Self {
        Self {
            compression_options,
            encryption_options,
            scheme_options,
            authenticate,
            register,
            handlers,
        }
    }

    /// Accepts connections, spawning one task per connection, until the
    /// listener errors or `stop` fires. Once stopped, waits up to `grace` for
    /// active channels to finish on their own, then fails whatever remains.
    pub async fn run(&self, mut listener: impl Listener + 'static, mut stop: oneshot::Receiver<()>, grace: Duration) {
        let active: Arc<Mutex<Vec<Arc<Channel>>>> = Arc::new(Mutex::new(Vec::new()));

        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    match accepted {
                        Ok(transport) => self.spawn_connection(transport, &active).await,
                        Err(error) => {
                            warn!(target: "lime::driver", %error, "listener accept failed; stopping");
                            break;
                        }
                    }
                }
                _ = &mut stop => break,
            }
        }

        let deadline = tokio::time::Instant::now() + grace;
        loop {
            if active.lock().await.is_empty() || tokio::time::Instant::now() >= deadline {
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        for channel in active.lock().await.drain(..) {
            channel.close().await;
        }
    }

    async fn spawn_connection(&self, transport: Box<dyn Transport>, active: &Arc<Mutex<Vec<Arc<Channel>>>>) {
        let server = ServerChannel::new(transport);
        let channel = Arc::clone(server.channel());
        active.lock().await.push(Arc::clone(&channel));

        let compression_options = self.compression_options.clone();
        let encryption_options = self.encryption_options.clone();
        let scheme_options = self.scheme_options.clone();
        let authenticate = Arc::clone(&self.authenticate);
        let register = Arc::clone(&self.register);
        let handlers = Arc::clone(&self.handlers);
        let active = Arc::clone(active);

        tokio::spawn(async move {
            let established = server
                .establish_session(
                    &compression_options,
                    &encryption_options,
                    &scheme_options,
                    authenticate.as_ref(),
                    register.as_ref(),
                )
                .await;

            if established.is_ok() {
                Self::run_handler_loop(&server, &handlers).await;
            }

            active.lock().await.retain(|c| !Arc::ptr_eq(c, &channel));
        });
    }

    async fn run_handler_loop(server: &ServerChannel, handlers: &HandlerSet) {
        let channel = server.channel();
        while channel.established() {
            tokio::select! {
                message = channel.receive_message() => {
                    match message {
                        Ok(message) => {
                            if let Err(error) = handlers.dispatch_message(message, channel).await {
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
                            if let Err(error) = handlers.dispatch_notification(notification, channel).await {
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
                            if let Err(error) = handlers.dispatch_request_command(request, channel).await {
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
                            if let Err(error) = handlers.dispatch_response_command(response, channel).await {
                                warn!(target: "lime::driver", %error, "response handler failed");
                                return;
                            }
                        }
                        Err(_) => return,
                    }
                }
            }
        }
    }
}

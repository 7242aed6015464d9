//! WebSocket transport: one JSON object per text frame, negotiating the
//! `lime` subprotocol (§6).
//!
//! Client and server sides both end up holding a
//! `WebSocketStream<MaybeTlsStream<TcpStream>>`, so a single struct serves
//! both roles once the handshake (client `connect_async`, server
//! `accept_hdr_async`) has completed.

use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::handshake::server::{Request, Response};
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::protocol::Message as WsMessage;
use tokio_tungstenite::{accept_hdr_async, MaybeTlsStream, WebSocketStream};

use super::{with_deadline, Transport, TransportError};
use crate::codec;
use crate::envelope::{CompressionOption, EncryptionOption, Envelope};

const SUBPROTOCOL: &str = "lime";

type Stream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// A connected WebSocket endpoint speaking the `lime` subprotocol.
pub struct WebSocketTransport {
    stream: Stream,
    local_addr: Option<SocketAddr>,
    remote_addr: Option<SocketAddr>,
    connected: bool,
}

impl WebSocketTransport {
    /// Connects to `url` (e.g. `ws://host:port/path`), requesting the
    /// `lime` subprotocol.
    pub async fn dial(url: &str) -> Result<Self, TransportError> {
        use tokio_tungstenite::tungstenite::client::IntoClientRequest;

        let mut request = url
            .into_client_request()
            .map_err(|e| TransportError::Io(e.to_string()))?;
        request.headers_mut().insert(
            "Sec-WebSocket-Protocol",
            HeaderValue::from_static(SUBPROTOCOL),
        );

        let (stream, _response) = tokio_tungstenite::connect_async(request)
            .await
            .map_err(|e| TransportError::Io(e.to_string()))?;

        Ok(Self {
            stream,
            local_addr: None,
            remote_addr: None,
            connected: true,
        })
    }

    async fn from_accepted_plain(tcp: TcpStream) -> Result<Self, TransportError> {
        let local_addr = tcp.local_addr().ok();
        let remote_addr = tcp.peer_addr().ok();
        let stream = accept_hdr_async(MaybeTlsStream::Plain(tcp), subprotocol_callback)
            .await
            .map_err(|e| TransportError::Io(e.to_string()))?;
        Ok(Self {
            stream,
            local_addr,
            remote_addr,
            connected: true,
        })
    }

    /// Completes a server-side handshake over an already-accepted stream
    /// (used when the listener wraps the socket in TLS itself before
    /// handing it here; see [`WebSocketListener::bind_tls`]).
    pub async fn from_tls_stream(
        tls: tokio_rustls::server::TlsStream<TcpStream>,
        local_addr: Option<SocketAddr>,
        remote_addr: Option<SocketAddr>,
    ) -> Result<Self, TransportError> {
        let stream = accept_hdr_async(MaybeTlsStream::Rustls(tls), subprotocol_callback)
            .await
            .map_err(|e| TransportError::Io(e.to_string()))?;
        Ok(Self {
            stream,
            local_addr,
            remote_addr,
            connected: true,
        })
    }
}

fn subprotocol_callback(
    request: &Request,
    mut response: Response,
) -> Result<Response, tokio_tungstenite::tungstenite::handshake::server::ErrorResponse> {
    let offers_lime = request
        .headers()
        .get("Sec-WebSocket-Protocol")
        .and_then(|v| v.to_str().ok())
        .map(|v| v.split(',').any(|p| p.trim() == SUBPROTOCOL))
        .unwrap_or(false);
    if offers_lime {
        response
            .headers_mut()
            .insert("Sec-WebSocket-Protocol", HeaderValue::from_static(SUBPROTOCOL));
    }
    Ok(response)
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn send(&mut self, envelope: Envelope, deadline: Option<Duration>) -> Result<(), TransportError> {
        if !self.connected {
            return Err(TransportError::NotConnected);
        }
        let bytes = codec::encode(&envelope)?;
        with_deadline(deadline, async {
            self.stream
                .send(WsMessage::Text(
                    String::from_utf8(bytes).map_err(|e| TransportError::Io(e.to_string()))?,
                ))
                .await
                .map_err(|e| TransportError::Io(e.to_string()))
        })
        .await
    }

    async fn receive(&mut self, deadline: Option<Duration>) -> Result<Envelope, TransportError> {
        with_deadline(deadline, async {
            loop {
                match self.stream.next().await {
                    Some(Ok(WsMessage::Text(text))) => {
                        return codec::decode(text.as_bytes()).map_err(TransportError::Decode)
                    }
                    Some(Ok(WsMessage::Binary(bytes))) => {
                        return codec::decode(&bytes).map_err(TransportError::Decode)
                    }
                    Some(Ok(WsMessage::Ping(_) | WsMessage::Pong(_))) => continue,
                    Some(Ok(WsMessage::Close(_))) | None => return Err(TransportError::Closed),
                    Some(Ok(WsMessage::Frame(_))) => continue,
                    Some(Err(e)) => return Err(TransportError::Io(e.to_string())),
                }
            }
        })
        .await
    }

    fn supported_compression(&self) -> Vec<CompressionOption> {
        vec![CompressionOption::None]
    }

    fn compression(&self) -> CompressionOption {
        CompressionOption::None
    }

    async fn set_compression(
        &mut self,
        compression: CompressionOption,
        _deadline: Option<Duration>,
    ) -> Result<(), TransportError> {
        if compression == CompressionOption::None {
            Ok(())
        } else {
            Err(TransportError::Unsupported("compression"))
        }
    }

    fn supported_encryption(&self) -> Vec<EncryptionOption> {
        vec![EncryptionOption::None, EncryptionOption::Tls]
    }

    fn encryption(&self) -> EncryptionOption {
        match self.stream.get_ref() {
            MaybeTlsStream::Plain(_) => EncryptionOption::None,
            _ => EncryptionOption::Tls,
        }
    }

    async fn set_encryption(
        &mut self,
        encryption: EncryptionOption,
        _deadline: Option<Duration>,
    ) -> Result<(), TransportError> {
        if encryption == self.encryption() {
            Ok(())
        } else {
            Err(TransportError::Unsupported(
                "TLS must be negotiated at connect/accept time for WebSocket",
            ))
        }
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        if !self.connected {
            return Err(TransportError::NotConnected);
        }
        self.connected = false;
        let _ = self.stream.close(None).await;
        Ok(())
    }

    fn connected(&self) -> bool {
        self.connected
    }

    fn local_addr(&self) -> Option<String> {
        self.local_addr.map(|a| a.to_string())
    }

    fn remote_addr(&self) -> Option<String> {
        self.remote_addr.map(|a| a.to_string())
    }
}

/// Accepts inbound plain-TCP WebSocket connections.
pub struct WebSocketListener {
    listener: TcpListener,
}

impl WebSocketListener {
    pub async fn bind(addr: SocketAddr) -> Result<Self, TransportError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| TransportError::Io(e.to_string()))?;
        Ok(Self { listener })
    }

    pub async fn accept(&mut self) -> Result<WebSocketTransport, TransportError> {
        let (stream, _) = self
            .listener
            .accept()
            .await
            .map_err(|e| TransportError::Io(e.to_string()))?;
        WebSocketTransport::from_accepted_plain(stream).await
    }
}

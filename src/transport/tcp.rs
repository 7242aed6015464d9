//! TCP transport, with an optional in-band TLS upgrade for the `tls`
//! encryption option (§4.1: "wraps the existing socket in TLS ... using a
//! provided config").
//!
//! Framing is a 4-byte big-endian length prefix followed by that many
//! payload bytes, one frame per envelope. Gzip-compressed payloads are
//! arbitrary bytes that routinely contain `0x0A`, so a newline delimiter
//! scanned over post-compression bytes would split frames mid-stream; a
//! length prefix sidesteps that regardless of whether compression is on.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use flate2::read::{GzDecoder, GzEncoder};
use flate2::Compression as GzLevel;
use std::io::{Read, Write};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::{TlsAcceptor, TlsConnector};

use super::{with_deadline, Transport, TransportError};
use crate::codec;
use crate::envelope::{CompressionOption, EncryptionOption, Envelope};

enum StreamKind {
    Plain(TcpStream),
    TlsClient(Box<tokio_rustls::client::TlsStream<TcpStream>>),
    TlsServer(Box<tokio_rustls::server::TlsStream<TcpStream>>),
}

impl StreamKind {
    async fn read_some(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            StreamKind::Plain(s) => s.read(buf).await,
            StreamKind::TlsClient(s) => s.read(buf).await,
            StreamKind::TlsServer(s) => s.read(buf).await,
        }
    }

    async fn write_all_bytes(&mut self, data: &[u8]) -> io::Result<()> {
        match self {
            StreamKind::Plain(s) => s.write_all(data).await,
            StreamKind::TlsClient(s) => s.write_all(data).await,
            StreamKind::TlsServer(s) => s.write_all(data).await,
        }
    }
}

enum Role {
    Client { config: Option<Arc<rustls::ClientConfig>>, server_name: Option<String> },
    Server { acceptor: Option<TlsAcceptor> },
}

/// A connected TCP (optionally TLS-upgraded) transport endpoint.
pub struct TcpTransport {
    stream: Option<StreamKind>,
    role: Role,
    local_addr: SocketAddr,
    remote_addr: SocketAddr,
    compression: CompressionOption,
    encryption: EncryptionOption,
    read_buf: Vec<u8>,
    connected: bool,
}

impl TcpTransport {
    /// Dials `addr`. If `tls` is supplied, `set_encryption(Tls)` will later
    /// use it to perform the client-side handshake.
    pub async fn dial(
        addr: SocketAddr,
        tls: Option<(Arc<rustls::ClientConfig>, String)>,
    ) -> Result<Self, TransportError> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|e| TransportError::Io(e.to_string()))?;
        let local_addr = stream.local_addr().map_err(|e| TransportError::Io(e.to_string()))?;
        let (config, server_name) = match tls {
            Some((c, n)) => (Some(c), Some(n)),
            None => (None, None),
        };
        Ok(Self {
            stream: Some(StreamKind::Plain(stream)),
            role: Role::Client { config, server_name },
            local_addr,
            remote_addr: addr,
            compression: CompressionOption::None,
            encryption: EncryptionOption::None,
            read_buf: Vec::new(),
            connected: true,
        })
    }

    fn from_accepted(stream: TcpStream, acceptor: Option<TlsAcceptor>) -> Result<Self, TransportError> {
        let local_addr = stream.local_addr().map_err(|e| TransportError::Io(e.to_string()))?;
        let remote_addr = stream.peer_addr().map_err(|e| TransportError::Io(e.to_string()))?;
        Ok(Self {
            stream: Some(StreamKind::Plain(stream)),
            role: Role::Server { acceptor },
            local_addr,
            remote_addr,
            compression: CompressionOption::None,
            encryption: EncryptionOption::None,
            read_buf: Vec::new(),
            connected: true,
        })
    }

    async fn read_frame(&mut self, deadline: Option<Duration>) -> Result<Vec<u8>, TransportError> {
        const LEN_PREFIX: usize = 4;
        with_deadline(deadline, async {
            loop {
                if self.read_buf.len() >= LEN_PREFIX {
                    let len =
                        u32::from_be_bytes(self.read_buf[..LEN_PREFIX].try_into().unwrap()) as usize;
                    if len > codec::MAX_ENVELOPE_BYTES {
                        return Err(TransportError::Decode(
                            crate::codec::CodecError::TooLarge(codec::MAX_ENVELOPE_BYTES),
                        ));
                    }
                    if self.read_buf.len() >= LEN_PREFIX + len {
                        let frame = self.read_buf[LEN_PREFIX..LEN_PREFIX + len].to_vec();
                        self.read_buf.drain(..LEN_PREFIX + len);
                        return Ok(frame);
                    }
                }
                let stream = self.stream.as_mut().ok_or(TransportError::NotConnected)?;
                let mut chunk = [0u8; 4096];
                let n = stream
                    .read_some(&mut chunk)
                    .await
                    .map_err(|e| TransportError::Io(e.to_string()))?;
                if n == 0 {
                    return Err(TransportError::Closed);
                }
                self.read_buf.extend_from_slice(&chunk[..n]);
            }
        })
        .await
    }

    fn compress(&self, bytes: &[u8]) -> Result<Vec<u8>, TransportError> {
        match self.compression {
            CompressionOption::None => Ok(bytes.to_vec()),
            CompressionOption::Gzip => {
                let mut encoder = GzEncoder::new(bytes, GzLevel::default());
                let mut out = Vec::new();
                encoder
                    .read_to_end(&mut out)
                    .map_err(|e| TransportError::Io(e.to_string()))?;
                Ok(out)
            }
        }
    }

    fn decompress(&self, bytes: &[u8]) -> Result<Vec<u8>, TransportError> {
        match self.compression {
            CompressionOption::None => Ok(bytes.to_vec()),
            CompressionOption::Gzip => {
                let mut decoder = GzDecoder::new(bytes);
                let mut out = Vec::new();
                decoder
                    .read_to_end(&mut out)
                    .map_err(|e| TransportError::Io(e.to_string()))?;
                Ok(out)
            }
        }
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn send(&mut self, envelope: Envelope, deadline: Option<Duration>) -> Result<(), TransportError> {
        if !self.connected {
            return Err(TransportError::NotConnected);
        }
        let bytes = codec::encode(&envelope)?;
        let bytes = self.compress(&bytes)?;
        let len_prefix = u32::try_from(bytes.len())
            .map_err(|_| TransportError::Io("envelope too large to frame".into()))?
            .to_be_bytes();
        with_deadline(deadline, async {
            let stream = self.stream.as_mut().ok_or(TransportError::NotConnected)?;
            stream
                .write_all_bytes(&len_prefix)
                .await
                .map_err(|e| TransportError::Io(e.to_string()))?;
            stream
                .write_all_bytes(&bytes)
                .await
                .map_err(|e| TransportError::Io(e.to_string()))
        })
        .await
    }

    async fn receive(&mut self, deadline: Option<Duration>) -> Result<Envelope, TransportError> {
        let frame = self.read_frame(deadline).await?;
        let frame = self.decompress(&frame)?;
        codec::decode(&frame).map_err(TransportError::Decode)
    }

    fn supported_compression(&self) -> Vec<CompressionOption> {
        vec![CompressionOption::None, CompressionOption::Gzip]
    }

    fn compression(&self) -> CompressionOption {
        self.compression
    }

    async fn set_compression(
        &mut self,
        compression: CompressionOption,
        _deadline: Option<Duration>,
    ) -> Result<(), TransportError> {
        self.compression = compression;
        Ok(())
    }

    fn supported_encryption(&self) -> Vec<EncryptionOption> {
        vec![EncryptionOption::None, EncryptionOption::Tls]
    }

    fn encryption(&self) -> EncryptionOption {
        self.encryption
    }

    async fn set_encryption(
        &mut self,
        encryption: EncryptionOption,
        deadline: Option<Duration>,
    ) -> Result<(), TransportError> {
        if encryption == self.encryption {
            return Ok(());
        }
        if encryption != EncryptionOption::Tls {
            return Err(TransportError::Unsupported("downgrading from tls"));
        }

        let plain = match self.stream.take() {
            Some(StreamKind::Plain(s)) => s,
            other => {
                self.stream = other;
                return Err(TransportError::Unsupported("tls handshake requires a plain stream"));
            }
        };

        let upgraded = with_deadline(deadline, async {
            match &self.role {
                Role::Client { config, server_name } => {
                    let config = config
                        .clone()
                        .ok_or(TransportError::Unsupported("no client tls config supplied"))?;
                    let name = server_name
                        .clone()
                        .ok_or(TransportError::Unsupported("no tls server name supplied"))?;
                    let server_name: rustls::pki_types::ServerName<'static> = name
                        .try_into()
                        .map_err(|_| TransportError::Io("invalid tls server name".into()))?;
                    let connector = TlsConnector::from(config);
                    let tls = connector
                        .connect(server_name, plain)
                        .await
                        .map_err(|e| TransportError::Io(e.to_string()))?;
                    Ok(StreamKind::TlsClient(Box::new(tls)))
                }
                Role::Server { acceptor } => {
                    let acceptor = acceptor
                        .clone()
                        .ok_or(TransportError::Unsupported("no server tls acceptor supplied"))?;
                    let tls = acceptor
                        .accept(plain)
                        .await
                        .map_err(|e| TransportError::Io(e.to_string()))?;
                    Ok(StreamKind::TlsServer(Box::new(tls)))
                }
            }
        })
        .await;

        match upgraded {
            Ok(stream) => {
                self.stream = Some(stream);
                self.encryption = EncryptionOption::Tls;
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        if !self.connected {
            return Err(TransportError::NotConnected);
        }
        self.connected = false;
        self.stream = None;
        Ok(())
    }

    fn connected(&self) -> bool {
        self.connected
    }

    fn local_addr(&self) -> Option<String> {
        Some(self.local_addr.to_string())
    }

    fn remote_addr(&self) -> Option<String> {
        Some(self.remote_addr.to_string())
    }
}

/// Accepts inbound TCP connections, optionally wiring each into `acceptor`
/// for a later TLS upgrade.
pub struct TcpTransportListener {
    listener: TcpListener,
    acceptor: Option<TlsAcceptor>,
}

impl TcpTransportListener {
    pub async fn bind(addr: SocketAddr, acceptor: Option<TlsAcceptor>) -> Result<Self, TransportError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| TransportError::Io(e.to_string()))?;
        Ok(Self { listener, acceptor })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, TransportError> {
        self.listener
            .local_addr()
            .map_err(|e| TransportError::Io(e.to_string()))
    }

    pub async fn accept(&mut self) -> Result<TcpTransport, TransportError> {
        let (stream, _) = self
            .listener
            .accept()
            .await
            .map_err(|e| TransportError::Io(e.to_string()))?;
        TcpTransport::from_accepted(stream, self.acceptor.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::{Message, SessionEnvelope, SessionState};

    #[tokio::test]
    async fn plain_tcp_round_trips_an_envelope() {
        let mut listener = TcpTransportListener::bind("127.0.0.1:0".parse().unwrap(), None)
            .await
            .unwrap();
        let addr = listener.local_addr().unwrap();

        let server_task = tokio::spawn(async move {
            let mut server = listener.accept().await.unwrap();
            server.receive(None).await.unwrap()
        });

        let mut client = TcpTransport::dial(addr, None).await.unwrap();
        client
            .send(
                Envelope::Message(Message::new("text/plain", serde_json::json!("hello"))),
                None,
            )
            .await
            .unwrap();

        let received = server_task.await.unwrap();
        assert!(matches!(received, Envelope::Message(_)));
    }

    #[tokio::test]
    async fn gzip_compression_round_trips() {
        let mut listener = TcpTransportListener::bind("127.0.0.1:0".parse().unwrap(), None)
            .await
            .unwrap();
        let addr = listener.local_addr().unwrap();

        let server_task = tokio::spawn(async move {
            let mut server = listener.accept().await.unwrap();
            server
                .set_compression(CompressionOption::Gzip, None)
                .await
                .unwrap();
            (server.receive(None).await.unwrap(), server.receive(None).await.unwrap())
        });

        let mut client = TcpTransport::dial(addr, None).await.unwrap();
        client
            .set_compression(CompressionOption::Gzip, None)
            .await
            .unwrap();
        client
            .send(Envelope::Session(SessionEnvelope::new(SessionState::New)), None)
            .await
            .unwrap();

        // Large, high-entropy content whose gzip output is virtually
        // guaranteed to contain 0x0A bytes; exercises length-prefixed
        // framing where a newline-scanning reader would have split the
        // frame mid-stream.
        let mut rng = rand::thread_rng();
        let content: String = (0..8192).map(|_| rand::Rng::gen_range(&mut rng, 'a'..='z')).collect();
        client
            .send(
                Envelope::Message(Message::new("text/plain", serde_json::json!(content.clone()))),
                None,
            )
            .await
            .unwrap();

        let (first, second) = server_task.await.unwrap();
        assert!(matches!(first, Envelope::Session(_)));
        match second {
            Envelope::Message(message) => assert_eq!(message.content, Some(serde_json::json!(content))),
            other => panic!("expected Message, got {other:?}"),
        }
    }
}

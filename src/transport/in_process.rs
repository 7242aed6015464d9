//! In-process transport: two endpoints wired together in the same process,
//! resolved through a process-wide address registry (§6, §9 "Global state",
//! §9 "Cyclic references").
//!
//! The registry maps an opaque address string to a listener's inbox. `dial`
//! looks the address up, builds a connected pair of queues, hands one half
//! to the listener and returns the other to the caller. Each endpoint holds
//! only a non-owning channel handle to its peer — there is no `Arc<Mutex<Peer>>`
//! cycle — so `close()` is safe to call re-entrantly from a peer's own close.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::{with_deadline, Transport, TransportError};
use crate::envelope::{CompressionOption, EncryptionOption, Envelope};

const QUEUE_CAPACITY: usize = 256;

type Registry = RwLock<HashMap<String, mpsc::UnboundedSender<InProcessTransport>>>;

fn registry() -> &'static Registry {
    static REGISTRY: OnceLock<Registry> = OnceLock::new();
    REGISTRY.get_or_init(|| RwLock::new(HashMap::new()))
}

/// Listens for in-process `dial`s on `address`.
pub struct InProcessListener {
    address: String,
    inbox: mpsc::UnboundedReceiver<InProcessTransport>,
}

impl InProcessListener {
    pub fn bind(address: impl Into<String>) -> Result<Self, TransportError> {
        let address = address.into();
        let (tx, rx) = mpsc::unbounded_channel();
        let mut guard = registry()
            .write()
            .map_err(|_| TransportError::Io("in-process registry poisoned".into()))?;
        if guard.contains_key(&address) {
            return Err(TransportError::Io(format!(
                "address '{address}' already has a listener"
            )));
        }
        guard.insert(address.clone(), tx);
        Ok(Self {
            address,
            inbox: rx,
        })
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub async fn accept(&mut self) -> Result<InProcessTransport, TransportError> {
        self.inbox.recv().await.ok_or(TransportError::Closed)
    }
}

impl Drop for InProcessListener {
    fn drop(&mut self) {
        if let Ok(mut guard) = registry().write() {
            guard.remove(&self.address);
        }
    }
}

/// Connects to an in-process listener bound at `address`.
pub async fn dial(address: &str) -> Result<InProcessTransport, TransportError> {
    let sender = {
        let guard = registry()
            .read()
            .map_err(|_| TransportError::Io("in-process registry poisoned".into()))?;
        guard
            .get(address)
            .cloned()
            .ok_or(TransportError::NotConnected)?
    };

    let (client_to_server_tx, client_to_server_rx) = mpsc::channel(QUEUE_CAPACITY);
    let (server_to_client_tx, server_to_client_rx) = mpsc::channel(QUEUE_CAPACITY);
    let connected = Arc::new(AtomicBool::new(true));

    let server_side = InProcessTransport {
        tx: server_to_client_tx,
        rx: client_to_server_rx,
        local_addr: address.to_string(),
        remote_addr: "in.process:dialer".to_string(),
        connected: connected.clone(),
        encryption: EncryptionOption::None,
    };
    let client_side = InProcessTransport {
        tx: client_to_server_tx,
        rx: server_to_client_rx,
        local_addr: "in.process:dialer".to_string(),
        remote_addr: address.to_string(),
        connected,
        encryption: EncryptionOption::None,
    };

    sender
        .send(server_side)
        .map_err(|_| TransportError::NotConnected)?;
    Ok(client_side)
}

/// One endpoint of an in-process transport pair.
pub struct InProcessTransport {
    tx: mpsc::Sender<Envelope>,
    rx: mpsc::Receiver<Envelope>,
    local_addr: String,
    remote_addr: String,
    connected: Arc<AtomicBool>,
    encryption: EncryptionOption,
}

#[async_trait]
impl Transport for InProcessTransport {
    async fn send(&mut self, envelope: Envelope, deadline: Option<Duration>) -> Result<(), TransportError> {
        if !self.connected.load(Ordering::Acquire) {
            return Err(TransportError::NotConnected);
        }
        with_deadline(deadline, async {
            self.tx
                .send(envelope)
                .await
                .map_err(|_| TransportError::Closed)
        })
        .await
    }

    async fn receive(&mut self, deadline: Option<Duration>) -> Result<Envelope, TransportError> {
        with_deadline(deadline, async {
            self.rx.recv().await.ok_or(TransportError::Closed)
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
        vec![EncryptionOption::None]
    }

    fn encryption(&self) -> EncryptionOption {
        self.encryption
    }

    async fn set_encryption(
        &mut self,
        encryption: EncryptionOption,
        _deadline: Option<Duration>,
    ) -> Result<(), TransportError> {
        if encryption == self.encryption {
            Ok(())
        } else {
            Err(TransportError::Unsupported("encryption"))
        }
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        if !self.connected.swap(false, Ordering::AcqRel) {
            return Err(TransportError::NotConnected);
        }
        Ok(())
    }

    fn connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    fn local_addr(&self) -> Option<String> {
        Some(self.local_addr.clone())
    }

    fn remote_addr(&self) -> Option<String> {
        Some(self.remote_addr.clone())
    }
}

//! Channel: the session state machine, per-kind receive queues, and the
//! request/response correlator (§4.3 — "the heart of the system").
//!
//! A single reader task owns `transport.receive`; callers of `send*` go
//! through a shared async mutex around the transport so writes never
//! interleave. The reader polls `receive` with a bounded deadline rather than
//! blocking forever on it, so it periodically releases that mutex and lets
//! queued writers through instead of starving them for the lifetime of the
//! session (see `run_reader` below).
//!
//! After delivering a Session envelope, the reader parks itself until the
//! handshake driver calls [`Channel::resume_reader`] instead of immediately
//! polling `receive` again. This keeps the byte stream quiescent across a
//! `setCompression`/`setEncryption` call (§4.1): without it, the reader could
//! win the transport lock and read raw TLS handshake bytes as if they were
//! the next JSON frame, in the window between the handshake driver sending
//! or receiving a negotiating envelope and actually applying the chosen
//! transport option.

pub mod client;
pub mod server;
pub mod state;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex as SyncMutex;
use tokio::sync::{mpsc, oneshot, Mutex as AsyncMutex, Notify};
use tracing::{debug, warn};

pub use state::ChannelError;

use crate::envelope::{
    CompressionOption, EncryptionOption, Envelope, Message, Notification, Reason, RequestCommand,
    ResponseCommand, SessionEnvelope, SessionState,
};
use crate::identity::Node;
use crate::transport::{Transport, TransportError};

const QUEUE_CAPACITY: usize = 64;
const SESSION_QUEUE_CAPACITY: usize = 1;

/// How long the reader task waits on `transport.receive` before giving up
/// its lock on the transport mutex and letting a pending `send*` through.
const TRANSPORT_POLL_INTERVAL: Duration = Duration::from_millis(200);

struct Queues {
    message_tx: mpsc::Sender<Message>,
    notification_tx: mpsc::Sender<Notification>,
    request_command_tx: mpsc::Sender<RequestCommand>,
    response_command_tx: mpsc::Sender<ResponseCommand>,
    session_tx: mpsc::Sender<SessionEnvelope>,
}

type Correlator = SyncMutex<HashMap<String, oneshot::Sender<ResponseCommand>>>;

/// Wraps one connected [`Transport`], driving the session state machine and
/// exposing the established-mode envelope I/O surface.
pub struct Channel {
    transport: Arc<AsyncMutex<Box<dyn Transport>>>,
    state: Arc<SyncMutex<SessionState>>,
    session_id: SyncMutex<Option<String>>,
    local_node: SyncMutex<Option<Node>>,
    remote_node: SyncMutex<Option<Node>>,
    terminal_reason: SyncMutex<Option<Reason>>,
    correlator: Arc<Correlator>,

    message_queue: AsyncMutex<mpsc::Receiver<Message>>,
    notification_queue: AsyncMutex<mpsc::Receiver<Notification>>,
    request_command_queue: AsyncMutex<mpsc::Receiver<RequestCommand>>,
    response_command_queue: AsyncMutex<mpsc::Receiver<ResponseCommand>>,
    session_queue: AsyncMutex<mpsc::Receiver<SessionEnvelope>>,

    /// Kept alive only so `process_command`'s tie-break re-enqueue (§4.3.3)
    /// has somewhere to push a late response; cleared on close so the queue
    /// still closes once the reader task also drops its half.
    response_command_tx: SyncMutex<Option<mpsc::Sender<ResponseCommand>>>,

    receive_done: Arc<Notify>,
    receive_done_fired: Arc<AtomicBool>,
    transport_closed: Arc<AtomicBool>,
    reader: SyncMutex<Option<tokio::task::JoinHandle<()>>>,

    /// Monotonic counter bumped by [`Channel::resume_reader`]; the reader
    /// parks after each Session envelope until it observes a value greater
    /// than the one it captured just before parking.
    resume_generation: Arc<SyncMutex<u64>>,
    resume_notify: Arc<Notify>,
}

impl Channel {
    /// Wraps an already-connected transport and starts its reader task. The
    /// channel begins in `SessionState::New`.
    pub fn new(transport: Box<dyn Transport>) -> Arc<Self> {
        let (message_tx, message_rx) = mpsc::channel(QUEUE_CAPACITY);
        let (notification_tx, notification_rx) = mpsc::channel(QUEUE_CAPACITY);
        let (request_command_tx, request_command_rx) = mpsc::channel(QUEUE_CAPACITY);
        let (response_command_tx, response_command_rx) = mpsc::channel(QUEUE_CAPACITY);
        let (session_tx, session_rx) = mpsc::channel(SESSION_QUEUE_CAPACITY);

        let channel = Arc::new(Self {
            transport: Arc::new(AsyncMutex::new(transport)),
            state: Arc::new(SyncMutex::new(SessionState::New)),
            session_id: SyncMutex::new(None),
            local_node: SyncMutex::new(None),
            remote_node: SyncMutex::new(None),
            terminal_reason: SyncMutex::new(None),
            correlator: Arc::new(SyncMutex::new(HashMap::new())),
            message_queue: AsyncMutex::new(message_rx),
            notification_queue: AsyncMutex::new(notification_rx),
            request_command_queue: AsyncMutex::new(request_command_rx),
            response_command_queue: AsyncMutex::new(response_command_rx),
            session_queue: AsyncMutex::new(session_rx),
            response_command_tx: SyncMutex::new(Some(response_command_tx.clone())),
            receive_done: Arc::new(Notify::new()),
            receive_done_fired: Arc::new(AtomicBool::new(false)),
            transport_closed: Arc::new(AtomicBool::new(false)),
            reader: SyncMutex::new(None),
            resume_generation: Arc::new(SyncMutex::new(0)),
            resume_notify: Arc::new(Notify::new()),
        });

        let queues = Queues {
            message_tx,
            notification_tx,
            request_command_tx,
            response_command_tx,
            session_tx,
        };

        let handle = tokio::spawn(Self::run_reader(
            Arc::clone(&channel.transport),
            queues,
            Arc::clone(&channel.correlator),
            Arc::clone(&channel.state),
            Arc::clone(&channel.receive_done),
            Arc::clone(&channel.receive_done_fired),
            Arc::clone(&channel.transport_closed),
            Arc::clone(&channel.resume_generation),
            Arc::clone(&channel.resume_notify),
        ));
        *channel.reader.lock() = Some(handle);

        channel
    }

    async fn run_reader(
        transport: Arc<AsyncMutex<Box<dyn Transport>>>,
        queues: Queues,
        correlator: Arc<Correlator>,
        state: Arc<SyncMutex<SessionState>>,
        receive_done: Arc<Notify>,
        receive_done_fired: Arc<AtomicBool>,
        transport_closed: Arc<AtomicBool>,
        resume_generation: Arc<SyncMutex<u64>>,
        resume_notify: Arc<Notify>,
    ) {
        loop {
            if state.lock().is_terminal() {
                break;
            }

            let received = {
                let mut guard = transport.lock().await;
                guard.receive(Some(TRANSPORT_POLL_INTERVAL)).await
            };

            match received {
                Ok(envelope) => {
                    let baseline = *resume_generation.lock();
                    let was_session = Self::route(envelope, &queues, &correlator).await;
                    if was_session {
                        Self::park_until_resumed(&resume_generation, baseline, &resume_notify, &state)
                            .await;
                    }
                }
                Err(TransportError::Deadline) => continue,
                Err(TransportError::Closed) | Err(TransportError::NotConnected) => {
                    warn!(target: "lime::channel", "transport closed; failing session");
                    let mut guard = state.lock();
                    if !guard.is_terminal() {
                        *guard = SessionState::Failed;
                    }
                    break;
                }
                Err(e) => {
                    warn!(target: "lime::channel", error = %e, "transport error; failing session");
                    let mut guard = state.lock();
                    if !guard.is_terminal() {
                        *guard = SessionState::Failed;
                    }
                    break;
                }
            }
        }

        if !transport_closed.swap(true, Ordering::AcqRel) {
            let mut guard = transport.lock().await;
            let _ = guard.close().await;
        }
        drop(queues);
        receive_done_fired.store(true, Ordering::Release);
        receive_done.notify_waiters();
    }

    /// Routes one decoded envelope to its queue/correlator. Returns `true` for
    /// a Session envelope so the caller knows to park the reader until the
    /// handshake driver calls [`Channel::resume_reader`].
    async fn route(envelope: Envelope, queues: &Queues, correlator: &Correlator) -> bool {
        match envelope {
            Envelope::Session(s) => {
                let _ = queues.session_tx.send(s).await;
                true
            }
            Envelope::Message(m) => {
                let _ = queues.message_tx.send(m).await;
                false
            }
            Envelope::Notification(n) => {
                let _ = queues.notification_tx.send(n).await;
                false
            }
            Envelope::RequestCommand(c) => {
                let _ = queues.request_command_tx.send(c).await;
                false
            }
            Envelope::ResponseCommand(response) => {
                let waiter = correlator.lock().remove(response.id());
                match waiter {
                    Some(sink) => {
                        if let Err(response) = sink.send(response) {
                            // The caller already gave up (deadline/cancel) between
                            // us removing the waiter and delivering to it (§4.3.3
                            // tie-break): don't drop the response.
                            let _ = queues.response_command_tx.send(response).await;
                        }
                    }
                    None => {
                        let _ = queues.response_command_tx.send(response).await;
                    }
                }
                false
            }
        }
    }

    /// Parks the reader after delivering a Session envelope until either the
    /// generation counter advances past `baseline` (a handshake driver called
    /// [`Channel::resume_reader`]) or the session reaches a terminal state.
    /// Established is deliberately not terminal, so a handshake driver must
    /// always call `resume_reader` on entering it or the reader stalls forever.
    async fn park_until_resumed(
        resume_generation: &SyncMutex<u64>,
        baseline: u64,
        resume_notify: &Notify,
        state: &SyncMutex<SessionState>,
    ) {
        loop {
            if *resume_generation.lock() > baseline {
                return;
            }
            if state.lock().is_terminal() {
                return;
            }
            tokio::select! {
                _ = resume_notify.notified() => {}
                _ = tokio::time::sleep(TRANSPORT_POLL_INTERVAL) => {}
            }
        }
    }

    /// Monotonic transition per §4.3.4. Backward or no-op transitions are a
    /// programmer fault and panic; this is never reachable from wire input.
    pub(crate) async fn set_state(&self, next: SessionState) {
        {
            let mut guard = self.state.lock();
            assert!(
                next.step() > guard.step(),
                "illegal session state transition: {guard} -> {next}"
            );
            debug!(target: "lime::channel", from = %*guard, to = %next, "session state transition");
            *guard = next;
        }
        if next.is_terminal() {
            self.close_transport_once().await;
        }
    }

    /// Used by handshake drivers to record the session id and node identities
    /// as they become known during the handshake.
    pub(crate) fn set_session_id(&self, id: Option<String>) {
        *self.session_id.lock() = id;
    }

    pub(crate) fn set_local_node(&self, node: Option<Node>) {
        *self.local_node.lock() = node;
    }

    pub(crate) fn set_remote_node(&self, node: Option<Node>) {
        *self.remote_node.lock() = node;
    }

    pub(crate) fn set_terminal_reason(&self, reason: Option<Reason>) {
        *self.terminal_reason.lock() = reason;
    }

    /// Unparks the reader after it has delivered a Session envelope. Must be
    /// called once the handshake driver has finished acting on that envelope
    /// (applying a negotiated transport option, or simply moving on), so the
    /// reader only resumes polling `receive` once the byte stream is safe to
    /// read from again (§4.1 quiescence during `setCompression`/`setEncryption`).
    pub(crate) fn resume_reader(&self) {
        *self.resume_generation.lock() += 1;
        self.resume_notify.notify_waiters();
    }

    async fn close_transport_once(&self) {
        if !self.transport_closed.swap(true, Ordering::AcqRel) {
            let mut guard = self.transport.lock().await;
            let _ = guard.close().await;
        }
        *self.response_command_tx.lock() = None;
    }

    /// Peeks the transport's current/supported compression and encryption so
    /// the handshake drivers can compute a negotiation without holding the
    /// transport lock across the whole handshake (§4.4, §4.5).
    pub(crate) async fn transport_supported_compression(&self) -> Vec<CompressionOption> {
        self.transport.lock().await.supported_compression()
    }

    pub(crate) async fn transport_supported_encryption(&self) -> Vec<EncryptionOption> {
        self.transport.lock().await.supported_encryption()
    }

    pub(crate) async fn transport_compression(&self) -> CompressionOption {
        self.transport.lock().await.compression()
    }

    pub(crate) async fn transport_encryption(&self) -> EncryptionOption {
        self.transport.lock().await.encryption()
    }

    pub(crate) async fn set_transport_compression(
        &self,
        compression: CompressionOption,
    ) -> Result<(), ChannelError> {
        self.transport.lock().await.set_compression(compression, None).await?;
        Ok(())
    }

    pub(crate) async fn set_transport_encryption(
        &self,
        encryption: EncryptionOption,
    ) -> Result<(), ChannelError> {
        self.transport.lock().await.set_encryption(encryption, None).await?;
        Ok(())
    }

    fn ensure_state(&self, expected: SessionState) -> Result<(), ChannelError> {
        if *self.state.lock() == expected {
            Ok(())
        } else {
            Err(ChannelError::InvalidState)
        }
    }

    /// What `processCommand` reports when the reader shuts down while it was
    /// waiting on a response (§4.3.3): the terminal reason if the session
    /// failed, `NotEstablished` otherwise.
    fn closed_error(&self) -> ChannelError {
        match self.terminal_reason() {
            Some(reason) => ChannelError::SessionFailed(reason),
            None => ChannelError::NotEstablished,
        }
    }

    /// Gate for the established-mode sender surface (§4.3). A terminated
    /// channel reports `InvalidState` (Testable Property 2); any other
    /// non-established state reports `NotEstablished`.
    fn ensure_established(&self) -> Result<(), ChannelError> {
        let state = *self.state.lock();
        if state == SessionState::Established {
            Ok(())
        } else if state.is_terminal() {
            Err(ChannelError::InvalidState)
        } else {
            Err(ChannelError::NotEstablished)
        }
    }

    async fn send_envelope(&self, envelope: Envelope) -> Result<(), ChannelError> {
        let mut guard = self.transport.lock().await;
        guard.send(envelope, None).await?;
        Ok(())
    }

    pub(crate) async fn send_session(&self, envelope: SessionEnvelope) -> Result<(), ChannelError> {
        self.send_envelope(Envelope::Session(envelope)).await
    }

    /// Blocks for the next Session envelope from the peer (handshake use only).
    pub(crate) async fn receive_session(&self) -> Result<SessionEnvelope, ChannelError> {
        let mut queue = self.session_queue.lock().await;
        queue.recv().await.ok_or(ChannelError::TransportClosed)
    }

    pub async fn send_message(&self, message: Message) -> Result<(), ChannelError> {
        self.ensure_established()?;
        self.send_envelope(Envelope::Message(message)).await
    }

    pub async fn send_notification(&self, notification: Notification) -> Result<(), ChannelError> {
        self.ensure_established()?;
        self.send_envelope(Envelope::Notification(notification)).await
    }

    pub async fn send_request_command(&self, request: RequestCommand) -> Result<(), ChannelError> {
        self.ensure_established()?;
        self.send_envelope(Envelope::RequestCommand(request)).await
    }

    pub async fn send_response_command(&self, response: ResponseCommand) -> Result<(), ChannelError> {
        self.ensure_established()?;
        self.send_envelope(Envelope::ResponseCommand(response)).await
    }

    pub async fn receive_message(&self) -> Result<Message, ChannelError> {
        let mut queue = self.message_queue.lock().await;
        queue.recv().await.ok_or(ChannelError::TransportClosed)
    }

    pub async fn receive_notification(&self) -> Result<Notification, ChannelError> {
        let mut queue = self.notification_queue.lock().await;
        queue.recv().await.ok_or(ChannelError::TransportClosed)
    }

    pub async fn receive_request_command(&self) -> Result<RequestCommand, ChannelError> {
        let mut queue = self.request_command_queue.lock().await;
        queue.recv().await.ok_or(ChannelError::TransportClosed)
    }

    pub async fn receive_response_command(&self) -> Result<ResponseCommand, ChannelError> {
        let mut queue = self.response_command_queue.lock().await;
        queue.recv().await.ok_or(ChannelError::TransportClosed)
    }

    /// Sends `request`, registers a correlator waiter keyed by its id, and
    /// returns the first matching response (§4.3.3).
    pub async fn process_command(
        &self,
        request: RequestCommand,
        deadline: Option<Duration>,
    ) -> Result<ResponseCommand, ChannelError> {
        self.ensure_established()?;
        let id = request.id().to_string();
        if id.is_empty() {
            return Err(ChannelError::InvalidArgument("request id must not be empty".into()));
        }

        let (tx, rx) = oneshot::channel();
        {
            let mut guard = self.correlator.lock();
            if guard.contains_key(&id) {
                return Err(ChannelError::DuplicateRequest);
            }
            guard.insert(id.clone(), tx);
        }

        if let Err(e) = self.send_envelope(Envelope::RequestCommand(request)).await {
            self.correlator.lock().remove(&id);
            return Err(e);
        }

        let result = match deadline {
            Some(d) => tokio::select! {
                r = rx => r.map_err(|_| ChannelError::TransportClosed),
                _ = tokio::time::sleep(d) => Err(ChannelError::Deadline),
                _ = self.receive_done() => Err(self.closed_error()),
            },
            None => tokio::select! {
                r = rx => r.map_err(|_| ChannelError::TransportClosed),
                _ = self.receive_done() => Err(self.closed_error()),
            },
        };

        self.correlator.lock().remove(&id);
        result
    }

    pub fn local_node(&self) -> Option<Node> {
        self.local_node.lock().clone()
    }

    pub fn remote_node(&self) -> Option<Node> {
        self.remote_node.lock().clone()
    }

    pub fn session_id(&self) -> Option<String> {
        self.session_id.lock().clone()
    }

    pub fn state(&self) -> SessionState {
        *self.state.lock()
    }

    pub fn established(&self) -> bool {
        self.state() == SessionState::Established
    }

    pub fn terminal_reason(&self) -> Option<Reason> {
        self.terminal_reason.lock().clone()
    }

    /// A one-shot signal that fires once the reader task has exited. Awaiting
    /// it after it has already fired returns immediately.
    pub async fn receive_done(&self) {
        if self.receive_done_fired.load(Ordering::Acquire) {
            return;
        }
        self.receive_done.notified().await;
    }

    /// Closes the channel from any state: stops the reader, closes the
    /// per-kind queues, and closes the transport, unblocking any caller
    /// waiting on a queue or on `process_command`.
    pub async fn close(&self) {
        {
            let mut guard = self.state.lock();
            if !guard.is_terminal() {
                *guard = SessionState::Failed;
            }
        }
        self.close_transport_once().await;
        if let Some(handle) = self.reader.lock().take() {
            handle.abort();
        }
        self.receive_done_fired.store(true, Ordering::Release);
        self.receive_done.notify_waiters();
    }
}

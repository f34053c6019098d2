//! Keeps one replicated document in sync across a peer network.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};

use serde_json::Value;
use tokio::sync::{Notify, mpsc};
use tokio::task::JoinHandle;
use yrs::StateVector;

use super::message::{OPERATION, STATE_REQUEST, STATE_RESPONSE, SyncMessage};
use crate::config::{BootstrapConfig, NodeConfig, RetryPolicy};
use crate::crdt::TelepathicObject;
use crate::error::Result;
use crate::network::{self, BoxFuture, Message, PeerInfo, PeerNetwork, PeerStatus};
use crate::transaction::{TransactionLog, default_naming_strategy};

/// v1 encoding of an update with no changes.
const EMPTY_UPDATE: &[u8] = &[0, 0];

/// Synchronizes one [`TelepathicObject`] with every peer that shares its object ID.
///
/// The coordinator registers handlers for the three sync messages and for
/// peer status changes on construction. When a peer connects it asks that peer
/// for its full state; incoming states and operations are merged into the
/// local document; local writes are broadcast as deltas.
///
/// Cloning yields another handle to the same coordinator.
///
/// # Example
///
/// ```ignore
/// use telepathy_core::network::MemoryHub;
/// use telepathy_core::SyncCoordinator;
///
/// let hub = MemoryHub::new();
/// let alice = SyncCoordinator::new(hub.add_peer("alice"), "doc1");
/// let bob = SyncCoordinator::new(hub.add_peer("bob"), "doc1");
///
/// alice.network().connect_to_peer("bob").await;
/// alice.set_field_async("title", json!("Hello"), "").await?;
/// assert_eq!(bob.get_field("title"), Some(json!("Hello")));
/// ```
pub struct SyncCoordinator<N: PeerNetwork + ?Sized> {
    inner: Arc<Inner<N>>,
}

struct Inner<N: PeerNetwork + ?Sized> {
    object_id: String,
    network: Arc<N>,
    /// Never held across an await.
    store: Mutex<TelepathicObject>,
    /// State vector as of the last delta handed to the network.
    last_broadcast_state: Mutex<StateVector>,
    peers: RwLock<HashMap<String, PeerStatus>>,
    outbound: mpsc::UnboundedSender<Vec<u8>>,
    /// Taken by `run`; drained in place by `flush`.
    queue: Mutex<Option<mpsc::UnboundedReceiver<Vec<u8>>>>,
    stopped: AtomicBool,
    stop_signal: Notify,
    bootstrap: Option<BootstrapConfig>,
    retry: RetryPolicy,
    history_dir: Option<PathBuf>,
}

impl<N: PeerNetwork + ?Sized> Clone for SyncCoordinator<N> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<N: PeerNetwork + ?Sized> SyncCoordinator<N> {
    /// Create a coordinator for `object_id` with an empty document.
    pub fn new(network: Arc<N>, object_id: impl Into<String>) -> Self {
        Self::with_object(network, object_id, TelepathicObject::new())
    }

    /// Create a coordinator around an existing document.
    pub fn with_object(
        network: Arc<N>,
        object_id: impl Into<String>,
        store: TelepathicObject,
    ) -> Self {
        Self::build(
            network,
            object_id.into(),
            store,
            None,
            RetryPolicy::default(),
            None,
        )
    }

    /// Create a coordinator from node configuration.
    ///
    /// If `history_dir` holds a saved history it is replayed into the document.
    pub fn from_config(network: Arc<N>, config: &NodeConfig) -> Result<Self> {
        let mut store = TelepathicObject::new();
        if let Some(dir) = config.history_dir.as_ref().filter(|dir| dir.is_dir()) {
            let history = TransactionLog::load_history(dir)?;
            let applied = store.replay(&history)?;
            log::info!(
                "Restored '{}' from {} transactions in {}",
                config.object_id,
                applied,
                dir.display()
            );
        }

        Ok(Self::build(
            network,
            config.object_id.clone(),
            store,
            config.bootstrap.clone(),
            config.retry.clone(),
            config.history_dir.clone(),
        ))
    }

    fn build(
        network: Arc<N>,
        object_id: String,
        store: TelepathicObject,
        bootstrap: Option<BootstrapConfig>,
        retry: RetryPolicy,
        history_dir: Option<PathBuf>,
    ) -> Self {
        let (outbound, queue) = mpsc::unbounded_channel();
        let marker = store.state_vector();

        let inner = Arc::new(Inner {
            object_id,
            network,
            store: Mutex::new(store),
            last_broadcast_state: Mutex::new(marker),
            peers: RwLock::new(HashMap::new()),
            outbound,
            queue: Mutex::new(Some(queue)),
            stopped: AtomicBool::new(false),
            stop_signal: Notify::new(),
            bootstrap,
            retry,
            history_dir,
        });
        Inner::register_handlers(&inner);
        log::debug!(
            "Sync coordinator for '{}' registered on peer {}",
            inner.object_id,
            inner.network.peer_id()
        );

        Self { inner }
    }

    // ==================== Local Writes ====================

    /// Set `value` at `path` and queue the resulting delta for broadcast.
    ///
    /// Returns as soon as the local document is updated; the queued delta is
    /// sent by [`run`](Self::run) or [`flush`](Self::flush).
    pub fn set_field(&self, path: &str, value: Value, message: &str) -> Result<()> {
        let Some(delta) = self.inner.commit_local(path, value, message)? else {
            return Ok(());
        };
        if self.is_stopped() {
            log::debug!(
                "Coordinator for '{}' stopped, not queueing delta",
                self.inner.object_id
            );
            return Ok(());
        }
        if self.inner.outbound.send(delta).is_err() {
            log::warn!("Outbound queue for '{}' is closed", self.inner.object_id);
        }
        Ok(())
    }

    /// Set `value` at `path` and broadcast the resulting delta before returning.
    ///
    /// Only local failures are returned; a failed broadcast is logged and the
    /// local change stays.
    pub async fn set_field_async(&self, path: &str, value: Value, message: &str) -> Result<()> {
        if let Some(delta) = self.inner.commit_local(path, value, message)?
            && !self.is_stopped()
        {
            self.inner.broadcast_delta(delta).await;
        }
        Ok(())
    }

    // ==================== Outbound Queue ====================

    /// Broadcast queued deltas until [`stop`](Self::stop) is called.
    ///
    /// Only one loop can own the queue; a second concurrent call returns at once.
    pub async fn run(&self) {
        let taken = self.inner.queue.lock().unwrap().take();
        let Some(mut queue) = taken else {
            log::warn!(
                "Sync loop for '{}' is already running",
                self.inner.object_id
            );
            return;
        };
        log::debug!("Sync loop for '{}' started", self.inner.object_id);

        while !self.is_stopped() {
            tokio::select! {
                _ = self.inner.stop_signal.notified() => break,
                next = queue.recv() => match next {
                    Some(delta) if !self.is_stopped() => {
                        self.inner.broadcast_delta(delta).await;
                    }
                    Some(_) => break,
                    None => break,
                },
            }
        }

        let mut dropped = 0;
        while queue.try_recv().is_ok() {
            dropped += 1;
        }
        log::debug!(
            "Sync loop for '{}' stopped, dropped {} queued deltas",
            self.inner.object_id,
            dropped
        );
    }

    /// Broadcast everything currently queued. Returns how many deltas were sent.
    ///
    /// Does nothing while [`run`](Self::run) owns the queue.
    pub async fn flush(&self) -> usize {
        let pending: Vec<Vec<u8>> = {
            let mut guard = self.inner.queue.lock().unwrap();
            let Some(queue) = guard.as_mut() else {
                return 0;
            };
            std::iter::from_fn(|| queue.try_recv().ok()).collect()
        };
        if self.is_stopped() {
            return 0;
        }

        let count = pending.len();
        for delta in pending {
            self.inner.broadcast_delta(delta).await;
        }
        count
    }

    /// Stop scheduling work. Queued deltas are dropped and incoming messages ignored.
    pub fn stop(&self) {
        if !self.inner.stopped.swap(true, Ordering::SeqCst) {
            self.inner.stop_signal.notify_one();
            log::info!("Sync coordinator for '{}' stopped", self.inner.object_id);
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.inner.stopped.load(Ordering::SeqCst)
    }

    /// Run [`run`](Self::run) on the current tokio runtime.
    pub fn spawn(&self) -> JoinHandle<()> {
        let coordinator = self.clone();
        tokio::spawn(async move { coordinator.run().await })
    }

    // ==================== Connectivity ====================

    /// Connect to the configured bootstrap node, retrying with backoff.
    ///
    /// Returns false if no bootstrap node is configured or it stayed unreachable.
    pub async fn bootstrap(&self) -> bool {
        let Some(bootstrap) = self.inner.bootstrap.as_ref() else {
            log::warn!(
                "No bootstrap node configured for '{}'",
                self.inner.object_id
            );
            return false;
        };
        network::connect_with_retry(
            self.inner.network.as_ref(),
            &bootstrap.host,
            bootstrap.port,
            &self.inner.retry,
        )
        .await
    }

    /// Ask `peer_id` for its full state.
    pub async fn request_state(&self, peer_id: &str) -> bool {
        self.inner.request_state(peer_id).await
    }

    /// Last reported status of `peer_id`.
    pub fn peer_status(&self, peer_id: &str) -> PeerStatus {
        self.inner
            .peers
            .read()
            .unwrap()
            .get(peer_id)
            .copied()
            .unwrap_or_default()
    }

    pub fn known_peers(&self) -> Vec<PeerInfo> {
        self.inner.network.known_peers()
    }

    // ==================== Reads ====================

    pub fn object_id(&self) -> &str {
        &self.inner.object_id
    }

    pub fn network(&self) -> &Arc<N> {
        &self.inner.network
    }

    pub fn get_field(&self, path: &str) -> Option<Value> {
        self.inner.store.lock().unwrap().get(path)
    }

    pub fn get_field_or(&self, path: &str, default: Value) -> Value {
        self.inner.store.lock().unwrap().get_or(path, default)
    }

    pub fn to_dict(&self) -> Value {
        self.inner.store.lock().unwrap().to_dict()
    }

    pub fn to_json(&self) -> String {
        self.inner.store.lock().unwrap().to_json()
    }

    /// Snapshot of the document's transaction log.
    pub fn transaction_log(&self) -> TransactionLog {
        self.inner.store.lock().unwrap().transaction_log().clone()
    }

    /// Run `f` with read access to the document.
    pub fn with_object_ref<R>(&self, f: impl FnOnce(&TelepathicObject) -> R) -> R {
        let store = self.inner.store.lock().unwrap();
        f(&*store)
    }

    /// Write the transaction log to the configured history directory.
    ///
    /// Returns the written paths, or nothing if no directory is configured.
    pub fn save_history(&self) -> Result<Vec<PathBuf>> {
        let Some(dir) = self.inner.history_dir.as_ref() else {
            return Ok(Vec::new());
        };
        let transactions = self.transaction_log();
        transactions.save_history(dir, default_naming_strategy)
    }
}

impl<N: PeerNetwork + ?Sized> std::fmt::Debug for SyncCoordinator<N> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncCoordinator")
            .field("object_id", &self.inner.object_id)
            .field("peer_id", &self.inner.network.peer_id())
            .field("stopped", &self.is_stopped())
            .finish()
    }
}

impl<N: PeerNetwork + ?Sized> Inner<N> {
    fn register_handlers(inner: &Arc<Self>) {
        for message_type in [STATE_REQUEST, STATE_RESPONSE, OPERATION] {
            let weak: Weak<Self> = Arc::downgrade(inner);
            inner.network.on_message(
                message_type,
                Arc::new(move |message: Message| -> BoxFuture<'static, ()> {
                    let weak = weak.clone();
                    Box::pin(async move {
                        if let Some(inner) = weak.upgrade() {
                            inner.handle_message(message).await;
                        }
                    })
                }),
            );
        }

        let weak: Weak<Self> = Arc::downgrade(inner);
        let handler = move |peer_id: String, status: PeerStatus| -> BoxFuture<'static, ()> {
            let weak = weak.clone();
            Box::pin(async move {
                if let Some(inner) = weak.upgrade() {
                    inner.handle_peer_status(peer_id, status).await;
                }
            })
        };
        inner.network.on_peer_status_change(Arc::new(handler));
    }

    fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Apply a local write and take the delta since the last broadcast.
    fn commit_local(&self, path: &str, value: Value, message: &str) -> Result<Option<Vec<u8>>> {
        let mut store = self.store.lock().unwrap();
        store.set(path, value, message)?;

        let mut marker = self.last_broadcast_state.lock().unwrap();
        let delta = store.encode_delta_since(&marker);
        *marker = store.state_vector();

        Ok((delta != EMPTY_UPDATE).then_some(delta))
    }

    async fn broadcast_delta(&self, delta: Vec<u8>) -> usize {
        let message = SyncMessage::operation(self.object_id.clone(), delta).into_message();
        match self.network.broadcast(message).await {
            Ok(count) => {
                log::debug!(
                    "Broadcast '{}' operation to {} peers",
                    self.object_id,
                    count
                );
                count
            }
            Err(e) => {
                log::warn!("Failed to broadcast '{}' operation: {}", self.object_id, e);
                0
            }
        }
    }

    async fn request_state(&self, peer_id: &str) -> bool {
        let request = SyncMessage::state_request(self.object_id.clone()).into_message();
        self.send_to(peer_id, request, "state request").await
    }

    async fn send_to(&self, peer_id: &str, message: Message, what: &str) -> bool {
        match self.network.send_message(peer_id, message).await {
            Ok(true) => true,
            Ok(false) => {
                log::warn!(
                    "Could not deliver {} for '{}' to {}",
                    what,
                    self.object_id,
                    peer_id
                );
                false
            }
            Err(e) => {
                log::warn!(
                    "Failed to send {} for '{}' to {}: {}",
                    what,
                    self.object_id,
                    peer_id,
                    e
                );
                false
            }
        }
    }

    async fn handle_peer_status(&self, peer_id: String, status: PeerStatus) {
        if self.is_stopped() {
            return;
        }
        self.peers.write().unwrap().insert(peer_id.clone(), status);
        log::debug!("Peer {} is now {}", peer_id, status);

        if status.is_connected() {
            self.request_state(&peer_id).await;
        }
    }

    async fn handle_message(&self, message: Message) {
        if self.is_stopped() {
            return;
        }

        let sync = match SyncMessage::from_message(&message) {
            Ok(sync) => sync,
            Err(e) => {
                log::warn!("Dropping malformed sync message: {}", e);
                return;
            }
        };
        if sync.object_id() != self.object_id {
            log::debug!(
                "Ignoring {} for object '{}' (this is '{}')",
                sync.message_type(),
                sync.object_id(),
                self.object_id
            );
            return;
        }

        let sender = message.sender.as_deref().unwrap_or("unknown");
        match sync {
            SyncMessage::StateRequest { .. } => {
                let Some(sender) = message.sender.as_deref() else {
                    log::warn!("State request for '{}' has no sender", self.object_id);
                    return;
                };
                let state = self.store.lock().unwrap().encode_state_as_update();
                let object_id = self.object_id.clone();
                let response = SyncMessage::state_response(object_id, state).into_message();
                self.send_to(sender, response, "state response").await;
            }
            SyncMessage::StateResponse { state_data, .. } => {
                self.apply_remote(&state_data, "state response", sender);
            }
            SyncMessage::Operation { operation_data, .. } => {
                self.apply_remote(&operation_data, "operation", sender);
            }
        }
    }

    fn apply_remote(&self, update: &[u8], what: &str, sender: &str) {
        let mut store = self.store.lock().unwrap();
        match store.apply_update(update) {
            Ok(()) => {
                *self.last_broadcast_state.lock().unwrap() = store.state_vector();
                log::debug!("Applied {} for '{}' from {}", what, self.object_id, sender);
            }
            Err(e) => {
                log::warn!(
                    "Discarding {} for '{}' from {} ({}): {}",
                    what,
                    self.object_id,
                    sender,
                    e.kind(),
                    e
                );
            }
        }
    }
}

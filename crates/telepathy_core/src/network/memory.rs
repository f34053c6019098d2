//! In-process peer mesh.
//!
//! [`MemoryHub`] connects any number of [`MemoryPeer`]s living in the same
//! process. Delivery is awaited inline: `send_message` returns only after the
//! recipient's handler (and everything it sends in turn) has completed, which
//! keeps multi-peer tests deterministic.
//!
//! # Example
//!
//! ```ignore
//! use telepathy_core::network::{MemoryHub, PeerNetwork};
//!
//! let hub = MemoryHub::new();
//! let alice = hub.add_peer("alice");
//! let bob = hub.add_peer("bob");
//!
//! assert!(alice.connect_to_peer("bob").await);
//! hub.disconnect("alice", "bob").await;
//! ```

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};

use super::{BoxFuture, Message, MessageHandler, PeerInfo, PeerNetwork, PeerStatus, StatusHandler};
use crate::error::Result;

/// Address scheme used for in-memory peers.
const ADDRESS_PREFIX: &str = "memory://";

/// Unordered pair of peer ids.
type Link = (String, String);

fn link(a: &str, b: &str) -> Link {
    if a <= b {
        (a.to_string(), b.to_string())
    } else {
        (b.to_string(), a.to_string())
    }
}

/// Shared registry of in-memory peers and the links between them.
///
/// Cloning a hub yields another handle to the same mesh.
#[derive(Clone, Default)]
pub struct MemoryHub {
    state: Arc<HubState>,
}

#[derive(Default)]
struct HubState {
    peers: RwLock<HashMap<String, Arc<PeerHandlers>>>,
    links: RwLock<HashSet<Link>>,
    /// Links that have existed at some point, with their last activity.
    last_seen: RwLock<HashMap<Link, DateTime<Utc>>>,
    /// `host:port` -> peer id
    bootstraps: RwLock<HashMap<String, String>>,
}

#[derive(Default)]
struct PeerHandlers {
    messages: RwLock<HashMap<String, MessageHandler>>,
    status: RwLock<Vec<StatusHandler>>,
}

impl MemoryHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a peer to the mesh. Re-adding an id replaces its handlers.
    pub fn add_peer(&self, peer_id: impl Into<String>) -> Arc<MemoryPeer> {
        let peer_id = peer_id.into();
        let handlers = Arc::new(PeerHandlers::default());
        self.state
            .peers
            .write()
            .unwrap()
            .insert(peer_id.clone(), handlers.clone());

        Arc::new(MemoryPeer {
            peer_id,
            hub: self.clone(),
            handlers,
        })
    }

    /// Make `peer_id` reachable as a bootstrap node at `host:port`.
    pub fn register_bootstrap(&self, host: &str, port: u16, peer_id: impl Into<String>) {
        self.state
            .bootstraps
            .write()
            .unwrap()
            .insert(format!("{host}:{port}"), peer_id.into());
    }

    /// Ids of every peer in the mesh.
    pub fn peer_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.state.peers.read().unwrap().keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn is_connected(&self, a: &str, b: &str) -> bool {
        self.state.links.read().unwrap().contains(&link(a, b))
    }

    /// Link two peers, reporting the change to both sides.
    ///
    /// Returns false if either peer is unknown or they are the same peer.
    pub async fn connect(&self, from: &str, to: &str) -> bool {
        if from == to || !self.has_peer(from) || !self.has_peer(to) {
            return false;
        }
        if self.is_connected(from, to) {
            return true;
        }

        self.notify_status(from, to, PeerStatus::Connecting).await;
        self.state.links.write().unwrap().insert(link(from, to));
        self.touch(from, to);
        log::debug!("Memory link {} <-> {} up", from, to);

        self.notify_status(from, to, PeerStatus::Connected).await;
        self.notify_status(to, from, PeerStatus::Connected).await;
        true
    }

    /// Break the link between two peers, reporting the change to both sides.
    pub async fn disconnect(&self, a: &str, b: &str) -> bool {
        let removed = self.state.links.write().unwrap().remove(&link(a, b));
        if !removed {
            return false;
        }
        log::debug!("Memory link {} <-> {} down", a, b);

        self.notify_status(a, b, PeerStatus::Disconnected).await;
        self.notify_status(b, a, PeerStatus::Disconnected).await;
        true
    }

    fn has_peer(&self, peer_id: &str) -> bool {
        self.state.peers.read().unwrap().contains_key(peer_id)
    }

    fn touch(&self, a: &str, b: &str) {
        self.state
            .last_seen
            .write()
            .unwrap()
            .insert(link(a, b), Utc::now());
    }

    fn linked_peers(&self, peer_id: &str) -> Vec<String> {
        let mut peers: Vec<String> = self
            .state
            .links
            .read()
            .unwrap()
            .iter()
            .filter_map(|(a, b)| match (a == peer_id, b == peer_id) {
                (true, _) => Some(b.clone()),
                (_, true) => Some(a.clone()),
                _ => None,
            })
            .collect();
        peers.sort();
        peers
    }

    async fn notify_status(&self, observer: &str, subject: &str, status: PeerStatus) {
        let handlers: Vec<StatusHandler> = match self.state.peers.read().unwrap().get(observer) {
            Some(peer) => peer.status.read().unwrap().clone(),
            None => return,
        };
        for handler in handlers {
            handler(subject.to_string(), status).await;
        }
    }

    /// Hand `message` to `to`'s handler. False if the peers are not linked.
    async fn deliver(&self, from: &str, to: &str, message: Message) -> bool {
        if !self.is_connected(from, to) {
            return false;
        }
        let handler = match self.state.peers.read().unwrap().get(to) {
            Some(peer) => peer
                .messages
                .read()
                .unwrap()
                .get(&message.message_type)
                .cloned(),
            None => return false,
        };
        self.touch(from, to);

        match handler {
            Some(handler) => handler(message).await,
            None => log::debug!(
                "Peer {} has no handler for '{}' messages",
                to,
                message.message_type
            ),
        }
        true
    }

    fn known_peers(&self, observer: &str) -> Vec<PeerInfo> {
        let linked: HashSet<String> = self.linked_peers(observer).into_iter().collect();
        let last_seen = self.state.last_seen.read().unwrap();

        self.peer_ids()
            .into_iter()
            .filter(|id| id != observer)
            .map(|id| {
                let seen = last_seen.get(&link(observer, &id)).copied();
                let status = if linked.contains(&id) {
                    PeerStatus::Connected
                } else if seen.is_some() {
                    PeerStatus::Disconnected
                } else {
                    PeerStatus::NeverConnected
                };
                PeerInfo {
                    address: format!("{ADDRESS_PREFIX}{id}"),
                    peer_id: id,
                    status,
                    last_seen: seen,
                }
            })
            .collect()
    }
}

/// One peer's handle onto a [`MemoryHub`].
pub struct MemoryPeer {
    peer_id: String,
    hub: MemoryHub,
    handlers: Arc<PeerHandlers>,
}

impl MemoryPeer {
    /// Ids of the peers currently linked to this one.
    pub fn connected_peers(&self) -> Vec<String> {
        self.hub.linked_peers(&self.peer_id)
    }
}

impl PeerNetwork for MemoryPeer {
    fn peer_id(&self) -> &str {
        &self.peer_id
    }

    fn on_message(&self, message_type: &str, handler: MessageHandler) {
        let previous = self
            .handlers
            .messages
            .write()
            .unwrap()
            .insert(message_type.to_string(), handler);
        if previous.is_some() {
            log::debug!(
                "Peer {} replaced its handler for '{}' messages",
                self.peer_id,
                message_type
            );
        }
    }

    fn on_peer_status_change(&self, handler: StatusHandler) {
        self.handlers.status.write().unwrap().push(handler);
    }

    fn send_message<'a>(
        &'a self,
        peer_id: &'a str,
        message: Message,
    ) -> BoxFuture<'a, Result<bool>> {
        Box::pin(async move {
            let message = message
                .with_sender(self.peer_id.clone())
                .with_recipient(peer_id);
            Ok(self.hub.deliver(&self.peer_id, peer_id, message).await)
        })
    }

    fn broadcast<'a>(&'a self, message: Message) -> BoxFuture<'a, Result<usize>> {
        Box::pin(async move {
            let message = message.with_sender(self.peer_id.clone());
            let mut delivered = 0;
            for peer in self.hub.linked_peers(&self.peer_id) {
                let outgoing = message.clone();
                if self.hub.deliver(&self.peer_id, &peer, outgoing).await {
                    delivered += 1;
                }
            }
            Ok(delivered)
        })
    }

    fn connect_to_peer<'a>(&'a self, address: &'a str) -> BoxFuture<'a, bool> {
        Box::pin(async move {
            let target = address.strip_prefix(ADDRESS_PREFIX).unwrap_or(address);
            self.hub.connect(&self.peer_id, target).await
        })
    }

    fn connect_to_bootstrap<'a>(&'a self, host: &'a str, port: u16) -> BoxFuture<'a, bool> {
        Box::pin(async move {
            let target = self
                .hub
                .state
                .bootstraps
                .read()
                .unwrap()
                .get(&format!("{host}:{port}"))
                .cloned();
            match target {
                Some(target) => self.hub.connect(&self.peer_id, &target).await,
                None => {
                    log::debug!("No bootstrap node registered at {}:{}", host, port);
                    false
                }
            }
        })
    }

    fn known_peers(&self) -> Vec<PeerInfo> {
        self.hub.known_peers(&self.peer_id)
    }
}

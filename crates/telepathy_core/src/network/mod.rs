//! Peer network abstraction.
//!
//! Sync coordinators talk to other peers only through [`PeerNetwork`]. Real
//! transports (libp2p, WebSocket relays, ...) implement the trait outside this
//! crate; [`MemoryHub`] provides an in-process mesh for tests and local
//! simulations.
//!
//! # Handler registration
//!
//! A network keeps one [`MessageHandler`] per message type: registering a
//! second handler for the same type replaces the first. Status handlers are
//! additive and each one sees every connectivity report.

mod bootstrap;
mod memory;
mod message;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

pub use bootstrap::connect_with_retry;
pub use memory::{MemoryHub, MemoryPeer};
pub use message::{Message, PeerInfo, PeerStatus};

pub(crate) use message::deserialize_wire_timestamp;

use crate::error::Result;

/// A boxed future that is Send (for tokio-hosted coordinators).
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Callback for incoming messages of one type.
pub type MessageHandler = Arc<dyn Fn(Message) -> BoxFuture<'static, ()> + Send + Sync>;

/// Callback for peer connectivity changes: `(peer_id, status)`.
pub type StatusHandler = Arc<dyn Fn(String, PeerStatus) -> BoxFuture<'static, ()> + Send + Sync>;

/// Transport used by sync coordinators.
///
/// Methods that touch the wire return boxed futures so the trait stays object
/// safe and usable as `Arc<dyn PeerNetwork>`.
pub trait PeerNetwork: Send + Sync + 'static {
    /// Identifier of the local peer.
    fn peer_id(&self) -> &str;

    /// Route messages of `message_type` to `handler`, replacing any earlier handler.
    fn on_message(&self, message_type: &str, handler: MessageHandler);

    /// Register a handler for connectivity changes of remote peers.
    fn on_peer_status_change(&self, handler: StatusHandler);

    /// Send `message` to one peer.
    ///
    /// `Ok(false)` means the peer could not be reached.
    fn send_message<'a>(
        &'a self,
        peer_id: &'a str,
        message: Message,
    ) -> BoxFuture<'a, Result<bool>>;

    /// Send `message` to every connected peer, returning roughly how many received it.
    fn broadcast<'a>(&'a self, message: Message) -> BoxFuture<'a, Result<usize>>;

    /// Open a connection to the peer at `address`.
    fn connect_to_peer<'a>(&'a self, address: &'a str) -> BoxFuture<'a, bool>;

    /// Open a connection to a bootstrap node.
    fn connect_to_bootstrap<'a>(&'a self, host: &'a str, port: u16) -> BoxFuture<'a, bool>;

    /// Remote peers this network has seen.
    fn known_peers(&self) -> Vec<PeerInfo>;
}

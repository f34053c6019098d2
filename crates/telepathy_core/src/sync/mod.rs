//! Peer-to-peer synchronization of telepathic objects.
//!
//! A [`SyncCoordinator`] ties one document to a network-wide object ID and
//! speaks a three-message protocol over any [`PeerNetwork`](crate::network::PeerNetwork):
//!
//! - `crdt_state_request`: sent to a peer as soon as it connects
//! - `crdt_state_response`: the full document state, in reply to a request
//! - `crdt_operation`: an incremental delta, broadcast after each local write
//!
//! Messages for other object IDs are ignored. CRDT merging is commutative and
//! idempotent, so duplicated or reordered deliveries converge.

mod coordinator;
mod message;

pub use coordinator::SyncCoordinator;
pub use message::{OPERATION, STATE_REQUEST, STATE_RESPONSE, SyncMessage};

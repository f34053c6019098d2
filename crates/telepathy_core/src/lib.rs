#![doc = include_str!("../README.md")]

/// Configuration options
pub mod config;

/// CRDT document store (path-addressed replicated documents)
pub mod crdt;

/// Error (common error types)
pub mod error;

/// Peer network abstraction and in-memory mesh
pub mod network;

/// Peer-to-peer sync protocol
pub mod sync;

/// Transaction log (deterministic IDs, persistence, replay)
pub mod transaction;

#[cfg(test)]
pub mod test_utils;

pub use crdt::{DocPath, TelepathicObject};
pub use error::{Result, TelepathyError};
pub use sync::SyncCoordinator;
pub use transaction::{Action, Transaction, TransactionLog};

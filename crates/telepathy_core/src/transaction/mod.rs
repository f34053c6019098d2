//! Deterministic, replayable transaction log.
//!
//! Every mutation of a [`TelepathicObject`](crate::TelepathicObject) is
//! recorded as a [`Transaction`] whose ID is a content hash of what changed,
//! when, and why. Logs can be persisted one entry per file and replayed into a
//! fresh document to reproduce it.
//!
//! # Example
//!
//! ```ignore
//! use telepathy_core::TelepathicObject;
//! use telepathy_core::transaction::{TransactionLog, default_naming_strategy, replay};
//!
//! let mut doc = TelepathicObject::with_data(json!({"title": "Draft"}), "create")?;
//! doc.set("title", json!("Final"), "rename")?;
//!
//! doc.transaction_log().save_history("history/", default_naming_strategy)?;
//!
//! let history = TransactionLog::load_history("history/")?;
//! let mut copy = TelepathicObject::new();
//! replay(&history, &mut copy)?;
//! assert_eq!(copy.to_dict(), doc.to_dict());
//! ```

mod entry;
mod history;
mod journal;
mod replay;

pub use entry::{Action, Transaction, parse_timestamp};
pub use history::default_naming_strategy;
pub use journal::TransactionLog;
pub use replay::{apply, replay};

//! Append-only transaction log and single-entry persistence.

use std::path::Path;

use serde_json::Value;

use super::entry::{Action, Transaction};
use crate::error::{Result, TelepathyError};

/// Ordered, append-only record of every mutation of one document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransactionLog {
    entries: Vec<Transaction>,
}

impl TransactionLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a log from entries already in mutation order.
    pub fn from_entries(entries: Vec<Transaction>) -> Self {
        Self { entries }
    }

    /// Record a mutation that happened now and return the new entry.
    pub fn log(
        &mut self,
        action: impl Into<Action>,
        path: impl Into<String>,
        value: Value,
        message: impl Into<String>,
    ) -> &Transaction {
        let entry = Transaction::new(action, path, value, message);
        log::debug!("Logged transaction {}", entry);
        self.push(entry)
    }

    /// Append an existing entry.
    pub fn push(&mut self, entry: Transaction) -> &Transaction {
        self.entries.push(entry);
        &self.entries[self.entries.len() - 1]
    }

    pub fn entries(&self) -> &[Transaction] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn last(&self) -> Option<&Transaction> {
        self.entries.last()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Transaction> {
        self.entries.iter()
    }

    // ==================== Serialization ====================

    /// Serialize one entry to its JSON form.
    pub fn serialize(entry: &Transaction) -> Result<Value> {
        Ok(serde_json::to_value(entry)?)
    }

    /// Deserialize one entry, recomputing a missing ID.
    pub fn deserialize(value: Value) -> Result<Transaction> {
        let mut entry: Transaction = serde_json::from_value(value)?;
        entry.ensure_id();
        Ok(entry)
    }

    /// Deserialize one entry from a JSON string.
    pub fn deserialize_str(json: &str) -> Result<Transaction> {
        Self::deserialize(serde_json::from_str(json)?)
    }

    /// Write one entry to `path` as pretty-printed JSON.
    pub fn save(entry: &Transaction, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let json = serde_json::to_string_pretty(&Self::serialize(entry)?)?;
        std::fs::write(path, json).map_err(|source| TelepathyError::FileWrite {
            path: path.to_path_buf(),
            source,
        })?;
        log::debug!("Saved transaction {} to {}", entry, path.display());
        Ok(())
    }

    /// Read one entry from `path`.
    pub fn load(path: impl AsRef<Path>) -> Result<Transaction> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|source| TelepathyError::FileRead {
            path: path.to_path_buf(),
            source,
        })?;
        Self::deserialize_str(&json)
    }
}

impl<'a> IntoIterator for &'a TransactionLog {
    type Item = &'a Transaction;
    type IntoIter = std::slice::Iter<'a, Transaction>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

impl IntoIterator for TransactionLog {
    type Item = Transaction;
    type IntoIter = std::vec::IntoIter<Transaction>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

//! Directory-backed transaction history.
//!
//! A history is a directory of `txn_<name>.json` files, one per entry. Each
//! saved entry carries its `sequence_number`, so the logical order survives
//! renames and filesystem listing order. Older files without the field fall
//! back to the number encoded in the second `_`-separated part of the name.

use std::path::{Path, PathBuf};

use super::entry::Transaction;
use super::journal::TransactionLog;
use crate::error::{Result, TelepathyError};

const FILE_PREFIX: &str = "txn_";
const FILE_SUFFIX: &str = ".json";

/// Default history file name: zero-padded index and the short ID.
pub fn default_naming_strategy(entry: &Transaction, index: usize) -> String {
    format!("{index:04}_{}", entry.short_id())
}

impl TransactionLog {
    /// Write every entry to `directory` as `txn_<name>.json`, creating it if needed.
    ///
    /// Returns the written paths in log order.
    pub fn save_history<F>(
        &self,
        directory: impl AsRef<Path>,
        naming_strategy: F,
    ) -> Result<Vec<PathBuf>>
    where
        F: Fn(&Transaction, usize) -> String,
    {
        let directory = directory.as_ref();
        std::fs::create_dir_all(directory).map_err(|source| TelepathyError::FileWrite {
            path: directory.to_path_buf(),
            source,
        })?;

        let mut written = Vec::with_capacity(self.len());
        for (index, entry) in self.iter().enumerate() {
            let mut entry = entry.clone();
            entry.sequence_number = Some(index as u64);

            let name = naming_strategy(&entry, index);
            let path = directory.join(format!("{FILE_PREFIX}{name}{FILE_SUFFIX}"));
            TransactionLog::save(&entry, &path)?;
            written.push(path);
        }

        log::info!(
            "Saved {} transactions to {}",
            written.len(),
            directory.display()
        );
        Ok(written)
    }

    /// Read a history directory back into a log in sequence order.
    ///
    /// Unreadable or malformed files are logged and skipped. Entries with no
    /// recoverable sequence number are placed after all numbered entries.
    pub fn load_history(directory: impl AsRef<Path>) -> Result<TransactionLog> {
        let directory = directory.as_ref();
        let listing = std::fs::read_dir(directory).map_err(|source| TelepathyError::FileRead {
            path: directory.to_path_buf(),
            source,
        })?;

        let mut loaded: Vec<(Option<u64>, String, Transaction)> = Vec::new();
        for dir_entry in listing {
            let dir_entry = dir_entry?;
            let file_name = dir_entry.file_name().to_string_lossy().into_owned();
            if !file_name.starts_with(FILE_PREFIX) || !file_name.ends_with(FILE_SUFFIX) {
                continue;
            }

            let mut entry = match TransactionLog::load(dir_entry.path()) {
                Ok(entry) => entry,
                Err(e) => {
                    log::warn!("Skipping unreadable transaction file {}: {}", file_name, e);
                    continue;
                }
            };

            let sequence = entry
                .sequence_number
                .or_else(|| sequence_from_file_name(&file_name));
            entry.sequence_number = sequence;
            loaded.push((sequence, file_name, entry));
        }

        loaded.sort_by(|(seq_a, name_a, _), (seq_b, name_b, _)| {
            (seq_a.is_none(), seq_a, name_a).cmp(&(seq_b.is_none(), seq_b, name_b))
        });

        log::info!(
            "Loaded {} transactions from {}",
            loaded.len(),
            directory.display()
        );
        let entries = loaded.into_iter().map(|(_, _, entry)| entry).collect();
        Ok(TransactionLog::from_entries(entries))
    }
}

fn sequence_from_file_name(file_name: &str) -> Option<u64> {
    file_name
        .strip_suffix(FILE_SUFFIX)?
        .split('_')
        .nth(1)?
        .parse()
        .ok()
}

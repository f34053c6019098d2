//! Applying logged transactions to a document.

use serde_json::Value;

use super::entry::{Action, Transaction};
use crate::crdt::{DocPath, TelepathicObject};
use crate::error::{Result, TelepathyError};

/// Apply one logged transaction to `store`.
///
/// The entry is fully validated before the store is touched: a malformed or
/// unknown entry leaves the store and its log unchanged.
pub fn apply(entry: &Transaction, store: &mut TelepathicObject) -> Result<()> {
    if entry.path.is_empty() {
        return Err(TelepathyError::MalformedTransaction(format!("{entry} has an empty path")));
    }

    match &entry.action {
        Action::Init => store.reset(entry.value.clone(), &entry.message),
        Action::Set => {
            let new_value = set_target(entry)?;
            store.set(&entry.path, new_value, &entry.message)
        }
        Action::Unknown(name) => Err(TelepathyError::UnknownAction(name.clone())),
    }
}

/// Apply entries in order, stopping at the first failure.
///
/// Returns the number of entries applied.
pub fn replay<'a, I>(entries: I, store: &mut TelepathicObject) -> Result<usize>
where
    I: IntoIterator<Item = &'a Transaction>,
{
    let mut applied = 0;
    for entry in entries {
        apply(entry, store)?;
        applied += 1;
    }
    log::debug!("Replayed {} transactions", applied);
    Ok(applied)
}

fn set_target(entry: &Transaction) -> Result<Value> {
    if DocPath::parse(&entry.path).is_err() {
        return Err(TelepathyError::MalformedTransaction(format!("{entry} has no path segments")));
    }
    match &entry.value {
        Value::Object(map) if map.contains_key("old") && map.contains_key("new") => {
            Ok(map["new"].clone())
        }
        _ => Err(TelepathyError::MalformedTransaction(format!(
            "{} must carry an object with 'old' and 'new'",
            entry
        ))),
    }
}

//! Path-addressable replicated document.
//!
//! This module provides `TelepathicObject`, a Y.Doc holding one nested
//! document under the root map `"data"`. Values are read and written by
//! slash-separated paths, and every write is recorded in the document's
//! [`TransactionLog`].

use std::path::Path;

use serde_json::{Map as JsonMap, Value, json};
use yrs::{
    Array, Doc, Map, MapRef, Out, ReadTxn, StateVector, Transact, Update, updates::decoder::Decode,
    updates::encoder::Encode,
};

use super::convert::{check_storable, from_out, map_to_value, to_crdt};
use super::path::{DocPath, parse_index};
use crate::error::{Result, TelepathyError};
use crate::transaction::{self, Action, Transaction, TransactionLog};

/// Name of the Y.Map holding the document.
const ROOT_MAP_NAME: &str = "data";

/// A replicated nested document with a transaction log.
///
/// A new object is uninitialized until it receives data, either from
/// [`with_data`](Self::with_data), a first [`set`](Self::set), a loaded
/// snapshot or a remote update.
///
/// # Example
///
/// ```ignore
/// use telepathy_core::TelepathicObject;
/// use serde_json::json;
///
/// let mut doc = TelepathicObject::new();
/// doc.set("settings/theme", json!("dark"), "pick theme")?;
/// doc.set("settings/fonts", json!(["mono", "serif"]), "")?;
///
/// assert_eq!(doc.get("settings/theme"), Some(json!("dark")));
/// assert_eq!(doc.transaction_log().len(), 2);
///
/// // Bring another replica up to date
/// let mut replica = TelepathicObject::new();
/// replica.apply_update(&doc.encode_state_as_update())?;
/// assert_eq!(replica.to_dict(), doc.to_dict());
/// ```
pub struct TelepathicObject {
    doc: Doc,
    root: MapRef,
    initialized: bool,
    log: TransactionLog,
}

impl TelepathicObject {
    /// Create an empty, uninitialized document.
    pub fn new() -> Self {
        let doc = Doc::new();
        let root = doc.get_or_insert_map(ROOT_MAP_NAME);

        Self {
            doc,
            root,
            initialized: false,
            log: TransactionLog::new(),
        }
    }

    /// Create a document holding `data`. `null` gives an empty document.
    pub fn with_data(data: Value, message: &str) -> Result<Self> {
        let mut object = Self::new();
        object.reset(data, message)?;
        Ok(object)
    }

    /// Replace the whole document in one CRDT transaction and log `"init"`.
    pub(crate) fn reset(&mut self, data: Value, message: &str) -> Result<()> {
        let data = match data {
            Value::Null => JsonMap::new(),
            Value::Object(map) => map,
            _ => return Err(TelepathyError::InvalidRoot),
        };
        data.values().try_for_each(check_storable)?;

        {
            let mut txn = self.doc.transact_mut();
            self.root.clear(&mut txn);
            for (key, value) in &data {
                self.root.insert(&mut txn, key.as_str(), to_crdt(value));
            }
        }

        self.initialized = true;
        let snapshot = Value::Object(data);
        self.log.log(Action::Init, "/", snapshot, message);
        Ok(())
    }

    // ==================== Path Operations ====================

    /// Assign `value` at `path` and log the change.
    ///
    /// Setting into an uninitialized document initializes it with the
    /// smallest nested object that holds `value` at `path`. Sequences replacing
    /// sequences are swapped whole at their parent container. Anything else is
    /// applied to a native copy and the affected top-level entry is rewritten,
    /// so conflicts are reported before the document changes.
    pub fn set(&mut self, path: &str, value: Value, message: &str) -> Result<()> {
        let doc_path = DocPath::parse(path)?;
        check_storable(&value)?;

        if !self.initialized {
            log::debug!("Initializing document from first write at '{}'", doc_path);
            return self.reset(doc_path.scaffold(value), message);
        }

        let snapshot = self.to_dict();
        let old = doc_path.get(&snapshot).cloned().unwrap_or(Value::Null);

        let replaced =
            old.is_array() && value.is_array() && self.replace_sequence(&doc_path, &value);
        if !replaced {
            let mut updated = snapshot;
            doc_path.assign(&mut updated, value.clone())?;

            let key = doc_path.first();
            let entry = updated.get(key).cloned().unwrap_or(Value::Null);
            let mut txn = self.doc.transact_mut();
            self.root.insert(&mut txn, key, to_crdt(&entry));
        }

        let change = json!({"old": old, "new": value});
        self.log.log(Action::Set, path, change, message);
        Ok(())
    }

    /// Swap the sequence at `path` inside its parent CRDT container.
    ///
    /// Returns false if the parent could not be resolved to a container.
    fn replace_sequence(&self, path: &DocPath, value: &Value) -> bool {
        let mut txn = self.doc.transact_mut();
        let Some(parent) = path.parent() else {
            self.root.insert(&mut txn, path.last(), to_crdt(value));
            return true;
        };

        match resolve(&self.root, &txn, parent.segments()) {
            Some(Out::YMap(map)) => {
                map.insert(&mut txn, path.last(), to_crdt(value));
                true
            }
            Some(Out::YArray(array)) => {
                let Some(index) = parse_index(path.last()) else {
                    return false;
                };
                let Ok(index) = u32::try_from(index) else {
                    return false;
                };
                if index >= array.len(&txn) {
                    return false;
                }
                array.remove_range(&mut txn, index, 1);
                array.insert(&mut txn, index, to_crdt(value));
                true
            }
            _ => false,
        }
    }

    /// Read the value at `path`. Missing or malformed paths give `None`.
    pub fn get(&self, path: &str) -> Option<Value> {
        let doc_path = DocPath::parse(path).ok()?;
        let txn = self.doc.transact();
        resolve(&self.root, &txn, doc_path.segments()).map(|out| from_out(&out, &txn))
    }

    /// Read the value at `path`, or `default` if there is none.
    pub fn get_or(&self, path: &str, default: Value) -> Value {
        self.get(path).unwrap_or(default)
    }

    /// The whole document as a native object.
    pub fn to_dict(&self) -> Value {
        let txn = self.doc.transact();
        map_to_value(&self.root, &txn)
    }

    /// The whole document as compact JSON with sorted keys.
    pub fn to_json(&self) -> String {
        self.to_dict().to_string()
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn transaction_log(&self) -> &TransactionLog {
        &self.log
    }

    // ==================== Sync Operations ====================

    /// Encode the current state vector.
    pub fn encode_state_vector(&self) -> Vec<u8> {
        self.state_vector().encode_v1()
    }

    /// Encode the full state as an update.
    pub fn encode_state_as_update(&self) -> Vec<u8> {
        self.encode_delta_since(&StateVector::default())
    }

    /// Encode the changes a peer with `remote_state_vector` is missing.
    pub fn encode_diff(&self, remote_state_vector: &[u8]) -> Result<Vec<u8>> {
        let sv = StateVector::decode_v1(remote_state_vector).map_err(|e| {
            TelepathyError::IncompatibleUpdate(format!("Failed to decode state vector: {}", e))
        })?;
        Ok(self.encode_delta_since(&sv))
    }

    /// Merge a remote update into this document.
    ///
    /// Fails with [`TelepathyError::IncompatibleUpdate`] if the bytes cannot be
    /// decoded or applied; the document is unchanged in that case.
    pub fn apply_update(&mut self, update: &[u8]) -> Result<()> {
        let decoded = Update::decode_v1(update).map_err(|e| {
            TelepathyError::IncompatibleUpdate(format!("Failed to decode update: {}", e))
        })?;

        let mut txn = self.doc.transact_mut();
        txn.apply_update(decoded).map_err(|e| {
            TelepathyError::IncompatibleUpdate(format!("Failed to apply update: {}", e))
        })?;

        if self.root.len(&txn) > 0 {
            self.initialized = true;
        }
        Ok(())
    }

    /// Snapshot of the current state vector.
    pub fn state_vector(&self) -> StateVector {
        self.doc.transact().state_vector()
    }

    /// Encode everything applied after `since`.
    pub fn encode_delta_since(&self, since: &StateVector) -> Vec<u8> {
        self.doc.transact().encode_state_as_update_v1(since)
    }

    // ==================== Persistence ====================

    /// Write the full document state to `path`.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let bytes = self.encode_state_as_update();
        std::fs::write(path, bytes).map_err(|source| TelepathyError::FileWrite {
            path: path.to_path_buf(),
            source,
        })?;
        log::info!("Saved document to {}", path.display());
        Ok(())
    }

    /// Load a document saved with [`save`](Self::save).
    ///
    /// The new document's log starts with an `"init"` entry holding the
    /// loaded snapshot.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let bytes = std::fs::read(path).map_err(|source| TelepathyError::FileRead {
            path: path.to_path_buf(),
            source,
        })?;

        let mut object = Self::new();
        object.apply_update(&bytes)?;
        object.initialized = true;

        let snapshot = object.to_dict();
        let message = format!("Loaded from {}", path.display());
        object.log.log(Action::Init, "/", snapshot, message);
        log::info!("Loaded document from {}", path.display());
        Ok(object)
    }

    // ==================== Transactions ====================

    /// Apply one logged transaction to this document.
    pub fn apply_transaction(&mut self, entry: &Transaction) -> Result<()> {
        transaction::apply(entry, self)
    }

    /// Apply logged transactions in order. Returns how many were applied.
    pub fn replay<'a, I>(&mut self, entries: I) -> Result<usize>
    where
        I: IntoIterator<Item = &'a Transaction>,
    {
        transaction::replay(entries, self)
    }
}

impl Default for TelepathicObject {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for TelepathicObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelepathicObject")
            .field("initialized", &self.initialized)
            .field("transactions", &self.log.len())
            .field("data", &self.to_dict())
            .finish()
    }
}

/// Walk `segments` from the root map through nested CRDT containers.
fn resolve<T: ReadTxn>(root: &MapRef, txn: &T, segments: &[String]) -> Option<Out> {
    let (first, rest) = segments.split_first()?;
    let mut current = root.get(txn, first)?;
    for segment in rest {
        current = match current {
            Out::YMap(map) => map.get(txn, segment)?,
            Out::YArray(array) => {
                let index = u32::try_from(parse_index(segment)?).ok()?;
                array.get(txn, index)?
            }
            Out::Any(yrs::Any::Map(map)) => Out::Any(map.get(segment.as_str())?.clone()),
            Out::Any(yrs::Any::Array(items)) => {
                Out::Any(items.get(parse_index(segment)?)?.clone())
            }
            _ => return None,
        };
    }
    Some(current)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample() -> TelepathicObject {
        TelepathicObject::with_data(
            json!({"title": "Notes", "meta": {"tags": ["a", "b"], "views": 1}}),
            "create",
        )
        .unwrap()
    }

    #[test]
    fn test_new_object_is_uninitialized() {
        let doc = TelepathicObject::new();
        assert!(!doc.is_initialized());
        assert!(doc.transaction_log().is_empty());
        assert_eq!(doc.to_dict(), json!({}));
        assert_eq!(doc.get("anything"), None);
    }

    #[test]
    fn test_with_data_logs_init() {
        let doc = sample();
        assert!(doc.is_initialized());
        let entry = doc.transaction_log().last().unwrap();
        assert_eq!(entry.action, Action::Init);
        assert_eq!(entry.path, "/");
        assert_eq!(entry.value, doc.to_dict());
    }

    #[test]
    fn test_with_data_rejects_scalar_root() {
        assert!(matches!(
            TelepathicObject::with_data(json!(5), ""),
            Err(TelepathyError::InvalidRoot)
        ));
    }

    #[test]
    fn test_first_set_initializes_with_scaffold() {
        let mut doc = TelepathicObject::new();
        doc.set("a/b/c", json!(1), "first").unwrap();

        assert!(doc.is_initialized());
        assert_eq!(doc.to_dict(), json!({"a": {"b": {"c": 1}}}));
        let entry = doc.transaction_log().last().unwrap();
        assert_eq!(entry.action, Action::Init);
        assert_eq!(entry.value, json!({"a": {"b": {"c": 1}}}));
    }

    #[test]
    fn test_set_then_get() {
        let mut doc = sample();
        for (path, value) in [
            ("title", json!("Renamed")),
            ("meta/views", json!(2)),
            ("meta/author/name", json!("Ada")),
            ("meta/tags/1", json!("z")),
            ("meta/ratio", json!(0.5)),
            ("flag", json!(false)),
            ("nothing", json!(null)),
        ] {
            doc.set(path, value.clone(), "").unwrap();
            assert_eq!(doc.get(path), Some(value), "path {path}");
        }
        assert_eq!(doc.get("meta/tags"), Some(json!(["a", "z"])));
        assert_eq!(doc.get("title"), Some(json!("Renamed")));
    }

    #[test]
    fn test_set_logs_old_and_new() {
        let mut doc = sample();
        doc.set("title", json!("Renamed"), "rename").unwrap();
        doc.set("fresh", json!(1), "add").unwrap();

        let entries = doc.transaction_log().entries();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[1].action, Action::Set);
        assert_eq!(entries[1].value, json!({"old": "Notes", "new": "Renamed"}));
        assert_eq!(entries[1].message, "rename");
        assert_eq!(entries[2].value, json!({"old": null, "new": 1}));
    }

    #[test]
    fn test_sequence_replacement_is_atomic() {
        let mut doc = sample();
        doc.set("meta/tags", json!(["x"]), "").unwrap();
        assert_eq!(doc.get("meta/tags"), Some(json!(["x"])));
        assert_eq!(doc.get("meta/views"), Some(json!(1)));

        doc.set("rows", json!([[1, 2], [3]]), "").unwrap();
        doc.set("rows/0", json!([9]), "").unwrap();
        assert_eq!(doc.get("rows"), Some(json!([[9], [3]])));

        doc.set("rows", json!([]), "").unwrap();
        assert_eq!(doc.get("rows"), Some(json!([])));
    }

    #[test]
    fn test_conflict_leaves_document_untouched() {
        let mut doc = sample();
        let before = doc.to_dict();
        let log_len = doc.transaction_log().len();

        let result = doc.set("title/sub", json!(1), "");
        assert!(matches!(result, Err(TelepathyError::PathConflict { .. })));

        let result = doc.set("meta/tags/name", json!(1), "");
        assert!(matches!(result, Err(TelepathyError::PathConflict { .. })));

        assert_eq!(doc.to_dict(), before);
        assert_eq!(doc.transaction_log().len(), log_len);
    }

    #[test]
    fn test_empty_path_rejected() {
        let mut doc = sample();
        assert!(matches!(doc.set("/", json!(1), ""), Err(TelepathyError::EmptyPath)));
        assert_eq!(doc.get(""), None);
    }

    #[test]
    fn test_signed_or_padded_segments_are_not_indices() {
        let mut doc = sample();
        let before = doc.to_dict();

        assert_eq!(doc.get("meta/tags/1"), Some(json!("b")));
        assert_eq!(doc.get("meta/tags/+1"), None);
        assert_eq!(doc.get("meta/tags/01"), None);

        let result = doc.set("meta/tags/+1", json!(9), "");
        assert!(matches!(result, Err(TelepathyError::PathConflict { .. })));
        assert_eq!(doc.to_dict(), before);
    }

    #[test]
    fn test_integer_beyond_i64_rejected() {
        let mut doc = sample();
        let before = doc.to_dict();
        let result = doc.set("n", json!(u64::MAX), "");
        assert!(matches!(result, Err(TelepathyError::UnsupportedNumber(_))));
        assert_eq!(doc.to_dict(), before);
        assert_eq!(doc.transaction_log().len(), 1);

        let mut fresh = TelepathicObject::new();
        assert!(fresh.set("deep/n", json!([u64::MAX]), "").is_err());
        assert!(!fresh.is_initialized());

        assert!(TelepathicObject::with_data(json!({"n": u64::MAX}), "").is_err());
        doc.set("n", json!(i64::MAX), "").unwrap();
        assert_eq!(doc.get("n"), Some(json!(i64::MAX)));
    }

    #[test]
    fn test_get_or_default() {
        let doc = sample();
        assert_eq!(doc.get_or("missing", json!("fallback")), json!("fallback"));
        assert_eq!(doc.get_or("title", json!("fallback")), json!("Notes"));
        assert_eq!(doc.get_or("title/deeper", json!(0)), json!(0));
    }

    #[test]
    fn test_to_json_is_sorted() {
        let doc = TelepathicObject::with_data(json!({"b": 1, "a": {"d": 2, "c": 3}}), "").unwrap();
        assert_eq!(doc.to_json(), r#"{"a":{"c":3,"d":2},"b":1}"#);
    }

    #[test]
    fn test_sync_between_docs() {
        let mut source = sample();
        source.set("title", json!("Synced"), "").unwrap();

        let mut replica = TelepathicObject::new();
        let update = source.encode_state_as_update();
        replica.apply_update(&update).unwrap();

        assert!(replica.is_initialized());
        assert_eq!(replica.to_dict(), source.to_dict());
        assert!(replica.transaction_log().is_empty());
    }

    #[test]
    fn test_encode_diff_and_idempotent_apply() {
        let mut a = sample();
        let mut b = TelepathicObject::new();
        b.apply_update(&a.encode_state_as_update()).unwrap();

        a.set("meta/views", json!(10), "").unwrap();
        let diff = a.encode_diff(&b.encode_state_vector()).unwrap();
        b.apply_update(&diff).unwrap();
        b.apply_update(&diff).unwrap();

        assert_eq!(b.to_dict(), a.to_dict());
    }

    #[test]
    fn test_delta_since_marker() {
        let mut doc = sample();
        let marker = doc.state_vector();
        assert_eq!(doc.encode_delta_since(&marker), vec![0, 0]);

        doc.set("title", json!("Changed"), "").unwrap();
        assert_ne!(doc.encode_delta_since(&marker), vec![0, 0]);
    }

    #[test]
    fn test_garbage_update_is_incompatible() {
        let mut doc = sample();
        let before = doc.to_dict();
        let result = doc.apply_update(&[0xff, 0x13, 0x37]);
        assert!(matches!(result, Err(TelepathyError::IncompatibleUpdate(_))));
        assert_eq!(doc.to_dict(), before);

        assert!(matches!(
            doc.encode_diff(&[0xff, 0xff]),
            Err(TelepathyError::IncompatibleUpdate(_))
        ));
    }

    #[test]
    fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("doc.bin");

        let doc = sample();
        doc.save(&path).unwrap();

        let loaded = TelepathicObject::load(&path).unwrap();
        assert_eq!(loaded.to_dict(), doc.to_dict());
        assert!(loaded.is_initialized());

        let entries = loaded.transaction_log().entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].action, Action::Init);
        assert_eq!(entries[0].value, doc.to_dict());
    }

    #[test]
    fn test_load_missing_file() {
        let dir = TempDir::new().unwrap();
        let result = TelepathicObject::load(dir.path().join("missing.bin"));
        assert!(matches!(result, Err(TelepathyError::FileRead { .. })));
    }

    #[test]
    fn test_concurrent_edits_converge() {
        let mut a = sample();
        let mut b = TelepathicObject::new();
        b.apply_update(&a.encode_state_as_update()).unwrap();

        a.set("left", json!("from a"), "").unwrap();
        b.set("right", json!("from b"), "").unwrap();

        let a_update = a.encode_state_as_update();
        let b_update = b.encode_state_as_update();
        a.apply_update(&b_update).unwrap();
        b.apply_update(&a_update).unwrap();

        assert_eq!(a.to_dict(), b.to_dict());
        assert_eq!(a.get("left"), Some(json!("from a")));
        assert_eq!(a.get("right"), Some(json!("from b")));
    }
}

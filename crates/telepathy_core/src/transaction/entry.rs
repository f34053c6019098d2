//! A single immutable transaction record.

use std::fmt;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Value, json};
use sha2::{Digest, Sha256};

/// Timestamp precision that participates in the transaction ID.
const ID_TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// Kind of mutation a transaction records.
///
/// Actions written by newer peers are kept as [`Action::Unknown`] so a log
/// can round-trip through this version without losing them.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Action {
    /// Whole-document initialization.
    Init,
    /// Path assignment.
    Set,
    Unknown(String),
}

impl Action {
    pub fn as_str(&self) -> &str {
        match self {
            Action::Init => "init",
            Action::Set => "set",
            Action::Unknown(name) => name,
        }
    }
}

impl From<&str> for Action {
    fn from(name: &str) -> Self {
        match name {
            "init" => Action::Init,
            "set" => Action::Set,
            other => Action::Unknown(other.to_string()),
        }
    }
}

impl From<String> for Action {
    fn from(name: String) -> Self {
        Action::from(name.as_str())
    }
}

impl From<Action> for String {
    fn from(action: Action) -> Self {
        action.as_str().to_string()
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable record of one document mutation.
///
/// `transaction_id` is the hex SHA-256 of the canonical JSON form of
/// `{action, message, path, timestamp, value}` with the timestamp truncated to
/// whole seconds, so two peers recording the same change in the same second
/// agree on its identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    #[serde(deserialize_with = "deserialize_timestamp")]
    pub timestamp: DateTime<Utc>,
    pub action: Action,
    pub path: String,
    #[serde(default)]
    pub value: Value,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub transaction_id: String,
    /// Position of this entry in a saved history, if it came from one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sequence_number: Option<u64>,
}

impl Transaction {
    /// Record a mutation that happens now.
    pub fn new(
        action: impl Into<Action>,
        path: impl Into<String>,
        value: Value,
        message: impl Into<String>,
    ) -> Self {
        Self::with_timestamp(action, path, value, message, Utc::now())
    }

    /// Record a mutation at an explicit time.
    pub fn with_timestamp(
        action: impl Into<Action>,
        path: impl Into<String>,
        value: Value,
        message: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        let mut txn = Self {
            timestamp,
            action: action.into(),
            path: path.into(),
            value,
            message: message.into(),
            transaction_id: String::new(),
            sequence_number: None,
        };
        txn.transaction_id = txn.compute_id();
        txn
    }

    /// Hash of the identifying fields. Does not read `transaction_id` itself.
    pub fn compute_id(&self) -> String {
        let payload = json!({
            "action": self.action.as_str(),
            "message": self.message,
            "path": self.path,
            "timestamp": self.timestamp.format(ID_TIMESTAMP_FORMAT).to_string(),
            "value": self.value,
        });

        let mut canonical = String::new();
        write_canonical(&payload, &mut canonical);
        format!("{:x}", Sha256::digest(canonical.as_bytes()))
    }

    /// First eight characters of the ID.
    pub fn short_id(&self) -> &str {
        let end = self
            .transaction_id
            .char_indices()
            .nth(8)
            .map_or(self.transaction_id.len(), |(i, _)| i);
        &self.transaction_id[..end]
    }

    /// Whether the stored ID matches the recorded fields.
    pub fn verify(&self) -> bool {
        self.transaction_id == self.compute_id()
    }

    pub(crate) fn ensure_id(&mut self) {
        if self.transaction_id.is_empty() {
            self.transaction_id = self.compute_id();
        }
    }
}

impl fmt::Display for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} ({})", self.action, self.path, self.short_id())
    }
}

/// Compact JSON with object keys sorted at every level.
fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(&map[key], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

/// Parse an ISO-8601 timestamp. Timestamps without an offset are taken as UTC.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f"))
        .ok()
        .map(|naive| naive.and_utc())
}

fn deserialize_timestamp<'de, D>(deserializer: D) -> std::result::Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse_timestamp(&raw)
        .ok_or_else(|| serde::de::Error::custom(format!("invalid timestamp '{raw}'")))
}

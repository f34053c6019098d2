//! Wire envelope and peer bookkeeping types.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::error::{Result, TelepathyError};
use crate::transaction::parse_timestamp;

/// A message exchanged between peers.
///
/// `content` is free-form JSON interpreted according to `message_type`.
/// `recipient` is `None` for broadcasts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    #[serde(rename = "type")]
    pub message_type: String,
    #[serde(default)]
    pub content: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recipient: Option<String>,
    #[serde(default = "Utc::now", deserialize_with = "deserialize_wire_timestamp")]
    pub timestamp: DateTime<Utc>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum WireTimestamp {
    EpochSeconds(f64),
    Iso(String),
}

/// Accept either an ISO-8601 string or seconds since the Unix epoch.
pub(crate) fn deserialize_wire_timestamp<'de, D>(
    deserializer: D,
) -> std::result::Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let parsed = match WireTimestamp::deserialize(deserializer)? {
        WireTimestamp::EpochSeconds(secs) => {
            DateTime::<Utc>::from_timestamp_micros((secs * 1_000_000.0).round() as i64)
        }
        WireTimestamp::Iso(raw) => parse_timestamp(&raw),
    };
    parsed.ok_or_else(|| serde::de::Error::custom("invalid timestamp"))
}

impl Message {
    pub fn new(message_type: impl Into<String>, content: Value) -> Self {
        Self {
            message_type: message_type.into(),
            content,
            sender: None,
            recipient: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_sender(mut self, sender: impl Into<String>) -> Self {
        self.sender = Some(sender.into());
        self
    }

    pub fn with_recipient(mut self, recipient: impl Into<String>) -> Self {
        self.recipient = Some(recipient.into());
        self
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| TelepathyError::InvalidMessage(e.to_string()))
    }
}

/// Connectivity of a remote peer as last reported by the network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum PeerStatus {
    #[default]
    NeverConnected,
    Disconnected,
    Connecting,
    Connected,
}

impl PeerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PeerStatus::NeverConnected => "never_connected",
            PeerStatus::Disconnected => "disconnected",
            PeerStatus::Connecting => "connecting",
            PeerStatus::Connected => "connected",
        }
    }

    pub fn is_connected(&self) -> bool {
        matches!(self, PeerStatus::Connected)
    }
}

impl FromStr for PeerStatus {
    type Err = std::convert::Infallible;

    /// Unrecognized states are treated as disconnected.
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(match s {
            "connected" => PeerStatus::Connected,
            "connecting" => PeerStatus::Connecting,
            "never_connected" => PeerStatus::NeverConnected,
            _ => PeerStatus::Disconnected,
        })
    }
}

impl From<String> for PeerStatus {
    fn from(s: String) -> Self {
        match s.parse() {
            Ok(status) => status,
            Err(never) => match never {},
        }
    }
}

impl From<PeerStatus> for String {
    fn from(status: PeerStatus) -> Self {
        status.as_str().to_string()
    }
}

impl fmt::Display for PeerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a network knows about one remote peer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeerInfo {
    pub peer_id: String,
    pub address: String,
    #[serde(default)]
    pub status: PeerStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_seen: Option<DateTime<Utc>>,
}

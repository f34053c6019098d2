use std::path::PathBuf;

use thiserror::Error;

/// Unified error type for telepathy operations
#[derive(Debug, Error)]
pub enum TelepathyError {
    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to read file '{path}': {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to write file '{path}': {source}")]
    FileWrite {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // Document errors
    #[error("Path '{path}' conflicts with existing data at segment '{segment}'")]
    PathConflict { path: String, segment: String },

    #[error("Path must contain at least one segment")]
    EmptyPath,

    #[error("Document root must be an object")]
    InvalidRoot,

    #[error("Number {0} is outside the signed 64-bit integer range")]
    UnsupportedNumber(String),

    // Transaction log errors
    #[error("Malformed transaction: {0}")]
    MalformedTransaction(String),

    #[error("Unknown transaction action: '{0}'")]
    UnknownAction(String),

    // Sync errors
    #[error("Incompatible update: {0}")]
    IncompatibleUpdate(String),

    #[error("Delivery failed: {0}")]
    DeliveryFailure(String),

    #[error("Invalid sync message: {0}")]
    InvalidMessage(String),

    // Config errors
    #[error("Config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("Config serialize error: {0}")]
    ConfigSerialize(#[from] toml::ser::Error),
}

impl TelepathyError {
    /// Variant name, for reporting.
    pub fn kind(&self) -> &'static str {
        match self {
            TelepathyError::Io(_) => "Io",
            TelepathyError::FileRead { .. } => "FileRead",
            TelepathyError::FileWrite { .. } => "FileWrite",
            TelepathyError::Json(_) => "Json",
            TelepathyError::PathConflict { .. } => "PathConflict",
            TelepathyError::EmptyPath => "EmptyPath",
            TelepathyError::InvalidRoot => "InvalidRoot",
            TelepathyError::UnsupportedNumber(_) => "UnsupportedNumber",
            TelepathyError::MalformedTransaction(_) => "MalformedTransaction",
            TelepathyError::UnknownAction(_) => "UnknownAction",
            TelepathyError::IncompatibleUpdate(_) => "IncompatibleUpdate",
            TelepathyError::DeliveryFailure(_) => "DeliveryFailure",
            TelepathyError::InvalidMessage(_) => "InvalidMessage",
            TelepathyError::ConfigParse(_) => "ConfigParse",
            TelepathyError::ConfigSerialize(_) => "ConfigSerialize",
        }
    }
}

/// Result type alias for telepathy operations
pub type Result<T> = std::result::Result<T, TelepathyError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_name_the_offending_input() {
        let err = TelepathyError::PathConflict {
            path: "a/b".to_string(),
            segment: "a".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Path 'a/b' conflicts with existing data at segment 'a'"
        );

        let err = TelepathyError::FileWrite {
            path: PathBuf::from("/tmp/doc.bin"),
            source: std::io::Error::other("disk full"),
        };
        let message = err.to_string();
        assert!(message.contains("/tmp/doc.bin"));
        assert!(message.contains("disk full"));
    }

    #[test]
    fn test_kind_names_the_variant() {
        assert_eq!(TelepathyError::EmptyPath.kind(), "EmptyPath");
        let err = TelepathyError::IncompatibleUpdate("truncated".to_string());
        assert_eq!(err.kind(), "IncompatibleUpdate");
    }
}

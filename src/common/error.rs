//! Error types for minidfs

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    // === I/O Errors ===
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // === Lookup Errors ===
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("File {0} is currently unavailable: no active replicas")]
    FileUnavailable(String),

    // === Transfer Errors ===
    #[error("Node {node} unreachable: {reason}")]
    NodeUnreachable { node: String, reason: String },

    #[error("Checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    #[error("Transfer failed: {0}")]
    TransferFailed(String),

    // === Placement Errors ===
    #[error("Insufficient targets: need {needed}, have {available}")]
    InsufficientTargets { needed: usize, available: usize },

    #[error("Replica of {file_id} already exists on {node_id}")]
    DuplicateReplica { file_id: String, node_id: String },

    // === Recovery Errors ===
    #[error("Recovery exhausted: {0}")]
    RecoveryExhausted(String),

    // === Request Errors ===
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    // === Metadata Errors ===
    #[error("RocksDB error: {0}")]
    RocksDb(#[from] rocksdb::Error),

    #[error("Metadata corrupted: {0}")]
    MetadataCorrupted(String),

    // === Config Errors ===
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // === Generic ===
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Does this failure consume a recovery attempt?
    ///
    /// `InsufficientTargets` means no action was possible, not that an action failed.
    pub fn counts_as_attempt(&self) -> bool {
        !matches!(self, Error::InsufficientTargets { .. })
    }

    /// Convert to HTTP status code
    pub fn to_http_status(&self) -> axum::http::StatusCode {
        use axum::http::StatusCode;
        match self {
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::InvalidRequest(_) | Error::InvalidConfig(_) => StatusCode::BAD_REQUEST,
            Error::DuplicateReplica { .. } | Error::ChecksumMismatch { .. } => {
                StatusCode::CONFLICT
            }
            Error::FileUnavailable(_) | Error::InsufficientTargets { .. } => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            Error::NodeUnreachable { .. } => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<&str> for Error {
    fn from(s: &str) -> Self {
        Error::Other(s.to_string())
    }
}

impl From<String> for Error {
    fn from(s: String) -> Self {
        Error::Other(s)
    }
}

impl From<bincode::Error> for Error {
    fn from(e: bincode::Error) -> Self {
        Error::MetadataCorrupted(e.to_string())
    }
}

impl From<config::ConfigError> for Error {
    fn from(e: config::ConfigError) -> Self {
        Error::InvalidConfig(e.to_string())
    }
}

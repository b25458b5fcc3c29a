//! Error handling for the argus discovery engine
//!
//! Errors fall in two groups. Fatal ones (settings, card catalog, opening the
//! store) stop a run before any worker is spawned. Everything raised while
//! polling a single host (`SnmpError`, most `StoreError`s) is logged by the
//! worker and never aborts the run.

use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Top-level error type for discovery operations
#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Card catalog error: {0}")]
    Catalog(#[from] CatalogError),

    #[error("Record store error: {0}")]
    Store(#[from] StoreError),

    #[error("SNMP error: {0}")]
    Snmp(#[from] SnmpError),

    #[error("Worker {id} failed: {reason}")]
    Worker { id: usize, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// SNMP transport, protocol and codec errors
#[derive(Debug, Error, Clone)]
pub enum SnmpError {
    #[error("No response from {target} after {attempts} attempts ({timeout:?} each)")]
    Timeout {
        target: IpAddr,
        attempts: u32,
        timeout: Duration,
    },

    #[error("Socket error: {0}")]
    Socket(String),

    #[error("Malformed message: {0}")]
    Decode(String),

    #[error("Cannot encode request: {0}")]
    Encode(String),

    #[error("Agent {target} reported {status} at index {index}")]
    Status {
        target: IpAddr,
        status: ErrorStatus,
        index: u32,
    },

    #[error("Unknown MIB object {0}")]
    UnknownObject(String),
}

impl SnmpError {
    /// True when the agent did not answer at all
    pub fn is_timeout(&self) -> bool {
        matches!(self, SnmpError::Timeout { .. })
    }

    /// Errors that only affect the current call; the next call may succeed
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            SnmpError::Status { .. } | SnmpError::UnknownObject(_) | SnmpError::Decode(_)
        )
    }
}

/// PDU error-status values defined by RFC 3416
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorStatus {
    NoError,
    TooBig,
    NoSuchName,
    BadValue,
    ReadOnly,
    GenErr,
    NoAccess,
    WrongType,
    WrongLength,
    WrongEncoding,
    WrongValue,
    NoCreation,
    InconsistentValue,
    ResourceUnavailable,
    CommitFailed,
    UndoFailed,
    AuthorizationError,
    NotWritable,
    InconsistentName,
    Other(i64),
}

impl ErrorStatus {
    pub fn from_code(code: i64) -> Self {
        match code {
            0 => ErrorStatus::NoError,
            1 => ErrorStatus::TooBig,
            2 => ErrorStatus::NoSuchName,
            3 => ErrorStatus::BadValue,
            4 => ErrorStatus::ReadOnly,
            5 => ErrorStatus::GenErr,
            6 => ErrorStatus::NoAccess,
            7 => ErrorStatus::WrongType,
            8 => ErrorStatus::WrongLength,
            9 => ErrorStatus::WrongEncoding,
            10 => ErrorStatus::WrongValue,
            11 => ErrorStatus::NoCreation,
            12 => ErrorStatus::InconsistentValue,
            13 => ErrorStatus::ResourceUnavailable,
            14 => ErrorStatus::CommitFailed,
            15 => ErrorStatus::UndoFailed,
            16 => ErrorStatus::AuthorizationError,
            17 => ErrorStatus::NotWritable,
            18 => ErrorStatus::InconsistentName,
            other => ErrorStatus::Other(other),
        }
    }

    pub fn code(&self) -> i64 {
        match self {
            ErrorStatus::NoError => 0,
            ErrorStatus::TooBig => 1,
            ErrorStatus::NoSuchName => 2,
            ErrorStatus::BadValue => 3,
            ErrorStatus::ReadOnly => 4,
            ErrorStatus::GenErr => 5,
            ErrorStatus::NoAccess => 6,
            ErrorStatus::WrongType => 7,
            ErrorStatus::WrongLength => 8,
            ErrorStatus::WrongEncoding => 9,
            ErrorStatus::WrongValue => 10,
            ErrorStatus::NoCreation => 11,
            ErrorStatus::InconsistentValue => 12,
            ErrorStatus::ResourceUnavailable => 13,
            ErrorStatus::CommitFailed => 14,
            ErrorStatus::UndoFailed => 15,
            ErrorStatus::AuthorizationError => 16,
            ErrorStatus::NotWritable => 17,
            ErrorStatus::InconsistentName => 18,
            ErrorStatus::Other(code) => *code,
        }
    }
}

impl std::fmt::Display for ErrorStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorStatus::Other(code) => write!(f, "error-status {}", code),
            other => write!(f, "{:?}", other),
        }
    }
}

/// Record store errors
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Record serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Cannot open store '{path}': {reason}")]
    Open { path: PathBuf, reason: String },

    #[error("Store session already closed")]
    Closed,
}

/// Card catalog errors (all fatal: no polling starts without cards)
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("Directory with cards not found: {0}")]
    NoDirectory(PathBuf),

    #[error("No device cards retrieved, check {0}")]
    NoCards(String),

    #[error("Card {card} has an invalid info_pattern: {reason}")]
    InvalidPattern { card: String, reason: String },

    #[error("Card {card} has an invalid {field}: {reason}")]
    InvalidLocator {
        card: String,
        field: String,
        reason: String,
    },

    #[error("Card file {path} is corrupted: {reason}")]
    Corrupted { path: PathBuf, reason: String },

    #[error("Cannot read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Settings errors (all fatal)
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Settings file not found: {0}")]
    NotFound(PathBuf),

    #[error("Cannot read settings file {path}: {reason}")]
    Unreadable { path: PathBuf, reason: String },

    #[error("Invalid settings: {0}")]
    Invalid(String),

    #[error("Invalid subnet '{subnet}': {reason}")]
    InvalidSubnet { subnet: String, reason: String },

    #[error("Invalid uplink pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },
}

/// Result type alias for SNMP operations
pub type SnmpResult<T> = std::result::Result<T, SnmpError>;

/// Result type alias for store operations
pub type StoreResult<T> = std::result::Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snmp_error_classification() {
        let timeout = SnmpError::Timeout {
            target: "10.0.0.1".parse().unwrap(),
            attempts: 2,
            timeout: Duration::from_millis(500),
        };
        assert!(timeout.is_timeout());
        assert!(!timeout.is_recoverable());

        let status = SnmpError::Status {
            target: "10.0.0.1".parse().unwrap(),
            status: ErrorStatus::NoSuchName,
            index: 1,
        };
        assert!(!status.is_timeout());
        assert!(status.is_recoverable());
    }

    #[test]
    fn test_error_status_codes() {
        for code in 0..=18 {
            assert_eq!(ErrorStatus::from_code(code).code(), code);
        }
        assert_eq!(ErrorStatus::from_code(42), ErrorStatus::Other(42));
    }

    #[test]
    fn test_error_conversion() {
        let err: DiscoveryError = CatalogError::NoCards("dev_cards".to_string()).into();
        assert!(matches!(err, DiscoveryError::Catalog(_)));
        assert!(err.to_string().contains("dev_cards"));
    }
}

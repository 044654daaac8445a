//! Error types for the attempt ledger.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for ledger operations.
pub type StateResult<T> = Result<T, StateError>;

/// Errors that can occur while using the attempt ledger.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("failed to open ledger database: {0}")]
    Open(String),

    #[error("transaction error: {0}")]
    Transaction(String),

    #[error("table error: {0}")]
    Table(String),

    #[error("read error: {0}")]
    Read(String),

    #[error("write error: {0}")]
    Write(String),

    #[error("serialization error: {0}")]
    Serialize(String),

    #[error("deserialization error: {0}")]
    Deserialize(String),

    #[error("ledger locked by another scheduler instance: {0}")]
    Locked(PathBuf),

    #[error("lock file error: {0}")]
    LockIo(#[from] std::io::Error),
}

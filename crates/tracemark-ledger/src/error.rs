use std::io;
use std::path::PathBuf;
use std::time::Duration;

use tracemark_types::RecordId;

/// Errors produced by ledger operations.
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    /// Wrong key material, or the store failed authentication. No record is
    /// ever decrypted partially.
    #[error("ledger access denied: {0}")]
    Access(String),

    /// The store could not be read or written. Fatal for a build.
    #[error("ledger storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("record {0} not found")]
    NotFound(RecordId),

    #[error("signature check failed for record {0}")]
    BadSignature(RecordId),
}

impl LedgerError {
    pub fn is_access(&self) -> bool {
        matches!(self, Self::Access(_))
    }

    pub fn is_storage(&self) -> bool {
        matches!(self, Self::Storage(_))
    }
}

/// Failures of the underlying storage medium.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    #[error("timed out after {0:?} waiting for the ledger lock")]
    LockTimeout(Duration),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("no ledger found at {0}")]
    Missing(PathBuf),

    #[error("a ledger already exists at {0}")]
    AlreadyExists(PathBuf),

    #[error("in-memory ledger lock poisoned")]
    Poisoned,
}

/// Convenience alias used throughout the ledger crate.
pub type Result<T> = std::result::Result<T, LedgerError>;

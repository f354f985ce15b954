use std::io;

use tracemark_crypto::CryptoError;
use tracemark_gate::ProtectionError;
use tracemark_ledger::LedgerError;
use tracemark_mark::MarkingError;
use tracemark_tools::ToolError;
use tracemark_types::Stage;

/// Errors produced while preparing, running, or recording a build.
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("invalid build request: {0}")]
    Request(String),

    #[error("compile failed: {0}")]
    Compile(#[source] ToolError),

    #[error("marking failed: {0}")]
    Marking(#[from] MarkingError),

    #[error(transparent)]
    Protection(#[from] ProtectionError),

    #[error("cannot remove protection: {0}")]
    Unprotect(#[source] ToolError),

    /// The ledger could not be written. A build that cannot be recorded has
    /// failed, whatever happened to the artifact.
    #[error(transparent)]
    Storage(LedgerError),

    #[error("access denied: {0}")]
    Access(String),

    #[error("stage {stage} cannot be registered after {after}")]
    StageOrder { stage: Stage, after: Stage },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

impl BuildError {
    /// Whether this error came from the ledger rather than the pipeline.
    pub fn is_ledger(&self) -> bool {
        matches!(self, Self::Storage(_) | Self::Access(_))
    }
}

impl From<LedgerError> for BuildError {
    fn from(err: LedgerError) -> Self {
        if err.is_access() {
            Self::Access(err.to_string())
        } else {
            Self::Storage(err)
        }
    }
}

impl From<CryptoError> for BuildError {
    fn from(err: CryptoError) -> Self {
        Self::Access(err.to_string())
    }
}

impl PartialEq for BuildError {
    fn eq(&self, other: &Self) -> bool {
        self.to_string() == other.to_string()
    }
}

pub type Result<T> = std::result::Result<T, BuildError>;

use thiserror::Error;

/// Errors produced by type operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TypeError {
    #[error("invalid hex string: {0}")]
    InvalidHex(String),

    #[error("invalid byte length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },

    #[error("watermark opacity must be within 0..=100, got {0}")]
    OpacityOutOfRange(u16),

    #[error("watermark text must not be empty")]
    EmptyWatermarkText,

    #[error("unknown build stage: {0}")]
    UnknownStage(String),
}

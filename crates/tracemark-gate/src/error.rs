use std::fmt;
use std::io;

use crate::state::{ProtectionState, ProtectionTrace};

/// Errors from the protection gate.
///
/// Protection failure is never downgraded to a warning: the caller must
/// fail the build.
#[derive(Debug, thiserror::Error)]
pub enum ProtectionError {
    /// Both the external and the native path were tried and neither produced
    /// a password-gated file.
    #[error("protection failed: external: {external}; native: {native}")]
    Exhausted {
        external: String,
        native: String,
        trace: ProtectionTrace,
    },

    #[error("invalid protection transition {from} -> {to}")]
    InvalidTransition {
        from: ProtectionState,
        to: ProtectionState,
    },

    #[error("empty password")]
    EmptyPassword,

    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

impl PartialEq for ProtectionError {
    fn eq(&self, other: &Self) -> bool {
        fmt::format(format_args!("{self}")) == fmt::format(format_args!("{other}"))
    }
}

use std::io;
use std::path::PathBuf;

/// Errors from external tools and the document renderer.
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    /// The tool is not installed or could not be started. Callers decide
    /// whether this is fatal.
    #[error("{tool} is not available: {reason}")]
    Unavailable { tool: String, reason: String },

    #[error("{tool} failed ({status}): {detail}")]
    Failed {
        tool: String,
        status: String,
        detail: String,
    },

    #[error("{tool} reported success but {} was not produced", path.display())]
    MissingOutput { tool: String, path: PathBuf },

    #[error("pdf error: {0}")]
    Pdf(String),

    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

impl ToolError {
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::Unavailable { .. })
    }

    pub(crate) fn pdf(err: impl std::fmt::Display) -> Self {
        Self::Pdf(err.to_string())
    }
}

impl PartialEq for ToolError {
    fn eq(&self, other: &Self) -> bool {
        self.to_string() == other.to_string()
    }
}

use std::path::PathBuf;
use std::process::Command;

use serde::{Deserialize, Serialize};
use tracing::debug;

/// Whether an external tool can be used right now.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Availability {
    Available {
        path: PathBuf,
        version: Option<String>,
    },
    Unavailable {
        reason: String,
    },
}

impl Availability {
    pub fn is_available(&self) -> bool {
        matches!(self, Availability::Available { .. })
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            Availability::Available { .. } => None,
            Availability::Unavailable { reason } => Some(reason),
        }
    }
}

/// A collaborator backed by a program on `PATH`.
pub trait ExternalTool: Send + Sync {
    /// Short name used in logs and notes.
    fn name(&self) -> &str;

    /// Check whether the tool can be invoked. Never fails; absence is a
    /// value, not an error.
    fn probe(&self) -> Availability;
}

/// Locate `program` and read the first line of `program --version`.
pub(crate) fn probe_program(program: &str) -> Availability {
    match which::which(program) {
        Ok(path) => {
            let version = version_line(&path);
            debug!(program, path = %path.display(), version = ?version, "tool found");
            Availability::Available { path, version }
        }
        Err(e) => {
            debug!(program, error = %e, "tool not found");
            Availability::Unavailable {
                reason: format!("{program} not found on PATH"),
            }
        }
    }
}

pub(crate) fn version_line(path: &std::path::Path) -> Option<String> {
    let output = Command::new(path).arg("--version").output().ok()?;
    let text = if output.stdout.is_empty() {
        output.stderr
    } else {
        output.stdout
    };
    String::from_utf8_lossy(&text)
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .map(str::to_string)
}

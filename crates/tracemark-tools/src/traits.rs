use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracemark_mark::{DocumentMetadata, OverlaySpec, PageGeometry};

use crate::error::ToolError;
use crate::probe::ExternalTool;

// ---------------------------------------------------------------------------
// Collaborator traits
// ---------------------------------------------------------------------------

/// Turns a LaTeX source into a PDF.
pub trait Compiler: ExternalTool {
    /// Compile `source` into `out_dir`, returning the produced PDF.
    fn compile(&self, source: &Path, out_dir: &Path) -> Result<PathBuf, ToolError>;
}

/// Flattens a PDF's pages into images.
pub trait Rasterizer: ExternalTool {
    /// Write a rasterized copy of `input` next to it and return its path.
    fn rasterize(&self, input: &Path, dpi: u32) -> Result<PathBuf, ToolError>;
}

/// Password protection through an external program.
pub trait ExternalProtector: ExternalTool {
    /// Describe what the installed tool supports.
    fn capabilities(&self) -> Result<ProtectorCapabilities, ToolError>;

    /// Write a password-protected copy of `input` to `output`.
    fn protect(&self, input: &Path, output: &Path, password: &str) -> Result<(), ToolError>;
}

/// In-process PDF manipulation.
pub trait DocumentRenderer: Send + Sync {
    fn page_geometry(&self, pdf: &Path) -> Result<Vec<PageGeometry>, ToolError>;

    /// Draw `overlay` onto `pdf` in place. Applying an overlay again
    /// replaces the previous one instead of stacking.
    fn apply_overlay(&self, pdf: &Path, overlay: &OverlaySpec) -> Result<(), ToolError>;

    /// Write `metadata` into the document information dictionary in place,
    /// overwriting keys that already exist.
    fn embed_metadata(&self, pdf: &Path, metadata: &DocumentMetadata) -> Result<(), ToolError>;

    fn read_metadata(&self, pdf: &Path) -> Result<DocumentMetadata, ToolError>;

    /// Write an encrypted copy of `input` to `output` that needs `password`
    /// to open.
    fn write_encrypted(&self, input: &Path, output: &Path, password: &str)
        -> Result<(), ToolError>;

    /// Write an unencrypted copy of `input` to `output`. Fails when `input`
    /// is not encrypted or `password` does not open it.
    fn write_decrypted(&self, input: &Path, output: &Path, password: &str)
        -> Result<(), ToolError>;

    /// Whether `pdf` refuses the empty password and opens with `password`.
    /// A file that cannot be parsed is not gated.
    fn is_password_gated(&self, pdf: &Path, password: &str) -> Result<bool, ToolError>;
}

// ---------------------------------------------------------------------------
// ProtectorCapabilities
// ---------------------------------------------------------------------------

/// Version of the [`ProtectorCapabilities`] layout.
pub const CAPABILITIES_SCHEMA_VERSION: u32 = 1;

/// Dotted version of an external tool.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ToolVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl ToolVersion {
    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    /// Find the first dotted number in a `--version` banner, e.g.
    /// `qpdf version 11.9.1`.
    pub fn parse_banner(text: &str) -> Option<Self> {
        let word = text
            .split_whitespace()
            .find(|w| w.starts_with(|c: char| c.is_ascii_digit()))?;
        let mut parts = word
            .split(|c: char| !c.is_ascii_digit())
            .filter(|p| !p.is_empty())
            .map(|p| p.parse::<u32>().ok());
        let major = parts.next()??;
        let minor = parts.next().flatten().unwrap_or(0);
        let patch = parts.next().flatten().unwrap_or(0);
        Some(Self::new(major, minor, patch))
    }
}

impl fmt::Display for ToolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// What an external protector supports, derived from its version rather
/// than from scraping its help text.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtectorCapabilities {
    pub schema_version: u32,
    pub tool: String,
    pub tool_version: ToolVersion,
    /// Strongest key length in bits.
    pub max_key_length: u16,
    /// Whether arguments can be passed in a file instead of on the command
    /// line, keeping the password out of the process table.
    pub argument_files: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_qpdf_banner() {
        assert_eq!(
            ToolVersion::parse_banner("qpdf version 11.9.1\nRun qpdf --copyright"),
            Some(ToolVersion::new(11, 9, 1))
        );
    }

    #[test]
    fn parses_bare_version() {
        assert_eq!(
            ToolVersion::parse_banner("10.02"),
            Some(ToolVersion::new(10, 2, 0))
        );
    }

    #[test]
    fn no_version_in_banner() {
        assert_eq!(ToolVersion::parse_banner("qpdf version unknown"), None);
    }

    #[test]
    fn versions_order() {
        assert!(ToolVersion::new(8, 0, 0) > ToolVersion::new(7, 99, 1));
    }
}

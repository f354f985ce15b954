use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{BuildError, Result};

/// Project configuration stored in `.tracemark/config.toml`.
///
/// Every key is optional on disk; anything missing takes its default.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectConfig {
    pub build: BuildConfig,
    pub latex: LatexConfig,
    pub ledger: LedgerConfig,
    pub protection: ProtectionConfig,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildConfig {
    /// Relative paths are resolved against the project root.
    pub output_dir: PathBuf,
    pub default_classification: String,
    pub raster_dpi: u32,
    pub rasterizer: String,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("build"),
            default_classification: "UNCLASSIFIED".into(),
            raster_dpi: 150,
            rasterizer: "gs".into(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LatexConfig {
    pub engine: String,
    pub use_latexmk: bool,
}

impl Default for LatexConfig {
    fn default() -> Self {
        Self {
            engine: "lualatex".into(),
            use_latexmk: true,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    pub lock_timeout_ms: u64,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            lock_timeout_ms: 10_000,
        }
    }
}

impl LedgerConfig {
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtectionConfig {
    /// Program used for external protection. Empty or `"none"` disables the
    /// external path.
    pub external_tool: String,
}

impl Default for ProtectionConfig {
    fn default() -> Self {
        Self {
            external_tool: "qpdf".into(),
        }
    }
}

impl ProtectionConfig {
    pub fn external_program(&self) -> Option<&str> {
        match self.external_tool.trim() {
            "" | "none" => None,
            program => Some(program),
        }
    }
}

impl ProjectConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .map_err(|e| BuildError::Config(format!("{}: {e}", path.display())))?;
        Self::from_toml(&text)
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| BuildError::Config(e.to_string()))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let text = toml::to_string_pretty(self).map_err(|e| BuildError::Config(e.to_string()))?;
        fs::write(path, text)?;
        Ok(())
    }
}

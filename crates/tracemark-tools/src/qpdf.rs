use std::io::Write;
use std::path::{Path, PathBuf};

use rand::RngCore;
use tracing::{debug, info};

use crate::error::ToolError;
use crate::probe::{probe_program, version_line, Availability, ExternalTool};
use crate::process::run;
use crate::traits::{ExternalProtector, ProtectorCapabilities, ToolVersion, CAPABILITIES_SCHEMA_VERSION};

/// First qpdf release that reads `@file` argument lists.
const ARGUMENT_FILES_SINCE: ToolVersion = ToolVersion::new(8, 0, 0);

/// qpdf exits with 3 when it succeeded with warnings.
const EXIT_WARNINGS: i32 = 3;

/// External protector backed by `qpdf --encrypt`.
#[derive(Clone, Debug)]
pub struct Qpdf {
    program: String,
}

impl Qpdf {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    fn locate(&self) -> Result<PathBuf, ToolError> {
        match self.probe() {
            Availability::Available { path, .. } => Ok(path),
            Availability::Unavailable { reason } => Err(ToolError::Unavailable {
                tool: self.name().to_string(),
                reason,
            }),
        }
    }

    /// Capabilities implied by a `--version` banner.
    pub fn capabilities_from_banner(banner: &str) -> Option<ProtectorCapabilities> {
        let version = ToolVersion::parse_banner(banner)?;
        Some(ProtectorCapabilities {
            schema_version: CAPABILITIES_SCHEMA_VERSION,
            tool: "qpdf".to_string(),
            tool_version: version,
            max_key_length: 256,
            argument_files: version >= ARGUMENT_FILES_SINCE,
        })
    }

    fn encrypt_args(
        input: &Path,
        output: &Path,
        user: &str,
        owner: &str,
        bits: u16,
    ) -> Vec<String> {
        vec![
            "--encrypt".to_string(),
            user.to_string(),
            owner.to_string(),
            bits.to_string(),
            "--".to_string(),
            input.display().to_string(),
            output.display().to_string(),
        ]
    }
}

impl Default for Qpdf {
    fn default() -> Self {
        Self::new("qpdf")
    }
}

impl ExternalTool for Qpdf {
    fn name(&self) -> &str {
        "qpdf"
    }

    fn probe(&self) -> Availability {
        probe_program(&self.program)
    }
}

impl ExternalProtector for Qpdf {
    fn capabilities(&self) -> Result<ProtectorCapabilities, ToolError> {
        let path = self.locate()?;
        let banner = version_line(&path).unwrap_or_default();
        let caps = Self::capabilities_from_banner(&banner).ok_or_else(|| ToolError::Failed {
            tool: self.name().to_string(),
            status: "version probe".to_string(),
            detail: format!("unrecognised version banner {banner:?}"),
        })?;
        debug!(version = %caps.tool_version, argument_files = caps.argument_files, "qpdf capabilities");
        Ok(caps)
    }

    fn protect(&self, input: &Path, output: &Path, password: &str) -> Result<(), ToolError> {
        let caps = self.capabilities()?;
        let path = self.locate()?;
        let mut owner = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut owner);
        let args = Self::encrypt_args(
            input,
            output,
            password,
            &hex::encode(owner),
            caps.max_key_length,
        );

        if caps.argument_files {
            let mut file = tempfile::NamedTempFile::new()?;
            for arg in &args {
                writeln!(file, "{arg}")?;
            }
            file.as_file().sync_all()?;
            let at = format!("@{}", file.path().display());
            run(self.name(), &path, [at], None, &[EXIT_WARNINGS])?;
        } else {
            run(self.name(), &path, &args, None, &[EXIT_WARNINGS])?;
        }

        if !output.exists() {
            return Err(ToolError::MissingOutput {
                tool: self.name().to_string(),
                path: output.to_path_buf(),
            });
        }
        info!(output = %output.display(), bits = caps.max_key_length, "protected with qpdf");
        Ok(())
    }
}

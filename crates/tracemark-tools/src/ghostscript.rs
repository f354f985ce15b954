use std::path::{Path, PathBuf};

use tracing::info;

use crate::error::ToolError;
use crate::probe::{probe_program, Availability, ExternalTool};
use crate::process::run;
use crate::traits::Rasterizer;

/// Ghostscript rasterizer using the `pdfimage24` device.
#[derive(Clone, Debug)]
pub struct Ghostscript {
    program: String,
}

impl Ghostscript {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// `<stem>.r<dpi>.pdf` next to the input.
    pub fn output_path(input: &Path, dpi: u32) -> PathBuf {
        let stem = input
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "document".to_string());
        input.with_file_name(format!("{stem}.r{dpi}.pdf"))
    }

    fn args(input: &Path, output: &Path, dpi: u32) -> Vec<String> {
        vec![
            "-sDEVICE=pdfimage24".to_string(),
            format!("-r{dpi}"),
            "-dBATCH".to_string(),
            "-dNOPAUSE".to_string(),
            "-dSAFER".to_string(),
            "-o".to_string(),
            output.display().to_string(),
            input.display().to_string(),
        ]
    }
}

impl Default for Ghostscript {
    fn default() -> Self {
        Self::new("gs")
    }
}

impl ExternalTool for Ghostscript {
    fn name(&self) -> &str {
        "ghostscript"
    }

    fn probe(&self) -> Availability {
        probe_program(&self.program)
    }
}

impl Rasterizer for Ghostscript {
    fn rasterize(&self, input: &Path, dpi: u32) -> Result<PathBuf, ToolError> {
        let program = match self.probe() {
            Availability::Available { path, .. } => path,
            Availability::Unavailable { reason } => {
                return Err(ToolError::Unavailable {
                    tool: self.name().to_string(),
                    reason,
                })
            }
        };
        let output = Self::output_path(input, dpi);
        run(self.name(), &program, Self::args(input, &output, dpi), None, &[])?;
        if !output.exists() {
            return Err(ToolError::MissingOutput {
                tool: self.name().to_string(),
                path: output,
            });
        }
        info!(input = %input.display(), dpi, "rasterized");
        Ok(output)
    }
}

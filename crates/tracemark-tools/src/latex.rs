use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::info;

use crate::error::ToolError;
use crate::probe::{probe_program, Availability, ExternalTool};
use crate::process::run;
use crate::traits::Compiler;

/// LaTeX compiler, preferring `latexmk` and falling back to running the
/// engine directly.
#[derive(Clone, Debug)]
pub struct LatexCompiler {
    engine: String,
    use_latexmk: bool,
}

impl LatexCompiler {
    pub fn new(engine: impl Into<String>, use_latexmk: bool) -> Self {
        Self {
            engine: engine.into(),
            use_latexmk,
        }
    }

    pub fn engine(&self) -> &str {
        &self.engine
    }

    /// The latexmk switch that selects this engine.
    fn latexmk_mode(&self) -> &'static str {
        match self.engine.as_str() {
            "lualatex" => "-pdflua",
            "xelatex" => "-pdfxe",
            _ => "-pdf",
        }
    }

    fn latexmk_args(&self, source: &Path, out_dir: &Path, jobname: &str) -> Vec<OsString> {
        vec![
            self.latexmk_mode().into(),
            "-interaction=nonstopmode".into(),
            "-halt-on-error".into(),
            format!("-outdir={}", out_dir.display()).into(),
            format!("-jobname={jobname}").into(),
            source.as_os_str().to_owned(),
        ]
    }

    fn engine_args(&self, source: &Path, out_dir: &Path, jobname: &str) -> Vec<OsString> {
        vec![
            "-halt-on-error".into(),
            "-interaction=nonstopmode".into(),
            format!("-output-directory={}", out_dir.display()).into(),
            format!("-jobname={jobname}").into(),
            source.as_os_str().to_owned(),
        ]
    }
}

impl Default for LatexCompiler {
    fn default() -> Self {
        Self::new("lualatex", true)
    }
}

impl ExternalTool for LatexCompiler {
    fn name(&self) -> &str {
        "latex"
    }

    fn probe(&self) -> Availability {
        if self.use_latexmk {
            let latexmk = probe_program("latexmk");
            if latexmk.is_available() {
                return latexmk;
            }
        }
        probe_program(&self.engine)
    }
}

impl Compiler for LatexCompiler {
    fn compile(&self, source: &Path, out_dir: &Path) -> Result<PathBuf, ToolError> {
        let source = fs::canonicalize(source)?;
        fs::create_dir_all(out_dir)?;
        let out_dir = fs::canonicalize(out_dir)?;
        let jobname = source
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "document".to_string());
        let produced = out_dir.join(format!("{jobname}.pdf"));
        if produced.exists() {
            fs::remove_file(&produced)?;
        }

        let (program, args) = match self.probe() {
            Availability::Available { path, .. } if path.file_stem().is_some_and(|s| s == "latexmk") => {
                (path, self.latexmk_args(&source, &out_dir, &jobname))
            }
            Availability::Available { path, .. } => {
                (path, self.engine_args(&source, &out_dir, &jobname))
            }
            Availability::Unavailable { reason } => {
                return Err(ToolError::Unavailable {
                    tool: self.engine.clone(),
                    reason,
                })
            }
        };

        let cwd = source.parent();
        run(self.name(), &program, &args, cwd, &[])?;

        if !produced.exists() {
            return Err(ToolError::MissingOutput {
                tool: self.name().to_string(),
                path: produced,
            });
        }
        info!(source = %source.display(), output = %produced.display(), "compiled");
        Ok(produced)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn latexmk_mode_follows_engine() {
        assert_eq!(LatexCompiler::new("lualatex", true).latexmk_mode(), "-pdflua");
        assert_eq!(LatexCompiler::new("xelatex", true).latexmk_mode(), "-pdfxe");
        assert_eq!(LatexCompiler::new("pdflatex", true).latexmk_mode(), "-pdf");
    }

    #[test]
    fn engine_args_keep_jobname_stable() {
        let args = LatexCompiler::default().engine_args(
            Path::new("/src/report.tex"),
            Path::new("/out"),
            "report",
        );
        assert!(args.contains(&OsString::from("-jobname=report")));
        assert!(args.contains(&OsString::from("-output-directory=/out")));
        assert_eq!(args.last(), Some(&OsString::from("/src/report.tex")));
    }

    #[test]
    fn missing_engine_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("doc.tex");
        fs::write(&source, "\\documentclass{article}").unwrap();
        let compiler = LatexCompiler::new("tracemark-no-such-engine", false);
        let err = compiler.compile(&source, &dir.path().join("out")).unwrap_err();
        assert!(err.is_unavailable());
    }

    #[test]
    fn missing_source_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = LatexCompiler::default()
            .compile(&dir.path().join("absent.tex"), dir.path())
            .unwrap_err();
        assert!(matches!(err, ToolError::Io(_)));
    }
}

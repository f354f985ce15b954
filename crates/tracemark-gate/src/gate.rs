use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use tracemark_tools::{
    Availability, DocumentRenderer, ExternalProtector, ProtectorCapabilities, ToolError,
};
use tracemark_types::ProtectionMethod;
use tracing::{debug, info, warn};

use crate::error::ProtectionError;
use crate::state::{ProtectionState, ProtectionTrace};

// ---------------------------------------------------------------------------
// ProtectionOutcome
// ---------------------------------------------------------------------------

/// A protected file and how it was produced.
#[derive(Clone, Debug)]
pub struct ProtectionOutcome {
    pub output: PathBuf,
    pub method: ProtectionMethod,
    /// Descriptor of the external tool, when one was consulted.
    pub capabilities: Option<ProtectorCapabilities>,
    pub trace: ProtectionTrace,
}

// ---------------------------------------------------------------------------
// ProtectionGate
// ---------------------------------------------------------------------------

/// Password protection with an external tool first and native encryption as
/// the fallback.
///
/// Neither path counts as done until the renderer confirms that the output
/// cannot be opened without the password. The gate never reports
/// `Protected` for a file that fails that check.
pub struct ProtectionGate<'a> {
    renderer: &'a dyn DocumentRenderer,
    external: Option<&'a dyn ExternalProtector>,
    availability: Option<Availability>,
}

impl<'a> ProtectionGate<'a> {
    /// A gate that only has the native path.
    pub fn new(renderer: &'a dyn DocumentRenderer) -> Self {
        Self {
            renderer,
            external: None,
            availability: None,
        }
    }

    /// Try `external` before falling back to native encryption.
    pub fn with_external(mut self, external: &'a dyn ExternalProtector) -> Self {
        self.external = Some(external);
        self
    }

    /// Use an availability already probed for this build instead of probing
    /// the external tool again.
    pub fn with_availability(mut self, availability: Availability) -> Self {
        self.availability = Some(availability);
        self
    }

    /// Protect `input` into `output` with `password`.
    ///
    /// On failure `output` does not exist and the returned error carries the
    /// full trace.
    pub fn protect(
        &self,
        input: &Path,
        output: &Path,
        password: &str,
    ) -> Result<ProtectionOutcome, ProtectionError> {
        if password.is_empty() {
            return Err(ProtectionError::EmptyPassword);
        }
        let mut trace = ProtectionTrace::new();
        let mut clock = Instant::now();

        trace.advance(ProtectionState::AttemptExternal, None, clock.elapsed())?;
        debug!(state = %trace.state(), "protection transition");
        clock = Instant::now();

        let mut capabilities = None;
        let external_error = match self.try_external(input, output, password, &mut capabilities) {
            Ok(()) => {
                trace.advance(
                    ProtectionState::Protected(ProtectionMethod::External),
                    None,
                    clock.elapsed(),
                )?;
                info!(output = %output.display(), path = %trace.path(), "document protected");
                return Ok(ProtectionOutcome {
                    output: output.to_path_buf(),
                    method: ProtectionMethod::External,
                    capabilities,
                    trace,
                });
            }
            Err(reason) => reason,
        };

        remove_if_present(output)?;
        trace.advance(
            ProtectionState::AttemptNative,
            Some(format!("external: {external_error}")),
            clock.elapsed(),
        )?;
        debug!(state = %trace.state(), reason = %external_error, "protection transition");
        clock = Instant::now();

        match self.try_native(input, output, password) {
            Ok(()) => {
                trace.advance(
                    ProtectionState::Protected(ProtectionMethod::Native),
                    None,
                    clock.elapsed(),
                )?;
                info!(output = %output.display(), path = %trace.path(), "document protected");
                Ok(ProtectionOutcome {
                    output: output.to_path_buf(),
                    method: ProtectionMethod::Native,
                    capabilities,
                    trace,
                })
            }
            Err(native_error) => {
                remove_if_present(output)?;
                trace.advance(
                    ProtectionState::Failed,
                    Some(format!("native: {native_error}")),
                    clock.elapsed(),
                )?;
                warn!(path = %trace.path(), "protection failed on every path");
                Err(ProtectionError::Exhausted {
                    external: external_error,
                    native: native_error,
                    trace,
                })
            }
        }
    }

    fn try_external(
        &self,
        input: &Path,
        output: &Path,
        password: &str,
        capabilities: &mut Option<ProtectorCapabilities>,
    ) -> Result<(), String> {
        let Some(external) = self.external else {
            return Err("no external protector configured".to_string());
        };
        let availability = self
            .availability
            .clone()
            .unwrap_or_else(|| external.probe());
        if let Some(reason) = availability.reason() {
            return Err(reason.to_string());
        }
        let caps = external.capabilities().map_err(|e| e.to_string())?;
        debug!(
            tool = %caps.tool,
            version = %caps.tool_version,
            schema = caps.schema_version,
            "external protector capabilities"
        );
        *capabilities = Some(caps);
        external
            .protect(input, output, password)
            .map_err(|e| e.to_string())?;
        self.confirm_gated(output, password)
    }

    fn try_native(&self, input: &Path, output: &Path, password: &str) -> Result<(), String> {
        self.renderer
            .write_encrypted(input, output, password)
            .map_err(|e| e.to_string())?;
        self.confirm_gated(output, password)
    }

    fn confirm_gated(&self, output: &Path, password: &str) -> Result<(), String> {
        match self.renderer.is_password_gated(output, password) {
            Ok(true) => Ok(()),
            Ok(false) => Err(format!(
                "{} is not gated by the requested password",
                output.file_name().map_or_else(
                    || output.display().to_string(),
                    |n| n.to_string_lossy().into_owned()
                )
            )),
            Err(ToolError::Io(e)) => Err(format!("output unreadable: {e}")),
            Err(e) => Err(e.to_string()),
        }
    }
}

fn remove_if_present(path: &Path) -> Result<(), ProtectionError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

//! Protecting and unprotecting an existing PDF outside a build.
//!
//! Protection goes through the same [`ProtectionGate`] as the build stage,
//! so the external tool is tried first and the output is only accepted once
//! it is confirmed gated. Nothing here writes to the ledger.

use std::path::{Path, PathBuf};

use tracemark_crypto::{ContentHasher, ProjectSecret};
use tracemark_gate::{ProtectionGate, ProtectionOutcome};
use tracemark_types::Classification;
use tracing::info;
use uuid::Uuid;

use crate::error::{BuildError, Result};
use crate::request::Password;
use crate::tools::Toolbox;

/// Where the password for a standalone protect or unprotect comes from.
#[derive(Clone, Debug)]
pub enum PasswordSource {
    Given(Password),
    /// The password a protected build with this id was given when none was
    /// supplied.
    Build {
        build_id: Uuid,
        classification: Classification,
    },
    /// Derived from the input's content fingerprint. Only protects: the
    /// protected copy no longer has that fingerprint.
    Document { classification: Classification },
}

impl PasswordSource {
    /// The password and whether it was derived.
    fn resolve(&self, secret: &ProjectSecret, input: &Path) -> Result<(Password, bool)> {
        match self {
            Self::Given(password) => Ok((password.clone(), false)),
            Self::Build {
                build_id,
                classification,
            } => Ok((
                Password::new(secret.derive_password(build_id.as_bytes(), classification.as_str())),
                true,
            )),
            Self::Document { classification } => {
                let fingerprint = ContentHasher::ARTIFACT.hash_file(input)?;
                Ok((
                    Password::new(
                        secret.derive_password(fingerprint.as_bytes(), classification.as_str()),
                    ),
                    true,
                ))
            }
        }
    }
}

/// Result of [`protect_document`].
#[derive(Debug)]
pub struct ProtectReport {
    pub output: PathBuf,
    pub outcome: ProtectionOutcome,
    /// Set when the password was derived rather than given.
    pub derived_password: Option<Password>,
}

/// `<stem>.protected.pdf` next to `input`.
pub fn protected_path(input: &Path) -> PathBuf {
    input.with_file_name(format!("{}.protected.pdf", base_stem(input)))
}

/// `<stem>.unprotected.pdf` next to `input`, dropping a `.protected` suffix
/// from the stem.
pub fn unprotected_path(input: &Path) -> PathBuf {
    input.with_file_name(format!("{}.unprotected.pdf", base_stem(input)))
}

fn base_stem(input: &Path) -> String {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "document".into());
    match stem.strip_suffix(".protected") {
        Some(base) if !base.is_empty() => base.to_string(),
        _ => stem,
    }
}

/// Write a password-protected copy of `input`.
pub fn protect_document(
    tools: &Toolbox,
    secret: &ProjectSecret,
    input: &Path,
    output: Option<&Path>,
    source: &PasswordSource,
) -> Result<ProtectReport> {
    let output = output.map_or_else(|| protected_path(input), Path::to_path_buf);
    check_paths(input, &output)?;
    let (password, derived) = source.resolve(secret, input)?;

    let mut gate = ProtectionGate::new(tools.renderer.as_ref());
    if let Some(external) = tools.protector.as_deref() {
        gate = gate.with_external(external);
    }
    let outcome = gate.protect(input, &output, password.expose())?;
    info!(
        input = %input.display(),
        output = %output.display(),
        method = %outcome.method,
        derived,
        "document protected"
    );
    Ok(ProtectReport {
        output,
        outcome,
        derived_password: derived.then_some(password),
    })
}

/// Write an unprotected copy of `input`, returning its path.
pub fn unprotect_document(
    tools: &Toolbox,
    secret: &ProjectSecret,
    input: &Path,
    output: Option<&Path>,
    source: &PasswordSource,
) -> Result<PathBuf> {
    if matches!(source, PasswordSource::Document { .. }) {
        return Err(BuildError::Request(
            "unprotecting needs the password or the build id it was protected for".into(),
        ));
    }
    let output = output.map_or_else(|| unprotected_path(input), Path::to_path_buf);
    check_paths(input, &output)?;
    let (password, _) = source.resolve(secret, input)?;
    tools
        .renderer
        .write_decrypted(input, &output, password.expose())
        .map_err(BuildError::Unprotect)?;
    info!(input = %input.display(), output = %output.display(), "protection removed");
    Ok(output)
}

fn check_paths(input: &Path, output: &Path) -> Result<()> {
    if !input.is_file() {
        return Err(BuildError::Request(format!(
            "{} does not exist",
            input.display()
        )));
    }
    if input == output {
        return Err(BuildError::Request(
            "output must differ from the input document".into(),
        ));
    }
    Ok(())
}

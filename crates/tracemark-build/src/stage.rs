use std::path::{Path, PathBuf};
use std::time::Duration;

use tracemark_crypto::ProjectSecret;
use tracemark_gate::ProtectionOutcome;
use tracemark_mark::RecipientToken;
use tracemark_types::{PendingRecord, Stage};

use crate::error::BuildError;
use crate::request::{BuildRequest, Password};
use crate::tools::{ToolAvailability, Toolbox};

// ---------------------------------------------------------------------------
// StageDecision
// ---------------------------------------------------------------------------

/// The outcome of a stage that did not fail.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StageDecision {
    /// The stage did its work; proceed.
    Advance,
    /// The stage could not run but the build continues without it.
    Skip { reason: String },
    /// The stage ran but fell short; the build continues and ends `Partial`.
    Degrade { note: String },
}

impl StageDecision {
    pub fn is_advance(&self) -> bool {
        matches!(self, Self::Advance)
    }
}

// ---------------------------------------------------------------------------
// StageResult
// ---------------------------------------------------------------------------

/// What happened to one stage during a build.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StageStatus {
    Advanced,
    /// Optional stage the request did not ask for.
    NotRequested,
    Skipped(String),
    Degraded(String),
    Failed(String),
}

/// Recorded result of one stage, in pipeline order.
#[derive(Clone, Debug)]
pub struct StageResult {
    pub stage: Stage,
    pub status: StageStatus,
    pub elapsed: Duration,
}

// ---------------------------------------------------------------------------
// BuildPaths
// ---------------------------------------------------------------------------

/// Where one build writes its files.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BuildPaths {
    pub out_dir: PathBuf,
    /// Compiler output directory, kept apart from the final artifact names.
    pub latex_dir: PathBuf,
    /// `<stem>.work.pdf`, the file every stage edits in place.
    pub work: PathBuf,
    /// Protected copy before promotion.
    pub protected_work: PathBuf,
    /// `<stem>.pdf`, or `<stem>.protected.pdf` for protected builds. Only
    /// the promote step creates it.
    pub final_output: PathBuf,
}

impl BuildPaths {
    pub fn new(out_dir: &Path, stem: &str, protected: bool) -> Self {
        let final_name = if protected {
            format!("{stem}.protected.pdf")
        } else {
            format!("{stem}.pdf")
        };
        Self {
            out_dir: out_dir.to_path_buf(),
            latex_dir: out_dir.join(".latex"),
            work: out_dir.join(format!("{stem}.work.pdf")),
            protected_work: out_dir.join(format!("{stem}.work.protected.pdf")),
            final_output: out_dir.join(final_name),
        }
    }
}

// ---------------------------------------------------------------------------
// BuildContext
// ---------------------------------------------------------------------------

/// State shared by the stages of one build.
pub struct BuildContext<'a> {
    pub request: &'a BuildRequest,
    pub tools: &'a Toolbox,
    pub availability: &'a ToolAvailability,
    pub secret: &'a ProjectSecret,
    pub paths: BuildPaths,
    pub raster_dpi: u32,
    /// The record being filled in; appended once the pipeline ends.
    pub record: PendingRecord,
    pub token: Option<RecipientToken>,
    /// Set when the password was derived rather than supplied, so it can be
    /// handed back to the caller.
    pub generated_password: Option<Password>,
    pub protection: Option<ProtectionOutcome>,
    /// Results from stages that already ran in this build.
    pub previous_stages: Vec<StageResult>,
}

// ---------------------------------------------------------------------------
// BuildStage trait
// ---------------------------------------------------------------------------

/// One step of the build pipeline.
///
/// Each stage is attempted at most once per build. Returning `Err` halts the
/// pipeline; the build is then recorded as failed at [`BuildStage::stage`].
pub trait BuildStage: Send + Sync {
    /// The pipeline position this stage occupies.
    fn stage(&self) -> Stage;

    fn name(&self) -> &str {
        self.stage().as_str()
    }

    fn run(&self, ctx: &mut BuildContext<'_>) -> Result<StageDecision, BuildError>;
}

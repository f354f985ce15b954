use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::classification::Classification;
use crate::error::TypeError;
use crate::fingerprint::Fingerprint;

// ---------------------------------------------------------------------------
// RecordId
// ---------------------------------------------------------------------------

/// Ledger sequence number of a build record.
///
/// Ids start at 1 and increase by exactly one per appended record within a
/// project.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(pub u64);

impl RecordId {
    pub const FIRST: Self = Self(1);

    pub fn next(self) -> Self {
        Self(self.0 + 1)
    }

    pub fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Stage
// ---------------------------------------------------------------------------

/// Pipeline stages, in the only order a build may traverse them.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Stage {
    SourceReady,
    Compiled,
    Marked,
    Tokenized,
    Rasterized,
    Protected,
    Recorded,
}

impl Stage {
    /// All stages in pipeline order.
    pub const ALL: [Stage; 7] = [
        Stage::SourceReady,
        Stage::Compiled,
        Stage::Marked,
        Stage::Tokenized,
        Stage::Rasterized,
        Stage::Protected,
        Stage::Recorded,
    ];

    /// Stages that only run when the build request asks for them.
    pub fn is_optional(self) -> bool {
        matches!(self, Stage::Tokenized | Stage::Rasterized | Stage::Protected)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Stage::SourceReady => "source-ready",
            Stage::Compiled => "compiled",
            Stage::Marked => "marked",
            Stage::Tokenized => "tokenized",
            Stage::Rasterized => "rasterized",
            Stage::Protected => "protected",
            Stage::Recorded => "recorded",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Stage {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Stage::ALL
            .into_iter()
            .find(|stage| stage.as_str() == s)
            .ok_or_else(|| TypeError::UnknownStage(s.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Outcome
// ---------------------------------------------------------------------------

/// Final result of one build attempt.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Outcome {
    /// Every requested stage completed.
    Success,
    /// An artifact was produced but a requested optional stage degraded.
    Partial { stage: Stage, summary: String },
    /// The pipeline halted at `stage`; no final artifact exists.
    Failed { stage: Stage, summary: String },
}

impl Outcome {
    pub fn kind(&self) -> OutcomeKind {
        match self {
            Outcome::Success => OutcomeKind::Success,
            Outcome::Partial { .. } => OutcomeKind::Partial,
            Outcome::Failed { .. } => OutcomeKind::Failed,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success)
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Outcome::Failed { .. })
    }

    /// The stage a non-success outcome refers to.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            Outcome::Success => None,
            Outcome::Partial { stage, .. } | Outcome::Failed { stage, .. } => Some(*stage),
        }
    }

    /// Error summary for non-success outcomes.
    pub fn summary(&self) -> Option<&str> {
        match self {
            Outcome::Success => None,
            Outcome::Partial { summary, .. } | Outcome::Failed { summary, .. } => Some(summary),
        }
    }
}

/// Discriminant of [`Outcome`], used for filtering.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OutcomeKind {
    Success,
    Partial,
    Failed,
}

impl fmt::Display for OutcomeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OutcomeKind::Success => "success",
            OutcomeKind::Partial => "partial",
            OutcomeKind::Failed => "failed",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// ProtectionMethod
// ---------------------------------------------------------------------------

/// Which path of the protection gate produced the protected file.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProtectionMethod {
    External,
    Native,
}

impl fmt::Display for ProtectionMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtectionMethod::External => f.write_str("external"),
            ProtectionMethod::Native => f.write_str("native"),
        }
    }
}

// ---------------------------------------------------------------------------
// WatermarkParams
// ---------------------------------------------------------------------------

/// Visible watermark parameters as requested by the caller.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatermarkParams {
    pub text: String,
    /// 0 is an invisible track-only overlay, 100 is fully opaque.
    pub opacity: u8,
    /// Rotation in degrees, counter-clockwise.
    pub angle: i32,
    pub tile: bool,
}

impl WatermarkParams {
    pub const DEFAULT_OPACITY: u8 = 40;
    pub const DEFAULT_ANGLE: i32 = 45;

    pub fn new(
        text: impl Into<String>,
        opacity: u16,
        angle: i32,
        tile: bool,
    ) -> Result<Self, TypeError> {
        let text = text.into();
        if text.trim().is_empty() {
            return Err(TypeError::EmptyWatermarkText);
        }
        if opacity > 100 {
            return Err(TypeError::OpacityOutOfRange(opacity));
        }
        Ok(Self {
            text,
            opacity: opacity as u8,
            angle,
            tile,
        })
    }

    /// Watermark with the default opacity and angle.
    pub fn with_defaults(text: impl Into<String>) -> Result<Self, TypeError> {
        Self::new(
            text,
            u16::from(Self::DEFAULT_OPACITY),
            Self::DEFAULT_ANGLE,
            false,
        )
    }
}

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// A build record before the ledger has assigned it an id.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingRecord {
    pub build_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub classification: Classification,
    pub owner: Option<String>,
    pub purpose: Option<String>,
    pub nudge: Option<String>,
    pub operator: String,
    pub source_path: String,
    pub source_hash: Fingerprint,
    pub output_path: Option<String>,
    pub output_hash: Option<Fingerprint>,
    pub watermark: Option<WatermarkParams>,
    pub recipient: Option<String>,
    pub recipient_token: Option<String>,
    pub rasterized: bool,
    pub raster_dpi: Option<u32>,
    pub protected: bool,
    pub protection_method: Option<ProtectionMethod>,
    pub password_hint: Option<String>,
    pub notes: Vec<String>,
    pub outcome: Outcome,
}

impl PendingRecord {
    /// A record for a build that has not progressed past `SourceReady`.
    pub fn new(
        build_id: Uuid,
        classification: Classification,
        operator: impl Into<String>,
        source_path: impl Into<String>,
        source_hash: Fingerprint,
    ) -> Self {
        Self {
            build_id,
            timestamp: Utc::now(),
            classification,
            owner: None,
            purpose: None,
            nudge: None,
            operator: operator.into(),
            source_path: source_path.into(),
            source_hash,
            output_path: None,
            output_hash: None,
            watermark: None,
            recipient: None,
            recipient_token: None,
            rasterized: false,
            raster_dpi: None,
            protected: false,
            protection_method: None,
            password_hint: None,
            notes: Vec::new(),
            outcome: Outcome::Success,
        }
    }

    /// Attach the ledger-assigned id, producing the immutable record.
    pub fn into_record(self, id: RecordId) -> BuildRecord {
        BuildRecord {
            id,
            build_id: self.build_id,
            timestamp: self.timestamp,
            classification: self.classification,
            owner: self.owner,
            purpose: self.purpose,
            nudge: self.nudge,
            operator: self.operator,
            source_path: self.source_path,
            source_hash: self.source_hash,
            output_path: self.output_path,
            output_hash: self.output_hash,
            watermark: self.watermark,
            recipient: self.recipient,
            recipient_token: self.recipient_token,
            rasterized: self.rasterized,
            raster_dpi: self.raster_dpi,
            protected: self.protected,
            protection_method: self.protection_method,
            password_hint: self.password_hint,
            notes: self.notes,
            outcome: self.outcome,
        }
    }
}

/// Immutable ledger entry capturing one build attempt.
///
/// Fields are public for reading; the ledger hands out clones, so mutating a
/// returned record never changes what is stored.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildRecord {
    pub id: RecordId,
    pub build_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub classification: Classification,
    pub owner: Option<String>,
    pub purpose: Option<String>,
    pub nudge: Option<String>,
    pub operator: String,
    pub source_path: String,
    pub source_hash: Fingerprint,
    pub output_path: Option<String>,
    pub output_hash: Option<Fingerprint>,
    pub watermark: Option<WatermarkParams>,
    pub recipient: Option<String>,
    pub recipient_token: Option<String>,
    pub rasterized: bool,
    pub raster_dpi: Option<u32>,
    pub protected: bool,
    pub protection_method: Option<ProtectionMethod>,
    pub password_hint: Option<String>,
    pub notes: Vec<String>,
    pub outcome: Outcome,
}

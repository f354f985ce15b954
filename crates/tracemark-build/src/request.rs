use std::fmt;
use std::path::{Path, PathBuf};

use tracemark_types::{Classification, Stage, WatermarkParams};

// ---------------------------------------------------------------------------
// Password
// ---------------------------------------------------------------------------

/// A document password. Never printed by `Debug`.
#[derive(Clone, PartialEq, Eq)]
pub struct Password(String);

impl Password {
    pub fn new(password: impl Into<String>) -> Self {
        Self(password.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    /// First two characters followed by an ellipsis; the only part of a
    /// password that is ever recorded.
    pub fn hint(&self) -> String {
        let head: String = self.0.chars().take(2).collect();
        format!("{head}…")
    }
}

impl fmt::Debug for Password {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Password(<redacted>)")
    }
}

// ---------------------------------------------------------------------------
// BuildRequest
// ---------------------------------------------------------------------------

/// Everything the caller asks of one build.
#[derive(Clone, Debug)]
pub struct BuildRequest {
    pub source: PathBuf,
    /// Falls back to the project's default classification.
    pub classification: Option<Classification>,
    pub owner: Option<String>,
    pub purpose: Option<String>,
    pub nudge: Option<String>,
    pub watermark: Option<WatermarkParams>,
    /// Append the recipient token to the visible watermark text.
    pub token_in_watermark: bool,
    pub recipient: Option<String>,
    pub rasterize: bool,
    /// Falls back to the project's configured dpi.
    pub raster_dpi: Option<u32>,
    pub protect: bool,
    /// Derived from the project secret when protection is requested
    /// without one.
    pub password: Option<Password>,
    /// Falls back to the project's output directory.
    pub output_dir: Option<PathBuf>,
}

impl BuildRequest {
    pub fn new(source: impl Into<PathBuf>) -> Self {
        Self {
            source: source.into(),
            classification: None,
            owner: None,
            purpose: None,
            nudge: None,
            watermark: None,
            token_in_watermark: false,
            recipient: None,
            rasterize: false,
            raster_dpi: None,
            protect: false,
            password: None,
            output_dir: None,
        }
    }

    pub fn classification(mut self, classification: impl Into<Classification>) -> Self {
        self.classification = Some(classification.into());
        self
    }

    pub fn owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = Some(owner.into());
        self
    }

    pub fn purpose(mut self, purpose: impl Into<String>) -> Self {
        self.purpose = Some(purpose.into());
        self
    }

    pub fn nudge(mut self, nudge: impl Into<String>) -> Self {
        self.nudge = Some(nudge.into());
        self
    }

    pub fn watermark(mut self, params: WatermarkParams) -> Self {
        self.watermark = Some(params);
        self
    }

    pub fn recipient(mut self, recipient: impl Into<String>) -> Self {
        self.recipient = Some(recipient.into());
        self
    }

    pub fn token_in_watermark(mut self, yes: bool) -> Self {
        self.token_in_watermark = yes;
        self
    }

    pub fn rasterize(mut self, dpi: Option<u32>) -> Self {
        self.rasterize = true;
        self.raster_dpi = dpi;
        self
    }

    pub fn protect(mut self, password: Option<Password>) -> Self {
        self.protect = true;
        self.password = password;
        self
    }

    pub fn output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = Some(dir.into());
        self
    }

    /// Whether the request asks for `stage`. Mandatory stages are always
    /// wanted.
    pub fn wants(&self, stage: Stage) -> bool {
        match stage {
            Stage::Tokenized => self.recipient.is_some(),
            Stage::Rasterized => self.rasterize,
            Stage::Protected => self.protect,
            _ => true,
        }
    }

    /// File stem shared by every artifact of this build.
    pub fn stem(&self) -> String {
        self.source
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "document".into())
    }

    pub fn source(&self) -> &Path {
        &self.source
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn password_hint_is_two_chars() {
        assert_eq!(Password::new("hunter2").hint(), "hu…");
        assert_eq!(Password::new("x").hint(), "x…");
    }

    #[test]
    fn password_debug_is_redacted() {
        let rendered = format!("{:?}", BuildRequest::new("a.tex").protect(Some(Password::new("s3cret"))));
        assert!(!rendered.contains("s3cret"));
    }

    #[test]
    fn optional_stages_follow_request() {
        let plain = BuildRequest::new("doc.tex");
        assert!(plain.wants(Stage::Compiled));
        assert!(!plain.wants(Stage::Tokenized));
        assert!(!plain.wants(Stage::Rasterized));
        assert!(!plain.wants(Stage::Protected));

        let full = plain.recipient("bob").rasterize(None).protect(None);
        assert!(full.wants(Stage::Tokenized));
        assert!(full.wants(Stage::Rasterized));
        assert!(full.wants(Stage::Protected));
    }

    #[test]
    fn stem_from_source() {
        assert_eq!(BuildRequest::new("reports/q3.tex").stem(), "q3");
    }
}

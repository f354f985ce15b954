/// Errors raised while marking a document.
///
/// Any marking error aborts the build before protection is attempted.
#[derive(Debug, thiserror::Error)]
pub enum MarkingError {
    #[error("document has no pages")]
    NoPages,

    #[error("page {page} has unusable geometry {width}x{height}")]
    InvalidGeometry { page: usize, width: f64, height: f64 },

    #[error("overlay failed: {0}")]
    Overlay(String),

    #[error("metadata embedding failed: {0}")]
    Metadata(String),
}

impl PartialEq for MarkingError {
    fn eq(&self, other: &Self) -> bool {
        self.to_string() == other.to_string()
    }
}

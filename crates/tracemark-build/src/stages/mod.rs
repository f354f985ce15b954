//! Built-in build stages, in pipeline order.

pub mod compile;
pub mod mark;
pub mod protect;
pub mod raster;
pub mod source;
pub mod token;

pub use compile::CompileStage;
pub use mark::MarkStage;
pub use protect::ProtectStage;
pub use raster::RasterStage;
pub use source::SourceStage;
pub use token::TokenStage;

use crate::stage::BuildStage;

/// The standard pipeline:
/// SourceReady -> Compiled -> Marked -> Tokenized -> Rasterized -> Protected
pub fn default_stages() -> Vec<Box<dyn BuildStage>> {
    vec![
        Box::new(SourceStage),
        Box::new(CompileStage),
        Box::new(MarkStage),
        Box::new(TokenStage),
        Box::new(RasterStage),
        Box::new(ProtectStage),
    ]
}

pub(crate) fn remove_if_present(path: &std::path::Path) -> std::io::Result<()> {
    match std::fs::remove_file(path) {
        Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

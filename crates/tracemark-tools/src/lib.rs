//! External collaborators of a tracemark build.
//!
//! The build orchestrator only sees the traits in [`traits`]; this crate
//! also ships the concrete adapters used outside tests:
//!
//! - [`LatexCompiler`] runs `latexmk` or the configured engine
//! - [`Ghostscript`] rasterizes through `gs -sDEVICE=pdfimage24`
//! - [`Qpdf`] protects through `qpdf --encrypt`
//! - [`LopdfRenderer`] overlays, embeds metadata, and encrypts in process

pub mod error;
pub mod ghostscript;
pub mod latex;
pub mod probe;
mod process;
pub mod qpdf;
pub mod renderer;
pub mod traits;

pub use error::ToolError;
pub use ghostscript::Ghostscript;
pub use latex::LatexCompiler;
pub use probe::{Availability, ExternalTool};
pub use qpdf::Qpdf;
pub use renderer::LopdfRenderer;
pub use traits::{
    Compiler, DocumentRenderer, ExternalProtector, ProtectorCapabilities, Rasterizer,
    ToolVersion, CAPABILITIES_SCHEMA_VERSION,
};

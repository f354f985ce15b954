//! Build orchestration for tracemark.
//!
//! A [`Project`] owns the configuration, key material, and ledger of one
//! directory. [`BuildOrchestrator`] runs a [`BuildRequest`] through the stage
//! pipeline:
//!
//! SourceReady -> Compiled -> Marked -> Tokenized -> Rasterized -> Protected
//!
//! and appends a record of the attempt, successful or not. Optional stages
//! only run when the request asks for them; a missing rasterizer is noted
//! and skipped, a missing external protector falls back to native
//! encryption.
//!
//! [`validate_document`] maps a leaked copy back to ledger records,
//! [`fanout`] builds one copy per recipient, and [`protect_document`]
//! protects a PDF that was not built here.

pub mod config;
pub mod error;
pub mod fanout;
pub mod pipeline;
pub mod project;
pub mod protect;
pub mod request;
pub mod stage;
pub mod stages;
pub mod tools;
pub mod validate;

#[cfg(test)]
pub(crate) mod testing;

pub use config::ProjectConfig;
pub use error::{BuildError, Result};
pub use fanout::{fanout, parse_recipients, recipient_dir_name, FanoutResult};
pub use pipeline::{BuildOrchestrator, BuildReport, BuildSettings};
pub use project::{current_operator, OperatorKeyInfo, Project};
pub use protect::{
    protect_document, protected_path, unprotect_document, unprotected_path, PasswordSource,
    ProtectReport,
};
pub use request::{BuildRequest, Password};
pub use stage::{BuildContext, BuildPaths, BuildStage, StageDecision, StageResult, StageStatus};
pub use tools::{ToolAvailability, Toolbox};
pub use validate::{validate_document, ValidationReport};

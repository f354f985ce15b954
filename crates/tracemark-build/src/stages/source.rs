use std::fs;

use tracemark_crypto::ContentHasher;
use tracemark_types::Stage;
use tracing::debug;

use crate::error::BuildError;
use crate::stage::{BuildContext, BuildStage, StageDecision};
use crate::stages::remove_if_present;

/// Checks the source, fingerprints it, and clears the final output path.
///
/// A final artifact left over from an earlier build is removed so that a
/// failed build never leaves a file at the path it would have promoted to.
pub struct SourceStage;

impl BuildStage for SourceStage {
    fn stage(&self) -> Stage {
        Stage::SourceReady
    }

    fn run(&self, ctx: &mut BuildContext<'_>) -> Result<StageDecision, BuildError> {
        let source = ctx.request.source();
        if !source.is_file() {
            return Err(BuildError::Request(format!(
                "source {} is not a readable file",
                source.display()
            )));
        }
        ctx.record.source_hash = ContentHasher::SOURCE.hash_file(source)?;
        fs::create_dir_all(&ctx.paths.out_dir)?;
        remove_if_present(&ctx.paths.final_output)?;
        debug!(
            source = %source.display(),
            hash = %ctx.record.source_hash.short_hex(),
            "source fingerprinted"
        );
        Ok(StageDecision::Advance)
    }
}

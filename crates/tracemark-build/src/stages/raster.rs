use std::fs;

use tracemark_tools::Availability;
use tracemark_types::Stage;
use tracing::{info, warn};

use crate::error::BuildError;
use crate::stage::{BuildContext, BuildStage, StageDecision};
use crate::stages::mark::embed_metadata;

/// Flattens the working file to images.
///
/// A missing rasterizer skips the stage; a rasterizer that runs and fails
/// degrades the build, which keeps its vector pages.
pub struct RasterStage;

impl BuildStage for RasterStage {
    fn stage(&self) -> Stage {
        Stage::Rasterized
    }

    fn run(&self, ctx: &mut BuildContext<'_>) -> Result<StageDecision, BuildError> {
        let tools = ctx.tools;
        let rasterizer = tools.rasterizer.as_ref();
        if let Some(Availability::Unavailable { reason }) = &ctx.availability.rasterizer {
            return Ok(StageDecision::Skip {
                reason: format!("{} unavailable: {reason}", rasterizer.name()),
            });
        }

        let dpi = ctx.raster_dpi;
        let flattened = match rasterizer.rasterize(&ctx.paths.work, dpi) {
            Ok(path) => path,
            Err(e) if e.is_unavailable() => {
                return Ok(StageDecision::Skip {
                    reason: e.to_string(),
                })
            }
            Err(e) => {
                warn!(error = %e, "rasterization failed");
                return Ok(StageDecision::Degrade {
                    note: format!("rasterization failed, pages stay vector: {e}"),
                });
            }
        };

        fs::rename(&flattened, &ctx.paths.work)?;
        // Rasterizing drops the information dictionary.
        embed_metadata(ctx)?;
        ctx.record.rasterized = true;
        ctx.record.raster_dpi = Some(dpi);
        info!(dpi, "rasterized");
        Ok(StageDecision::Advance)
    }
}

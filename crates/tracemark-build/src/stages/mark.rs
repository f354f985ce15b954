use tracemark_mark::{MarkingError, MarkingFields, MetadataEmbedder, WatermarkEngine};
use tracemark_tools::ToolError;
use tracemark_types::{Stage, WatermarkParams};
use tracing::debug;

use crate::error::BuildError;
use crate::stage::{BuildContext, BuildStage, StageDecision};

/// Applies the visible watermark and embeds the classification metadata.
pub struct MarkStage;

impl BuildStage for MarkStage {
    fn stage(&self) -> Stage {
        Stage::Marked
    }

    fn run(&self, ctx: &mut BuildContext<'_>) -> Result<StageDecision, BuildError> {
        ctx.record.watermark = ctx.request.watermark.clone();
        mark_document(ctx)?;
        Ok(StageDecision::Advance)
    }
}

/// Overlay and metadata for the working file, reflecting everything known
/// so far. Safe to repeat: a second pass replaces the first.
pub(crate) fn mark_document(ctx: &BuildContext<'_>) -> Result<(), MarkingError> {
    let renderer = ctx.tools.renderer.as_ref();
    let work = &ctx.paths.work;
    let token = ctx.token.as_ref().map(|t| t.as_str());

    let params = match (&ctx.request.watermark, token) {
        (Some(params), _) => Some(params.clone()),
        // No visible watermark asked for: carry the token in an invisible
        // track-only overlay.
        (None, Some(token)) => Some(
            WatermarkParams::new(token, 0, 0, false)
                .map_err(|e| MarkingError::Overlay(e.to_string()))?,
        ),
        (None, None) => None,
    };

    if let Some(params) = params {
        let pages = renderer.page_geometry(work).map_err(overlay_error)?;
        let in_text = ctx.request.token_in_watermark && ctx.request.watermark.is_some();
        let overlay = WatermarkEngine::new().plan(&pages, &params, token, in_text)?;
        renderer.apply_overlay(work, &overlay).map_err(overlay_error)?;
        debug!(instances = overlay.instance_count(), "overlay applied");
    }
    embed_metadata(ctx)
}

/// Write the metadata entries for the current record into the working file.
pub(crate) fn embed_metadata(ctx: &BuildContext<'_>) -> Result<(), MarkingError> {
    let fields = MarkingFields {
        classification: ctx.record.classification.clone(),
        owner: ctx.record.owner.clone(),
        purpose: ctx.record.purpose.clone(),
        nudge: ctx.record.nudge.clone(),
        build_id: Some(ctx.record.build_id),
        token: ctx.token.as_ref().map(|t| t.to_string()),
        operator: Some(ctx.record.operator.clone()),
    };
    let metadata = MetadataEmbedder::new().entries(&fields);
    ctx.tools
        .renderer
        .embed_metadata(&ctx.paths.work, &metadata)
        .map_err(|e| MarkingError::Metadata(e.to_string()))
}

fn overlay_error(err: ToolError) -> MarkingError {
    MarkingError::Overlay(err.to_string())
}

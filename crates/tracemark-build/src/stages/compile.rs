use std::fs;

use tracemark_tools::ToolError;
use tracemark_types::Stage;
use tracing::info;

use crate::error::BuildError;
use crate::stage::{BuildContext, BuildStage, StageDecision};

/// Runs the compiler and copies its PDF to the working file.
pub struct CompileStage;

impl BuildStage for CompileStage {
    fn stage(&self) -> Stage {
        Stage::Compiled
    }

    fn run(&self, ctx: &mut BuildContext<'_>) -> Result<StageDecision, BuildError> {
        let tools = ctx.tools;
        let compiler = tools.compiler.as_ref();
        if let Some(reason) = ctx.availability.compiler.reason() {
            return Err(BuildError::Compile(ToolError::Unavailable {
                tool: compiler.name().to_string(),
                reason: reason.to_string(),
            }));
        }
        let produced = compiler
            .compile(ctx.request.source(), &ctx.paths.latex_dir)
            .map_err(BuildError::Compile)?;
        fs::copy(&produced, &ctx.paths.work)?;
        info!(pdf = %ctx.paths.work.display(), "compiled");
        Ok(StageDecision::Advance)
    }
}

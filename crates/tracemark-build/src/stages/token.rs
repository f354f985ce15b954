use tracemark_mark::RecipientTokenizer;
use tracemark_types::Stage;
use tracing::info;

use crate::error::BuildError;
use crate::stage::{BuildContext, BuildStage, StageDecision};
use crate::stages::mark::mark_document;

/// Derives the recipient token and re-marks the document with it.
///
/// The token is keyed on the source fingerprint, so the same recipient gets
/// different tokens for different documents.
pub struct TokenStage;

impl BuildStage for TokenStage {
    fn stage(&self) -> Stage {
        Stage::Tokenized
    }

    fn run(&self, ctx: &mut BuildContext<'_>) -> Result<StageDecision, BuildError> {
        let request = ctx.request;
        let Some(recipient) = request.recipient.as_deref() else {
            return Ok(StageDecision::Skip {
                reason: "no recipient".into(),
            });
        };
        let tokenizer = RecipientTokenizer::new(ctx.secret.token_key());
        let Some(token) = tokenizer.token(ctx.record.source_hash.as_bytes(), recipient) else {
            return Ok(StageDecision::Skip {
                reason: "recipient is blank".into(),
            });
        };

        ctx.record.recipient = Some(recipient.trim().to_string());
        ctx.record.recipient_token = Some(token.to_string());
        ctx.token = Some(token);
        mark_document(ctx)?;
        info!(recipient = recipient.trim(), "recipient token embedded");
        Ok(StageDecision::Advance)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::BuildRequest;
    use crate::stage::BuildStage;
    use crate::stages::MarkStage;
    use crate::testing::{context, toolbox, Behaviour, Fixture};

    #[test]
    fn token_lands_in_record_and_metadata() {
        let fx = Fixture::new(toolbox(Behaviour::Works, Behaviour::Works, Behaviour::Works));
        let request = BuildRequest::new(fx.source()).recipient(" bob@example.com ");
        let availability = fx.tools.probe(&request);
        let mut ctx = context(&fx, &request, &availability);
        fx.compile_into(&ctx.paths.work);
        MarkStage.run(&mut ctx).unwrap();

        assert!(TokenStage.run(&mut ctx).unwrap().is_advance());
        let token = ctx.record.recipient_token.clone().unwrap();
        assert!(token.starts_with("tm-"));
        assert_eq!(ctx.record.recipient.as_deref(), Some("bob@example.com"));

        let meta = fx.tools.renderer.read_metadata(&ctx.paths.work).unwrap();
        assert_eq!(meta.token(), Some(token.as_str()));
        let raw = String::from_utf8_lossy(&std::fs::read(&ctx.paths.work).unwrap()).into_owned();
        assert!(raw.contains(&token));
    }

    #[test]
    fn blank_recipient_is_skipped() {
        let fx = Fixture::new(toolbox(Behaviour::Works, Behaviour::Works, Behaviour::Works));
        let request = BuildRequest::new(fx.source()).recipient("   ");
        let availability = fx.tools.probe(&request);
        let mut ctx = context(&fx, &request, &availability);

        let decision = TokenStage.run(&mut ctx).unwrap();
        assert!(matches!(decision, StageDecision::Skip { .. }));
        assert!(ctx.record.recipient_token.is_none());
    }
}

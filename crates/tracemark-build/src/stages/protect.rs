use tracemark_gate::{ProtectionError, ProtectionGate};
use tracemark_types::Stage;

use crate::error::BuildError;
use crate::request::Password;
use crate::stage::{BuildContext, BuildStage, StageDecision};

/// Password-protects the working file through the protection gate.
///
/// Without a supplied password one is derived from the project secret and
/// the build id, and handed back through the build report.
pub struct ProtectStage;

impl BuildStage for ProtectStage {
    fn stage(&self) -> Stage {
        Stage::Protected
    }

    fn run(&self, ctx: &mut BuildContext<'_>) -> Result<StageDecision, BuildError> {
        let (password, generated) = match &ctx.request.password {
            Some(password) => (password.clone(), false),
            None => (
                Password::new(ctx.secret.derive_password(
                    ctx.record.build_id.as_bytes(),
                    ctx.record.classification.as_str(),
                )),
                true,
            ),
        };

        let tools = ctx.tools;
        let mut gate = ProtectionGate::new(tools.renderer.as_ref());
        if let Some(external) = tools.protector.as_deref() {
            gate = gate.with_external(external);
            if let Some(availability) = &ctx.availability.protector {
                gate = gate.with_availability(availability.clone());
            }
        }

        let outcome = match gate.protect(
            &ctx.paths.work,
            &ctx.paths.protected_work,
            password.expose(),
        ) {
            Ok(outcome) => outcome,
            Err(err) => {
                if let ProtectionError::Exhausted { trace, .. } = &err {
                    ctx.record.notes.push(format!("protection: {}", trace.path()));
                }
                return Err(err.into());
            }
        };

        for note in outcome.trace.notes() {
            ctx.record.notes.push(format!("protection: {note}"));
        }
        ctx.record.protected = true;
        ctx.record.protection_method = Some(outcome.method);
        ctx.record.password_hint = Some(password.hint());
        if generated {
            ctx.generated_password = Some(password);
        }
        ctx.protection = Some(outcome);
        Ok(StageDecision::Advance)
    }
}

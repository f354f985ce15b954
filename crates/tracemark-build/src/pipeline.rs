use std::fs;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use tracemark_crypto::{ContentHasher, ProjectSecret};
use tracemark_gate::ProtectionOutcome;
use tracemark_ledger::AuditLedger;
use tracemark_types::{BuildRecord, Classification, Fingerprint, Outcome, PendingRecord, Stage};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{BuildError, Result};
use crate::request::{BuildRequest, Password};
use crate::stage::{BuildContext, BuildPaths, BuildStage, StageDecision, StageResult, StageStatus};
use crate::stages::{default_stages, remove_if_present};
use crate::tools::{ToolAvailability, Toolbox};

// ---------------------------------------------------------------------------
// BuildSettings
// ---------------------------------------------------------------------------

/// Project-level defaults a build falls back on.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BuildSettings {
    pub output_dir: PathBuf,
    pub default_classification: Classification,
    pub raster_dpi: u32,
    /// `user@host` of whoever runs the build.
    pub operator: String,
}

// ---------------------------------------------------------------------------
// BuildReport
// ---------------------------------------------------------------------------

/// The recorded result of a build that produced an artifact.
#[derive(Debug)]
pub struct BuildReport {
    pub record: BuildRecord,
    pub output: PathBuf,
    /// The derived password when protection ran without one supplied. It is
    /// not stored anywhere else.
    pub generated_password: Option<Password>,
    pub protection: Option<ProtectionOutcome>,
    pub availability: ToolAvailability,
    /// Per-stage results in pipeline order.
    pub stage_results: Vec<StageResult>,
    pub elapsed: Duration,
}

impl BuildReport {
    pub fn outcome(&self) -> &Outcome {
        &self.record.outcome
    }
}

// ---------------------------------------------------------------------------
// BuildOrchestrator
// ---------------------------------------------------------------------------

/// Runs build requests through an ordered stage pipeline and records every
/// attempt in the ledger.
///
/// The pipeline is fail-fast: the first stage that returns an error stops
/// the build, which is then recorded as failed at that stage. The final
/// artifact is only created after every stage has run.
pub struct BuildOrchestrator<'a> {
    stages: Vec<Box<dyn BuildStage>>,
    ledger: &'a dyn AuditLedger,
    tools: &'a Toolbox,
    secret: &'a ProjectSecret,
    settings: BuildSettings,
}

impl<'a> BuildOrchestrator<'a> {
    /// An orchestrator with an empty pipeline. Use [`Self::register`] to add
    /// stages, or [`Self::with_default_stages`] for the standard pipeline.
    pub fn new(
        ledger: &'a dyn AuditLedger,
        tools: &'a Toolbox,
        secret: &'a ProjectSecret,
        settings: BuildSettings,
    ) -> Self {
        Self {
            stages: Vec::new(),
            ledger,
            tools,
            secret,
            settings,
        }
    }

    pub fn with_default_stages(
        ledger: &'a dyn AuditLedger,
        tools: &'a Toolbox,
        secret: &'a ProjectSecret,
        settings: BuildSettings,
    ) -> Self {
        let mut orchestrator = Self::new(ledger, tools, secret, settings);
        orchestrator.stages = default_stages();
        orchestrator
    }

    /// Append a stage. Stages must be registered in pipeline order, each
    /// position at most once; `Recorded` belongs to the orchestrator itself.
    pub fn register(&mut self, stage: Box<dyn BuildStage>) -> Result<()> {
        let position = stage.stage();
        let after = match self.stages.last() {
            Some(last) => last.stage(),
            None if position == Stage::Recorded => Stage::Recorded,
            None => {
                self.stages.push(stage);
                return Ok(());
            }
        };
        if position <= after || position == Stage::Recorded {
            return Err(BuildError::StageOrder {
                stage: position,
                after,
            });
        }
        self.stages.push(stage);
        Ok(())
    }

    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }

    pub fn settings(&self) -> &BuildSettings {
        &self.settings
    }

    /// Where `request` writes its files.
    pub fn output_dir_for(&self, request: &BuildRequest) -> PathBuf {
        request
            .output_dir
            .clone()
            .unwrap_or_else(|| self.settings.output_dir.clone())
    }

    /// Run one build and record it.
    ///
    /// On a stage failure the build is still appended to the ledger with
    /// `Outcome::Failed`, and the stage's error is returned. If the record
    /// of a successful build cannot be appended, the promoted artifact is
    /// removed and the ledger error returned.
    pub fn run(&self, request: &BuildRequest) -> Result<BuildReport> {
        let started = Instant::now();
        let build_id = Uuid::now_v7();
        let classification = request
            .classification
            .clone()
            .unwrap_or_else(|| self.settings.default_classification.clone());

        let mut record = PendingRecord::new(
            build_id,
            classification,
            self.settings.operator.clone(),
            request.source.display().to_string(),
            Fingerprint::from_hash([0u8; 32]),
        );
        record.owner = request.owner.clone();
        record.purpose = request.purpose.clone();
        record.nudge = request.nudge.clone();

        let availability = self.tools.probe(request);
        let mut ctx = BuildContext {
            request,
            tools: self.tools,
            availability: &availability,
            secret: self.secret,
            paths: BuildPaths::new(&self.output_dir_for(request), &request.stem(), request.protect),
            raster_dpi: request.raster_dpi.unwrap_or(self.settings.raster_dpi),
            record,
            token: None,
            generated_password: None,
            protection: None,
            previous_stages: Vec::with_capacity(self.stages.len()),
        };
        info!(%build_id, source = %request.source.display(), "build started");

        let mut failure = None;
        let mut degraded: Option<(Stage, String)> = None;

        for stage in &self.stages {
            let position = stage.stage();
            if !request.wants(position) {
                ctx.previous_stages.push(StageResult {
                    stage: position,
                    status: StageStatus::NotRequested,
                    elapsed: Duration::ZERO,
                });
                continue;
            }

            let stage_start = Instant::now();
            let status = match stage.run(&mut ctx) {
                Ok(StageDecision::Advance) => StageStatus::Advanced,
                Ok(StageDecision::Skip { reason }) => {
                    warn!(stage = stage.name(), %reason, "stage skipped");
                    ctx.record.notes.push(format!("{position}: {reason}"));
                    StageStatus::Skipped(reason)
                }
                Ok(StageDecision::Degrade { note }) => {
                    warn!(stage = stage.name(), %note, "stage degraded");
                    ctx.record.notes.push(format!("{position}: {note}"));
                    degraded.get_or_insert_with(|| (position, note.clone()));
                    StageStatus::Degraded(note)
                }
                Err(err) => {
                    warn!(stage = stage.name(), error = %err, "stage failed");
                    ctx.previous_stages.push(StageResult {
                        stage: position,
                        status: StageStatus::Failed(err.to_string()),
                        elapsed: stage_start.elapsed(),
                    });
                    failure = Some((position, err));
                    break;
                }
            };
            debug!(stage = stage.name(), ?status, "stage finished");
            ctx.previous_stages.push(StageResult {
                stage: position,
                status,
                elapsed: stage_start.elapsed(),
            });
        }

        if failure.is_none() && request.protect && !ctx.record.protected {
            failure = Some((
                Stage::Protected,
                BuildError::Request("protection was requested but no protection stage ran".into()),
            ));
        }
        if let Some((stage, err)) = failure {
            self.record_failure(ctx.record, stage, &err)?;
            return Err(err);
        }

        let output = match promote(&mut ctx) {
            Ok(output) => output,
            Err(err) => {
                self.record_failure(ctx.record, Stage::Recorded, &err)?;
                return Err(err);
            }
        };

        let BuildContext {
            mut record,
            generated_password,
            mut protection,
            previous_stages,
            ..
        } = ctx;
        record.outcome = match degraded {
            Some((stage, summary)) => Outcome::Partial { stage, summary },
            None => Outcome::Success,
        };
        if let Some(protection) = protection.as_mut() {
            protection.output = output.clone();
        }

        let record = match self.ledger.append(record) {
            Ok(record) => record,
            Err(err) => {
                warn!(error = %err, "build could not be recorded, removing artifact");
                remove_if_present(&output)?;
                return Err(err.into());
            }
        };
        info!(
            id = %record.id,
            outcome = %record.outcome.kind(),
            output = %output.display(),
            "build recorded"
        );

        Ok(BuildReport {
            record,
            output,
            generated_password,
            protection,
            availability,
            stage_results: previous_stages,
            elapsed: started.elapsed(),
        })
    }

    /// Append the failed attempt. A ledger error here replaces the stage error.
    fn record_failure(
        &self,
        mut record: PendingRecord,
        stage: Stage,
        err: &BuildError,
    ) -> Result<()> {
        record.outcome = Outcome::Failed {
            stage,
            summary: err.to_string(),
        };
        match self.ledger.append(record) {
            Ok(record) => {
                info!(id = %record.id, %stage, "failed build recorded");
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "failed build could not be recorded");
                Err(e.into())
            }
        }
    }
}

/// Move the last intermediate to the final artifact path and fingerprint it.
fn promote(ctx: &mut BuildContext<'_>) -> Result<PathBuf> {
    let paths = &ctx.paths;
    let from = if ctx.record.protected {
        &paths.protected_work
    } else {
        &paths.work
    };
    fs::rename(from, &paths.final_output)?;
    if ctx.record.protected {
        // Only the protected copy is left behind.
        remove_if_present(&paths.work)?;
    }
    let output = paths.final_output.clone();
    ctx.record.output_hash = Some(ContentHasher::ARTIFACT.hash_file(&output)?);
    ctx.record.output_path = Some(output.display().to_string());
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stages::{CompileStage, MarkStage, ProtectStage, SourceStage};
    use crate::testing::{toolbox, Behaviour, Fixture, FlakyRenderer};
    use tracemark_ledger::RecordFilter;
    use tracemark_types::{OutcomeKind, ProtectionMethod, RecordId, WatermarkParams};

    fn works() -> Fixture {
        Fixture::new(toolbox(Behaviour::Works, Behaviour::Works, Behaviour::Works))
    }

    // -- Registration --------------------------------------------------------

    #[test]
    fn default_pipeline_has_six_stages() {
        let fx = works();
        assert_eq!(fx.orchestrator().stage_count(), 6);
    }

    #[test]
    fn rejects_stage_registered_out_of_order() {
        let fx = works();
        let mut orch = BuildOrchestrator::new(&fx.ledger, &fx.tools, &fx.secret, fx.settings());
        orch.register(Box::new(SourceStage)).unwrap();
        orch.register(Box::new(MarkStage)).unwrap();
        assert_eq!(
            orch.register(Box::new(CompileStage)).unwrap_err(),
            BuildError::StageOrder {
                stage: Stage::Compiled,
                after: Stage::Marked
            }
        );
        assert!(orch.register(Box::new(MarkStage)).is_err());
        assert!(orch.register(Box::new(ProtectStage)).is_ok());
        assert_eq!(orch.stage_count(), 3);
    }

    // -- Scenarios -----------------------------------------------------------

    #[test]
    fn plain_protected_build_succeeds() {
        let fx = works();
        let request = BuildRequest::new(fx.source())
            .classification("SECRET")
            .watermark(WatermarkParams::with_defaults("SECRET").unwrap())
            .protect(Some(Password::new("correct horse")));

        let report = fx.orchestrator().run(&request).unwrap();

        assert_eq!(report.outcome(), &Outcome::Success);
        assert!(report.record.protected);
        assert_eq!(report.record.protection_method, Some(ProtectionMethod::External));
        assert_eq!(report.record.password_hint.as_deref(), Some("co…"));
        assert!(report.generated_password.is_none());
        assert!(report.output.ends_with("doc.protected.pdf"));
        assert!(fx
            .tools
            .renderer
            .is_password_gated(&report.output, "correct horse")
            .unwrap());
        assert!(!fx.out_dir().join("doc.work.pdf").exists());
        assert_eq!(
            report.record.output_hash,
            Some(ContentHasher::ARTIFACT.hash_file(&report.output).unwrap())
        );
        assert_eq!(fx.ledger.len().unwrap(), 1);
    }

    #[test]
    fn confidential_draft_without_recipient() {
        let fx = works();
        let watermark = WatermarkParams::new("DRAFT", 35, 30, false).unwrap();
        let request = BuildRequest::new(fx.source())
            .classification("CONFIDENTIAL")
            .watermark(watermark.clone())
            .protect(Some(Password::new("p@ss")));

        let report = fx.orchestrator().run(&request).unwrap();
        let record = &report.record;

        assert_eq!(record.id, RecordId::FIRST);
        assert_eq!(record.outcome, Outcome::Success);
        assert_eq!(record.classification.as_str(), "CONFIDENTIAL");
        assert_eq!(record.watermark, Some(watermark));
        assert!(record.recipient.is_none());
        assert!(record.recipient_token.is_none());
        assert!(record.protected);
        assert_eq!(record.password_hint.as_deref(), Some("p@…"));
        assert!(fx.tools.renderer.is_password_gated(&report.output, "p@ss").unwrap());
        assert!(!fx.tools.renderer.is_password_gated(&report.output, "").unwrap());
        assert_eq!(fx.ledger.get(RecordId::FIRST).unwrap(), report.record);
    }

    #[test]
    fn rasterizer_unavailable_is_noted_not_fatal() {
        let fx = Fixture::new(toolbox(Behaviour::Works, Behaviour::Absent, Behaviour::Works));
        let request = BuildRequest::new(fx.source()).rasterize(Some(300));

        let report = fx.orchestrator().run(&request).unwrap();

        assert_eq!(report.outcome(), &Outcome::Success);
        assert!(!report.record.rasterized);
        assert_eq!(report.record.raster_dpi, None);
        assert!(report
            .record
            .notes
            .iter()
            .any(|n| n.starts_with("rasterized:") && n.contains("unavailable")));
        assert!(report.output.ends_with("doc.pdf"));
        assert!(report.output.exists());
    }

    #[test]
    fn external_protector_absent_falls_back_to_native() {
        let fx = Fixture::new(toolbox(Behaviour::Works, Behaviour::Works, Behaviour::Absent));
        let request = BuildRequest::new(fx.source()).protect(Some(Password::new("pw-123")));

        let report = fx.orchestrator().run(&request).unwrap();

        assert_eq!(report.outcome(), &Outcome::Success);
        assert_eq!(report.record.protection_method, Some(ProtectionMethod::Native));
        assert!(report.record.notes.iter().any(|n| n.starts_with("protection:")));
        assert!(fx
            .tools
            .renderer
            .is_password_gated(&report.output, "pw-123")
            .unwrap());
        let protection = report.protection.unwrap();
        assert_eq!(protection.output, report.output);
        assert!(protection.trace.path().contains("attempt-native"));
    }

    #[test]
    fn both_protection_paths_failing_records_a_failed_build() {
        let mut tools = toolbox(Behaviour::Works, Behaviour::Works, Behaviour::Fails);
        tools.renderer = Box::new(FlakyRenderer::native_fails());
        let fx = Fixture::new(tools);
        let request = BuildRequest::new(fx.source()).protect(Some(Password::new("pw")));

        let err = fx.orchestrator().run(&request).unwrap_err();

        assert!(matches!(err, BuildError::Protection(_)));
        let records = fx.ledger.query(&RecordFilter::all()).unwrap().to_vec();
        assert_eq!(records.len(), 1);
        let record = &records[0];
        assert_eq!(record.outcome.stage(), Some(Stage::Protected));
        assert_eq!(record.outcome.kind(), OutcomeKind::Failed);
        assert!(!record.protected);
        assert!(record.output_path.is_none());
        assert!(!fx.out_dir().join("doc.protected.pdf").exists());
        assert!(!fx.out_dir().join("doc.work.protected.pdf").exists());
        // The unprotected intermediate stays for inspection.
        assert!(fx.out_dir().join("doc.work.pdf").exists());
    }

    // -- Failure paths -------------------------------------------------------

    #[test]
    fn compile_failure_is_recorded_at_compiled() {
        let fx = Fixture::new(toolbox(Behaviour::Fails, Behaviour::Works, Behaviour::Works));
        let err = fx.orchestrator().run(&BuildRequest::new(fx.source())).unwrap_err();
        assert!(matches!(err, BuildError::Compile(_)));
        let record = fx.ledger.get(RecordId::FIRST).unwrap();
        assert_eq!(record.outcome.stage(), Some(Stage::Compiled));
        assert!(!fx.out_dir().join("doc.pdf").exists());
    }

    #[test]
    fn missing_compiler_fails_the_build() {
        let fx = Fixture::new(toolbox(Behaviour::Absent, Behaviour::Works, Behaviour::Works));
        let err = fx.orchestrator().run(&BuildRequest::new(fx.source())).unwrap_err();
        assert!(matches!(err, BuildError::Compile(e) if e.is_unavailable()));
        assert!(fx.ledger.get(RecordId::FIRST).unwrap().outcome.is_failed());
    }

    #[test]
    fn missing_source_is_recorded_at_source_ready() {
        let fx = works();
        let request = BuildRequest::new(fx.dir().join("nope.tex"));
        assert!(matches!(
            fx.orchestrator().run(&request),
            Err(BuildError::Request(_))
        ));
        let record = fx.ledger.get(RecordId::FIRST).unwrap();
        assert_eq!(record.outcome.stage(), Some(Stage::SourceReady));
    }

    /// Reads work, appends fail.
    struct ReadOnlyLedger(tracemark_ledger::InMemoryLedger);

    impl AuditLedger for ReadOnlyLedger {
        fn append(&self, _: PendingRecord) -> tracemark_ledger::Result<BuildRecord> {
            Err(tracemark_ledger::StorageError::Io(std::io::Error::new(
                std::io::ErrorKind::PermissionDenied,
                "read-only medium",
            ))
            .into())
        }

        fn query(
            &self,
            filter: &RecordFilter,
        ) -> tracemark_ledger::Result<tracemark_ledger::Records> {
            self.0.query(filter)
        }

        fn len(&self) -> tracemark_ledger::Result<u64> {
            self.0.len()
        }
    }

    #[test]
    fn unrecordable_build_fails_and_removes_artifact() {
        let fx = works();
        let ledger = ReadOnlyLedger(tracemark_ledger::InMemoryLedger::new());
        let orch =
            BuildOrchestrator::with_default_stages(&ledger, &fx.tools, &fx.secret, fx.settings());
        let err = orch.run(&BuildRequest::new(fx.source())).unwrap_err();
        assert!(matches!(err, BuildError::Storage(_)));
        assert!(!fx.out_dir().join("doc.pdf").exists());
    }

    #[test]
    fn unrecordable_failure_reports_the_ledger_error() {
        let fx = Fixture::new(toolbox(Behaviour::Fails, Behaviour::Works, Behaviour::Works));
        let ledger = ReadOnlyLedger(tracemark_ledger::InMemoryLedger::new());
        let orch =
            BuildOrchestrator::with_default_stages(&ledger, &fx.tools, &fx.secret, fx.settings());
        let err = orch.run(&BuildRequest::new(fx.source())).unwrap_err();
        assert!(err.is_ledger());
    }

    #[test]
    fn stale_final_output_is_removed_on_failure() {
        let fx = Fixture::new(toolbox(Behaviour::Fails, Behaviour::Works, Behaviour::Works));
        std::fs::create_dir_all(fx.out_dir()).unwrap();
        std::fs::write(fx.out_dir().join("doc.pdf"), b"old build").unwrap();
        assert!(fx.orchestrator().run(&BuildRequest::new(fx.source())).is_err());
        assert!(!fx.out_dir().join("doc.pdf").exists());
    }

    #[test]
    fn protection_requested_without_stage_fails() {
        let fx = works();
        let mut orch = BuildOrchestrator::new(&fx.ledger, &fx.tools, &fx.secret, fx.settings());
        orch.register(Box::new(SourceStage)).unwrap();
        orch.register(Box::new(CompileStage)).unwrap();
        orch.register(Box::new(MarkStage)).unwrap();
        let request = BuildRequest::new(fx.source()).protect(None);
        assert!(orch.run(&request).is_err());
        assert!(!fx.out_dir().join("doc.protected.pdf").exists());
        assert!(fx.ledger.get(RecordId::FIRST).unwrap().outcome.is_failed());
    }

    // -- Degradation and supplements -----------------------------------------

    #[test]
    fn rasterizer_failure_degrades_to_partial() {
        let fx = Fixture::new(toolbox(Behaviour::Works, Behaviour::Fails, Behaviour::Works));
        let report = fx
            .orchestrator()
            .run(&BuildRequest::new(fx.source()).rasterize(None))
            .unwrap();
        assert_eq!(report.outcome().kind(), OutcomeKind::Partial);
        assert_eq!(report.outcome().stage(), Some(Stage::Rasterized));
        assert!(report.output.exists());
        assert!(!report.record.rasterized);
    }

    #[test]
    fn rasterized_build_keeps_metadata() {
        let fx = works();
        let request = BuildRequest::new(fx.source())
            .recipient("carol")
            .rasterize(None);
        let report = fx.orchestrator().run(&request).unwrap();
        assert!(report.record.rasterized);
        assert_eq!(report.record.raster_dpi, Some(150));
        let meta = fx.tools.renderer.read_metadata(&report.output).unwrap();
        assert_eq!(meta.token(), report.record.recipient_token.as_deref());
        assert_eq!(meta.build_id(), Some(report.record.build_id));
    }

    #[test]
    fn generated_password_is_reported_once() {
        let fx = works();
        let request = BuildRequest::new(fx.source()).classification("SECRET").protect(None);
        let report = fx.orchestrator().run(&request).unwrap();

        let password = report.generated_password.clone().unwrap();
        assert_eq!(
            password.expose(),
            fx.secret
                .derive_password(report.record.build_id.as_bytes(), "SECRET")
        );
        assert_eq!(report.record.password_hint, Some(password.hint()));
        let stored = fx.ledger.get(report.record.id).unwrap();
        assert!(!format!("{stored:?}").contains(password.expose()));
    }

    #[test]
    fn every_build_gets_the_next_id() {
        let fx = works();
        let orch = fx.orchestrator();
        for expected in 1..=3 {
            let report = orch.run(&BuildRequest::new(fx.source())).unwrap();
            assert_eq!(report.record.id, RecordId(expected));
        }
    }

    #[test]
    fn stage_results_cover_the_pipeline() {
        let fx = works();
        let report = fx.orchestrator().run(&BuildRequest::new(fx.source())).unwrap();
        let stages: Vec<Stage> = report.stage_results.iter().map(|r| r.stage).collect();
        assert_eq!(stages, Stage::ALL[..6].to_vec());
        assert_eq!(report.stage_results[3].status, StageStatus::NotRequested);
    }

    #[test]
    fn default_classification_comes_from_settings() {
        let fx = works();
        let report = fx.orchestrator().run(&BuildRequest::new(fx.source())).unwrap();
        assert_eq!(report.record.classification.as_str(), "UNCLASSIFIED");
        assert_eq!(report.record.operator, "tester@host");
    }
}

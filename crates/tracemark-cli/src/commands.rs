use std::fs;
use std::io::{self, BufRead, Write};
use std::path::Path;

use anyhow::{bail, Context};
use colored::Colorize;
use serde_json::json;
use tracemark_build::{
    fanout, parse_recipients, protect_document, unprotect_document, validate_document,
    BuildOrchestrator, BuildReport, BuildRequest, Password, PasswordSource, Project,
};
use tracemark_ledger::{
    export_records, verify_export, AuditLedger, ExportSignature, LedgerError, RecordFilter,
    Verification,
};
use tracemark_tools::Availability;
use tracemark_types::{BuildRecord, Classification, Outcome, OutcomeKind, RecordId, WatermarkParams};

use crate::cli::*;

pub fn run_command(cli: Cli) -> anyhow::Result<()> {
    let ctx = Ctx {
        project_dir: cli.project_dir,
        json: matches!(cli.format, OutputFormat::Json),
    };
    match cli.command {
        Command::Init(args) => cmd_init(&ctx, args),
        Command::Build(args) => cmd_build(&ctx, args),
        Command::List(args) => cmd_list(&ctx, args),
        Command::Verify(args) => cmd_verify(&ctx, args),
        Command::Info(_) => cmd_info(&ctx),
        Command::Validate(args) => cmd_validate(&ctx, args),
        Command::ExportLog(args) => cmd_export_log(&ctx, args),
        Command::Fanout(args) => cmd_fanout(&ctx, args),
        Command::Keys(args) => cmd_keys(&ctx, args),
        Command::Protect(args) => cmd_protect(&ctx, args),
    }
}

struct Ctx {
    project_dir: std::path::PathBuf,
    json: bool,
}

impl Ctx {
    fn project(&self) -> anyhow::Result<Project> {
        Ok(Project::discover(&self.project_dir)?)
    }
}

impl BuildArgs {
    fn to_request(&self) -> anyhow::Result<BuildRequest> {
        let mut request = BuildRequest::new(&self.source);
        request.classification = self.classification.as_deref().map(Into::into);
        request.owner = self.owner.clone();
        request.purpose = self.purpose.clone();
        request.nudge = self.nudge.clone();
        request.recipient = self.recipient.clone();
        request.token_in_watermark = self.token_in_watermark;
        request.output_dir = self.output_dir.clone();
        if let Some(text) = &self.watermark {
            request.watermark = Some(
                WatermarkParams::new(text.clone(), self.opacity, self.angle, self.tile)
                    .context("invalid watermark")?,
            );
        }
        if self.rasterize {
            request = request.rasterize(self.dpi);
        }
        if self.protect {
            request = request.protect(self.password.clone().map(Password::new));
        }
        Ok(request)
    }
}

fn cmd_init(ctx: &Ctx, args: InitArgs) -> anyhow::Result<()> {
    let path = args.path.unwrap_or_else(|| ctx.project_dir.clone());
    fs::create_dir_all(&path)?;
    let project = Project::init(&path)?;
    let fingerprint = project.operator_fingerprint()?;
    println!(
        "{} Initialized tracemark project in {}",
        "✓".green().bold(),
        path.display().to_string().bold()
    );
    println!("  State:    {}", project.state_dir().display());
    println!("  Operator: {} ({})", project.operator().cyan(), fingerprint.short_hex().dimmed());
    println!("  Keep {} private; it opens the ledger.", "ledger.key".yellow());
    Ok(())
}

fn cmd_build(ctx: &Ctx, args: BuildArgs) -> anyhow::Result<()> {
    let project = ctx.project()?;
    let ledger = project.ledger()?;
    let tools = project.toolbox();
    let orchestrator =
        BuildOrchestrator::with_default_stages(&ledger, &tools, project.secret(), project.settings());
    let report = orchestrator.run(&args.to_request()?)?;
    if ctx.json {
        println!("{}", serde_json::to_string_pretty(&report_json(&report))?);
    } else {
        print_report(&report);
    }
    Ok(())
}

fn report_json(report: &BuildReport) -> serde_json::Value {
    json!({
        "record": report.record,
        "output": report.output,
        "generated_password": report.generated_password.as_ref().map(Password::expose),
        "protection_path": report.protection.as_ref().map(|p| p.trace.path()),
    })
}

fn print_report(report: &BuildReport) {
    let record = &report.record;
    let mark = match record.outcome.kind() {
        OutcomeKind::Success => "✓".green().bold(),
        _ => "!".yellow().bold(),
    };
    println!("{} Build {} recorded ({})", mark, record.id.to_string().yellow(), outcome_label(&record.outcome));
    println!("  Output:         {}", report.output.display().to_string().bold());
    println!("  Build id:       {}", record.build_id.to_string().dimmed());
    println!("  Classification: {}", record.classification.as_str().cyan());
    if let Some(token) = &record.recipient_token {
        println!("  Token:          {} → {}", token.yellow(), record.recipient.as_deref().unwrap_or("?"));
    }
    if record.rasterized {
        println!("  Rasterized:     {} dpi", record.raster_dpi.unwrap_or_default());
    }
    if let Some(method) = record.protection_method {
        println!("  Protection:     {}", method.to_string().green());
    }
    if let Some(password) = &report.generated_password {
        println!(
            "  Password:       {}  {}",
            password.expose().bold(),
            "(generated, not stored: keep it now)".dimmed()
        );
    }
    for note in &record.notes {
        println!("  {} {}", "note:".yellow(), note);
    }
}

fn outcome_label(outcome: &Outcome) -> colored::ColoredString {
    match outcome {
        Outcome::Success => "success".green(),
        Outcome::Partial { stage, .. } => format!("partial at {stage}").yellow(),
        Outcome::Failed { stage, .. } => format!("failed at {stage}").red(),
    }
}

fn cmd_list(ctx: &Ctx, args: ListArgs) -> anyhow::Result<()> {
    let project = ctx.project()?;
    let ledger = project.ledger()?;
    let mut filter = RecordFilter::all();
    if let Some(c) = args.classification {
        filter = filter.classification(c);
    }
    if let Some(token) = args.token {
        filter = filter.recipient_token(token);
    }
    if let Some(outcome) = args.outcome {
        filter = filter.outcome(match outcome {
            OutcomeArg::Success => OutcomeKind::Success,
            OutcomeArg::Partial => OutcomeKind::Partial,
            OutcomeArg::Failed => OutcomeKind::Failed,
        });
    }
    let records = ledger.query(&filter)?.newest_first(args.limit);

    if ctx.json {
        println!("{}", serde_json::to_string_pretty(&records)?);
        return Ok(());
    }
    if records.is_empty() {
        println!("No builds recorded.");
        return Ok(());
    }
    for record in &records {
        print_record_line(record);
    }
    Ok(())
}

fn print_record_line(record: &BuildRecord) {
    println!(
        "{:>5}  {}  {:<18}  {:<14}  {}{}",
        record.id.to_string().yellow().bold(),
        record.timestamp.format("%Y-%m-%d %H:%M").to_string().dimmed(),
        outcome_label(&record.outcome),
        record.classification.as_str().cyan(),
        record.source_path,
        record
            .recipient_token
            .as_deref()
            .map(|t| format!("  [{t}]"))
            .unwrap_or_default()
    );
}

fn cmd_verify(ctx: &Ctx, args: VerifyArgs) -> anyhow::Result<()> {
    let project = ctx.project()?;
    let ledger = project.ledger()?;
    let own = project.operator_fingerprint().ok();
    let ids: Vec<RecordId> = match args.id {
        Some(id) => vec![RecordId(id)],
        None => (1..=ledger.len()?).map(RecordId).collect(),
    };

    let mut bad = 0usize;
    let mut unsigned = 0usize;
    for id in ids {
        match ledger.verify(id) {
            Ok(Verification::Signed { operator }) => {
                let whose = if own.as_ref() == Some(&operator) { " (this operator)" } else { "" };
                println!("{} {} signed by {}{}", "✓".green(), id, operator.short_hex().cyan(), whose);
            }
            Ok(Verification::Unsigned) => {
                unsigned += 1;
                println!("{} {} unsigned", "?".yellow(), id);
            }
            Err(LedgerError::BadSignature(_)) => {
                bad += 1;
                println!("{} {} signature does not match", "✗".red().bold(), id);
            }
            Err(e) => return Err(e.into()),
        }
    }
    if bad > 0 {
        bail!("{bad} record(s) failed signature verification");
    }
    if unsigned > 0 {
        println!("{unsigned} unsigned record(s)");
    }
    Ok(())
}

fn cmd_info(ctx: &Ctx) -> anyhow::Result<()> {
    let project = ctx.project()?;
    let ledger = project.ledger()?;
    let stats = ledger.stats()?;
    let fingerprint = project.operator_fingerprint().ok();
    let mine = stats.by_operator.get(project.operator()).copied().unwrap_or(0);
    let tools = project.toolbox();
    let mut probes = vec![
        (tools.compiler.name().to_string(), tools.compiler.probe()),
        (tools.rasterizer.name().to_string(), tools.rasterizer.probe()),
    ];
    if let Some(protector) = &tools.protector {
        probes.push((protector.name().to_string(), protector.probe()));
    }

    if ctx.json {
        let value = json!({
            "project": project.root(),
            "operator": project.operator(),
            "operator_fingerprint": fingerprint.as_ref().map(|f| f.to_hex()),
            "ledger": ledger.store_path(),
            "records": {
                "total": stats.total,
                "success": stats.success,
                "partial": stats.partial,
                "failed": stats.failed,
                "by_this_operator": mine,
                "signed_by_this_key": stats.signed_by_current_key,
            },
            "tools": probes.iter().map(|(name, a)| (name.clone(), a.is_available())).collect::<std::collections::BTreeMap<_, _>>(),
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(());
    }

    println!("Project:  {}", project.root().display().to_string().bold());
    let key = match &fingerprint {
        Some(f) => f.short_hex().dimmed(),
        None => "no key".yellow(),
    };
    println!("Operator: {} ({})", project.operator().cyan(), key);
    println!("Ledger:   {}", ledger.store_path().display());
    println!(
        "Records:  {} total, {} success, {} partial, {} failed",
        stats.total.to_string().bold(),
        stats.success.to_string().green(),
        stats.partial.to_string().yellow(),
        stats.failed.to_string().red()
    );
    println!("          {} by this operator, {} signed by this key", mine, stats.signed_by_current_key);
    println!("Tools:");
    for (name, availability) in &probes {
        match availability {
            Availability::Available { path, version } => println!(
                "  {} {:<12} {} {}",
                "✓".green(),
                name,
                path.display(),
                version.as_deref().unwrap_or("").dimmed()
            ),
            Availability::Unavailable { reason } => {
                println!("  {} {:<12} {}", "✗".red(), name, reason.dimmed())
            }
        }
    }
    Ok(())
}

fn cmd_validate(ctx: &Ctx, args: ValidateArgs) -> anyhow::Result<()> {
    let project = ctx.project()?;
    let ledger = project.ledger()?;
    let tools = project.toolbox();
    let report = validate_document(&ledger, tools.renderer.as_ref(), &args.pdf)?;

    if ctx.json {
        let value = json!({
            "pdf": report.pdf,
            "tokens": report.tokens,
            "classification": report.metadata.classification(),
            "token_matches": report.token_matches,
            "build_record": report.build_record,
            "hash_match": report.hash_match,
            "metadata_error": report.metadata_error,
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(());
    }

    println!("Document: {}", report.pdf.display().to_string().bold());
    if let Some(classification) = report.metadata.classification() {
        println!("  Classification: {}", classification.cyan());
    }
    if let Some(e) = &report.metadata_error {
        println!("  {} metadata unreadable: {}", "note:".yellow(), e);
    }
    for token in &report.tokens {
        println!("  Token: {}", token.as_str().yellow());
    }
    if !report.is_attributed() {
        println!("{} No recorded build matches this document.", "?".yellow().bold());
        return Ok(());
    }
    for record in &report.token_matches {
        println!(
            "{} Issued to {} in build {}",
            "✓".green().bold(),
            record.recipient.as_deref().unwrap_or("?").bold(),
            record.id.to_string().yellow()
        );
    }
    if let Some(record) = &report.build_record {
        println!("  Embedded build id matches {}", record.id.to_string().yellow());
    }
    if let Some(record) = &report.hash_match {
        println!("  Byte-identical to the output of {}", record.id.to_string().yellow());
    }
    Ok(())
}

fn cmd_export_log(ctx: &Ctx, args: ExportLogArgs) -> anyhow::Result<()> {
    if args.check {
        let check = verify_export(&args.out_dir)?;
        if !check.checksum_matches {
            bail!("export in {} does not match its checksum", args.out_dir.display());
        }
        println!("{} Export checksum matches", "✓".green().bold());
        match check.signature {
            ExportSignature::Valid { operator } => {
                println!("{} Signed by {}", "✓".green().bold(), operator.short_hex().cyan())
            }
            ExportSignature::Unsigned => println!("{} Export is unsigned", "?".yellow()),
            ExportSignature::Invalid => {
                bail!("signature in {} does not match the export", args.out_dir.display())
            }
        }
        return Ok(());
    }
    let project = ctx.project()?;
    let ledger = project.ledger()?;
    let signer = if args.sign {
        Some(project.operator_key()?)
    } else {
        None
    };
    let summary = export_records(&ledger, &args.out_dir, signer.as_ref())?;
    println!(
        "{} Exported {} record(s) to {}",
        "✓".green().bold(),
        summary.records,
        summary.json_path.display().to_string().bold()
    );
    println!("  BLAKE3: {}", summary.checksum.dimmed());
    if let Some(operator) = summary.signer {
        println!("  Signed: {}", operator.short_hex().cyan());
    }
    Ok(())
}

fn cmd_fanout(ctx: &Ctx, args: FanoutArgs) -> anyhow::Result<()> {
    let recipients = read_recipients(&args.recipients)?;
    if recipients.is_empty() {
        bail!("no recipients in {}", args.recipients.display());
    }
    let project = ctx.project()?;
    let ledger = project.ledger()?;
    let tools = project.toolbox();
    let orchestrator =
        BuildOrchestrator::with_default_stages(&ledger, &tools, project.secret(), project.settings());
    let results = fanout(&orchestrator, &args.build.to_request()?, &recipients);

    let mut failed = 0usize;
    for result in &results {
        match &result.result {
            Ok(report) => {
                println!(
                    "{} {:<24} {} {}",
                    "✓".green(),
                    result.recipient,
                    report.record.id.to_string().yellow(),
                    report.output.display()
                );
                if let Some(password) = &report.generated_password {
                    println!("  password: {}", password.expose().bold());
                }
            }
            Err(e) => {
                failed += 1;
                println!("{} {:<24} {}", "✗".red().bold(), result.recipient, e);
            }
        }
    }
    if failed > 0 {
        bail!("{failed} of {} recipient build(s) failed", results.len());
    }
    Ok(())
}

fn cmd_keys(ctx: &Ctx, args: KeysArgs) -> anyhow::Result<()> {
    let project = ctx.project()?;
    if args.generate {
        let fingerprint = project.generate_operator_key(args.force)?;
        println!(
            "{} Operator key {} written to {}",
            "✓".green().bold(),
            fingerprint.short_hex().cyan(),
            project.operator_key_path().display()
        );
        return Ok(());
    }
    if args.reset {
        if !args.yes && !confirm("Delete the operator key? New records will be unsigned.")? {
            println!("Kept the operator key.");
            return Ok(());
        }
        if project.remove_operator_key()? {
            println!("{} Operator key removed", "✓".green().bold());
        } else {
            println!("No operator key to remove.");
        }
        return Ok(());
    }

    let info = project.operator_key_info()?;
    if ctx.json {
        let value = json!({
            "operator": project.operator(),
            "fingerprint": info.fingerprint.to_hex(),
            "key_file": info.path,
            "created": info.created,
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(());
    }
    println!("Operator:    {}", project.operator().cyan());
    println!("Fingerprint: {}", info.fingerprint.to_hex());
    if let Some(created) = info.created {
        println!("Created:     {}", created.format("%Y-%m-%d %H:%M UTC"));
    }
    println!("Key file:    {}", info.path.display());
    Ok(())
}

fn confirm(question: &str) -> anyhow::Result<bool> {
    print!("{question} [y/N] ");
    io::stdout().flush()?;
    let mut answer = String::new();
    io::stdin().lock().read_line(&mut answer)?;
    Ok(matches!(answer.trim(), "y" | "Y" | "yes"))
}

fn cmd_protect(ctx: &Ctx, args: ProtectArgs) -> anyhow::Result<()> {
    let project = ctx.project()?;
    let tools = project.toolbox();
    let classification = Classification::from(args.classification.as_str());
    let source = match (args.password, args.build) {
        (Some(password), _) => PasswordSource::Given(Password::new(password)),
        (None, Some(build_id)) => PasswordSource::Build {
            build_id,
            classification,
        },
        (None, None) => PasswordSource::Document { classification },
    };

    if args.unprotect {
        let output = unprotect_document(
            &tools,
            project.secret(),
            &args.pdf,
            args.output.as_deref(),
            &source,
        )?;
        println!(
            "{} Unprotected copy written to {}",
            "✓".green().bold(),
            output.display().to_string().bold()
        );
        return Ok(());
    }

    let report = protect_document(
        &tools,
        project.secret(),
        &args.pdf,
        args.output.as_deref(),
        &source,
    )?;
    println!(
        "{} Protected copy written to {} ({})",
        "✓".green().bold(),
        report.output.display().to_string().bold(),
        report.outcome.method.to_string().green()
    );
    if let Some(password) = &report.derived_password {
        println!(
            "  Password: {}  {}",
            password.expose().bold(),
            "(derived, not stored: keep it now)".dimmed()
        );
    }
    Ok(())
}

fn read_recipients(path: &Path) -> anyhow::Result<Vec<String>> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("reading recipient list {}", path.display()))?;
    Ok(parse_recipients(&text)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use lopdf::dictionary;

    fn build_args(argv: &[&str]) -> BuildArgs {
        let mut full = vec!["tracemark", "build"];
        full.extend_from_slice(argv);
        match Cli::try_parse_from(full).unwrap().command {
            Command::Build(args) => args,
            _ => panic!("wrong command"),
        }
    }

    #[test]
    fn request_from_args() {
        let request = build_args(&[
            "doc.tex", "-c", "SECRET", "-w", "DRAFT", "--tile", "-r", "bob", "--protect",
        ])
        .to_request()
        .unwrap();
        assert_eq!(request.classification.unwrap().as_str(), "SECRET");
        let wm = request.watermark.unwrap();
        assert_eq!(wm.text, "DRAFT");
        assert!(wm.tile);
        assert_eq!(request.recipient.as_deref(), Some("bob"));
        assert!(request.protect);
        assert!(request.password.is_none());
        assert!(!request.rasterize);
    }

    #[test]
    fn bad_opacity_is_rejected() {
        let err = build_args(&["doc.tex", "-w", "X", "--opacity", "150"])
            .to_request()
            .unwrap_err();
        assert!(err.to_string().contains("watermark"));
    }

    #[test]
    fn rasterize_keeps_dpi() {
        let request = build_args(&["doc.tex", "--rasterize", "--dpi", "300"])
            .to_request()
            .unwrap();
        assert!(request.rasterize);
        assert_eq!(request.raster_dpi, Some(300));
    }

    #[test]
    fn init_build_list_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = Ctx {
            project_dir: dir.path().to_path_buf(),
            json: false,
        };
        cmd_init(&ctx, InitArgs { path: None }).unwrap();
        assert!(cmd_init(&ctx, InitArgs { path: None }).is_err());
        cmd_list(&ctx, ListArgs { limit: 5, classification: None, token: None, outcome: None }).unwrap();
        cmd_verify(&ctx, VerifyArgs { id: None }).unwrap();
        cmd_info(&ctx).unwrap();
    }

    #[test]
    fn export_check_detects_missing_export() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = Ctx {
            project_dir: dir.path().to_path_buf(),
            json: false,
        };
        assert!(cmd_export_log(&ctx, ExportLogArgs { out_dir: dir.path().join("none"), check: true, sign: false }).is_err());
    }

    fn project_ctx(dir: &Path) -> Ctx {
        let ctx = Ctx {
            project_dir: dir.to_path_buf(),
            json: false,
        };
        cmd_init(&ctx, InitArgs { path: None }).unwrap();
        ctx
    }

    fn keys(generate: bool, info: bool, reset: bool, force: bool) -> KeysArgs {
        KeysArgs { generate, info, reset, force, yes: true }
    }

    #[test]
    fn signed_export_checks_out() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = project_ctx(dir.path());
        let out_dir = dir.path().join("audit");
        cmd_export_log(&ctx, ExportLogArgs { out_dir: out_dir.clone(), check: false, sign: true }).unwrap();
        assert!(out_dir.join(tracemark_ledger::SIGNATURE_FILE).is_file());
        cmd_export_log(&ctx, ExportLogArgs { out_dir: out_dir.clone(), check: true, sign: false }).unwrap();

        fs::write(out_dir.join(tracemark_ledger::SIGNATURE_FILE), "{}").unwrap();
        assert!(cmd_export_log(&ctx, ExportLogArgs { out_dir, check: true, sign: false }).is_err());
    }

    #[test]
    fn keys_reset_then_generate() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = project_ctx(dir.path());
        cmd_keys(&ctx, keys(false, true, false, false)).unwrap();
        assert!(cmd_keys(&ctx, keys(true, false, false, false)).is_err());

        cmd_keys(&ctx, keys(false, false, true, false)).unwrap();
        assert!(cmd_keys(&ctx, keys(false, true, false, false)).is_err());
        // Everything but signing keeps working without a key.
        cmd_verify(&ctx, VerifyArgs { id: None }).unwrap();
        cmd_info(&ctx).unwrap();
        assert!(cmd_export_log(&ctx, ExportLogArgs { out_dir: dir.path().join("audit"), check: false, sign: true }).is_err());

        cmd_keys(&ctx, keys(true, false, false, false)).unwrap();
        cmd_keys(&ctx, keys(false, true, false, false)).unwrap();
    }

    #[test]
    fn protect_then_unprotect_with_password() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = project_ctx(dir.path());
        let pdf = dir.path().join("memo.pdf");
        let mut doc = lopdf::Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let page_id = doc.add_object(lopdf::dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "MediaBox" => vec![0.into(), 0.into(), 595.into(), 842.into()],
        });
        doc.objects.insert(
            pages_id,
            lopdf::Object::Dictionary(lopdf::dictionary! {
                "Type" => "Pages",
                "Kids" => vec![page_id.into()],
                "Count" => 1,
            }),
        );
        let catalog_id = doc.add_object(lopdf::dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);
        doc.save(&pdf).unwrap();

        let protect = |unprotect: bool, input: &Path, password: &str| ProtectArgs {
            pdf: input.to_path_buf(),
            unprotect,
            password: Some(password.into()),
            build: None,
            classification: "UNCLASSIFIED".into(),
            output: None,
        };
        cmd_protect(&ctx, protect(false, &pdf, "letmein")).unwrap();
        let locked = dir.path().join("memo.protected.pdf");
        assert!(locked.is_file());

        assert!(cmd_protect(&ctx, protect(true, &locked, "nope")).is_err());
        cmd_protect(&ctx, protect(true, &locked, "letmein")).unwrap();
        assert!(dir.path().join("memo.unprotected.pdf").is_file());
    }
}

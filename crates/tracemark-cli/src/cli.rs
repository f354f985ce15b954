use std::path::PathBuf;

use clap::{ArgAction, Args, Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "tracemark",
    about = "tracemark: build-time provenance tracking for PDFs",
    version,
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Repeat for more detail (-v info, -vv debug)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    /// Directory inside the project; the project root is searched upwards
    #[arg(short = 'C', long, global = true, default_value = ".")]
    pub project_dir: PathBuf,

    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,
}

#[derive(Clone, Debug, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Command {
    /// Initialize a tracemark project
    Init(InitArgs),
    /// Compile, mark, and record a document
    Build(BuildArgs),
    /// List recent build records
    List(ListArgs),
    /// Check record signatures
    Verify(VerifyArgs),
    /// Show project, operator, and ledger summary
    Info(InfoArgs),
    /// Attribute a PDF to recorded builds
    Validate(ValidateArgs),
    /// Export the decrypted ledger with a checksum
    ExportLog(ExportLogArgs),
    /// Build one copy per recipient from a CSV list
    Fanout(FanoutArgs),
    /// Manage the operator signing key
    Keys(KeysArgs),
    /// Password-protect an existing PDF, or remove protection
    Protect(ProtectArgs),
}

#[derive(Args)]
pub struct InitArgs {
    pub path: Option<PathBuf>,
}

#[derive(Args, Clone, Debug)]
pub struct BuildArgs {
    /// LaTeX source file
    pub source: PathBuf,
    #[arg(short, long)]
    pub classification: Option<String>,
    #[arg(long)]
    pub owner: Option<String>,
    #[arg(long)]
    pub purpose: Option<String>,
    /// Handling reminder embedded in the metadata
    #[arg(long)]
    pub nudge: Option<String>,
    /// Visible watermark text
    #[arg(short, long)]
    pub watermark: Option<String>,
    /// Watermark opacity, 0 (track-only) to 100
    #[arg(long, default_value = "40")]
    pub opacity: u16,
    /// Watermark angle in degrees
    #[arg(long, default_value = "45", allow_negative_numbers = true)]
    pub angle: i32,
    /// Tile the watermark across each page
    #[arg(long)]
    pub tile: bool,
    #[arg(short, long)]
    pub recipient: Option<String>,
    /// Also show the recipient token in the watermark text
    #[arg(long)]
    pub token_in_watermark: bool,
    /// Flatten pages to images
    #[arg(long)]
    pub rasterize: bool,
    #[arg(long)]
    pub dpi: Option<u32>,
    /// Password-protect the output
    #[arg(short, long)]
    pub protect: bool,
    /// Password for --protect; derived from the project secret if omitted
    #[arg(long, requires = "protect")]
    pub password: Option<String>,
    #[arg(short, long)]
    pub output_dir: Option<PathBuf>,
}

#[derive(Args)]
pub struct ListArgs {
    #[arg(short = 'n', long, default_value = "20")]
    pub limit: usize,
    #[arg(short, long)]
    pub classification: Option<String>,
    #[arg(long)]
    pub token: Option<String>,
    #[arg(long)]
    pub outcome: Option<OutcomeArg>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum OutcomeArg {
    Success,
    Partial,
    Failed,
}

#[derive(Args)]
pub struct VerifyArgs {
    /// Record id; every record when omitted
    pub id: Option<u64>,
}

#[derive(Args)]
pub struct InfoArgs {}

#[derive(Args)]
pub struct ValidateArgs {
    pub pdf: PathBuf,
}

#[derive(Args)]
pub struct ExportLogArgs {
    /// Directory receiving builds.json and builds.json.b3
    pub out_dir: PathBuf,
    /// Check an existing export instead of writing one
    #[arg(long, conflicts_with = "sign")]
    pub check: bool,
    /// Sign the export with the operator key (builds.json.sig)
    #[arg(long)]
    pub sign: bool,
}

#[derive(Args)]
#[group(required = true, multiple = false)]
pub struct KeysArgs {
    /// Generate an operator key
    #[arg(long)]
    pub generate: bool,
    /// Show the operator key
    #[arg(long)]
    pub info: bool,
    /// Delete the operator key; new records are unsigned until one is generated
    #[arg(long)]
    pub reset: bool,
    /// Replace an existing key with --generate
    #[arg(long, requires = "generate")]
    pub force: bool,
    /// Skip the confirmation prompt of --reset
    #[arg(short, long, requires = "reset")]
    pub yes: bool,
}

#[derive(Args)]
pub struct ProtectArgs {
    pub pdf: PathBuf,
    /// Remove protection instead of adding it
    #[arg(long)]
    pub unprotect: bool,
    #[arg(long, conflicts_with = "build")]
    pub password: Option<String>,
    /// Derive the password of the protected build with this id
    #[arg(long)]
    pub build: Option<uuid::Uuid>,
    /// Classification the password is derived with
    #[arg(short, long, default_value = "UNCLASSIFIED")]
    pub classification: String,
    /// Defaults to <stem>.protected.pdf or <stem>.unprotected.pdf
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

#[derive(Args)]
pub struct FanoutArgs {
    /// CSV file with a `recipient` or `id` column
    #[arg(long)]
    pub recipients: PathBuf,
    #[command(flatten)]
    pub build: BuildArgs,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn command_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parse_init() {
        let cli = Cli::try_parse_from(["tracemark", "init"]).unwrap();
        assert!(matches!(cli.command, Command::Init(_)));
    }

    #[test]
    fn parse_init_path() {
        let cli = Cli::try_parse_from(["tracemark", "init", "/tmp/report"]).unwrap();
        if let Command::Init(args) = cli.command {
            assert_eq!(args.path, Some(PathBuf::from("/tmp/report")));
        } else { panic!("wrong command"); }
    }

    #[test]
    fn parse_build_full() {
        let cli = Cli::try_parse_from([
            "tracemark", "build", "doc.tex",
            "-c", "SECRET",
            "--watermark", "SECRET", "--opacity", "20", "--angle", "-30", "--tile",
            "--recipient", "bob@example.com", "--token-in-watermark",
            "--rasterize", "--dpi", "300",
            "--protect", "--password", "pw",
        ])
        .unwrap();
        if let Command::Build(args) = cli.command {
            assert_eq!(args.source, PathBuf::from("doc.tex"));
            assert_eq!(args.classification.as_deref(), Some("SECRET"));
            assert_eq!(args.opacity, 20);
            assert_eq!(args.angle, -30);
            assert!(args.tile && args.token_in_watermark && args.rasterize && args.protect);
            assert_eq!(args.dpi, Some(300));
            assert_eq!(args.password.as_deref(), Some("pw"));
        } else { panic!("wrong command"); }
    }

    #[test]
    fn password_requires_protect() {
        assert!(Cli::try_parse_from(["tracemark", "build", "doc.tex", "--password", "pw"]).is_err());
    }

    #[test]
    fn parse_build_defaults() {
        let cli = Cli::try_parse_from(["tracemark", "build", "doc.tex"]).unwrap();
        if let Command::Build(args) = cli.command {
            assert_eq!(args.opacity, 40);
            assert_eq!(args.angle, 45);
            assert!(args.watermark.is_none());
            assert!(!args.protect);
        } else { panic!("wrong command"); }
    }

    #[test]
    fn parse_list_filters() {
        let cli = Cli::try_parse_from(["tracemark", "list", "-n", "5", "--outcome", "failed"]).unwrap();
        if let Command::List(args) = cli.command {
            assert_eq!(args.limit, 5);
            assert_eq!(args.outcome, Some(OutcomeArg::Failed));
        } else { panic!("wrong command"); }
    }

    #[test]
    fn parse_verify_all_and_one() {
        let cli = Cli::try_parse_from(["tracemark", "verify"]).unwrap();
        assert!(matches!(cli.command, Command::Verify(VerifyArgs { id: None })));
        let cli = Cli::try_parse_from(["tracemark", "verify", "7"]).unwrap();
        assert!(matches!(cli.command, Command::Verify(VerifyArgs { id: Some(7) })));
    }

    #[test]
    fn parse_export_log() {
        let cli = Cli::try_parse_from(["tracemark", "export-log", "out", "--check"]).unwrap();
        if let Command::ExportLog(args) = cli.command {
            assert_eq!(args.out_dir, PathBuf::from("out"));
            assert!(args.check);
        } else { panic!("wrong command"); }
    }

    #[test]
    fn parse_export_log_sign() {
        let cli = Cli::try_parse_from(["tracemark", "export-log", "out", "--sign"]).unwrap();
        if let Command::ExportLog(args) = cli.command {
            assert!(args.sign && !args.check);
        } else { panic!("wrong command"); }
        assert!(Cli::try_parse_from(["tracemark", "export-log", "out", "--sign", "--check"]).is_err());
    }

    #[test]
    fn parse_keys_actions() {
        let cli = Cli::try_parse_from(["tracemark", "keys", "--generate", "--force"]).unwrap();
        if let Command::Keys(args) = cli.command {
            assert!(args.generate && args.force && !args.info && !args.reset);
        } else { panic!("wrong command"); }
        assert!(Cli::try_parse_from(["tracemark", "keys"]).is_err());
        assert!(Cli::try_parse_from(["tracemark", "keys", "--info", "--reset"]).is_err());
        assert!(Cli::try_parse_from(["tracemark", "keys", "--info", "--force"]).is_err());
        assert!(Cli::try_parse_from(["tracemark", "keys", "--reset", "-y"]).is_ok());
    }

    #[test]
    fn parse_protect() {
        let id = "01928c6e-7f2a-7cc1-b5a5-6c1d2e3f4a5b";
        let cli = Cli::try_parse_from([
            "tracemark", "protect", "out.pdf", "--unprotect", "--build", id, "-c", "SECRET",
        ])
        .unwrap();
        if let Command::Protect(args) = cli.command {
            assert_eq!(args.pdf, PathBuf::from("out.pdf"));
            assert!(args.unprotect);
            assert_eq!(args.build.unwrap().to_string(), id);
            assert_eq!(args.classification, "SECRET");
            assert!(args.password.is_none());
        } else { panic!("wrong command"); }
        assert!(Cli::try_parse_from([
            "tracemark", "protect", "out.pdf", "--password", "pw", "--build", id,
        ])
        .is_err());
        assert!(Cli::try_parse_from(["tracemark", "protect", "out.pdf", "--build", "17"]).is_err());
    }

    #[test]
    fn parse_fanout() {
        let cli = Cli::try_parse_from([
            "tracemark", "fanout", "--recipients", "list.csv", "doc.tex", "--protect",
        ])
        .unwrap();
        if let Command::Fanout(args) = cli.command {
            assert_eq!(args.recipients, PathBuf::from("list.csv"));
            assert_eq!(args.build.source, PathBuf::from("doc.tex"));
            assert!(args.build.protect);
        } else { panic!("wrong command"); }
    }

    #[test]
    fn parse_verbose_count() {
        let cli = Cli::try_parse_from(["tracemark", "-vv", "info"]).unwrap();
        assert_eq!(cli.verbose, 2);
    }

    #[test]
    fn parse_project_dir_and_format() {
        let cli = Cli::try_parse_from(["tracemark", "list", "-C", "/work/report", "--format", "json"]).unwrap();
        assert_eq!(cli.project_dir, PathBuf::from("/work/report"));
        assert!(matches!(cli.format, OutputFormat::Json));
    }
}

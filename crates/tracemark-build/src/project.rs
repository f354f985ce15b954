use std::env;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tracemark_crypto::{OperatorKey, ProjectSecret};
use tracemark_ledger::{FileLedger, LedgerOptions, STATE_DIR};
use tracemark_types::{Classification, Fingerprint};
use tracing::{debug, info, warn};

use crate::config::ProjectConfig;
use crate::error::{BuildError, Result};
use crate::pipeline::BuildSettings;
use crate::tools::Toolbox;

/// Project configuration inside [`STATE_DIR`].
pub const CONFIG_FILE: &str = "config.toml";
/// Hex project secret inside [`STATE_DIR`].
pub const SECRET_FILE: &str = "ledger.key";
/// Hex operator signing key inside [`STATE_DIR`].
pub const OPERATOR_KEY_FILE: &str = "operator.key";

/// The operator key on disk, as shown by `tracemark keys --info`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OperatorKeyInfo {
    pub path: PathBuf,
    pub fingerprint: Fingerprint,
    /// Last write of the key file, i.e. when it was generated.
    pub created: Option<DateTime<Utc>>,
}

/// A directory-scoped tracemark project: configuration, key material, and
/// the one ledger they open.
#[derive(Debug)]
pub struct Project {
    root: PathBuf,
    config: ProjectConfig,
    secret: ProjectSecret,
    operator: String,
}

impl Project {
    /// Create the hidden state directory, keys, default configuration, and an
    /// empty ledger under `root`.
    pub fn init(root: &Path) -> Result<Self> {
        let state_dir = root.join(STATE_DIR);
        if state_dir.join(SECRET_FILE).exists() {
            return Err(BuildError::Config(format!(
                "{} is already a tracemark project",
                root.display()
            )));
        }
        fs::create_dir_all(&state_dir)?;

        let secret = ProjectSecret::generate();
        secret.save(&state_dir.join(SECRET_FILE))?;
        OperatorKey::generate().save(&state_dir.join(OPERATOR_KEY_FILE))?;
        let config = ProjectConfig::default();
        config.save(&state_dir.join(CONFIG_FILE))?;
        FileLedger::create(root, &secret.ledger_key(), ledger_options(&config))?;

        info!(project = %root.display(), "project initialised");
        Ok(Self {
            root: root.to_path_buf(),
            config,
            secret,
            operator: current_operator(),
        })
    }

    /// Open the project rooted exactly at `root`.
    pub fn open(root: &Path) -> Result<Self> {
        let state_dir = root.join(STATE_DIR);
        let secret_path = state_dir.join(SECRET_FILE);
        if !secret_path.exists() {
            return Err(BuildError::Config(format!(
                "{} is not a tracemark project (run `tracemark init`)",
                root.display()
            )));
        }
        let config_path = state_dir.join(CONFIG_FILE);
        let config = if config_path.exists() {
            ProjectConfig::load(&config_path)?
        } else {
            debug!("no config file, using defaults");
            ProjectConfig::default()
        };
        Ok(Self {
            root: root.to_path_buf(),
            config,
            secret: ProjectSecret::load(&secret_path)?,
            operator: current_operator(),
        })
    }

    /// Open the nearest project at or above `start`.
    pub fn discover(start: &Path) -> Result<Self> {
        let root = start
            .ancestors()
            .find(|dir| dir.join(STATE_DIR).join(SECRET_FILE).is_file())
            .ok_or_else(|| {
                BuildError::Config(format!(
                    "no tracemark project found at or above {} (run `tracemark init`)",
                    start.display()
                ))
            })?;
        Self::open(root)
    }

    /// Override the `user@host` operator string.
    pub fn with_operator(mut self, operator: impl Into<String>) -> Self {
        self.operator = operator.into();
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn state_dir(&self) -> PathBuf {
        self.root.join(STATE_DIR)
    }

    pub fn config(&self) -> &ProjectConfig {
        &self.config
    }

    pub fn secret(&self) -> &ProjectSecret {
        &self.secret
    }

    pub fn operator(&self) -> &str {
        &self.operator
    }

    pub fn operator_key_path(&self) -> PathBuf {
        self.state_dir().join(OPERATOR_KEY_FILE)
    }

    pub fn has_operator_key(&self) -> bool {
        self.operator_key_path().is_file()
    }

    pub fn operator_key(&self) -> Result<OperatorKey> {
        let path = self.operator_key_path();
        if !path.is_file() {
            return Err(BuildError::Config(
                "no operator key (run `tracemark keys --generate`)".into(),
            ));
        }
        Ok(OperatorKey::load(&path)?)
    }

    pub fn operator_fingerprint(&self) -> Result<Fingerprint> {
        Ok(self.operator_key()?.public_key().fingerprint())
    }

    pub fn operator_key_info(&self) -> Result<OperatorKeyInfo> {
        let fingerprint = self.operator_fingerprint()?;
        let path = self.operator_key_path();
        let created = fs::metadata(&path)?.modified().ok().map(DateTime::<Utc>::from);
        Ok(OperatorKeyInfo {
            path,
            fingerprint,
            created,
        })
    }

    /// Write a new operator key. An existing key is only replaced when
    /// `force` is set; records it signed keep verifying against the public
    /// key stored with them.
    pub fn generate_operator_key(&self, force: bool) -> Result<Fingerprint> {
        let path = self.operator_key_path();
        if path.exists() && !force {
            return Err(BuildError::Config(format!(
                "an operator key already exists at {} (use --force to replace it)",
                path.display()
            )));
        }
        let key = OperatorKey::generate();
        key.save(&path)?;
        let fingerprint = key.public_key().fingerprint();
        info!(fingerprint = %fingerprint.short_hex(), replaced = force, "operator key generated");
        Ok(fingerprint)
    }

    /// Delete the operator key. Returns whether one existed.
    pub fn remove_operator_key(&self) -> Result<bool> {
        match fs::remove_file(self.operator_key_path()) {
            Ok(()) => {
                warn!("operator key removed; new records are unsigned until one is generated");
                Ok(true)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Open (decrypt) the project's ledger, signing appends with the
    /// operator key when there is one.
    pub fn ledger(&self) -> Result<FileLedger> {
        let ledger = FileLedger::open(
            &self.root,
            &self.secret.ledger_key(),
            ledger_options(&self.config),
        )?;
        if !self.has_operator_key() {
            warn!("no operator key, appended records will be unsigned");
            return Ok(ledger);
        }
        Ok(ledger.with_operator(self.operator_key()?))
    }

    pub fn toolbox(&self) -> Toolbox {
        Toolbox::from_config(&self.config)
    }

    pub fn settings(&self) -> BuildSettings {
        BuildSettings {
            output_dir: self.root.join(&self.config.build.output_dir),
            default_classification: Classification::from(
                self.config.build.default_classification.as_str(),
            ),
            raster_dpi: self.config.build.raster_dpi,
            operator: self.operator.clone(),
        }
    }
}

fn ledger_options(config: &ProjectConfig) -> LedgerOptions {
    LedgerOptions {
        lock_timeout: config.ledger.lock_timeout(),
    }
}

/// `user@host` for the current process.
pub fn current_operator() -> String {
    let user = ["USER", "USERNAME", "LOGNAME"]
        .iter()
        .find_map(|var| env::var(var).ok().filter(|v| !v.is_empty()))
        .unwrap_or_else(|| "unknown".into());
    let host = ["HOSTNAME", "COMPUTERNAME"]
        .iter()
        .find_map(|var| env::var(var).ok().filter(|v| !v.is_empty()))
        .or_else(|| {
            fs::read_to_string("/etc/hostname")
                .ok()
                .map(|h| h.trim().to_string())
                .filter(|h| !h.is_empty())
        })
        .unwrap_or_else(|| "localhost".into());
    format!("{user}@{host}")
}

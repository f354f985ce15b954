use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tracemark_crypto::{ContentHasher, LedgerKey, OperatorKey, OperatorPublicKey};
use tracemark_types::{BuildRecord, Fingerprint, OutcomeKind, PendingRecord, RecordId};
use tracing::{debug, info};

use crate::error::{LedgerError, Result, StorageError};
use crate::filter::{RecordFilter, Records};
use crate::lock::ProjectLock;
use crate::store::{self, LedgerContents, StoredEntry};
use crate::traits::AuditLedger;

/// Hidden per-project state directory.
pub const STATE_DIR: &str = ".tracemark";
/// Sealed ledger store inside [`STATE_DIR`].
pub const STORE_FILE: &str = "ledger.tml";
/// Append lock file inside [`STATE_DIR`].
pub const LOCK_FILE: &str = "ledger.lock";

/// Tunables for a [`FileLedger`].
#[derive(Clone, Debug)]
pub struct LedgerOptions {
    /// Upper bound on waiting for the project lock during an append.
    pub lock_timeout: Duration,
}

impl Default for LedgerOptions {
    fn default() -> Self {
        Self {
            lock_timeout: Duration::from_secs(10),
        }
    }
}

/// Outcome of a signature check on one stored record.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Verification {
    /// Signed by the operator key with this fingerprint.
    Signed { operator: Fingerprint },
    /// Appended without an operator key.
    Unsigned,
}

/// Aggregate counts over the ledger.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LedgerStats {
    pub total: u64,
    pub success: u64,
    pub partial: u64,
    pub failed: u64,
    /// Records per operator string (`user@host`).
    pub by_operator: BTreeMap<String, u64>,
    /// Records signed by this handle's operator key.
    pub signed_by_current_key: u64,
}

/// Encrypted, file-backed audit ledger for one project.
///
/// Every append re-reads the store under the project lock, assigns the next
/// id, re-seals the whole store, and atomically replaces the file. Reads need
/// no lock because the store file is only ever replaced by rename.
pub struct FileLedger {
    state_dir: PathBuf,
    key: LedgerKey,
    operator: Option<OperatorKey>,
    options: LedgerOptions,
}

impl FileLedger {
    /// Initialise an empty ledger under `project_dir`.
    pub fn create(project_dir: &Path, key: &LedgerKey, options: LedgerOptions) -> Result<Self> {
        let state_dir = project_dir.join(STATE_DIR);
        fs::create_dir_all(&state_dir).map_err(StorageError::Io)?;
        let ledger = Self {
            state_dir,
            key: key.clone(),
            operator: None,
            options,
        };
        let _lock = ledger.lock()?;
        if ledger.store_path().exists() {
            return Err(StorageError::AlreadyExists(ledger.store_path()).into());
        }
        ledger.persist(&LedgerContents::empty())?;
        info!(path = %ledger.store_path().display(), "ledger created");
        Ok(ledger)
    }

    /// Open an existing ledger, failing with [`LedgerError::Access`] when
    /// `key` does not decrypt it or the store is corrupt.
    pub fn open(project_dir: &Path, key: &LedgerKey, options: LedgerOptions) -> Result<Self> {
        let ledger = Self {
            state_dir: project_dir.join(STATE_DIR),
            key: key.clone(),
            operator: None,
            options,
        };
        if !ledger.store_path().exists() {
            return Err(StorageError::Missing(ledger.store_path()).into());
        }
        let contents = ledger.load()?;
        debug!(records = contents.entries.len(), "ledger opened");
        Ok(ledger)
    }

    /// Sign every subsequently appended record with `operator`.
    pub fn with_operator(mut self, operator: OperatorKey) -> Self {
        self.operator = Some(operator);
        self
    }

    pub fn store_path(&self) -> PathBuf {
        self.state_dir.join(STORE_FILE)
    }

    pub fn lock_path(&self) -> PathBuf {
        self.state_dir.join(LOCK_FILE)
    }

    /// Check the stored signature of record `id`.
    pub fn verify(&self, id: RecordId) -> Result<Verification> {
        let contents = self.load()?;
        let entry = contents
            .entries
            .iter()
            .find(|e| e.record.id == id)
            .ok_or(LedgerError::NotFound(id))?;

        match (&entry.operator_key, &entry.signature) {
            (Some(key_bytes), Some(signature)) => {
                let public = OperatorPublicKey::from_bytes(*key_bytes)
                    .map_err(|_| LedgerError::BadSignature(id))?;
                let digest = signing_digest(&entry.record)?;
                public
                    .verify(digest.as_bytes(), signature)
                    .map_err(|_| LedgerError::BadSignature(id))?;
                Ok(Verification::Signed {
                    operator: public.fingerprint(),
                })
            }
            (None, None) => Ok(Verification::Unsigned),
            _ => Err(LedgerError::BadSignature(id)),
        }
    }

    /// Totals by outcome and by operator.
    pub fn stats(&self) -> Result<LedgerStats> {
        let contents = self.load()?;
        let current = self.operator.as_ref().map(|k| k.public_key().as_bytes());
        let mut stats = LedgerStats::default();
        for entry in &contents.entries {
            stats.total += 1;
            match entry.record.outcome.kind() {
                OutcomeKind::Success => stats.success += 1,
                OutcomeKind::Partial => stats.partial += 1,
                OutcomeKind::Failed => stats.failed += 1,
            }
            *stats
                .by_operator
                .entry(entry.record.operator.clone())
                .or_default() += 1;
            if current.is_some() && entry.operator_key == current {
                stats.signed_by_current_key += 1;
            }
        }
        Ok(stats)
    }

    fn lock(&self) -> Result<ProjectLock> {
        Ok(ProjectLock::acquire(
            &self.lock_path(),
            self.options.lock_timeout,
        )?)
    }

    fn load(&self) -> Result<LedgerContents> {
        let bytes = fs::read(self.store_path()).map_err(StorageError::Io)?;
        store::decode(&bytes, &self.key)
    }

    fn persist(&self, contents: &LedgerContents) -> Result<()> {
        let bytes = store::encode(contents, &self.key)?;
        let mut tmp = tempfile::NamedTempFile::new_in(&self.state_dir).map_err(StorageError::Io)?;
        tmp.write_all(&bytes).map_err(StorageError::Io)?;
        tmp.as_file().sync_all().map_err(StorageError::Io)?;
        tmp.persist(self.store_path())
            .map_err(|e| StorageError::Io(e.error))?;
        Ok(())
    }

    fn sign(&self, record: BuildRecord) -> Result<StoredEntry> {
        match &self.operator {
            Some(key) => {
                let digest = signing_digest(&record)?;
                Ok(StoredEntry {
                    operator_key: Some(key.public_key().as_bytes()),
                    signature: Some(key.sign(digest.as_bytes())),
                    record,
                })
            }
            None => Ok(StoredEntry {
                record,
                operator_key: None,
                signature: None,
            }),
        }
    }
}

impl AuditLedger for FileLedger {
    fn append(&self, pending: PendingRecord) -> Result<BuildRecord> {
        let _lock = self.lock()?;
        let mut contents = self.load()?;
        let id = contents.next_id();
        let record = pending.into_record(id);
        contents.entries.push(self.sign(record.clone())?);
        self.persist(&contents)?;
        info!(
            id = id.value(),
            build_id = %record.build_id,
            outcome = %record.outcome.kind(),
            "ledger append"
        );
        Ok(record)
    }

    fn query(&self, filter: &RecordFilter) -> Result<Records> {
        let contents = self.load()?;
        let records: Vec<BuildRecord> = contents.entries.into_iter().map(|e| e.record).collect();
        Ok(Records::new(Arc::from(records), filter.clone()))
    }

    fn len(&self) -> Result<u64> {
        Ok(self.load()?.entries.len() as u64)
    }
}

/// The digest an operator signs: the record's canonical JSON under the
/// record hashing domain.
fn signing_digest(record: &BuildRecord) -> Result<Fingerprint> {
    ContentHasher::RECORD
        .hash_json(record)
        .map_err(|e| LedgerError::from(StorageError::Serialization(e.to_string())))
}

//! Encrypted append-only build ledger.
//!
//! [`AuditLedger`] is the boundary the build orchestrator writes through.
//! [`FileLedger`] keeps a project's records in one sealed file under
//! `.tracemark/`, serialising appends across processes with an exclusive
//! file lock; [`InMemoryLedger`] provides the same contract for tests.

pub mod error;
pub mod export;
pub mod file;
pub mod filter;
pub mod lock;
pub mod memory;
mod store;
pub mod traits;

pub use error::{LedgerError, Result, StorageError};
pub use export::{
    export_records, verify_export, ExportCheck, ExportSignature, ExportSummary, CHECKSUM_FILE,
    EXPORT_FILE, SIGNATURE_FILE,
};
pub use file::{
    FileLedger, LedgerOptions, LedgerStats, Verification, LOCK_FILE, STATE_DIR, STORE_FILE,
};
pub use filter::{RecordFilter, Records, RecordsIter};
pub use lock::ProjectLock;
pub use memory::InMemoryLedger;
pub use traits::AuditLedger;

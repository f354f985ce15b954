use tracemark_types::{BuildRecord, PendingRecord, RecordId};

use crate::error::{LedgerError, Result};
use crate::filter::{RecordFilter, Records};

/// Append-only audit boundary shared by the file-backed and in-memory
/// ledgers.
///
/// Records are never updated or deleted once appended. Ids are assigned by
/// the ledger, start at [`RecordId::FIRST`] and have no gaps.
pub trait AuditLedger: Send + Sync {
    /// Assign the next id to `pending` and persist it.
    fn append(&self, pending: PendingRecord) -> Result<BuildRecord>;

    /// Records matching `filter`, ordered by id ascending.
    fn query(&self, filter: &RecordFilter) -> Result<Records>;

    /// Number of records stored.
    fn len(&self) -> Result<u64>;

    fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Fetch one record by id.
    fn get(&self, id: RecordId) -> Result<BuildRecord> {
        self.query(&RecordFilter::all().ids(id, id))?
            .iter()
            .next()
            .cloned()
            .ok_or(LedgerError::NotFound(id))
    }

    /// Every record that carries `token`. Attribution of a leaked copy is a
    /// lookup through this method.
    fn find_by_token(&self, token: &str) -> Result<Vec<BuildRecord>> {
        Ok(self
            .query(&RecordFilter::all().recipient_token(token))?
            .to_vec())
    }
}

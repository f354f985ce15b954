use std::sync::{Arc, RwLock};

use tracemark_types::{BuildRecord, PendingRecord, RecordId};
use tracing::debug;

use crate::error::{Result, StorageError};
use crate::filter::{RecordFilter, Records};
use crate::traits::AuditLedger;

/// In-memory ledger for tests, local demos, and embedding.
#[derive(Default)]
pub struct InMemoryLedger {
    inner: RwLock<Vec<BuildRecord>>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }
}

impl AuditLedger for InMemoryLedger {
    fn append(&self, pending: PendingRecord) -> Result<BuildRecord> {
        let mut records = self.inner.write().map_err(|_| StorageError::Poisoned)?;
        let id = records.last().map_or(RecordId::FIRST, |r| r.id.next());
        let record = pending.into_record(id);
        records.push(record.clone());
        debug!(id = id.value(), "in-memory ledger append");
        Ok(record)
    }

    fn query(&self, filter: &RecordFilter) -> Result<Records> {
        let records = self.inner.read().map_err(|_| StorageError::Poisoned)?;
        Ok(Records::new(Arc::from(records.as_slice()), filter.clone()))
    }

    fn len(&self) -> Result<u64> {
        let records = self.inner.read().map_err(|_| StorageError::Poisoned)?;
        Ok(records.len() as u64)
    }
}

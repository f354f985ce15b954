use std::sync::Arc;

use tracemark_types::{BuildRecord, Classification, OutcomeKind, RecordId};

/// Criteria for [`AuditLedger::query`](crate::AuditLedger::query).
///
/// Every criterion left unset matches all records.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RecordFilter {
    pub classification: Option<Classification>,
    pub recipient_token: Option<String>,
    pub from: Option<RecordId>,
    pub to: Option<RecordId>,
    pub outcome: Option<OutcomeKind>,
    pub operator: Option<String>,
    pub limit: Option<usize>,
}

impl RecordFilter {
    /// A filter matching every record.
    pub fn all() -> Self {
        Self::default()
    }

    pub fn classification(mut self, classification: impl Into<Classification>) -> Self {
        self.classification = Some(classification.into());
        self
    }

    pub fn recipient_token(mut self, token: impl Into<String>) -> Self {
        self.recipient_token = Some(token.into());
        self
    }

    /// Restrict to ids in `from..=to`.
    pub fn ids(mut self, from: RecordId, to: RecordId) -> Self {
        self.from = Some(from);
        self.to = Some(to);
        self
    }

    pub fn outcome(mut self, kind: OutcomeKind) -> Self {
        self.outcome = Some(kind);
        self
    }

    pub fn operator(mut self, operator: impl Into<String>) -> Self {
        self.operator = Some(operator.into());
        self
    }

    /// Yield at most `n` matching records.
    pub fn limit(mut self, n: usize) -> Self {
        self.limit = Some(n);
        self
    }

    /// Whether `record` satisfies every criterion except the limit.
    pub fn matches(&self, record: &BuildRecord) -> bool {
        if let Some(c) = &self.classification {
            if record.classification != *c {
                return false;
            }
        }
        if let Some(token) = &self.recipient_token {
            if record.recipient_token.as_deref() != Some(token.as_str()) {
                return false;
            }
        }
        if self.from.is_some_and(|from| record.id < from) {
            return false;
        }
        if self.to.is_some_and(|to| record.id > to) {
            return false;
        }
        if self.outcome.is_some_and(|kind| record.outcome.kind() != kind) {
            return false;
        }
        if let Some(op) = &self.operator {
            if record.operator != *op {
                return false;
            }
        }
        true
    }
}

/// Result of a ledger query.
///
/// Holds a snapshot of the ledger taken at query time and applies the filter
/// lazily. Calling [`iter`](Records::iter) again restarts from the first
/// matching record.
#[derive(Clone, Debug)]
pub struct Records {
    snapshot: Arc<[BuildRecord]>,
    filter: RecordFilter,
}

impl Records {
    pub(crate) fn new(snapshot: Arc<[BuildRecord]>, filter: RecordFilter) -> Self {
        Self { snapshot, filter }
    }

    pub fn iter(&self) -> RecordsIter<'_> {
        RecordsIter {
            inner: self.snapshot.iter(),
            filter: &self.filter,
            yielded: 0,
        }
    }

    pub fn to_vec(&self) -> Vec<BuildRecord> {
        self.iter().cloned().collect()
    }

    /// The last `n` matching records, newest first.
    pub fn newest_first(&self, n: usize) -> Vec<BuildRecord> {
        let mut all: Vec<BuildRecord> = self.to_vec();
        all.reverse();
        all.truncate(n);
        all
    }
}

impl<'a> IntoIterator for &'a Records {
    type Item = &'a BuildRecord;
    type IntoIter = RecordsIter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Lazy iterator over the records matching a filter.
pub struct RecordsIter<'a> {
    inner: std::slice::Iter<'a, BuildRecord>,
    filter: &'a RecordFilter,
    yielded: usize,
}

impl<'a> Iterator for RecordsIter<'a> {
    type Item = &'a BuildRecord;

    fn next(&mut self) -> Option<Self::Item> {
        if self.filter.limit.is_some_and(|limit| self.yielded >= limit) {
            return None;
        }
        let filter = self.filter;
        let found = self.inner.find(|record| filter.matches(record))?;
        self.yielded += 1;
        Some(found)
    }
}

//! Sessions: narrowed views of a log index.
//!
//! A [`Session`] bundles a narrowed [`LogStorage`] with iterator
//! factories. The underlying index may be shared by many sessions; each
//! iterator opened here owns its readers exclusively.

use crate::collections::HashSet;
use crate::error::Result;
use crate::format::{FieldValue, Format, Timestamp};
use crate::merge::{Direction, LogEntryIter, MergeHeapCache};
use crate::storage::LogStorage;
use std::sync::Arc;

#[derive(Clone)]
pub struct Session {
    storage: Arc<LogStorage>,
}

impl Session {
    pub(crate) fn new(storage: Arc<LogStorage>) -> Self {
        Self { storage }
    }

    pub fn modules(&self) -> Vec<String> {
        self.storage.modules().map(String::from).collect()
    }

    pub fn formats(&self) -> Vec<Arc<Format>> {
        self.storage.formats().cloned().collect()
    }

    pub fn enum_values(&self, field: &str) -> HashSet<FieldValue> {
        self.storage.enum_values(field)
    }

    pub fn min_time(&self) -> Option<Timestamp> {
        self.storage.min_time()
    }

    pub fn max_time(&self) -> Option<Timestamp> {
        self.storage.max_time()
    }

    /// Forward iterator over `[start, end]`, both bounds inclusive.
    pub fn iterator(&self, start: Timestamp, end: Timestamp) -> Result<LogEntryIter> {
        LogEntryIter::new(self.storage.clone(), Direction::Forward, start, end)
    }

    /// Reverse iterator over `[start, end]`; emission begins at `end`.
    pub fn reverse_iterator(&self, start: Timestamp, end: Timestamp) -> Result<LogEntryIter> {
        LogEntryIter::new(self.storage.clone(), Direction::Reverse, start, end)
    }

    /// Restore an iterator from a cursor cache; the remaining sequence
    /// matches what the snapshotted iterator would have emitted.
    pub fn resume_iterator(
        &self,
        cache: &MergeHeapCache,
        start: Timestamp,
        end: Timestamp,
    ) -> Result<LogEntryIter> {
        LogEntryIter::resume(self.storage.clone(), cache, start, end)
    }

    /// Iterator over the session's full time range.
    pub fn full_iterator(&self, direction: Direction) -> Result<LogEntryIter> {
        let epoch = chrono::DateTime::<chrono::Utc>::UNIX_EPOCH;
        let start = self.min_time().unwrap_or(epoch);
        let end = self.max_time().unwrap_or(epoch);
        LogEntryIter::new(self.storage.clone(), direction, start, end)
    }
}

//! The log index: per-module time-ordered file maps.
//!
//! Each module owns a sorted map from file start time to the file's
//! metadata and end time, closed by a sentinel entry one millisecond past
//! the module's end time. The sentinel marks the exclusive upper bound of
//! the module's coverage; it never resolves to a file.

use crate::collections::{HashMap, HashSet};
use crate::format::{FieldValue, Format, Timestamp};
use crate::scan::ScannedFile;
use crate::source::LogMetadata;
use chrono::Duration;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::ops::Bound::{Excluded, Unbounded};
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Debug, Clone)]
struct IndexedFile {
    metadata: LogMetadata,
    end: Timestamp,
}

type FileMap = BTreeMap<Timestamp, Option<IndexedFile>>;

/// Per-module ordered file index plus observed enum values.
///
/// Read-only after construction apart from the enum accumulators, which
/// grow behind their own lock while iterators materialize values.
#[derive(Debug, Default)]
pub struct LogStorage {
    files: HashMap<String, FileMap>,
    modules: BTreeSet<String>,
    formats: HashMap<String, Arc<Format>>,
    min_time: Option<Timestamp>,
    max_time: Option<Timestamp>,
    enum_values: Mutex<HashMap<String, HashSet<FieldValue>>>,
}

impl LogStorage {
    /// Build the index from scanner output. Duplicate `(module, start)`
    /// pairs are logged and dropped; every module is closed with a
    /// sentinel at its end time plus one millisecond.
    pub fn new(files: Vec<ScannedFile>) -> Self {
        let mut storage = Self::default();

        let mut end_times: HashMap<String, Timestamp> = HashMap::default();
        for file in files {
            let end = end_times.entry(file.module.clone()).or_insert(file.end);
            if file.end > *end {
                *end = file.end;
            }
            storage.add_file(file);
        }

        for (module, end) in &end_times {
            if let Some(map) = storage.files.get_mut(module) {
                map.insert(*end + Duration::milliseconds(1), None);
            }
        }

        storage
    }

    fn add_file(&mut self, file: ScannedFile) {
        let map = self.files.entry(file.module.clone()).or_default();
        if map.contains_key(&file.start) {
            warn!(
                "log already indexed for module {} at {}; dropping {}",
                file.module, file.start, file.metadata.filename
            );
            return;
        }

        let format = file.metadata.format.clone();
        self.formats.insert(format.name.clone(), format);
        map.insert(
            file.start,
            Some(IndexedFile {
                metadata: file.metadata,
                end: file.end,
            }),
        );
        self.modules.insert(file.module);

        if self.min_time.is_none_or(|t| file.start < t) {
            self.min_time = Some(file.start);
        }
        if self.max_time.is_none_or(|t| file.end > t) {
            self.max_time = Some(file.end);
        }
    }

    /// Narrow to a module subset and a clipped time range. The underlying
    /// file maps, used formats and enum accumulators are copied.
    pub fn narrow(
        &self,
        modules: &HashSet<String>,
        min_time: Option<Timestamp>,
        max_time: Option<Timestamp>,
    ) -> LogStorage {
        let mut narrowed = LogStorage::default();

        narrowed.min_time = match (min_time, self.min_time) {
            (Some(requested), Some(own)) if requested >= own => Some(requested),
            (Some(requested), Some(own)) => {
                warn!("narrow requested min {requested} before index min {own}");
                Some(own)
            }
            _ => self.min_time,
        };
        narrowed.max_time = match (max_time, self.max_time) {
            (Some(requested), Some(own)) if requested <= own => Some(requested),
            (Some(requested), Some(own)) => {
                warn!("narrow requested max {requested} after index max {own}");
                Some(own)
            }
            _ => self.max_time,
        };

        for module in modules {
            let Some(map) = self.files.get(module) else {
                warn!("unknown module in narrow request: {module}");
                continue;
            };
            for file in map.values().flatten() {
                narrowed
                    .formats
                    .insert(file.metadata.format.name.clone(), file.metadata.format.clone());
            }
            narrowed.files.insert(module.clone(), map.clone());
            narrowed.modules.insert(module.clone());
        }

        *narrowed.enum_values.get_mut() = self.enum_values.lock().clone();

        narrowed
    }

    pub fn modules(&self) -> impl Iterator<Item = &str> {
        self.modules.iter().map(String::as_str)
    }

    pub fn contains_module(&self, module: &str) -> bool {
        self.modules.contains(module)
    }

    pub fn formats(&self) -> impl Iterator<Item = &Arc<Format>> {
        self.formats.values()
    }

    pub fn min_time(&self) -> Option<Timestamp> {
        self.min_time
    }

    pub fn max_time(&self) -> Option<Timestamp> {
        self.max_time
    }

    /// The file whose `[start, end]` covers `time`; if none covers it, the
    /// nearest later file within the module; `None` past the module's end.
    pub fn find(&self, module: &str, time: Timestamp) -> Option<(Timestamp, LogMetadata)> {
        let map = self.module_map(module)?;

        if let Some((start, Some(file))) = map.range(..=time).next_back() {
            if time <= file.end {
                return Some((*start, file.metadata.clone()));
            }
        }

        // In a coverage gap or before the first file: the nearest later
        // file, so an iterator can open it and skip to the first entry at
        // or after `time`. Past the sentinel nothing remains.
        let later = map
            .range((Excluded(time), Unbounded))
            .find_map(|(start, file)| file.as_ref().map(|f| (*start, f.metadata.clone())));
        if later.is_none() {
            debug!("no log for module {module} at {time}");
        }
        later
    }

    /// The file covering `time`, or the nearest earlier one. Entry point
    /// for reverse iteration.
    pub fn find_at_or_before(
        &self,
        module: &str,
        time: Timestamp,
    ) -> Option<(Timestamp, LogMetadata)> {
        let map = self.module_map(module)?;
        map.range(..=time)
            .rev()
            .find_map(|(start, file)| file.as_ref().map(|f| (*start, f.metadata.clone())))
    }

    /// The file immediately after the one starting at `time`; `None` once
    /// the sentinel is reached.
    pub fn find_next(&self, module: &str, time: Timestamp) -> Option<(Timestamp, LogMetadata)> {
        let map = self.module_map(module)?;
        map.range((Excluded(time), Unbounded))
            .next()
            .and_then(|(start, file)| file.as_ref().map(|f| (*start, f.metadata.clone())))
    }

    /// The file immediately before the one starting at `time`.
    pub fn find_prev(&self, module: &str, time: Timestamp) -> Option<(Timestamp, LogMetadata)> {
        let map = self.module_map(module)?;
        map.range(..time)
            .next_back()
            .and_then(|(start, file)| file.as_ref().map(|f| (*start, f.metadata.clone())))
    }

    /// Exact start-key lookup, used when restoring a cursor cache.
    pub(crate) fn get(&self, module: &str, start: Timestamp) -> Option<LogMetadata> {
        self.files
            .get(module)?
            .get(&start)?
            .as_ref()
            .map(|f| f.metadata.clone())
    }

    fn module_map(&self, module: &str) -> Option<&FileMap> {
        let map = self.files.get(module);
        if map.is_none() {
            warn!("unknown module: {module}");
        }
        map
    }

    /// Record an observed value for an open-list enum field.
    pub fn add_enum_value(&self, field: &str, value: FieldValue) {
        self.enum_values
            .lock()
            .entry(field.to_string())
            .or_default()
            .insert(value);
    }

    /// Snapshot of the observed values for one enum field.
    pub fn enum_values(&self, field: &str) -> HashSet<FieldValue> {
        self.enum_values.lock().get(field).cloned().unwrap_or_default()
    }
}

//! The k-way time-ordered merge iterator.
//!
//! One reader per module feeds a binary heap keyed by the current entry's
//! time; popping the top yields the globally next entry and re-arms the
//! module with its following one. Rotated file segments roll over through
//! the index, forward via `find_next` and reverse via `find_prev`.
//!
//! Equal timestamps across modules yield in ascending module-name order
//! going forward and descending going reverse; the ordering is part of the
//! heap key, so ties are stable.
//!
//! [`LogEntryIter::snapshot`] captures a compact cursor — per module the
//! file start key and the byte offset from which re-reading in the
//! iterator's direction reproduces the current entry — and
//! [`LogEntryIter::resume`] rebuilds an equivalent iterator without
//! re-scanning.

use crate::collections::HashMap;
use crate::entry::LogEntry;
use crate::error::{Error, Result};
use crate::format::{Format, Timestamp};
use crate::parse::{check_format, field_value, normalize_continuation, parse_time, split_line};
use crate::reader::LineReader;
use crate::source::LogMetadata;
use crate::storage::LogStorage;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Forward,
    Reverse,
}

/// Cursor state of one heap item: enough to reopen its file and reproduce
/// its current entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeapItemCache {
    pub module: String,
    pub file_start: Timestamp,
    pub offset: u64,
}

/// A compact, relocatable description of a merge iterator's position.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergeHeapCache {
    pub direction: Direction,
    /// Time of the heap top at snapshot; modules missing from `items`
    /// resume strictly past it.
    pub time: Timestamp,
    pub items: Vec<HeapItemCache>,
}

/// A pending look-ahead line: the starter that terminated the previous
/// entry, waiting to open the next one.
#[derive(Debug)]
struct PendingLine {
    line: String,
    offset: u64,
}

/// Per-module reader state.
struct ModuleCursor {
    module: String,
    /// Index key of the currently open file.
    file_start: Timestamp,
    metadata: LogMetadata,
    reader: LineReader,
    pending: Option<PendingLine>,
    /// Index key of the file where the current entry begins.
    entry_file_start: Timestamp,
    /// Offset from which re-reading in the iteration direction reproduces
    /// the current entry.
    entry_offset: u64,
}

struct HeapItem {
    cursor: ModuleCursor,
    entry: LogEntry,
}

/// Heap wrapper encoding the direction-dependent ordering. `BinaryHeap`
/// pops the maximum, so forward iteration reverses the key.
struct Ordered {
    item: HeapItem,
    direction: Direction,
}

impl Ordered {
    fn key(&self) -> (Timestamp, &str) {
        (self.item.entry.time, &self.item.cursor.module)
    }
}

impl PartialEq for Ordered {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for Ordered {}

impl PartialOrd for Ordered {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Ordered {
    fn cmp(&self, other: &Self) -> Ordering {
        match self.direction {
            Direction::Forward => other.key().cmp(&self.key()),
            Direction::Reverse => self.key().cmp(&other.key()),
        }
    }
}

/// Time-ordered merge over every module of a session's storage.
///
/// The iterator exclusively owns its readers; the storage and its formats
/// are shared read-only. Entries outside `[start, end]` are never emitted.
pub struct LogEntryIter {
    storage: Arc<LogStorage>,
    direction: Direction,
    start: Timestamp,
    end: Timestamp,
    heap: BinaryHeap<Ordered>,
}

impl LogEntryIter {
    pub(crate) fn new(
        storage: Arc<LogStorage>,
        direction: Direction,
        start: Timestamp,
        end: Timestamp,
    ) -> Result<Self> {
        let mut iter = Self {
            storage: storage.clone(),
            direction,
            start,
            end,
            heap: BinaryHeap::new(),
        };

        let modules: Vec<String> = storage.modules().map(String::from).collect();
        for module in &modules {
            iter.init_module(module, None)?;
        }

        Ok(iter)
    }

    /// Rebuild an iterator from a cursor cache. Cached modules reopen at
    /// their recorded offsets; session modules missing from the cache are
    /// initialised from scratch strictly past the cached time, so entries
    /// already emitted before the snapshot do not replay.
    pub(crate) fn resume(
        storage: Arc<LogStorage>,
        cache: &MergeHeapCache,
        start: Timestamp,
        end: Timestamp,
    ) -> Result<Self> {
        let mut iter = Self {
            storage: storage.clone(),
            direction: cache.direction,
            start,
            end,
            heap: BinaryHeap::new(),
        };

        let mut restored: crate::collections::HashSet<String> = Default::default();
        for cached in &cache.items {
            restored.insert(cached.module.clone());

            let Some(metadata) = iter.storage.get(&cached.module, cached.file_start) else {
                warn!(
                    "cached file no longer indexed for module {}; reinitializing",
                    cached.module
                );
                restored.remove(&cached.module);
                continue;
            };

            let mut reader = metadata.open_reader()?;
            reader.seek(cached.offset)?;
            let mut cursor = ModuleCursor {
                module: cached.module.clone(),
                file_start: cached.file_start,
                metadata,
                reader,
                pending: None,
                entry_file_start: cached.file_start,
                entry_offset: cached.offset,
            };

            if let Some(entry) = iter.assemble(&mut cursor)? {
                if entry.time >= iter.start && entry.time <= iter.end {
                    iter.push(cursor, entry);
                }
            }
        }

        if cache.direction == Direction::Reverse && cache.time < iter.end {
            iter.end = cache.time;
        }

        let missing: Vec<String> = iter
            .storage
            .modules()
            .filter(|m| !restored.contains(*m))
            .map(String::from)
            .collect();
        for module in &missing {
            iter.init_module(module, Some(cache.time))?;
        }

        Ok(iter)
    }

    /// Open a module's reader at the range boundary and arm the heap with
    /// its first in-range entry. With `threshold` set, only entries
    /// strictly past it (in the iteration direction) qualify.
    fn init_module(&mut self, module: &str, threshold: Option<Timestamp>) -> Result<()> {
        let found = match self.direction {
            Direction::Forward => self.storage.find(module, self.start),
            Direction::Reverse => self.storage.find_at_or_before(module, self.end),
        };
        let Some((file_start, metadata)) = found else {
            return Ok(());
        };

        let mut reader = metadata.open_reader()?;
        if self.direction == Direction::Reverse {
            reader.goto_end()?;
        }

        let mut cursor = ModuleCursor {
            module: module.to_string(),
            file_start,
            metadata,
            reader,
            pending: None,
            entry_file_start: file_start,
            entry_offset: 0,
        };

        while let Some(entry) = self.assemble(&mut cursor)? {
            let past_threshold = match (threshold, self.direction) {
                (None, _) => true,
                (Some(t), Direction::Forward) => entry.time > t,
                (Some(t), Direction::Reverse) => entry.time < t,
            };

            if entry.time >= self.start && entry.time <= self.end && past_threshold {
                self.push(cursor, entry);
                break;
            }

            // Out of range in the direction of travel: nothing further
            // in this module can qualify.
            match self.direction {
                Direction::Forward if entry.time > self.end => break,
                Direction::Reverse if entry.time < self.start => break,
                _ => {}
            }
        }

        Ok(())
    }

    fn push(&mut self, cursor: ModuleCursor, entry: LogEntry) {
        self.heap.push(Ordered {
            item: HeapItem { cursor, entry },
            direction: self.direction,
        });
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn has_entries(&self) -> bool {
        !self.heap.is_empty()
    }

    /// Time of the next entry to be emitted (forward) or the ratcheted
    /// upper bound (reverse).
    pub fn current_time(&self) -> Option<Timestamp> {
        match self.direction {
            Direction::Forward => self.heap.peek().map(|top| top.item.entry.time),
            Direction::Reverse => Some(self.end),
        }
    }

    /// Whether an entry at or before `time` (after, for reverse) is still
    /// pending.
    pub fn is_value_ahead(&self, time: Timestamp) -> bool {
        match self.direction {
            Direction::Forward => self
                .heap
                .peek()
                .is_some_and(|top| top.item.entry.time <= time),
            Direction::Reverse => self.end > time,
        }
    }

    /// Pop the next entry in time order, re-arming its module.
    pub fn next(&mut self) -> Result<Option<LogEntry>> {
        let Some(top) = self.heap.pop() else {
            return Ok(None);
        };
        let HeapItem { mut cursor, entry } = top.item;

        if let Some(next_entry) = self.assemble(&mut cursor)? {
            if next_entry.time >= self.start && next_entry.time <= self.end {
                self.push(cursor, next_entry);
            }
        }

        if self.direction == Direction::Reverse {
            self.end = entry.time;
        }

        Ok(Some(entry))
    }

    /// Snapshot the cursor: the remaining sequence of a resumed iterator
    /// equals the remaining sequence of this one.
    pub fn snapshot(&self) -> MergeHeapCache {
        let items = self
            .heap
            .iter()
            .map(|o| HeapItemCache {
                module: o.item.cursor.module.clone(),
                file_start: o.item.cursor.entry_file_start,
                offset: o.item.cursor.entry_offset,
            })
            .collect();

        let time = match self.heap.peek() {
            Some(top) => top.item.entry.time,
            // Exhausted: pin the cache so nothing replays on resume.
            None => match self.direction {
                Direction::Forward => self.end,
                Direction::Reverse => self.start,
            },
        };

        MergeHeapCache {
            direction: self.direction,
            time,
            items,
        }
    }

    fn assemble(&self, cursor: &mut ModuleCursor) -> Result<Option<LogEntry>> {
        match self.direction {
            Direction::Forward => self.assemble_forward(cursor),
            Direction::Reverse => self.assemble_reverse(cursor),
        }
    }

    /// Assemble the next entry reading forward: an entry-starter line,
    /// then continuation lines until the next starter (kept pending) or
    /// the end of the module.
    fn assemble_forward(&self, cursor: &mut ModuleCursor) -> Result<Option<LogEntry>> {
        let format = cursor.metadata.format.clone();

        let mut raw_line = String::new();
        let mut continuation: Vec<String> = Vec::new();
        let mut time: Option<Timestamp> = None;
        let mut fields: HashMap<String, crate::format::FieldValue> = HashMap::default();

        loop {
            let (line, line_offset) = match cursor.pending.take() {
                Some(pending) => (pending.line, pending.offset),
                None => {
                    let offset = cursor.reader.position();
                    match self.read_line(cursor)? {
                        Some(line) => (line, offset),
                        None => {
                            if self.roll_over(cursor)? {
                                continue;
                            }
                            break;
                        }
                    }
                }
            };

            let parts = match split_line(&line, &format) {
                Ok(parts) => parts,
                Err(Error::LineShape(_)) => {
                    // Not this format's shape: a continuation line.
                    if time.is_some() {
                        raw_line.push('\n');
                        raw_line.push_str(&line);
                        continuation.push(line);
                    }
                    continue;
                }
                Err(err) => return Err(err),
            };

            let is_starter =
                parts.len() > format.time_field_index && check_format(&parts, &format);
            if !is_starter {
                if time.is_some() {
                    raw_line.push('\n');
                    raw_line.push_str(&line);
                    continuation.push(line);
                }
                continue;
            }

            if time.is_some() {
                // The next entry begins here; keep its starter pending.
                cursor.pending = Some(PendingLine {
                    line,
                    offset: line_offset,
                });
                break;
            }

            match parse_time(&parts[format.time_field_index], &format) {
                Ok(t) => time = Some(t),
                Err(err) => {
                    warn!(
                        "failed to parse time in {} at {line_offset}: {line:?}: {err}",
                        cursor.metadata.filename
                    );
                    continue;
                }
            }

            self.extract_fields(&mut fields, &parts, &format);
            raw_line = line;
            cursor.entry_file_start = cursor.file_start;
            cursor.entry_offset = line_offset;
        }

        let Some(time) = time else {
            return Ok(None);
        };

        Ok(Some(LogEntry {
            module: cursor.module.clone(),
            time,
            raw_line,
            fields,
            continuation: normalize_continuation(&continuation.join("\n")),
        }))
    }

    /// Assemble the next entry reading backward: continuation lines pile
    /// up until their entry-starter appears below them.
    fn assemble_reverse(&self, cursor: &mut ModuleCursor) -> Result<Option<LogEntry>> {
        let format = cursor.metadata.format.clone();

        // Resuming from this offset replays the whole entry bottom-up,
        // including a roll-over if the entry straddles file segments.
        cursor.entry_file_start = cursor.file_start;
        cursor.entry_offset = cursor.reader.position();

        let mut collected: Vec<String> = Vec::new();

        loop {
            let line = match self.read_line(cursor)? {
                Some(line) => line,
                None => {
                    if self.roll_over(cursor)? {
                        continue;
                    }
                    // Stream origin reached with no starter: continuation
                    // lines without an entry are dropped.
                    if !collected.is_empty() {
                        debug!(
                            "dropping {} headless continuation line(s) in {}",
                            collected.len(),
                            cursor.metadata.filename
                        );
                    }
                    return Ok(None);
                }
            };

            let parts = match split_line(&line, &format) {
                Ok(parts) => parts,
                Err(Error::LineShape(_)) => {
                    collected.push(line);
                    continue;
                }
                Err(err) => return Err(err),
            };

            let is_starter =
                parts.len() > format.time_field_index && check_format(&parts, &format);
            if !is_starter {
                collected.push(line);
                continue;
            }

            let time = match parse_time(&parts[format.time_field_index], &format) {
                Ok(time) => time,
                Err(err) => {
                    warn!(
                        "failed to parse time in {}: {line:?}: {err}",
                        cursor.metadata.filename
                    );
                    // The broken entry and its continuations are dropped;
                    // assembly restarts above it.
                    collected.clear();
                    cursor.entry_file_start = cursor.file_start;
                    cursor.entry_offset = cursor.reader.position();
                    continue;
                }
            };

            let mut fields = HashMap::default();
            self.extract_fields(&mut fields, &parts, &format);

            // Lines were collected bottom-up.
            collected.reverse();
            let mut raw_line = line;
            if !collected.is_empty() {
                raw_line.push('\n');
                raw_line.push_str(&collected.join("\n"));
            }

            return Ok(Some(LogEntry {
                module: cursor.module.clone(),
                time,
                raw_line,
                fields,
                continuation: normalize_continuation(&collected.join("\n")),
            }));
        }
    }

    /// One directed line read with the per-line failure policy: decode
    /// errors are logged and the reader advances; I/O failures abort the
    /// iterator.
    fn read_line(&self, cursor: &mut ModuleCursor) -> Result<Option<String>> {
        loop {
            let result = match self.direction {
                Direction::Forward => cursor.reader.next_line(),
                Direction::Reverse => cursor.reader.prev_line(),
            };
            match result {
                Ok(line) => return Ok(line),
                Err(Error::Encoding { encoding, offset, len }) => {
                    warn!(
                        "undecodable line in {} at {offset} ({len} byte(s) as {encoding}); skipped",
                        cursor.metadata.filename
                    );
                }
                Err(Error::Io(source)) => {
                    return Err(Error::Iterator {
                        filename: cursor.metadata.filename.clone(),
                        source,
                    });
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Move the cursor to the module's neighboring file segment, if any.
    fn roll_over(&self, cursor: &mut ModuleCursor) -> Result<bool> {
        let next = match self.direction {
            Direction::Forward => self.storage.find_next(&cursor.module, cursor.file_start),
            Direction::Reverse => self.storage.find_prev(&cursor.module, cursor.file_start),
        };
        let Some((file_start, metadata)) = next else {
            return Ok(false);
        };

        let mut reader = metadata.open_reader()?;
        if self.direction == Direction::Reverse {
            reader.goto_end()?;
        }

        cursor.file_start = file_start;
        cursor.metadata = metadata;
        cursor.reader = reader;
        cursor.pending = None;
        Ok(true)
    }

    /// Materialize typed values for a starter line, feeding open-list enum
    /// accumulators through the storage lock.
    fn extract_fields(
        &self,
        fields: &mut HashMap<String, crate::format::FieldValue>,
        parts: &[String],
        format: &Arc<Format>,
    ) {
        let mut index = 0;
        for field in &format.fields {
            let Some(part) = parts.get(index) else {
                break;
            };

            let matched = match &field.regex {
                Some(regex) => regex.find(part).map(|m| m.as_str()),
                None => Some(part.as_str()),
            };

            match matched {
                Some(raw) => {
                    if let Some(value) = field_value(raw, field, format) {
                        if field.is_enum {
                            if !field.values.is_empty() && !field.values.contains(&value) {
                                if !field.optional {
                                    warn!(
                                        "enum value for field {} is not defined in the format: {value}",
                                        field.name
                                    );
                                }
                                continue;
                            }
                            if field.values.is_empty() {
                                self.storage.add_enum_value(&field.name, value.clone());
                            }
                        }
                        fields.insert(field.name.clone(), value);
                    }
                    index += 1;
                }
                None => {
                    if !field.optional {
                        warn!("failed to match field {} in line", field.name);
                    } else if part.is_empty() {
                        index += 1;
                    }
                }
            }
        }
    }
}

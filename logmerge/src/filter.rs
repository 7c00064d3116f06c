//! Entry filtering and the filtered iterator.
//!
//! A [`LogFilter`] combines a module allow/deny set with per-field regex
//! and value-set predicates, each in whitelist or blacklist mode.
//! [`FilteredIter`] wraps a merge iterator and drops non-matching entries
//! while forwarding every positional operation unchanged, so filtering is
//! transparent to cursor persistence.

use crate::collections::{HashMap, HashSet};
use crate::entry::LogEntry;
use crate::error::Result;
use crate::format::Timestamp;
use crate::merge::{LogEntryIter, MergeHeapCache};
use regex::Regex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FilterMode {
    #[default]
    Whitelist,
    Blacklist,
}

#[derive(Debug, Clone)]
pub struct RegexFilter {
    pub regex: Regex,
    pub mode: FilterMode,
}

#[derive(Debug, Clone, Default)]
pub struct ValueFilter {
    pub values: HashSet<String>,
    pub mode: FilterMode,
}

/// Predicate set applied per entry. Values compare against the display
/// form of the entry's typed fields.
#[derive(Debug, Clone, Default)]
pub struct LogFilter {
    modules: HashSet<String>,
    module_mode: FilterMode,
    field_patterns: HashMap<String, RegexFilter>,
    field_values: HashMap<String, ValueFilter>,
}

impl LogFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_modules(
        mut self,
        modules: impl IntoIterator<Item = String>,
        mode: FilterMode,
    ) -> Self {
        self.modules = modules.into_iter().collect();
        self.module_mode = mode;
        self
    }

    pub fn with_field_pattern(mut self, field: impl Into<String>, filter: RegexFilter) -> Self {
        self.field_patterns.insert(field.into(), filter);
        self
    }

    pub fn with_field_values(mut self, field: impl Into<String>, filter: ValueFilter) -> Self {
        self.field_values.insert(field.into(), filter);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty() && self.field_patterns.is_empty() && self.field_values.is_empty()
    }

    /// Overlay another filter: its non-empty parts replace this one's.
    pub fn merge(&mut self, other: &LogFilter) {
        for (field, filter) in &other.field_patterns {
            if !filter.regex.as_str().is_empty() {
                self.field_patterns.insert(field.clone(), filter.clone());
            }
        }

        for (field, filter) in &other.field_values {
            if !filter.values.is_empty() {
                self.field_values.insert(field.clone(), filter.clone());
            }
        }

        if !other.modules.is_empty() {
            self.modules = other.modules.clone();
            self.module_mode = other.module_mode;
        }
    }

    /// Whether an entry satisfies every predicate.
    pub fn check(&self, entry: &LogEntry) -> bool {
        if !self.modules.is_empty() {
            let listed = self.modules.contains(&entry.module);
            match self.module_mode {
                FilterMode::Whitelist if !listed => return false,
                FilterMode::Blacklist if listed => return false,
                _ => {}
            }
        }

        for (field, filter) in &self.field_patterns {
            if filter.regex.as_str().is_empty() {
                continue;
            }
            let matched = entry
                .fields
                .get(field)
                .is_some_and(|value| filter.regex.is_match(&value.to_string()));
            match filter.mode {
                FilterMode::Whitelist if !matched => return false,
                FilterMode::Blacklist if matched => return false,
                _ => {}
            }
        }

        for (field, filter) in &self.field_values {
            let listed = entry
                .fields
                .get(field)
                .is_some_and(|value| filter.values.contains(&value.to_string()));
            match filter.mode {
                FilterMode::Whitelist if !listed => return false,
                FilterMode::Blacklist if listed => return false,
                _ => {}
            }
        }

        true
    }
}

/// A merge iterator with a filter in front and one entry of look-ahead.
pub struct FilteredIter {
    inner: LogEntryIter,
    filter: LogFilter,
    current: Option<LogEntry>,
}

impl FilteredIter {
    pub fn new(inner: LogEntryIter, filter: LogFilter) -> Result<Self> {
        let mut iter = Self {
            inner,
            filter,
            current: None,
        };
        iter.advance()?;
        Ok(iter)
    }

    fn advance(&mut self) -> Result<()> {
        self.current = None;
        while let Some(entry) = self.inner.next()? {
            if self.filter.check(&entry) {
                self.current = Some(entry);
                break;
            }
        }
        Ok(())
    }

    pub fn has_entries(&self) -> bool {
        self.current.is_some()
    }

    pub fn next(&mut self) -> Result<Option<LogEntry>> {
        let Some(entry) = self.current.take() else {
            return Ok(None);
        };
        self.advance()?;
        Ok(Some(entry))
    }

    pub fn current_time(&self) -> Option<Timestamp> {
        self.inner.current_time()
    }

    pub fn is_value_ahead(&self, time: Timestamp) -> bool {
        self.inner.is_value_ahead(time)
    }

    pub fn snapshot(&self) -> MergeHeapCache {
        self.inner.snapshot()
    }

    /// Overlay another filter. The look-ahead entry is re-checked so it
    /// cannot leak through the tightened predicate.
    pub fn merge_filter(&mut self, other: &LogFilter) -> Result<()> {
        self.filter.merge(other);
        if let Some(current) = &self.current {
            if !self.filter.check(current) {
                self.advance()?;
            }
        }
        Ok(())
    }

    pub fn into_inner(self) -> LogEntryIter {
        self.inner
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::FieldValue;
    use chrono::{TimeZone, Utc};

    fn entry(module: &str, level: &str) -> LogEntry {
        let mut fields = HashMap::default();
        fields.insert(
            "level".to_string(),
            FieldValue::Str(level.to_string()),
        );
        LogEntry {
            module: module.to_string(),
            time: Utc.timestamp_opt(0, 0).unwrap(),
            raw_line: format!("{level};payload"),
            fields,
            continuation: String::new(),
        }
    }

    #[test]
    fn module_whitelist_and_blacklist() {
        let allow = LogFilter::new().with_modules(
            ["A".to_string(), "C".to_string()],
            FilterMode::Whitelist,
        );
        assert!(allow.check(&entry("A", "INFO")));
        assert!(!allow.check(&entry("B", "INFO")));

        let deny = LogFilter::new()
            .with_modules(["A".to_string()], FilterMode::Blacklist);
        assert!(!deny.check(&entry("A", "INFO")));
        assert!(deny.check(&entry("B", "INFO")));
    }

    #[test]
    fn field_regex_modes() {
        let allow = LogFilter::new().with_field_pattern(
            "level",
            RegexFilter {
                regex: Regex::new("^ERR").unwrap(),
                mode: FilterMode::Whitelist,
            },
        );
        assert!(allow.check(&entry("A", "ERROR")));
        assert!(!allow.check(&entry("A", "INFO")));

        let deny = LogFilter::new().with_field_pattern(
            "level",
            RegexFilter {
                regex: Regex::new("^ERR").unwrap(),
                mode: FilterMode::Blacklist,
            },
        );
        assert!(!deny.check(&entry("A", "ERROR")));
        assert!(deny.check(&entry("A", "INFO")));
    }

    #[test]
    fn field_value_sets() {
        let filter = LogFilter::new().with_field_values(
            "level",
            ValueFilter {
                values: ["INFO".to_string(), "WARN".to_string()].into_iter().collect(),
                mode: FilterMode::Whitelist,
            },
        );
        assert!(filter.check(&entry("A", "INFO")));
        assert!(!filter.check(&entry("A", "ERROR")));

        // A missing field never satisfies a whitelist.
        let mut no_level = entry("A", "INFO");
        no_level.fields.clear();
        assert!(!filter.check(&no_level));
    }

    #[test]
    fn merge_overlays_non_empty_parts() {
        let mut base = LogFilter::new()
            .with_modules(["A".to_string()], FilterMode::Whitelist);
        let other = LogFilter::new().with_field_values(
            "level",
            ValueFilter {
                values: ["ERROR".to_string()].into_iter().collect(),
                mode: FilterMode::Whitelist,
            },
        );

        base.merge(&other);
        assert!(base.check(&entry("A", "ERROR")));
        assert!(!base.check(&entry("A", "INFO")));
        assert!(!base.check(&entry("B", "ERROR")));
    }

    #[test]
    fn empty_filter_accepts_everything() {
        let filter = LogFilter::new();
        assert!(filter.is_empty());
        assert!(filter.check(&entry("anything", "TRACE")));
    }
}

use crate::collections::HashMap;
use crate::format::{FieldValue, Timestamp};

/// One structured log entry assembled from an entry-starter line and any
/// continuation lines that followed it.
#[derive(Debug, Clone)]
pub struct LogEntry {
    /// Logical stream the entry came from.
    pub module: String,
    pub time: Timestamp,
    /// Full entry text: the starter line plus continuation lines,
    /// newline-joined.
    pub raw_line: String,
    /// Typed values per declared field name.
    pub fields: HashMap<String, FieldValue>,
    /// Continuation lines only, left-trimmed by their common leading
    /// whitespace.
    pub continuation: String,
}

impl LogEntry {
    pub fn field(&self, name: &str) -> Option<&FieldValue> {
        self.fields.get(name)
    }
}

//! Declarative log format descriptions.
//!
//! A [`Format`] describes the shape of one family of log files: which
//! filenames it applies to, how bytes become text, how a line splits into
//! fields, and how the time field is parsed. Formats are plain data; the
//! on-disk JSON catalog lives in [`catalog`].

pub mod catalog;

use crate::collections::HashSet;
use chrono::{DateTime, Utc};
use regex::Regex;
use std::fmt;
use std::hash::{Hash, Hasher};

/// Entry timestamps throughout the crate.
pub type Timestamp = DateTime<Utc>;

/// Text encodings the line reader understands.
///
/// Chosen from the format's explicit `encoding`, else sniffed from a BOM,
/// else UTF-8.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Encoding {
    Utf8,
    Utf16Le,
    Utf16Be,
    Utf32Le,
    Utf32Be,
}

impl Encoding {
    /// Width of one code unit in bytes.
    pub fn unit_width(self) -> usize {
        match self {
            Encoding::Utf8 => 1,
            Encoding::Utf16Le | Encoding::Utf16Be => 2,
            Encoding::Utf32Le | Encoding::Utf32Be => 4,
        }
    }

    /// Canonical name, as used by the `encoding` key of catalog documents.
    pub fn name(self) -> &'static str {
        match self {
            Encoding::Utf8 => "UTF-8",
            Encoding::Utf16Le => "UTF-16LE",
            Encoding::Utf16Be => "UTF-16BE",
            Encoding::Utf32Le => "UTF-32LE",
            Encoding::Utf32Be => "UTF-32BE",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_uppercase().as_str() {
            "UTF-8" | "UTF8" => Some(Encoding::Utf8),
            "UTF-16LE" | "UTF16LE" => Some(Encoding::Utf16Le),
            "UTF-16BE" | "UTF16BE" => Some(Encoding::Utf16Be),
            "UTF-32LE" | "UTF32LE" => Some(Encoding::Utf32Le),
            "UTF-32BE" | "UTF32BE" => Some(Encoding::Utf32Be),
            _ => None,
        }
    }
}

/// A comment marker pair.
///
/// A comment runs from a line beginning with `start` up to and including a
/// line ending with `finish`; without `finish` the comment is single-line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Comment {
    pub start: String,
    pub finish: Option<String>,
}

/// How a line splits into field parts. Exactly one variant per format.
#[derive(Debug, Clone)]
pub enum LineShape {
    /// Fields are a trimmed split on a delimiter string.
    Separator(String),
    /// Fields come from a capture-group regex; named groups map to field
    /// names, unnamed fields fall back to positional captures.
    Pattern(Regex),
    /// The line is a JSON object; field names are dotted paths into it.
    Json,
}

impl PartialEq for LineShape {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (LineShape::Separator(a), LineShape::Separator(b)) => a == b,
            (LineShape::Pattern(a), LineShape::Pattern(b)) => a.as_str() == b.as_str(),
            (LineShape::Json, LineShape::Json) => true,
            _ => false,
        }
    }
}

/// Declared type of a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldKind {
    Bool,
    Int,
    UInt,
    Double,
    Str,
    DateTime,
}

impl FieldKind {
    pub fn name(self) -> &'static str {
        match self {
            FieldKind::Bool => "bool",
            FieldKind::Int => "int",
            FieldKind::UInt => "uint",
            FieldKind::Double => "double",
            FieldKind::Str => "string",
            FieldKind::DateTime => "datetime",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "bool" => Some(FieldKind::Bool),
            "int" => Some(FieldKind::Int),
            "uint" => Some(FieldKind::UInt),
            "double" => Some(FieldKind::Double),
            "string" => Some(FieldKind::Str),
            "datetime" => Some(FieldKind::DateTime),
            _ => None,
        }
    }
}

/// A typed field value materialized from a log line.
///
/// Doubles compare and hash by bit pattern so values can live in hash sets
/// (enum accumulators, filter value lists).
#[derive(Debug, Clone)]
pub enum FieldValue {
    Bool(bool),
    Int(i64),
    UInt(u64),
    Double(f64),
    Str(String),
    Time(Timestamp),
}

impl PartialEq for FieldValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (FieldValue::Bool(a), FieldValue::Bool(b)) => a == b,
            (FieldValue::Int(a), FieldValue::Int(b)) => a == b,
            (FieldValue::UInt(a), FieldValue::UInt(b)) => a == b,
            (FieldValue::Double(a), FieldValue::Double(b)) => a.to_bits() == b.to_bits(),
            (FieldValue::Str(a), FieldValue::Str(b)) => a == b,
            (FieldValue::Time(a), FieldValue::Time(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for FieldValue {}

impl Hash for FieldValue {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match self {
            FieldValue::Bool(v) => v.hash(state),
            FieldValue::Int(v) => v.hash(state),
            FieldValue::UInt(v) => v.hash(state),
            FieldValue::Double(v) => v.to_bits().hash(state),
            FieldValue::Str(v) => v.hash(state),
            FieldValue::Time(v) => v.hash(state),
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Bool(v) => write!(f, "{v}"),
            FieldValue::Int(v) => write!(f, "{v}"),
            FieldValue::UInt(v) => write!(f, "{v}"),
            FieldValue::Double(v) => write!(f, "{v}"),
            FieldValue::Str(v) => f.write_str(v),
            FieldValue::Time(v) => write!(f, "{v}"),
        }
    }
}

/// One declared field of a format.
#[derive(Debug, Clone)]
pub struct Field {
    pub name: String,
    /// Per-field validation regex; the first match within the part is the
    /// captured value. Absent means the whole trimmed part is the value.
    pub regex: Option<Regex>,
    pub kind: FieldKind,
    pub optional: bool,
    /// Enum fields accumulate observed values (open list) or validate
    /// against `values` (closed list).
    pub is_enum: bool,
    pub values: HashSet<FieldValue>,
}

impl PartialEq for Field {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
            && self.regex.as_ref().map(Regex::as_str) == other.regex.as_ref().map(Regex::as_str)
            && self.kind == other.kind
            && self.optional == other.optional
            && self.is_enum == other.is_enum
            && self.values == other.values
    }
}

/// A catalog entry describing one family of log files.
#[derive(Debug, Clone)]
pub struct Format {
    /// Unique name; doubles as the catalog filename stem.
    pub name: String,
    /// Accepted module names; empty accepts any.
    pub modules: HashSet<String>,
    /// Matched against the file stem; a named `module` group overrides the
    /// default-derived module name.
    pub filename_regex: Option<Regex>,
    /// Matched verbatim against the file extension (with the dot).
    pub extension: String,
    pub encoding: Option<Encoding>,
    pub comments: Vec<Comment>,
    pub line_shape: LineShape,
    /// Index of the time field within `fields`.
    pub time_field_index: usize,
    /// strftime-style pattern for the non-fractional part of the time field.
    pub time_mask: String,
    /// Digits after the decimal point; 0 means none.
    pub time_fractional_digits: u32,
    pub fields: Vec<Field>,
}

impl PartialEq for Format {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
            && self.modules == other.modules
            && self.filename_regex.as_ref().map(Regex::as_str)
                == other.filename_regex.as_ref().map(Regex::as_str)
            && self.extension == other.extension
            && self.encoding == other.encoding
            && self.comments == other.comments
            && self.line_shape == other.line_shape
            && self.time_field_index == other.time_field_index
            && self.time_mask == other.time_mask
            && self.time_fractional_digits == other.time_fractional_digits
            && self.fields == other.fields
    }
}

impl Format {
    /// Ordered field names, e.g. for view columns or export headers.
    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|f| f.name.as_str())
    }
}

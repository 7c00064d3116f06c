//! On-disk format catalog.
//!
//! One JSON document per format, filename `<name>.json`, all living in a
//! catalog directory. Unknown keys are ignored; a document missing required
//! keys is rejected with a warning while the rest of the catalog still
//! loads. The catalog directory is an explicit argument, never ambient
//! process state.

use crate::collections::HashSet;
use crate::error::{Error, Result};
use crate::format::{Comment, Encoding, Field, FieldKind, FieldValue, Format, LineShape};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Debug, Serialize, Deserialize)]
struct CommentDoc {
    start: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    finish: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct FieldDoc {
    name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    regex: String,
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    optional: bool,
    #[serde(default, rename = "enum")]
    is_enum: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    values: Vec<serde_json::Value>,
}

/// The document layout of `<name>.json`. Unknown keys deserialize into
/// nothing; required keys are `extension`, `timeFieldIndex`, `timeMask`
/// and `fields`.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FormatDoc {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    modules: Vec<String>,
    #[serde(
        default,
        with = "serde_regex",
        skip_serializing_if = "Option::is_none"
    )]
    log_file_regex: Option<Regex>,
    extension: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    encoding: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    comments: Vec<CommentDoc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    separator: Option<String>,
    #[serde(
        default,
        with = "serde_regex",
        skip_serializing_if = "Option::is_none"
    )]
    line_regex: Option<Regex>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    line_format: Option<String>,
    time_field_index: usize,
    time_mask: String,
    #[serde(default)]
    time_fractional_digits: u32,
    fields: Vec<FieldDoc>,
}

fn reject(path: &Path, reason: impl Into<String>) -> Error {
    Error::Catalog {
        path: path.to_path_buf(),
        reason: reason.into(),
    }
}

/// Coerce a JSON scalar from a `values` list to the field's declared kind.
/// Values that do not fit the kind are kept as strings so a sloppy catalog
/// still loads.
fn value_from_json(kind: FieldKind, value: &serde_json::Value) -> FieldValue {
    match kind {
        FieldKind::Bool => match value {
            serde_json::Value::Bool(b) => FieldValue::Bool(*b),
            other => FieldValue::Str(scalar_to_string(other)),
        },
        FieldKind::Int => match value.as_i64() {
            Some(v) => FieldValue::Int(v),
            None => FieldValue::Str(scalar_to_string(value)),
        },
        FieldKind::UInt => match value.as_u64() {
            Some(v) => FieldValue::UInt(v),
            None => FieldValue::Str(scalar_to_string(value)),
        },
        FieldKind::Double => match value.as_f64() {
            Some(v) => FieldValue::Double(v),
            None => FieldValue::Str(scalar_to_string(value)),
        },
        FieldKind::Str | FieldKind::DateTime => FieldValue::Str(scalar_to_string(value)),
    }
}

fn scalar_to_string(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn value_to_json(value: &FieldValue) -> serde_json::Value {
    match value {
        FieldValue::Bool(v) => serde_json::Value::from(*v),
        FieldValue::Int(v) => serde_json::Value::from(*v),
        FieldValue::UInt(v) => serde_json::Value::from(*v),
        FieldValue::Double(v) => serde_json::Value::from(*v),
        FieldValue::Str(v) => serde_json::Value::from(v.clone()),
        FieldValue::Time(v) => serde_json::Value::from(v.to_rfc3339()),
    }
}

fn doc_to_format(name: &str, doc: FormatDoc, path: &Path) -> Result<Format> {
    let line_shape = match (&doc.separator, &doc.line_regex, doc.line_format.as_deref()) {
        (Some(sep), None, None) => LineShape::Separator(sep.clone()),
        (None, Some(re), None) => LineShape::Pattern(re.clone()),
        (None, None, Some("json")) => LineShape::Json,
        (None, None, Some(other)) => {
            return Err(reject(path, format!("unknown lineFormat {other:?}")));
        }
        (None, None, None) => {
            return Err(reject(path, "one of separator, lineRegex, lineFormat required"));
        }
        _ => {
            return Err(reject(
                path,
                "separator, lineRegex and lineFormat are mutually exclusive",
            ));
        }
    };

    let encoding = match &doc.encoding {
        None => None,
        Some(name) => Some(
            Encoding::from_name(name)
                .ok_or_else(|| reject(path, format!("unknown encoding {name:?}")))?,
        ),
    };

    let mut fields = Vec::with_capacity(doc.fields.len());
    for fd in &doc.fields {
        let kind = FieldKind::from_name(&fd.kind)
            .ok_or_else(|| reject(path, format!("unknown field type {:?}", fd.kind)))?;
        let regex = if fd.regex.is_empty() {
            None
        } else {
            Some(Regex::new(&fd.regex)?)
        };
        let values: HashSet<FieldValue> =
            fd.values.iter().map(|v| value_from_json(kind, v)).collect();
        fields.push(Field {
            name: fd.name.clone(),
            regex,
            kind,
            optional: fd.optional,
            is_enum: fd.is_enum,
            values,
        });
    }

    if doc.time_field_index >= fields.len() {
        return Err(reject(
            path,
            format!(
                "timeFieldIndex {} out of range for {} field(s)",
                doc.time_field_index,
                fields.len()
            ),
        ));
    }

    Ok(Format {
        name: name.to_string(),
        modules: doc.modules.iter().cloned().collect(),
        filename_regex: doc.log_file_regex,
        extension: doc.extension,
        encoding,
        comments: doc
            .comments
            .into_iter()
            .map(|c| Comment {
                start: c.start,
                finish: c.finish.filter(|f| !f.is_empty()),
            })
            .collect(),
        line_shape,
        time_field_index: doc.time_field_index,
        time_mask: doc.time_mask,
        time_fractional_digits: doc.time_fractional_digits,
        fields,
    })
}

fn format_to_doc(format: &Format) -> FormatDoc {
    let mut modules: Vec<String> = format.modules.iter().cloned().collect();
    modules.sort();

    let (separator, line_regex, line_format) = match &format.line_shape {
        LineShape::Separator(sep) => (Some(sep.clone()), None, None),
        LineShape::Pattern(re) => (None, Some(re.clone()), None),
        LineShape::Json => (None, None, Some("json".to_string())),
    };

    FormatDoc {
        modules,
        log_file_regex: format.filename_regex.clone(),
        extension: format.extension.clone(),
        encoding: format.encoding.map(|e| e.name().to_string()),
        comments: format
            .comments
            .iter()
            .map(|c| CommentDoc {
                start: c.start.clone(),
                finish: c.finish.clone(),
            })
            .collect(),
        separator,
        line_regex,
        line_format,
        time_field_index: format.time_field_index,
        time_mask: format.time_mask.clone(),
        time_fractional_digits: format.time_fractional_digits,
        fields: format
            .fields
            .iter()
            .map(|f| {
                let mut values: Vec<serde_json::Value> =
                    f.values.iter().map(value_to_json).collect();
                values.sort_by_key(|v| v.to_string());
                FieldDoc {
                    name: f.name.clone(),
                    regex: f.regex.as_ref().map(|r| r.as_str().to_string()).unwrap_or_default(),
                    kind: f.kind.name().to_string(),
                    optional: f.optional,
                    is_enum: f.is_enum,
                    values,
                }
            })
            .collect(),
    }
}

/// A directory of format documents.
pub struct FormatCatalog {
    dir: PathBuf,
    formats: BTreeMap<String, Arc<Format>>,
}

impl FormatCatalog {
    /// Load every `*.json` in `dir`. Documents that fail to parse are
    /// skipped with a warning; the rest of the catalog still loads.
    pub fn load(dir: impl Into<PathBuf>) -> Result<Self> {
        let mut catalog = Self {
            dir: dir.into(),
            formats: BTreeMap::new(),
        };
        catalog.reload()?;
        Ok(catalog)
    }

    /// Drop all loaded formats and re-read the catalog directory.
    pub fn reload(&mut self) -> Result<()> {
        self.formats.clear();

        for entry in std::fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if !path.is_file() || path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Some(name) = path.file_stem().and_then(|s| s.to_str()).map(String::from) else {
                continue;
            };
            match Self::load_file(&name, &path) {
                Ok(format) => {
                    self.formats.insert(name, Arc::new(format));
                }
                Err(err) => {
                    warn!("skipping format document {}: {err}", path.display());
                }
            }
        }

        debug!("formats loaded: {}", self.formats.len());
        Ok(())
    }

    fn load_file(name: &str, path: &Path) -> Result<Format> {
        let raw = std::fs::read_to_string(path)?;
        let doc: FormatDoc = serde_json::from_str(&raw)
            .map_err(|e| reject(path, e.to_string()))?;
        doc_to_format(name, doc, path)
    }

    pub fn get(&self, name: &str) -> Option<Arc<Format>> {
        self.formats.get(name).cloned()
    }

    pub fn formats(&self) -> impl Iterator<Item = &Arc<Format>> {
        self.formats.values()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.formats.keys().map(String::as_str)
    }

    /// Resolve a list of format names, in order, for an ingest call.
    pub fn select(&self, names: &[&str]) -> Vec<Arc<Format>> {
        names.iter().filter_map(|n| self.get(n)).collect()
    }

    /// Serialize a format to `<name>.json` in the catalog directory and
    /// register it.
    pub fn add(&mut self, format: Format) -> Result<Arc<Format>> {
        if format.name.is_empty() {
            return Err(reject(&self.dir, "format name cannot be empty"));
        }

        let path = self.dir.join(format!("{}.json", format.name));
        let doc = format_to_doc(&format);
        std::fs::write(&path, serde_json::to_string_pretty(&doc)?)?;

        debug!("format created: {}", format.name);
        let format = Arc::new(format);
        self.formats.insert(format.name.clone(), format.clone());
        Ok(format)
    }

    /// Remove a format and its document. Returns whether it existed.
    pub fn remove(&mut self, name: &str) -> Result<bool> {
        if self.formats.remove(name).is_none() {
            warn!("format not found: {name}");
            return Ok(false);
        }
        let path = self.dir.join(format!("{name}.json"));
        if path.exists() {
            std::fs::remove_file(&path)?;
            debug!("format removed: {name}");
        }
        Ok(true)
    }
}

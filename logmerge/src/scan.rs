//! Directory and archive scanning into per-module file groups.
//!
//! Every discovered file is probed against the candidate formats: the
//! first format that extracts a time from the head entry-starter line
//! admits the file, and a tail probe supplies its end time. Admitted files
//! route into a per-module path-prefix tree; files of one module with
//! disjoint time ranges merge into a rotation chain, while overlapping
//! ranges from different directories split the module name by its shortest
//! unique directory chain.

use crate::archive;
use crate::collections::HashMap;
use crate::error::Result;
use crate::format::{Format, Timestamp};
use crate::parse::{check_format, parse_time, split_line};
use crate::reader::LineReader;
use crate::source::{FileSource, LogMetadata};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, warn};

/// One admitted log file, ready for indexing.
#[derive(Debug, Clone)]
pub struct ScannedFile {
    pub module: String,
    pub metadata: LogMetadata,
    pub start: Timestamp,
    pub end: Timestamp,
}

#[derive(Debug)]
struct FileSpan {
    metadata: LogMetadata,
    start: Timestamp,
    end: Timestamp,
}

type SpanMap = BTreeMap<Timestamp, Option<FileSpan>>;

fn insert_span(spans: &mut SpanMap, metadata: LogMetadata, start: Timestamp, end: Timestamp) {
    spans.insert(
        start,
        Some(FileSpan {
            metadata,
            start,
            end,
        }),
    );
    // End marker; used only to detect range overlap while scanning.
    spans.entry(end).or_insert(None);
}

/// Whether a chain can take a file starting at `start` without its range
/// overlapping a chained file.
fn chain_accepts(spans: &SpanMap, start: Timestamp) -> bool {
    matches!(spans.range(..=start).next_back(), None | Some((_, None)))
}

/// A node of the per-module routing tree. `path` holds the directory
/// components shared by everything below this node.
#[derive(Debug, Default)]
struct ModuleBranch {
    path: Vec<String>,
    branch: HashMap<String, ModuleBranch>,
    files: Option<SpanMap>,
}

impl ModuleBranch {
    fn add(&mut self, path: Vec<String>, metadata: LogMetadata, start: Timestamp, end: Timestamp) {
        if self.branch.is_empty() {
            match &mut self.files {
                None => {
                    self.path = path;
                    let mut spans = SpanMap::new();
                    insert_span(&mut spans, metadata, start, end);
                    self.files = Some(spans);
                }
                Some(spans) => {
                    if chain_accepts(spans, start) {
                        insert_span(spans, metadata, start, end);
                    } else {
                        // Overlapping ranges from another directory: split
                        // the module by its path.
                        let mut new_spans = SpanMap::new();
                        insert_span(&mut new_spans, metadata, start, end);
                        self.split(path, new_spans);
                    }
                }
            }
        } else if path == self.path {
            match &mut self.files {
                None => {
                    let mut spans = SpanMap::new();
                    insert_span(&mut spans, metadata, start, end);
                    self.files = Some(spans);
                }
                Some(spans) => {
                    if chain_accepts(spans, start) {
                        insert_span(spans, metadata, start, end);
                    } else {
                        warn!(
                            "overlapping log ranges within one directory; dropping {}",
                            metadata.filename
                        );
                    }
                }
            }
        } else if path.len() < self.path.len() || path[..self.path.len()] != self.path[..] {
            let mut new_spans = SpanMap::new();
            insert_span(&mut new_spans, metadata, start, end);
            self.split(path, new_spans);
        } else {
            let key = path[self.path.len()].clone();
            let rest = path[self.path.len() + 1..].to_vec();
            match self.branch.get_mut(&key) {
                Some(child) => child.add(rest, metadata, start, end),
                None => {
                    let mut spans = SpanMap::new();
                    insert_span(&mut spans, metadata, start, end);
                    self.branch.insert(
                        key,
                        ModuleBranch {
                            path: rest,
                            branch: HashMap::default(),
                            files: Some(spans),
                        },
                    );
                }
            }
        }
    }

    /// Split this node at the first component where its path and the new
    /// path diverge, pushing the existing files down into a child.
    fn split(&mut self, new_path: Vec<String>, new_spans: SpanMap) {
        let old_path = std::mem::take(&mut self.path);

        let mut shared = 0;
        while shared < old_path.len()
            && shared < new_path.len()
            && old_path[shared] == new_path[shared]
        {
            shared += 1;
        }

        if shared == old_path.len() && shared == new_path.len() {
            warn!("same path, same module, conflicting log ranges; dropping file");
            self.path = old_path;
            return;
        }

        if shared == old_path.len() {
            // The new path is deeper: the new files become a child.
            self.path = old_path;
            self.branch.insert(
                new_path[shared].clone(),
                ModuleBranch {
                    path: new_path[shared + 1..].to_vec(),
                    branch: HashMap::default(),
                    files: Some(new_spans),
                },
            );
        } else if shared == new_path.len() {
            // The old path is deeper: push the old files down.
            self.path = new_path;
            let old_files = self.files.take();
            self.branch.insert(
                old_path[shared].clone(),
                ModuleBranch {
                    path: old_path[shared + 1..].to_vec(),
                    branch: HashMap::default(),
                    files: old_files,
                },
            );
            self.files = Some(new_spans);
        } else {
            // Diverging in the middle: both sides become children.
            self.path = old_path[..shared].to_vec();
            let old_files = self.files.take();
            self.branch.insert(
                old_path[shared].clone(),
                ModuleBranch {
                    path: old_path[shared + 1..].to_vec(),
                    branch: HashMap::default(),
                    files: old_files,
                },
            );
            self.branch.insert(
                new_path[shared].clone(),
                ModuleBranch {
                    path: new_path[shared + 1..].to_vec(),
                    branch: HashMap::default(),
                    files: Some(new_spans),
                },
            );
        }
    }

    /// Flatten into files, prefixing modules with the diverging branch
    /// components, outermost first.
    fn collect(self) -> Vec<ScannedFile> {
        let mut out = Vec::new();

        if let Some(spans) = self.files {
            for span in spans.into_values().flatten() {
                out.push(ScannedFile {
                    module: String::new(),
                    metadata: span.metadata,
                    start: span.start,
                    end: span.end,
                });
            }
        }

        for (key, child) in self.branch {
            for mut file in child.collect() {
                if !key.is_empty() {
                    file.module = if file.module.is_empty() {
                        key.clone()
                    } else {
                        format!("{key}/{}", file.module)
                    };
                }
                out.push(file);
            }
        }

        out
    }
}

/// Groups admitted files per module and resolves name collisions across
/// directory trees.
#[derive(Debug, Default)]
pub struct DirectoryScanner {
    modules: HashMap<String, ModuleBranch>,
}

impl DirectoryScanner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_file(
        &mut self,
        module: &str,
        metadata: LogMetadata,
        start: Timestamp,
        end: Timestamp,
    ) {
        let path = route_path(&metadata.filename);
        self.modules
            .entry(module.to_string())
            .or_default()
            .add(path, metadata, start, end);
    }

    /// Emit the flat file sequence with composed module names.
    pub fn scan(self) -> Vec<ScannedFile> {
        let mut result = Vec::new();
        for (module_name, branch) in self.modules {
            for mut file in branch.collect() {
                if !module_name.is_empty() {
                    file.module = if file.module.is_empty() {
                        module_name.clone()
                    } else {
                        format!("{}/{}", file.module, module_name)
                    };
                }
                debug!(
                    "found file: {} {} from {} to {}",
                    file.module, file.metadata.filename, file.start, file.end
                );
                result.push(file);
            }
        }
        result
    }
}

/// Directory components of a filename, separators normalized, basename
/// dropped.
fn route_path(filename: &str) -> Vec<String> {
    let normalized = filename.replace('\\', "/");
    let mut parts: Vec<String> = normalized
        .split('/')
        .filter(|p| !p.is_empty())
        .map(String::from)
        .collect();
    parts.pop();
    parts
}

/// Walk a folder recursively, probing every regular file. Returns whether
/// any file was admitted.
pub fn scan_folder(
    scanner: &mut DirectoryScanner,
    folder: &Path,
    formats: &[Arc<Format>],
) -> Result<bool> {
    let mut found = false;

    for entry in walkdir::WalkDir::new(folder).follow_links(false) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                warn!("cannot scan directory entry: {err}");
                continue;
            }
        };
        if !entry.path().is_file() {
            continue;
        }
        found |= scan_path(scanner, entry.path(), formats);
    }

    Ok(found)
}

/// Probe a single path: archives fan out into their members, everything
/// else is probed directly.
pub fn scan_path(scanner: &mut DirectoryScanner, path: &Path, formats: &[Arc<Format>]) -> bool {
    let extension = path_extension(path);

    if archive::is_archive_extension(&extension) {
        return scan_archive(scanner, path, &extension, formats);
    }

    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or_default()
        .to_string();
    let filename = path.display().to_string();
    add_candidate(
        scanner,
        filename,
        &stem,
        &extension,
        FileSource::Plain(path.to_path_buf()),
        formats,
    )
}

/// Enumerate archive members and probe each one that carries a recognized
/// extension.
pub fn scan_archive(
    scanner: &mut DirectoryScanner,
    path: &Path,
    extension: &str,
    formats: &[Arc<Format>],
) -> bool {
    let members = match archive::list_members(path, extension) {
        Ok(members) => members,
        Err(err) => {
            debug!("failed to open archive {}: {err}", path.display());
            return false;
        }
    };

    let mut found = false;
    for member in members {
        let (stem, member_extension) = archive::member_stem_extension(&member);
        let source = match extension {
            ".zip" => FileSource::ZipMember {
                archive: path.to_path_buf(),
                member: member.clone(),
            },
            ".gz" => FileSource::Gzip(path.to_path_buf()),
            ".tar" => FileSource::TarMember {
                archive: path.to_path_buf(),
                member: member.clone(),
            },
            _ => FileSource::SevenZMember {
                archive: path.to_path_buf(),
                member: member.clone(),
            },
        };

        // A gzip stream has no internal path; route it by the archive's
        // own location so equal names in different folders stay apart.
        let filename = match extension {
            ".gz" => path.with_file_name(&member).display().to_string(),
            _ => member,
        };

        found |= add_candidate(scanner, filename, &stem, &member_extension, source, formats);
    }
    found
}

/// Match a file against the candidate formats and, if one admits it,
/// route it into the scanner. Returns whether the file was admitted.
pub fn add_candidate(
    scanner: &mut DirectoryScanner,
    filename: String,
    stem: &str,
    extension: &str,
    source: FileSource,
    formats: &[Arc<Format>],
) -> bool {
    let mut module = stem.to_string();

    // Filter candidates by filename pattern, accepted modules and
    // extension; remember any module-name capture per format.
    let mut candidates: Vec<Arc<Format>> = Vec::new();
    let mut captured_modules: HashMap<String, String> = HashMap::default();
    for format in formats {
        if let Some(regex) = &format.filename_regex {
            let Some(caps) = regex.captures(stem) else {
                continue;
            };
            if let Some(m) = caps.name("module") {
                captured_modules.insert(format.name.clone(), m.as_str().to_string());
            }
        }

        if (format.modules.is_empty() || format.modules.contains(module.as_str()))
            && format.extension == extension
        {
            candidates.push(format.clone());
        }
    }

    if candidates.is_empty() {
        return false;
    }

    let Some((format, start, end)) = probe_file(&filename, &source, &candidates) else {
        return false;
    };

    debug!("file discovered: {filename}");

    if format.filename_regex.is_some() {
        module = captured_modules.get(&format.name).cloned().unwrap_or_default();
    }

    let metadata = LogMetadata {
        format,
        filename,
        source,
    };
    scanner.add_file(&module, metadata, start, end);
    true
}

/// Find the first candidate format that extracts a head time, and pair it
/// with the tail-probed end time.
fn probe_file(
    filename: &str,
    source: &FileSource,
    candidates: &[Arc<Format>],
) -> Option<(Arc<Format>, Timestamp, Timestamp)> {
    for format in candidates {
        match probe_with_format(filename, source, format) {
            Ok(Some((start, end))) => return Some((format.clone(), start, end)),
            Ok(None) => continue,
            Err(err) => {
                debug!("failed to scan {filename} with format {}: {err}", format.name);
                continue;
            }
        }
    }
    None
}

fn probe_with_format(
    filename: &str,
    source: &FileSource,
    format: &Arc<Format>,
) -> Result<Option<(Timestamp, Timestamp)>> {
    let mut reader = LineReader::new(
        source.open()?,
        filename,
        format.encoding,
        format.comments.clone(),
    )?;

    // Head probe: the first line must be an entry-starter with a
    // parseable time, else the format does not admit this file.
    let Some(line) = reader.next_line()? else {
        return Ok(None);
    };
    let Ok(parts) = split_line(&line, format) else {
        return Ok(None);
    };
    if parts.len() <= format.time_field_index || !check_format(&parts, format) {
        return Ok(None);
    }
    let Ok(start) = parse_time(&parts[format.time_field_index], format) else {
        return Ok(None);
    };

    // Tail probe: read backward until an entry-starter line is found.
    reader.goto_end()?;
    let end = loop {
        let Some(line) = reader.prev_line()? else {
            warn!("no tail entry found in {filename}");
            return Ok(None);
        };
        let Ok(parts) = split_line(&line, format) else {
            continue;
        };
        if parts.len() <= format.time_field_index || !check_format(&parts, format) {
            continue;
        }
        match parse_time(&parts[format.time_field_index], format) {
            Ok(time) => break time,
            Err(_) => return Ok(None),
        }
    };

    Ok(Some((start, end)))
}

fn path_extension(path: &Path) -> String {
    match path.extension().and_then(|e| e.to_str()) {
        Some(ext) => format!(".{ext}"),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collections::HashSet;
    use crate::format::{Field, FieldKind, LineShape};
    use chrono::{TimeZone, Utc};
    use regex::Regex;
    use std::io::Write;

    fn ts(secs: i64) -> Timestamp {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    fn csv_format() -> Arc<Format> {
        Arc::new(Format {
            name: "csv".to_string(),
            modules: HashSet::default(),
            filename_regex: None,
            extension: ".csv".to_string(),
            encoding: None,
            comments: vec![],
            line_shape: LineShape::Separator(";".to_string()),
            time_field_index: 0,
            time_mask: "%F %H:%M:%S".to_string(),
            time_fractional_digits: 3,
            fields: vec![
                Field {
                    name: "time".to_string(),
                    regex: Some(Regex::new(r"^\d{4}-\d{2}-\d{2} ").unwrap()),
                    kind: FieldKind::DateTime,
                    optional: false,
                    is_enum: false,
                    values: HashSet::default(),
                },
                Field {
                    name: "message".to_string(),
                    regex: None,
                    kind: FieldKind::Str,
                    optional: false,
                    is_enum: false,
                    values: HashSet::default(),
                },
            ],
        })
    }

    fn metadata(filename: &str) -> LogMetadata {
        LogMetadata {
            format: csv_format(),
            filename: filename.to_string(),
            source: FileSource::Buffer(Arc::new(Vec::new())),
        }
    }

    #[test]
    fn single_file_keeps_its_module() {
        let mut scanner = DirectoryScanner::new();
        scanner.add_file("file", metadata("dir1/file.csv"), ts(0), ts(100));

        let files = scanner.scan();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].module, "file");
        assert_eq!(files[0].metadata.filename, "dir1/file.csv");
        assert_eq!(files[0].start, ts(0));
        assert_eq!(files[0].end, ts(100));
    }

    #[test]
    fn conflicting_paths_compose_module_names() {
        let mut scanner = DirectoryScanner::new();
        scanner.add_file("file", metadata("A/file.csv"), ts(0), ts(1000));
        scanner.add_file("file", metadata("B/file.csv"), ts(500), ts(1500));

        let files = scanner.scan();
        assert_eq!(files.len(), 2);

        let mut by_module: HashMap<String, ScannedFile> = HashMap::default();
        for file in files {
            by_module.insert(file.module.clone(), file);
        }

        let a = by_module.get("A/file").expect("A/file should exist");
        assert_eq!(a.metadata.filename, "A/file.csv");
        assert_eq!(a.start, ts(0));

        let b = by_module.get("B/file").expect("B/file should exist");
        assert_eq!(b.metadata.filename, "B/file.csv");
        assert_eq!(b.start, ts(500));
    }

    #[test]
    fn shortest_unique_chain_wins() {
        let mut scanner = DirectoryScanner::new();
        scanner.add_file("file", metadata("logs/x/A/file.csv"), ts(0), ts(1000));
        scanner.add_file("file", metadata("logs/x/B/file.csv"), ts(500), ts(1500));

        let mut modules: Vec<String> = scanner.scan().into_iter().map(|f| f.module).collect();
        modules.sort();
        assert_eq!(modules, ["A/file", "B/file"]);
    }

    #[test]
    fn rotated_segments_stay_one_module() {
        let mut scanner = DirectoryScanner::new();
        scanner.add_file("app", metadata("logs/app.1.csv"), ts(0), ts(100));
        scanner.add_file("app", metadata("logs/app.2.csv"), ts(200), ts(300));

        let files = scanner.scan();
        assert_eq!(files.len(), 2);
        assert!(files.iter().all(|f| f.module == "app"));
    }

    fn write_log(dir: &Path, name: &str, lines: &[&str]) {
        let mut file = std::fs::File::create(dir.join(name)).unwrap();
        for line in lines {
            writeln!(file, "{line}").unwrap();
        }
    }

    #[test]
    fn folder_scan_probes_head_and_tail() {
        let dir = tempfile::tempdir().unwrap();
        write_log(
            dir.path(),
            "modA.csv",
            &[
                "2023-01-01 00:00:00.000;hello",
                "2023-01-01 00:00:02.000;alpha",
            ],
        );
        write_log(dir.path(), "notes.txt", &["not a log"]);

        let formats = vec![csv_format()];
        let mut scanner = DirectoryScanner::new();
        let found = scan_folder(&mut scanner, dir.path(), &formats).unwrap();
        assert!(found);

        let files = scanner.scan();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].module, "modA");
        assert_eq!(files[0].start, ts(1672531200));
        assert_eq!(files[0].end, ts(1672531202));
    }

    #[test]
    fn single_entry_file_has_equal_probes() {
        let dir = tempfile::tempdir().unwrap();
        write_log(dir.path(), "one.csv", &["2023-01-01 00:00:01.000;only"]);

        let formats = vec![csv_format()];
        let mut scanner = DirectoryScanner::new();
        scan_folder(&mut scanner, dir.path(), &formats).unwrap();

        let files = scanner.scan();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].start, files[0].end);
    }

    #[test]
    fn filename_regex_overrides_module() {
        let mut format = (*csv_format()).clone();
        format.filename_regex = Some(Regex::new(r"^(?P<module>[a-z]+)_\d+$").unwrap());
        let formats = vec![Arc::new(format)];

        let dir = tempfile::tempdir().unwrap();
        write_log(dir.path(), "net_0001.csv", &["2023-01-01 00:00:00.000;x"]);
        write_log(dir.path(), "UPPER.csv", &["2023-01-01 00:00:00.000;x"]);

        let mut scanner = DirectoryScanner::new();
        scan_folder(&mut scanner, dir.path(), &formats).unwrap();

        let files = scanner.scan();
        assert_eq!(files.len(), 1, "non-matching stem is not admitted");
        assert_eq!(files[0].module, "net");
    }

    #[test]
    fn modules_whitelist_limits_candidates() {
        let mut format = (*csv_format()).clone();
        format.modules = ["modA".to_string()].into_iter().collect();
        let formats = vec![Arc::new(format)];

        let dir = tempfile::tempdir().unwrap();
        write_log(dir.path(), "modA.csv", &["2023-01-01 00:00:00.000;x"]);
        write_log(dir.path(), "modB.csv", &["2023-01-01 00:00:00.000;x"]);

        let mut scanner = DirectoryScanner::new();
        scan_folder(&mut scanner, dir.path(), &formats).unwrap();

        let files = scanner.scan();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].module, "modA");
    }

    #[test]
    fn zip_members_are_admitted() {
        let dir = tempfile::tempdir().unwrap();
        let archive_path = dir.path().join("bundle.zip");

        let file = std::fs::File::create(&archive_path).unwrap();
        let mut zip = zip::ZipWriter::new(file);
        let options = zip::write::SimpleFileOptions::default();
        zip.start_file("inner/modZ.csv", options).unwrap();
        zip.write_all(b"2023-01-01 00:00:00.000;zipped\n2023-01-01 00:00:05.000;tail\n")
            .unwrap();
        zip.finish().unwrap();

        let formats = vec![csv_format()];
        let mut scanner = DirectoryScanner::new();
        let found = scan_folder(&mut scanner, dir.path(), &formats).unwrap();
        assert!(found);

        let files = scanner.scan();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].module, "modZ");
        assert_eq!(files[0].start, ts(1672531200));
        assert_eq!(files[0].end, ts(1672531205));

        // The member reopens through its capability.
        let mut reader = files[0].metadata.open_reader().unwrap();
        assert_eq!(
            reader.next_line().unwrap().as_deref(),
            Some("2023-01-01 00:00:00.000;zipped")
        );
    }
}

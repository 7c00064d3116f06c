//! Ingestion façade.
//!
//! A [`LogManager`] binds the scanner, the index and the session factory.
//! Formats arrive as an explicit argument; there is no ambient catalog
//! state. Opening fails with [`Error::Ingestion`] when no file admits any
//! of the given formats.

use crate::collections::HashSet;
use crate::error::{Error, Result};
use crate::format::{FieldValue, Format, Timestamp};
use crate::scan::{self, DirectoryScanner};
use crate::session::Session;
use crate::source::FileSource;
use crate::storage::LogStorage;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

pub struct LogManager {
    storage: Arc<LogStorage>,
}

impl LogManager {
    /// Recursively scan a set of folders, probing plain files and archive
    /// members against the formats.
    pub fn open_folders(folders: &[PathBuf], formats: &[Arc<Format>]) -> Result<Self> {
        let source_name = folders
            .iter()
            .map(|f| f.display().to_string())
            .collect::<Vec<_>>()
            .join(", ");

        let mut scanner = DirectoryScanner::new();
        let mut found = false;
        for folder in folders {
            found |= scan::scan_folder(&mut scanner, folder, formats)?;
        }

        if !found {
            return Err(Error::Ingestion { source_name });
        }

        Self::from_scanner(scanner, &source_name)
    }

    /// Open a single file or archive.
    pub fn open_file(path: &Path, formats: &[Arc<Format>]) -> Result<Self> {
        let mut scanner = DirectoryScanner::new();
        if !scan::scan_path(&mut scanner, path, formats) {
            return Err(Error::Ingestion {
                source_name: path.display().to_string(),
            });
        }

        Self::from_scanner(scanner, &path.display().to_string())
    }

    /// Open an in-memory buffer under a nominal filename; the filename
    /// supplies the stem and extension for format matching.
    pub fn open_buffer(data: Vec<u8>, filename: &str, formats: &[Arc<Format>]) -> Result<Self> {
        let path = Path::new(filename);
        let stem = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or_default()
            .to_string();
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| format!(".{e}"))
            .unwrap_or_default();

        let mut scanner = DirectoryScanner::new();
        let admitted = scan::add_candidate(
            &mut scanner,
            filename.to_string(),
            &stem,
            &extension,
            FileSource::Buffer(Arc::new(data)),
            formats,
        );
        if !admitted {
            return Err(Error::Ingestion {
                source_name: filename.to_string(),
            });
        }

        Self::from_scanner(scanner, filename)
    }

    fn from_scanner(scanner: DirectoryScanner, source_name: &str) -> Result<Self> {
        let files = scanner.scan();
        info!("indexed {} log file(s) from {source_name}", files.len());
        Ok(Self {
            storage: Arc::new(LogStorage::new(files)),
        })
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

    /// Narrow the index to a module subset and time range and wrap it in
    /// a session. Passing no modules selects all of them.
    pub fn create_session(
        &self,
        modules: &HashSet<String>,
        min_time: Option<Timestamp>,
        max_time: Option<Timestamp>,
    ) -> Session {
        let selected: HashSet<String> = if modules.is_empty() {
            self.storage.modules().map(String::from).collect()
        } else {
            modules.clone()
        };
        Session::new(Arc::new(self.storage.narrow(&selected, min_time, max_time)))
    }
}

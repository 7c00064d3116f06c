//! Opener capabilities for log byte sources.
//!
//! A [`FileSource`] addresses a log file uniformly whether it lives on
//! disk, inside an archive, or in memory. Opening yields a fresh handle
//! every time, so two iterators over the same file never share state.

use crate::archive;
use crate::error::{Error, Result};
use crate::format::Format;
use crate::reader::{ByteSource, LineReader};
use std::io::Cursor;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Debug, Clone)]
pub enum FileSource {
    /// A plain file on disk.
    Plain(PathBuf),
    /// An in-memory buffer with a nominal filename.
    Buffer(Arc<Vec<u8>>),
    /// A member of a `.zip` archive.
    ZipMember { archive: PathBuf, member: String },
    /// The single stream of a `.gz` file.
    Gzip(PathBuf),
    /// A member of a `.tar` archive.
    TarMember { archive: PathBuf, member: String },
    /// A member of a `.7z` archive.
    SevenZMember { archive: PathBuf, member: String },
}

impl FileSource {
    /// Open a fresh seekable handle on the source. Archive members are
    /// inflated into memory; plain files are opened directly.
    pub fn open(&self) -> Result<Box<dyn ByteSource>> {
        match self {
            FileSource::Plain(path) => {
                let file = std::fs::File::open(path).map_err(|e| Error::Open {
                    name: path.display().to_string(),
                    source: e,
                })?;
                Ok(Box::new(file))
            }
            FileSource::Buffer(data) => Ok(Box::new(Cursor::new(data.as_ref().clone()))),
            FileSource::ZipMember { archive, member } => {
                let data = archive::read_zip_member(archive, member)?;
                Ok(Box::new(Cursor::new(data)))
            }
            FileSource::Gzip(path) => {
                let data = archive::read_gzip(path)?;
                Ok(Box::new(Cursor::new(data)))
            }
            FileSource::TarMember { archive, member } => {
                let data = archive::read_tar_member(archive, member)?;
                Ok(Box::new(Cursor::new(data)))
            }
            FileSource::SevenZMember { archive, member } => {
                let data = archive::read_7z_member(archive, member)?;
                Ok(Box::new(Cursor::new(data)))
            }
        }
    }
}

/// Everything needed to reopen one indexed log file: its format and its
/// opener capability.
#[derive(Debug, Clone)]
pub struct LogMetadata {
    pub format: Arc<Format>,
    /// Display name; for archive members the member path.
    pub filename: String,
    pub source: FileSource,
}

impl LogMetadata {
    /// Build a fresh [`LineReader`] over the source, configured with the
    /// format's encoding and comment markers.
    pub fn open_reader(&self) -> Result<LineReader> {
        LineReader::new(
            self.source.open()?,
            self.filename.clone(),
            self.format.encoding,
            self.format.comments.clone(),
        )
    }
}

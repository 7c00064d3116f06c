//! Ingestion and time-ordered merging of heterogeneous text log files.
//!
//! This crate provides:
//! - Declarative log format descriptions and their JSON catalog: [`format`]
//! - Encoding-aware bidirectional line reading: [`reader`]
//! - Line splitting, field typing and time parsing: [`parse`]
//! - Directory and archive scanning into a time-indexed file map: [`scan`],
//!   [`storage`]
//! - The k-way time-ordered merge iterator with resumable cursors:
//!   [`merge`], [`filter`]
//!
//! # Examples
//!
//! ```no_run
//! use logmerge::{FormatCatalog, LogManager};
//! # fn main() -> logmerge::Result<()> {
//! let catalog = FormatCatalog::load("formats")?;
//! let formats: Vec<_> = catalog.formats().cloned().collect();
//!
//! let manager = LogManager::open_folders(&["logs".into()], &formats)?;
//! let session = manager.create_session(&Default::default(), None, None);
//!
//! let mut iter = session.iterator(
//!     session.min_time().unwrap(),
//!     session.max_time().unwrap(),
//! )?;
//! while let Some(entry) = iter.next()? {
//!     println!("{} {} {}", entry.time, entry.module, entry.raw_line);
//! }
//! # Ok(())
//! # }
//! ```

// Core error types used throughout the crate
pub mod error;

// Internal collection type aliases (not re-exported)
mod collections;

// Format descriptions and the on-disk catalog
pub mod format;

// Encoding-aware line extraction
pub mod reader;

// Line splitting, typing, time parsing
pub mod parse;

// Structured entries
pub mod entry;

// Archive member enumeration and extraction
pub mod archive;

// Opener capabilities for byte sources
pub mod source;

// Directory scanning into per-module file groups
pub mod scan;

// The time-ordered file index
pub mod storage;

// Narrowed index views
pub mod session;

// The k-way merge iterator
pub mod merge;

// Entry filtering
pub mod filter;

// Ingestion façade
pub mod manager;

// Re-export commonly used types for convenience
pub use entry::LogEntry;
pub use error::{Error, Result};
pub use filter::{FilterMode, FilteredIter, LogFilter, RegexFilter, ValueFilter};
pub use format::catalog::FormatCatalog;
pub use format::{Comment, Encoding, Field, FieldKind, FieldValue, Format, LineShape, Timestamp};
pub use manager::LogManager;
pub use merge::{Direction, HeapItemCache, LogEntryIter, MergeHeapCache};
pub use session::Session;
pub use source::{FileSource, LogMetadata};
pub use storage::LogStorage;

//! Worker harness around the `logmerge` core.
//!
//! One dedicated worker thread executes the long-running operations —
//! scans, iterator construction, bulk pulls, searches — while any number
//! of client threads enqueue requests and collect results. Iterators are
//! affine to whichever thread holds them; the request/result handoff
//! migrates ownership through the engine's slot maps.
//!
//! # Examples
//!
//! ```no_run
//! use logmerge_engine::{EngineEvent, LogEngine};
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let engine = LogEngine::new();
//! let events = engine.events();
//!
//! engine.open_folders(vec!["logs".into()], vec![])?;
//! while let Ok(event) = events.recv() {
//!     match event {
//!         EngineEvent::ManagerOpened { .. } => break,
//!         EngineEvent::Failed { message, .. } => return Err(message.into()),
//!         _ => {}
//!     }
//! }
//!
//! engine.create_session(Vec::new(), None, None)?;
//! # Ok(())
//! # }
//! ```

pub mod error;

mod engine;
mod search;

pub use engine::{EngineEvent, EngineIter, LogEngine, RequestId};
pub use error::{EngineError, Result};
pub use search::{SearchHit, SearchOptions};

//! The engine: one dedicated worker thread executing ingestion and
//! iteration jobs.
//!
//! Submissions are message-addressed by monotonically increasing request
//! ids. The worker deposits results into per-id slots guarded by locks
//! and announces completion over an event channel; `take_result` /
//! `take_iterator` hand the deposited values (and iterator ownership)
//! back to whichever thread asks. Long-running pulls check a per-request
//! cancellation flag before every heap pop.

use crate::error::{EngineError, Result};
use crate::search::{self, SearchHit, SearchOptions};
use crossbeam_channel::{Receiver, Sender, unbounded};
use logmerge::{
    Direction, FilteredIter, Format, LogEntry, LogEntryIter, LogFilter, LogManager,
    MergeHeapCache, Session, Timestamp,
};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::JoinHandle;
use tracing::{error, warn};

pub type RequestId = u64;

/// Completion and progress notifications from the worker.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    ManagerOpened { request: RequestId, source: String },
    IteratorCreated { request: RequestId, direction: Direction },
    DataLoaded { request: RequestId },
    SearchFinished { request: RequestId, first_hit: Option<Timestamp> },
    Progress { message: String, percent: u8 },
    Failed { request: RequestId, message: String },
    Cancelled { request: RequestId },
}

/// An iterator owned by the engine layer, plain or filtered.
pub enum EngineIter {
    Merge(LogEntryIter),
    Filtered(FilteredIter),
}

impl EngineIter {
    pub fn next(&mut self) -> logmerge::Result<Option<LogEntry>> {
        match self {
            EngineIter::Merge(iter) => iter.next(),
            EngineIter::Filtered(iter) => iter.next(),
        }
    }

    pub fn has_entries(&self) -> bool {
        match self {
            EngineIter::Merge(iter) => iter.has_entries(),
            EngineIter::Filtered(iter) => iter.has_entries(),
        }
    }

    pub fn current_time(&self) -> Option<Timestamp> {
        match self {
            EngineIter::Merge(iter) => iter.current_time(),
            EngineIter::Filtered(iter) => iter.current_time(),
        }
    }

    pub fn is_value_ahead(&self, time: Timestamp) -> bool {
        match self {
            EngineIter::Merge(iter) => iter.is_value_ahead(time),
            EngineIter::Filtered(iter) => iter.is_value_ahead(time),
        }
    }

    pub fn snapshot(&self) -> MergeHeapCache {
        match self {
            EngineIter::Merge(iter) => iter.snapshot(),
            EngineIter::Filtered(iter) => iter.snapshot(),
        }
    }
}

enum Job {
    OpenFolders {
        request: RequestId,
        folders: Vec<PathBuf>,
        formats: Vec<Arc<Format>>,
    },
    OpenFile {
        request: RequestId,
        path: PathBuf,
        formats: Vec<Arc<Format>>,
    },
    OpenBuffer {
        request: RequestId,
        data: Vec<u8>,
        filename: String,
        formats: Vec<Arc<Format>>,
    },
    CreateIterator {
        request: RequestId,
        direction: Direction,
        start: Timestamp,
        end: Timestamp,
    },
    ResumeIterator {
        request: RequestId,
        cache: MergeHeapCache,
        start: Timestamp,
        end: Timestamp,
    },
    PullEntries {
        request: RequestId,
        iterator: Box<EngineIter>,
        count: usize,
        until: Option<Timestamp>,
        filter: Option<LogFilter>,
    },
    Search {
        request: RequestId,
        options: SearchOptions,
    },
    Shutdown,
}

#[derive(Default)]
struct Shared {
    manager: Mutex<Option<Arc<LogManager>>>,
    session: Mutex<Option<Arc<Session>>>,
    iterators: Mutex<FxHashMap<RequestId, EngineIter>>,
    results: Mutex<FxHashMap<RequestId, Vec<LogEntry>>>,
    search_hits: Mutex<FxHashMap<RequestId, Vec<SearchHit>>>,
    cancels: Mutex<FxHashMap<RequestId, Arc<AtomicBool>>>,
}

/// Handle to the worker. Dropping the engine shuts the worker down after
/// the queued jobs drain.
pub struct LogEngine {
    shared: Arc<Shared>,
    jobs: Sender<Job>,
    events: Receiver<EngineEvent>,
    next_request: AtomicU64,
    worker: Option<JoinHandle<()>>,
}

impl LogEngine {
    pub fn new() -> Self {
        let shared = Arc::new(Shared::default());
        let (job_tx, job_rx) = unbounded::<Job>();
        let (event_tx, event_rx) = unbounded::<EngineEvent>();

        let worker_shared = shared.clone();
        let worker = std::thread::Builder::new()
            .name("logmerge-engine".to_string())
            .spawn(move || run_worker(worker_shared, job_rx, event_tx))
            .expect("failed to spawn engine worker");

        Self {
            shared,
            jobs: job_tx,
            events: event_rx,
            next_request: AtomicU64::new(0),
            worker: Some(worker),
        }
    }

    /// The event stream. Events are delivered once; use a single consumer.
    pub fn events(&self) -> Receiver<EngineEvent> {
        self.events.clone()
    }

    /// Snapshot of the current manager handle.
    pub fn manager(&self) -> Option<Arc<LogManager>> {
        self.shared.manager.lock().clone()
    }

    /// Snapshot of the current session handle.
    pub fn session(&self) -> Option<Arc<Session>> {
        self.shared.session.lock().clone()
    }

    pub fn open_folders(
        &self,
        folders: Vec<PathBuf>,
        formats: Vec<Arc<Format>>,
    ) -> Result<RequestId> {
        self.submit(|request| Job::OpenFolders {
            request,
            folders,
            formats,
        })
    }

    pub fn open_file(&self, path: PathBuf, formats: Vec<Arc<Format>>) -> Result<RequestId> {
        self.submit(|request| Job::OpenFile {
            request,
            path,
            formats,
        })
    }

    pub fn open_buffer(
        &self,
        data: Vec<u8>,
        filename: String,
        formats: Vec<Arc<Format>>,
    ) -> Result<RequestId> {
        self.submit(|request| Job::OpenBuffer {
            request,
            data,
            filename,
            formats,
        })
    }

    /// Narrow the opened index into the active session. Runs on the
    /// calling thread; narrowing is cheap.
    pub fn create_session(
        &self,
        modules: impl IntoIterator<Item = String>,
        min_time: Option<Timestamp>,
        max_time: Option<Timestamp>,
    ) -> Result<()> {
        let manager = self.manager().ok_or(EngineError::NoManager)?;
        let modules: rustc_hash::FxHashSet<String> = modules.into_iter().collect();
        let session = manager.create_session(&modules, min_time, max_time);
        *self.shared.session.lock() = Some(Arc::new(session));
        Ok(())
    }

    pub fn request_iterator(&self, start: Timestamp, end: Timestamp) -> Result<RequestId> {
        let session = self.session().ok_or(EngineError::NoSession)?;
        if session.max_time().is_some_and(|max| max < start) {
            return Err(EngineError::InvalidRequest(
                "iterator range starts after the session's end".to_string(),
            ));
        }
        self.submit(|request| Job::CreateIterator {
            request,
            direction: Direction::Forward,
            start,
            end,
        })
    }

    pub fn request_reverse_iterator(&self, start: Timestamp, end: Timestamp) -> Result<RequestId> {
        let session = self.session().ok_or(EngineError::NoSession)?;
        if session.min_time().is_some_and(|min| min > end) {
            return Err(EngineError::InvalidRequest(
                "iterator range ends before the session's start".to_string(),
            ));
        }
        self.submit(|request| Job::CreateIterator {
            request,
            direction: Direction::Reverse,
            start,
            end,
        })
    }

    pub fn resume_iterator(
        &self,
        cache: MergeHeapCache,
        start: Timestamp,
        end: Timestamp,
    ) -> Result<RequestId> {
        self.session().ok_or(EngineError::NoSession)?;
        self.submit(|request| Job::ResumeIterator {
            request,
            cache,
            start,
            end,
        })
    }

    /// Queue a bulk pull. The iterator moves to the worker and comes back
    /// through [`LogEngine::take_iterator`] under the same request id once
    /// the pull completes.
    pub fn request_entries(
        &self,
        iterator: EngineIter,
        count: usize,
        until: Option<Timestamp>,
        filter: Option<LogFilter>,
    ) -> Result<RequestId> {
        if count == 0 {
            return Err(EngineError::InvalidRequest(
                "entry count must be positive".to_string(),
            ));
        }
        if !iterator.has_entries() {
            return Err(EngineError::InvalidRequest(
                "iterator is exhausted".to_string(),
            ));
        }
        self.submit(|request| Job::PullEntries {
            request,
            iterator: Box::new(iterator),
            count,
            until,
            filter,
        })
    }

    pub fn search(&self, options: SearchOptions) -> Result<RequestId> {
        if options.term.is_empty() {
            return Err(EngineError::InvalidRequest(
                "search term is empty".to_string(),
            ));
        }
        self.session().ok_or(EngineError::NoSession)?;
        self.submit(|request| Job::Search { request, options })
    }

    /// Remove and return a finished iterator.
    pub fn take_iterator(&self, request: RequestId) -> Option<EngineIter> {
        self.shared.iterators.lock().remove(&request)
    }

    /// Remove and return a pull result.
    pub fn take_result(&self, request: RequestId) -> Option<Vec<LogEntry>> {
        self.shared.results.lock().remove(&request)
    }

    /// Remove and return search hits.
    pub fn take_search_hits(&self, request: RequestId) -> Option<Vec<SearchHit>> {
        self.shared.search_hits.lock().remove(&request)
    }

    /// Flag a queued or running request for cancellation.
    pub fn cancel(&self, request: RequestId) {
        if let Some(flag) = self.shared.cancels.lock().get(&request) {
            flag.store(true, Ordering::Relaxed);
        }
    }

    fn submit(&self, build: impl FnOnce(RequestId) -> Job) -> Result<RequestId> {
        let request = self.next_request.fetch_add(1, Ordering::Relaxed);
        self.shared
            .cancels
            .lock()
            .insert(request, Arc::new(AtomicBool::new(false)));

        if self.jobs.send(build(request)).is_err() {
            self.shared.cancels.lock().remove(&request);
            return Err(EngineError::WorkerGone);
        }
        Ok(request)
    }
}

impl Default for LogEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for LogEngine {
    fn drop(&mut self) {
        let _ = self.jobs.send(Job::Shutdown);
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                error!("engine worker panicked");
            }
        }
    }
}

fn run_worker(shared: Arc<Shared>, jobs: Receiver<Job>, events: Sender<EngineEvent>) {
    for job in jobs.iter() {
        match job {
            Job::Shutdown => break,
            job => handle_job(&shared, &events, job),
        }
    }
}

fn progress(events: &Sender<EngineEvent>, message: impl Into<String>, percent: u8) {
    let _ = events.send(EngineEvent::Progress {
        message: message.into(),
        percent,
    });
}

fn failed(events: &Sender<EngineEvent>, request: RequestId, message: impl Into<String>) {
    let message = message.into();
    warn!("request {request} failed: {message}");
    let _ = events.send(EngineEvent::Failed { request, message });
}

fn handle_job(shared: &Arc<Shared>, events: &Sender<EngineEvent>, job: Job) {
    let request = match &job {
        Job::OpenFolders { request, .. }
        | Job::OpenFile { request, .. }
        | Job::OpenBuffer { request, .. }
        | Job::CreateIterator { request, .. }
        | Job::ResumeIterator { request, .. }
        | Job::PullEntries { request, .. }
        | Job::Search { request, .. } => *request,
        Job::Shutdown => return,
    };

    let cancel = shared
        .cancels
        .lock()
        .get(&request)
        .cloned()
        .unwrap_or_else(|| Arc::new(AtomicBool::new(false)));

    match job {
        Job::OpenFolders {
            request,
            folders,
            formats,
        } => {
            let source = folders
                .iter()
                .map(|f| f.display().to_string())
                .collect::<Vec<_>>()
                .join(", ");
            progress(events, format!("Opening folder {source} ..."), 0);
            match LogManager::open_folders(&folders, &formats) {
                Ok(manager) => {
                    *shared.manager.lock() = Some(Arc::new(manager));
                    let _ = events.send(EngineEvent::ManagerOpened {
                        request,
                        source: source.clone(),
                    });
                    progress(events, format!("Folder {source} opened"), 100);
                }
                Err(err) => failed(events, request, err.to_string()),
            }
        }
        Job::OpenFile {
            request,
            path,
            formats,
        } => {
            let source = path.display().to_string();
            progress(events, format!("Opening file {source} ..."), 0);
            match LogManager::open_file(&path, &formats) {
                Ok(manager) => {
                    *shared.manager.lock() = Some(Arc::new(manager));
                    let _ = events.send(EngineEvent::ManagerOpened {
                        request,
                        source: source.clone(),
                    });
                    progress(events, format!("File {source} opened"), 100);
                }
                Err(err) => failed(events, request, err.to_string()),
            }
        }
        Job::OpenBuffer {
            request,
            data,
            filename,
            formats,
        } => {
            progress(events, format!("Opening buffer {filename} ..."), 0);
            match LogManager::open_buffer(data, &filename, &formats) {
                Ok(manager) => {
                    *shared.manager.lock() = Some(Arc::new(manager));
                    let _ = events.send(EngineEvent::ManagerOpened {
                        request,
                        source: filename.clone(),
                    });
                    progress(events, format!("Buffer {filename} opened"), 100);
                }
                Err(err) => failed(events, request, err.to_string()),
            }
        }
        Job::CreateIterator {
            request,
            direction,
            start,
            end,
        } => {
            progress(events, "Creating iterator ...", 0);
            let Some(session) = shared.session.lock().clone() else {
                failed(events, request, "session is not initialized");
                return;
            };
            let built = match direction {
                Direction::Forward => session.iterator(start, end),
                Direction::Reverse => session.reverse_iterator(start, end),
            };
            match built {
                Ok(iterator) => {
                    shared
                        .iterators
                        .lock()
                        .insert(request, EngineIter::Merge(iterator));
                    let _ = events.send(EngineEvent::IteratorCreated { request, direction });
                    progress(events, "Iterator created", 100);
                }
                Err(err) => failed(events, request, err.to_string()),
            }
        }
        Job::ResumeIterator {
            request,
            cache,
            start,
            end,
        } => {
            progress(events, "Restoring iterator ...", 0);
            let Some(session) = shared.session.lock().clone() else {
                failed(events, request, "session is not initialized");
                return;
            };
            let direction = cache.direction;
            match session.resume_iterator(&cache, start, end) {
                Ok(iterator) => {
                    shared
                        .iterators
                        .lock()
                        .insert(request, EngineIter::Merge(iterator));
                    let _ = events.send(EngineEvent::IteratorCreated { request, direction });
                    progress(events, "Iterator restored", 100);
                }
                Err(err) => failed(events, request, err.to_string()),
            }
        }
        Job::PullEntries {
            request,
            iterator,
            count,
            until,
            filter,
        } => {
            pull_entries(shared, events, request, &cancel, *iterator, count, until, filter);
        }
        Job::Search { request, options } => {
            let Some(session) = shared.session.lock().clone() else {
                failed(events, request, "session is not initialized");
                return;
            };
            match search::run_search(&session, &options, &cancel, events) {
                Ok(hits) => {
                    let first_hit = hits.first().map(|hit| hit.time);
                    shared.search_hits.lock().insert(request, hits);
                    let _ = events.send(EngineEvent::SearchFinished { request, first_hit });
                }
                Err(EngineError::Cancelled) => {
                    let _ = events.send(EngineEvent::Cancelled { request });
                }
                Err(err) => failed(events, request, err.to_string()),
            }
        }
        Job::Shutdown => {}
    }

    shared.cancels.lock().remove(&request);
}

#[allow(clippy::too_many_arguments)]
fn pull_entries(
    shared: &Arc<Shared>,
    events: &Sender<EngineEvent>,
    request: RequestId,
    cancel: &AtomicBool,
    iterator: EngineIter,
    count: usize,
    until: Option<Timestamp>,
    filter: Option<LogFilter>,
) {
    progress(events, "Loading data ...", 0);

    let mut iterator = match filter {
        None => iterator,
        Some(filter) => match iterator {
            EngineIter::Merge(inner) => match FilteredIter::new(inner, filter) {
                Ok(filtered) => EngineIter::Filtered(filtered),
                Err(err) => {
                    failed(events, request, err.to_string());
                    return;
                }
            },
            EngineIter::Filtered(mut filtered) => {
                if let Err(err) = filtered.merge_filter(&filter) {
                    failed(events, request, err.to_string());
                    return;
                }
                EngineIter::Filtered(filtered)
            }
        },
    };

    let mut entries: Vec<LogEntry> = Vec::with_capacity(count);
    let mut last_percent = 0u8;

    loop {
        if cancel.load(Ordering::Relaxed) {
            // Cancelled: the partial result stays retrievable, the
            // iterator and its readers are released.
            shared.results.lock().insert(request, entries);
            let _ = events.send(EngineEvent::Cancelled { request });
            return;
        }

        if entries.len() >= count {
            break;
        }
        if let Some(until) = until {
            if !iterator.is_value_ahead(until) {
                break;
            }
        }

        match iterator.next() {
            Ok(Some(entry)) => {
                entries.push(entry);
                let percent = (100 * entries.len() / count).min(100) as u8;
                if percent != last_percent {
                    progress(events, "Loading data ...", percent);
                    last_percent = percent;
                }
            }
            Ok(None) => break,
            Err(err) => {
                shared.results.lock().insert(request, entries);
                failed(events, request, err.to_string());
                return;
            }
        }
    }

    shared.results.lock().insert(request, entries);
    shared.iterators.lock().insert(request, iterator);
    let _ = events.send(EngineEvent::DataLoaded { request });
    progress(events, "Data loaded", 100);
}

//! Linear-scan search over the ordered entry stream.
//!
//! No full-text index exists; a search walks the merge iterator from the
//! given time toward the session boundary, matching the term against each
//! entry's full text. Progress is reported proportionally to the time
//! range covered.

use crate::engine::EngineEvent;
use crate::error::{EngineError, Result};
use crossbeam_channel::Sender;
use logmerge::{LogFilter, Session, Timestamp};
use regex::Regex;
use std::sync::atomic::{AtomicBool, Ordering};

#[derive(Debug, Clone)]
pub struct SearchOptions {
    /// Scan starts here and runs toward the session boundary.
    pub from: Timestamp,
    pub term: String,
    /// Interpret `term` as a regular expression instead of a substring.
    pub regex: bool,
    /// Scan toward the session start instead of its end.
    pub backward: bool,
    /// Collect every hit instead of stopping at the first.
    pub find_all: bool,
    /// Optional entry filter applied before matching.
    pub filter: Option<LogFilter>,
}

#[derive(Debug, Clone)]
pub struct SearchHit {
    pub time: Timestamp,
    pub line: String,
}

enum Matcher {
    Substring(String),
    Pattern(Box<Regex>),
}

impl Matcher {
    fn new(options: &SearchOptions) -> Result<Self> {
        if options.regex {
            let regex = Regex::new(&options.term)
                .map_err(|e| EngineError::InvalidRequest(format!("bad search pattern: {e}")))?;
            Ok(Matcher::Pattern(Box::new(regex)))
        } else {
            Ok(Matcher::Substring(options.term.clone()))
        }
    }

    fn matches(&self, text: &str) -> bool {
        match self {
            Matcher::Substring(term) => text.contains(term.as_str()),
            Matcher::Pattern(regex) => regex.is_match(text),
        }
    }
}

pub(crate) fn run_search(
    session: &Session,
    options: &SearchOptions,
    cancel: &AtomicBool,
    events: &Sender<EngineEvent>,
) -> Result<Vec<SearchHit>> {
    let matcher = Matcher::new(options)?;

    let (start, end) = if options.backward {
        (
            session.min_time().unwrap_or(options.from),
            options.from,
        )
    } else {
        (
            options.from,
            session.max_time().unwrap_or(options.from),
        )
    };

    let report = |percent: u8| {
        let _ = events.send(EngineEvent::Progress {
            message: format!("Searching for '{}' ...", options.term),
            percent,
        });
    };
    report(0);

    let mut iterator = if options.backward {
        session.reverse_iterator(start, end)?
    } else {
        session.iterator(start, end)?
    };

    let total_ms = (end - start).num_milliseconds().max(0);
    let mut last_percent = 0u8;
    let mut hits = Vec::new();

    loop {
        if cancel.load(Ordering::Relaxed) {
            return Err(EngineError::Cancelled);
        }

        let Some(entry) = iterator.next()? else {
            break;
        };

        if total_ms > 0 {
            let covered = if options.backward {
                (end - entry.time).num_milliseconds()
            } else {
                (entry.time - start).num_milliseconds()
            };
            let percent = ((100 * covered.max(0)) / total_ms).min(100) as u8;
            if percent != last_percent {
                report(percent);
                last_percent = percent;
            }
        }

        if !matcher.matches(&entry.raw_line) {
            continue;
        }
        if let Some(filter) = &options.filter {
            if !filter.check(&entry) {
                continue;
            }
        }

        hits.push(SearchHit {
            time: entry.time,
            line: entry.raw_line,
        });
        if !options.find_all {
            break;
        }
    }

    report(100);
    Ok(hits)
}

//! Engine round trips: open, session, iterator handoff, bulk pulls,
//! filtering and search through the worker thread.

use logmerge::{Field, FieldKind, FilterMode, Format, LineShape, LogFilter};
use logmerge_engine::{EngineEvent, LogEngine, RequestId, SearchOptions};
use regex::Regex;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

fn csv_format() -> Arc<Format> {
    Arc::new(Format {
        name: "csv".to_string(),
        modules: Default::default(),
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
                values: Default::default(),
            },
            Field {
                name: "message".to_string(),
                regex: None,
                kind: FieldKind::Str,
                optional: false,
                is_enum: false,
                values: Default::default(),
            },
        ],
    })
}

fn write_log(dir: &Path, name: &str, lines: &[&str]) {
    let mut file = std::fs::File::create(dir.join(name)).unwrap();
    for line in lines {
        writeln!(file, "{line}").unwrap();
    }
}

fn wait_for<F: Fn(&EngineEvent) -> bool>(
    events: &crossbeam_channel::Receiver<EngineEvent>,
    expected: F,
) -> EngineEvent {
    let deadline = Duration::from_secs(10);
    loop {
        let event = events
            .recv_timeout(deadline)
            .expect("timed out waiting for engine event");
        if let EngineEvent::Failed { message, .. } = &event {
            panic!("request failed: {message}");
        }
        if expected(&event) {
            return event;
        }
    }
}

fn opened_engine(dir: &Path) -> LogEngine {
    let engine = LogEngine::new();
    let events = engine.events();

    engine
        .open_folders(vec![dir.to_path_buf()], vec![csv_format()])
        .unwrap();
    wait_for(&events, |e| matches!(e, EngineEvent::ManagerOpened { .. }));
    engine.create_session(Vec::new(), None, None).unwrap();
    engine
}

fn request_forward_iterator(engine: &LogEngine) -> RequestId {
    let session = engine.session().unwrap();
    let (min, max) = (session.min_time().unwrap(), session.max_time().unwrap());
    engine.request_iterator(min, max).unwrap()
}

#[test]
fn open_iterate_and_pull() {
    let dir = tempfile::tempdir().unwrap();
    write_log(
        dir.path(),
        "modA.csv",
        &[
            "2023-01-01 00:00:00.000;a0",
            "2023-01-01 00:00:02.000;a1",
            "2023-01-01 00:00:04.000;a2",
        ],
    );
    write_log(dir.path(), "modB.csv", &["2023-01-01 00:00:01.000;b0"]);

    let engine = opened_engine(dir.path());
    let events = engine.events();

    let iter_request = request_forward_iterator(&engine);
    wait_for(&events, |e| {
        matches!(e, EngineEvent::IteratorCreated { request, .. } if *request == iter_request)
    });

    let iterator = engine.take_iterator(iter_request).expect("iterator slot");

    // Pull two entries, then the rest through the returned iterator.
    let pull = engine.request_entries(iterator, 2, None, None).unwrap();
    wait_for(&events, |e| {
        matches!(e, EngineEvent::DataLoaded { request } if *request == pull)
    });

    let first = engine.take_result(pull).expect("pull result");
    let messages: Vec<String> = first
        .iter()
        .map(|e| e.field("message").unwrap().to_string())
        .collect();
    assert_eq!(messages, ["a0", "b0"]);

    let iterator = engine.take_iterator(pull).expect("iterator returns");
    let pull = engine.request_entries(iterator, 10, None, None).unwrap();
    wait_for(&events, |e| {
        matches!(e, EngineEvent::DataLoaded { request } if *request == pull)
    });

    let rest = engine.take_result(pull).unwrap();
    let messages: Vec<String> = rest
        .iter()
        .map(|e| e.field("message").unwrap().to_string())
        .collect();
    assert_eq!(messages, ["a1", "a2"]);
}

#[test]
fn filtered_pull_drops_modules() {
    let dir = tempfile::tempdir().unwrap();
    write_log(dir.path(), "modA.csv", &["2023-01-01 00:00:00.000;keep"]);
    write_log(dir.path(), "modB.csv", &["2023-01-01 00:00:01.000;drop"]);

    let engine = opened_engine(dir.path());
    let events = engine.events();

    let iter_request = request_forward_iterator(&engine);
    wait_for(&events, |e| {
        matches!(e, EngineEvent::IteratorCreated { request, .. } if *request == iter_request)
    });
    let iterator = engine.take_iterator(iter_request).unwrap();

    let filter = LogFilter::new().with_modules(["modA".to_string()], FilterMode::Whitelist);
    let pull = engine
        .request_entries(iterator, 10, None, Some(filter))
        .unwrap();
    wait_for(&events, |e| {
        matches!(e, EngineEvent::DataLoaded { request } if *request == pull)
    });

    let entries = engine.take_result(pull).unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].module, "modA");
}

#[test]
fn pull_respects_until_bound() {
    let dir = tempfile::tempdir().unwrap();
    write_log(
        dir.path(),
        "modA.csv",
        &[
            "2023-01-01 00:00:00.000;one",
            "2023-01-01 00:00:05.000;two",
            "2023-01-01 00:00:10.000;three",
        ],
    );

    let engine = opened_engine(dir.path());
    let events = engine.events();

    let iter_request = request_forward_iterator(&engine);
    wait_for(&events, |e| {
        matches!(e, EngineEvent::IteratorCreated { request, .. } if *request == iter_request)
    });
    let iterator = engine.take_iterator(iter_request).unwrap();

    let until = chrono::DateTime::parse_from_rfc3339("2023-01-01T00:00:06Z")
        .unwrap()
        .with_timezone(&chrono::Utc);
    let pull = engine.request_entries(iterator, 10, Some(until), None).unwrap();
    wait_for(&events, |e| {
        matches!(e, EngineEvent::DataLoaded { request } if *request == pull)
    });

    let entries = engine.take_result(pull).unwrap();
    let messages: Vec<String> = entries
        .iter()
        .map(|e| e.field("message").unwrap().to_string())
        .collect();
    assert_eq!(messages, ["one", "two"]);
}

#[test]
fn search_finds_first_hit_forward() {
    let dir = tempfile::tempdir().unwrap();
    write_log(
        dir.path(),
        "modA.csv",
        &[
            "2023-01-01 00:00:00.000;nothing here",
            "2023-01-01 00:00:02.000;needle in line",
            "2023-01-01 00:00:04.000;needle again",
        ],
    );

    let engine = opened_engine(dir.path());
    let events = engine.events();
    let session = engine.session().unwrap();

    let request = engine
        .search(SearchOptions {
            from: session.min_time().unwrap(),
            term: "needle".to_string(),
            regex: false,
            backward: false,
            find_all: false,
            filter: None,
        })
        .unwrap();

    let event = wait_for(&events, |e| {
        matches!(e, EngineEvent::SearchFinished { request: r, .. } if *r == request)
    });
    let EngineEvent::SearchFinished { first_hit, .. } = event else {
        unreachable!();
    };
    assert!(first_hit.is_some());

    let hits = engine.take_search_hits(request).unwrap();
    assert_eq!(hits.len(), 1);
    assert!(hits[0].line.contains("needle in line"));
}

#[test]
fn search_find_all_collects_every_hit() {
    let dir = tempfile::tempdir().unwrap();
    write_log(
        dir.path(),
        "modA.csv",
        &[
            "2023-01-01 00:00:00.000;match one",
            "2023-01-01 00:00:02.000;miss",
            "2023-01-01 00:00:04.000;match two",
        ],
    );

    let engine = opened_engine(dir.path());
    let events = engine.events();
    let session = engine.session().unwrap();

    let request = engine
        .search(SearchOptions {
            from: session.min_time().unwrap(),
            term: "^.*match".to_string(),
            regex: true,
            backward: false,
            find_all: true,
            filter: None,
        })
        .unwrap();

    wait_for(&events, |e| {
        matches!(e, EngineEvent::SearchFinished { request: r, .. } if *r == request)
    });

    let hits = engine.take_search_hits(request).unwrap();
    assert_eq!(hits.len(), 2);
}

#[test]
fn resume_through_engine() {
    let dir = tempfile::tempdir().unwrap();
    write_log(
        dir.path(),
        "modA.csv",
        &[
            "2023-01-01 00:00:00.000;first",
            "2023-01-01 00:00:02.000;second",
            "2023-01-01 00:00:04.000;third",
        ],
    );

    let engine = opened_engine(dir.path());
    let events = engine.events();
    let session = engine.session().unwrap();
    let (min, max) = (session.min_time().unwrap(), session.max_time().unwrap());

    let iter_request = engine.request_iterator(min, max).unwrap();
    wait_for(&events, |e| {
        matches!(e, EngineEvent::IteratorCreated { request, .. } if *request == iter_request)
    });
    let mut iterator = engine.take_iterator(iter_request).unwrap();

    iterator.next().unwrap();
    let cache = iterator.snapshot();
    drop(iterator);

    let resume_request = engine.resume_iterator(cache, min, max).unwrap();
    wait_for(&events, |e| {
        matches!(e, EngineEvent::IteratorCreated { request, .. } if *request == resume_request)
    });
    let mut resumed = engine.take_iterator(resume_request).unwrap();

    let entry = resumed.next().unwrap().unwrap();
    assert_eq!(entry.field("message").unwrap().to_string(), "second");
}

#[test]
fn invalid_requests_are_rejected_up_front() {
    let engine = LogEngine::new();
    assert!(engine.create_session(Vec::new(), None, None).is_err());

    let now = chrono::Utc::now();
    assert!(engine.request_iterator(now, now).is_err());
    assert!(
        engine
            .search(SearchOptions {
                from: now,
                term: String::new(),
                regex: false,
                backward: false,
                find_all: false,
                filter: None,
            })
            .is_err()
    );
}

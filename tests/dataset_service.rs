use std::collections::VecDeque;
use std::fs;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use coronainfo::{
    CoronaConfig, DatasetError, DatasetEvent, DatasetService, ErrorKind, FetchError, PageFetcher,
    RetryPolicy, ServiceState,
};
use tempfile::{tempdir, TempDir};

const SOURCE_URL: &str = "https://stats.example.test/coronavirus/";

enum Step {
    Page(String),
    ConnectionFailure,
    Status(u16),
}

struct ScriptedInner {
    steps: Mutex<VecDeque<Step>>,
    fallback_page: String,
    calls: AtomicUsize,
    gate: Mutex<Option<(Sender<()>, Receiver<()>)>>,
}

/// Serves scripted responses, then the fixture page. The optional gate parks
/// the first request until the test releases it.
#[derive(Clone)]
struct ScriptedFetcher {
    inner: Arc<ScriptedInner>,
}

impl ScriptedFetcher {
    fn new(steps: Vec<Step>) -> Self {
        Self {
            inner: Arc::new(ScriptedInner {
                steps: Mutex::new(steps.into()),
                fallback_page: fixture_page(),
                calls: AtomicUsize::new(0),
                gate: Mutex::new(None),
            }),
        }
    }

    fn gated() -> (Self, Receiver<()>, Sender<()>) {
        let fetcher = Self::new(Vec::new());
        let (entered_tx, entered_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel();
        *fetcher.inner.gate.lock().unwrap() = Some((entered_tx, release_rx));
        (fetcher, entered_rx, release_tx)
    }

    fn calls(&self) -> usize {
        self.inner.calls.load(Ordering::SeqCst)
    }
}

impl PageFetcher for ScriptedFetcher {
    fn get_text(&self, url: &str) -> Result<String, FetchError> {
        assert_eq!(url, SOURCE_URL);
        self.inner.calls.fetch_add(1, Ordering::SeqCst);

        let gate = self.inner.gate.lock().unwrap().take();
        if let Some((entered, release)) = gate {
            entered.send(()).unwrap();
            release
                .recv_timeout(Duration::from_secs(10))
                .expect("test should release the gated fetch");
        }

        match self.inner.steps.lock().unwrap().pop_front() {
            Some(Step::Page(body)) => Ok(body),
            Some(Step::ConnectionFailure) => Err(FetchError::Connection {
                url: url.to_string(),
                message: "connection refused".to_string(),
            }),
            Some(Step::Status(status)) => Err(FetchError::Response {
                url: url.to_string(),
                status,
            }),
            None => Ok(self.inner.fallback_page.clone()),
        }
    }
}

fn fixture_page() -> String {
    fs::read_to_string("tests/fixtures/today_page.html").expect("fixture should exist")
}

fn test_config(temp: &TempDir, max_retries: u32) -> CoronaConfig {
    CoronaConfig {
        source_url: SOURCE_URL.to_string(),
        retry: RetryPolicy {
            max_retries,
            backoff_ms: 1,
            max_backoff_ms: 4,
        },
        ..CoronaConfig::rooted_at(temp.path())
    }
}

fn service_with(temp: &TempDir, max_retries: u32, fetcher: &ScriptedFetcher) -> DatasetService {
    DatasetService::with_fetcher(test_config(temp, max_retries), Box::new(fetcher.clone()))
}

fn drain(rx: &Receiver<DatasetEvent>) -> Vec<DatasetEvent> {
    rx.try_iter().collect()
}

#[test]
fn cached_dataset_is_served_without_a_second_network_call() {
    let temp = tempdir().unwrap();
    let fetcher = ScriptedFetcher::new(Vec::new());
    let service = service_with(&temp, 0, &fetcher);

    let first = service.get_dataset(false).expect("first call fetches");
    assert_eq!(fetcher.calls(), 1);
    assert_eq!(first.records.len(), 4);
    assert!(!first.last_fetched.is_empty());

    let second = service.get_dataset(false).expect("second call reads the cache");
    assert_eq!(fetcher.calls(), 1);
    assert_eq!(first, second);
    assert_eq!(service.current(), Some(second));
    assert_eq!(service.state(), ServiceState::Ready);
    assert_eq!(
        service.cache().load_settings().last_fetched,
        first.last_fetched
    );
}

#[test]
fn force_refresh_bypasses_the_cache() {
    let temp = tempdir().unwrap();
    let fetcher = ScriptedFetcher::new(Vec::new());
    let service = service_with(&temp, 0, &fetcher);

    service.get_dataset(false).unwrap();
    service.get_dataset(true).unwrap();

    assert_eq!(fetcher.calls(), 2);
}

#[test]
fn corrupt_cache_is_treated_as_a_miss() {
    let temp = tempdir().unwrap();
    let fetcher = ScriptedFetcher::new(Vec::new());
    let service = service_with(&temp, 0, &fetcher);
    fs::write(service.cache().cache_path(), b"{\"records\": [1, 2").unwrap();

    let dataset = service.get_dataset(false).expect("corrupt cache triggers a fetch");

    assert_eq!(fetcher.calls(), 1);
    assert_eq!(service.cache().load().unwrap(), dataset);
}

#[test]
fn missing_table_leaves_existing_cache_untouched() {
    let temp = tempdir().unwrap();
    let fetcher = ScriptedFetcher::new(vec![
        Step::Page(fixture_page()),
        Step::Page("<html><body><h1>We'll be back soon</h1></body></html>".to_string()),
    ]);
    let service = service_with(&temp, 3, &fetcher);

    let original = service.get_dataset(true).unwrap();
    let cache_bytes = fs::read(service.cache().cache_path()).unwrap();
    let settings_bytes = fs::read(service.cache().settings_path()).unwrap();
    let events = service.subscribe();

    let err = service.get_dataset(true).unwrap_err();

    assert_eq!(err.kind(), ErrorKind::StructureError);
    assert_eq!(fetcher.calls(), 2, "structure errors are not retried");
    assert_eq!(fs::read(service.cache().cache_path()).unwrap(), cache_bytes);
    assert_eq!(
        fs::read(service.cache().settings_path()).unwrap(),
        settings_bytes
    );
    assert_eq!(service.state(), ServiceState::Errored);
    assert_eq!(service.current(), Some(original));

    let events = drain(&events);
    assert_eq!(events.len(), 2);
    assert_eq!(
        events[0],
        DatasetEvent::Started {
            force_refresh: true
        }
    );
    assert!(matches!(
        events[1],
        DatasetEvent::Error {
            kind: ErrorKind::StructureError,
            retrying: false,
            ..
        }
    ));
}

#[test]
fn malformed_rows_leave_existing_cache_untouched() {
    let temp = tempdir().unwrap();
    let broken_page = fixture_page().replace(
        "<td>3</td><td><a class=\"mt_a\" href=\"country/france/\">France</a></td>",
        "<td>3</td>",
    );
    assert_ne!(broken_page, fixture_page());
    let fetcher = ScriptedFetcher::new(vec![Step::Page(fixture_page()), Step::Page(broken_page)]);
    let service = service_with(&temp, 3, &fetcher);

    service.get_dataset(true).unwrap();
    let cache_bytes = fs::read(service.cache().cache_path()).unwrap();

    let err = service.get_dataset(true).unwrap_err();

    assert_eq!(err.kind(), ErrorKind::ParseError);
    assert!(matches!(err, DatasetError::Parse(_)));
    assert_eq!(fetcher.calls(), 2);
    assert_eq!(fs::read(service.cache().cache_path()).unwrap(), cache_bytes);
}

#[test]
fn unwritable_settings_do_not_fail_a_saved_refresh() {
    let temp = tempdir().unwrap();
    let blocked = temp.path().join("settings-blocked");
    fs::write(&blocked, b"not a directory").unwrap();
    let config = CoronaConfig {
        settings_dir: blocked,
        ..test_config(&temp, 0)
    };
    let fetcher = ScriptedFetcher::new(Vec::new());
    let service = DatasetService::with_fetcher(config, Box::new(fetcher.clone()));

    let dataset = service
        .get_dataset(true)
        .expect("settings failure should not fail the refresh");

    assert_eq!(service.cache().load().unwrap(), dataset);
    assert_eq!(service.current(), Some(dataset));
    assert_eq!(service.state(), ServiceState::Ready);
    assert_eq!(service.cache().load_settings().last_fetched, "");
}

#[test]
fn transient_failures_are_retried_with_events() {
    let temp = tempdir().unwrap();
    let fetcher = ScriptedFetcher::new(vec![Step::ConnectionFailure, Step::Status(503)]);
    let service = service_with(&temp, 3, &fetcher);
    let events = service.subscribe();

    let dataset = service.get_dataset(true).expect("third attempt succeeds");

    assert_eq!(fetcher.calls(), 3);
    let events = drain(&events);
    assert_eq!(events.len(), 4);
    assert!(matches!(
        events[1],
        DatasetEvent::Error {
            kind: ErrorKind::ConnectionFailure,
            retrying: true,
            ..
        }
    ));
    assert!(matches!(
        events[2],
        DatasetEvent::Error {
            kind: ErrorKind::ResponseFailure,
            retrying: true,
            ..
        }
    ));
    assert_eq!(events[3], DatasetEvent::Finished(dataset));
}

#[test]
fn retries_stop_after_the_configured_bound() {
    let temp = tempdir().unwrap();
    let fetcher = ScriptedFetcher::new(vec![
        Step::Status(503),
        Step::Status(503),
        Step::Status(503),
    ]);
    let service = service_with(&temp, 2, &fetcher);

    let err = service.get_dataset(true).unwrap_err();

    assert_eq!(err.kind(), ErrorKind::ResponseFailure);
    assert_eq!(fetcher.calls(), 3);
    assert!(!service.cache().has_cache());
    assert_eq!(service.state(), ServiceState::Errored);

    // Not sticky: an explicit new call runs the pipeline again.
    service.get_dataset(true).expect("fallback page parses");
    assert_eq!(fetcher.calls(), 4);
}

#[test]
fn refresh_while_in_flight_is_rejected_and_cache_written_once() {
    let temp = tempdir().unwrap();
    let (fetcher, entered, release) = ScriptedFetcher::gated();
    let service = service_with(&temp, 0, &fetcher);

    let worker = service.spawn_refresh(true).expect("first refresh is accepted");
    entered
        .recv_timeout(Duration::from_secs(5))
        .expect("worker should reach the network");

    assert!(service.is_refreshing());
    assert_eq!(service.state(), ServiceState::Fetching);
    assert!(matches!(
        service.get_dataset(true),
        Err(DatasetError::RefreshInProgress)
    ));
    assert!(matches!(
        service.clone().spawn_refresh(false),
        Err(DatasetError::RefreshInProgress)
    ));

    release.send(()).unwrap();
    let dataset = worker
        .join()
        .expect("worker should not panic")
        .expect("refresh should succeed");

    assert_eq!(fetcher.calls(), 1);
    assert!(!service.is_refreshing());
    assert_eq!(service.cache().load().unwrap(), dataset);
}

#[test]
fn background_refresh_reports_through_subscribers() {
    let temp = tempdir().unwrap();
    let fetcher = ScriptedFetcher::new(Vec::new());
    let service = service_with(&temp, 0, &fetcher);
    let events = service.subscribe();

    let dataset = service
        .spawn_refresh(false)
        .unwrap()
        .join()
        .unwrap()
        .unwrap();

    let received: Vec<DatasetEvent> = events.try_iter().collect();
    assert_eq!(
        received,
        vec![
            DatasetEvent::Started {
                force_refresh: false
            },
            DatasetEvent::Finished(dataset),
        ]
    );
}

#[test]
fn auto_refresh_runs_periodically_until_stopped() {
    let temp = tempdir().unwrap();
    let fetcher = ScriptedFetcher::new(Vec::new());
    let service = service_with(&temp, 0, &fetcher);

    let handle = service.spawn_auto_refresh(Duration::from_millis(20));
    let deadline = Instant::now() + Duration::from_secs(5);
    while fetcher.calls() < 2 && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(5));
    }
    handle.stop();

    let calls = fetcher.calls();
    assert!(calls >= 2, "expected at least two periodic fetches, got {calls}");
    thread::sleep(Duration::from_millis(80));
    assert_eq!(fetcher.calls(), calls);
    assert!(service.cache().has_cache());
}

#[test]
fn save_to_copies_the_cache_file() {
    let temp = tempdir().unwrap();
    let fetcher = ScriptedFetcher::new(Vec::new());
    let service = service_with(&temp, 0, &fetcher);
    let dest = temp.path().join("exports").join("today.json");

    assert!(service.save_to(&dest).is_err());
    service.get_dataset(false).unwrap();
    service.save_to(&dest).unwrap();

    assert_eq!(
        fs::read(&dest).unwrap(),
        fs::read(service.cache().cache_path()).unwrap()
    );
}

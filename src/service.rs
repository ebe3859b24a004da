//! Dataset orchestration: cache check, fetch with bounded retry, parse, persist.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Condvar, Mutex, RwLock};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use chrono::{SecondsFormat, Utc};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::cache::{CacheError, CacheStore};
use crate::config::CoronaConfig;
use crate::fetch::{fetch_today_table, FetchError, PageFetcher, ReqwestBlockingFetcher};
use crate::record::Dataset;
use crate::table::{parse_rows_with, ParseError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceState {
    Idle,
    Fetching,
    Parsing,
    Caching,
    Ready,
    Errored,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    ConnectionFailure,
    ResponseFailure,
    StructureError,
    ParseError,
    CacheCorruptError,
    CacheIo,
    ClientSetup,
    RefreshInProgress,
}

impl ErrorKind {
    // Shown until the next refresh rather than as a transient notice.
    pub fn is_persistent(self) -> bool {
        matches!(
            self,
            Self::StructureError | Self::ParseError | Self::CacheIo | Self::ClientSetup
        )
    }
}

#[derive(Debug, Error)]
pub enum DatasetError {
    #[error("a dataset refresh is already in progress")]
    RefreshInProgress,
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("source table could not be parsed: {0}")]
    Parse(#[from] ParseError),
    #[error("dataset could not be cached: {0}")]
    Cache(#[from] CacheError),
}

impl DatasetError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::RefreshInProgress => ErrorKind::RefreshInProgress,
            Self::Fetch(err) => fetch_error_kind(err),
            Self::Parse(_) => ErrorKind::ParseError,
            Self::Cache(CacheError::Corrupt { .. }) => ErrorKind::CacheCorruptError,
            Self::Cache(_) => ErrorKind::CacheIo,
        }
    }
}

fn fetch_error_kind(err: &FetchError) -> ErrorKind {
    match err {
        FetchError::Connection { .. } => ErrorKind::ConnectionFailure,
        FetchError::HttpClientBuild(_) => ErrorKind::ClientSetup,
        FetchError::Response { .. } => ErrorKind::ResponseFailure,
        FetchError::Structure(_) => ErrorKind::StructureError,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatasetEvent {
    Started {
        force_refresh: bool,
    },
    Finished(Dataset),
    Error {
        kind: ErrorKind,
        message: String,
        retrying: bool,
    },
}

struct ServiceInner {
    config: CoronaConfig,
    cache: CacheStore,
    fetcher: Box<dyn PageFetcher>,
    in_flight: AtomicBool,
    state: Mutex<ServiceState>,
    current: RwLock<Option<Dataset>>,
    subscribers: Mutex<Vec<Sender<DatasetEvent>>>,
}

/// Clones share one in-flight flag: while a refresh runs, every other
/// request is rejected with [`DatasetError::RefreshInProgress`].
#[derive(Clone)]
pub struct DatasetService {
    inner: Arc<ServiceInner>,
}

struct InFlightGuard {
    inner: Arc<ServiceInner>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.inner.in_flight.store(false, Ordering::Release);
    }
}

impl DatasetService {
    pub fn new(config: CoronaConfig) -> Result<Self, FetchError> {
        let fetcher = ReqwestBlockingFetcher::new(config.http_timeout_ms, &config.user_agent)?;
        Ok(Self::with_fetcher(config, Box::new(fetcher)))
    }

    pub fn with_fetcher(config: CoronaConfig, fetcher: Box<dyn PageFetcher>) -> Self {
        let cache = CacheStore::new(&config);
        Self {
            inner: Arc::new(ServiceInner {
                config,
                cache,
                fetcher,
                in_flight: AtomicBool::new(false),
                state: Mutex::new(ServiceState::Idle),
                current: RwLock::new(None),
                subscribers: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn config(&self) -> &CoronaConfig {
        &self.inner.config
    }

    pub fn cache(&self) -> &CacheStore {
        &self.inner.cache
    }

    pub fn state(&self) -> ServiceState {
        *self
            .inner
            .state
            .lock()
            .expect("service state lock should not be poisoned")
    }

    pub fn is_refreshing(&self) -> bool {
        self.inner.in_flight.load(Ordering::Acquire)
    }

    pub fn current(&self) -> Option<Dataset> {
        self.inner
            .current
            .read()
            .expect("current dataset lock should not be poisoned")
            .clone()
    }

    pub fn subscribe(&self) -> Receiver<DatasetEvent> {
        let (tx, rx) = mpsc::channel();
        self.inner
            .subscribers
            .lock()
            .expect("subscriber lock should not be poisoned")
            .push(tx);
        rx
    }

    pub fn get_dataset(&self, force_refresh: bool) -> Result<Dataset, DatasetError> {
        let guard = self.try_begin()?;
        self.run(force_refresh, guard)
    }

    // The flag is taken here, so a concurrent request fails on the caller's thread.
    pub fn spawn_refresh(
        &self,
        force_refresh: bool,
    ) -> Result<JoinHandle<Result<Dataset, DatasetError>>, DatasetError> {
        let guard = self.try_begin()?;
        let service = self.clone();
        Ok(thread::spawn(move || service.run(force_refresh, guard)))
    }

    pub fn spawn_auto_refresh(&self, interval: Duration) -> AutoRefreshHandle {
        AutoRefreshHandle::spawn(self.clone(), interval)
    }

    pub fn save_to(&self, dest: &Path) -> Result<u64, CacheError> {
        self.inner.cache.export_to(dest)
    }

    fn try_begin(&self) -> Result<InFlightGuard, DatasetError> {
        if self
            .inner
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            warn!(component = "service", event = "dataset.refresh.rejected");
            return Err(DatasetError::RefreshInProgress);
        }

        Ok(InFlightGuard {
            inner: Arc::clone(&self.inner),
        })
    }

    fn run(&self, force_refresh: bool, _guard: InFlightGuard) -> Result<Dataset, DatasetError> {
        info!(
            component = "service",
            event = "dataset.refresh.start",
            force_refresh
        );
        self.emit(DatasetEvent::Started { force_refresh });

        match self.acquire(force_refresh) {
            Ok(dataset) => {
                *self
                    .inner
                    .current
                    .write()
                    .expect("current dataset lock should not be poisoned") = Some(dataset.clone());
                self.set_state(ServiceState::Ready);
                info!(
                    component = "service",
                    event = "dataset.refresh.finish",
                    rows = dataset.records.len(),
                    last_fetched = %dataset.last_fetched
                );
                self.emit(DatasetEvent::Finished(dataset.clone()));
                Ok(dataset)
            }
            Err(err) => {
                self.set_state(ServiceState::Errored);
                let kind = err.kind();
                error!(
                    component = "service",
                    event = "dataset.refresh.error",
                    kind = ?kind,
                    error = %err
                );
                self.emit(DatasetEvent::Error {
                    kind,
                    message: err.to_string(),
                    retrying: false,
                });
                Err(err)
            }
        }
    }

    fn acquire(&self, force_refresh: bool) -> Result<Dataset, DatasetError> {
        let cache = &self.inner.cache;

        if !force_refresh {
            match cache.load() {
                Ok(dataset) => {
                    info!(
                        component = "service",
                        event = "cache.load.hit",
                        path = %cache.cache_path().display(),
                        rows = dataset.records.len()
                    );
                    return Ok(dataset);
                }
                Err(CacheError::Missing { .. }) => {
                    debug!(component = "service", event = "cache.load.miss");
                }
                Err(err) => {
                    warn!(
                        component = "service",
                        event = "cache.load.corrupt",
                        path = %cache.cache_path().display(),
                        error = %err
                    );
                }
            }
        }

        self.set_state(ServiceState::Fetching);
        let fragment = self.fetch_with_retry()?;

        self.set_state(ServiceState::Parsing);
        let records = parse_rows_with(&fragment, &self.inner.config.layout)?;

        self.set_state(ServiceState::Caching);
        let fetched_at = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);
        let dataset = Dataset::new(records, fetched_at);
        cache.save(&dataset)?;
        if let Err(err) = cache.record_fetch_time(&dataset.last_fetched) {
            // The dataset file carries its own timestamp; settings only mirror it.
            warn!(
                component = "service",
                event = "cache.settings.failed",
                path = %cache.settings_path().display(),
                error = %err
            );
        }

        Ok(dataset)
    }

    fn fetch_with_retry(&self) -> Result<String, DatasetError> {
        let config = &self.inner.config;
        let policy = config.retry;
        let mut attempt: u32 = 0;

        loop {
            match fetch_today_table(self.inner.fetcher.as_ref(), &config.source_url) {
                Ok(fragment) => return Ok(fragment),
                Err(err) if err.is_transient() && attempt < policy.max_retries => {
                    attempt = attempt.saturating_add(1);
                    let delay = policy.backoff(attempt);
                    warn!(
                        component = "service",
                        event = "dataset.fetch.retry",
                        attempt,
                        max_retries = policy.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %err
                    );
                    self.emit(DatasetEvent::Error {
                        kind: fetch_error_kind(&err),
                        message: err.to_string(),
                        retrying: true,
                    });
                    thread::sleep(delay);
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    fn set_state(&self, next: ServiceState) {
        let mut state = self
            .inner
            .state
            .lock()
            .expect("service state lock should not be poisoned");
        let previous = *state;
        debug!(
            component = "service",
            event = "dataset.state",
            from = ?previous,
            to = ?next
        );
        *state = next;
    }

    fn emit(&self, event: DatasetEvent) {
        self.inner
            .subscribers
            .lock()
            .expect("subscriber lock should not be poisoned")
            .retain(|tx| tx.send(event.clone()).is_ok());
    }
}

/// Stopping or dropping the handle ends the worker between cycles; a cycle
/// already running completes first.
pub struct AutoRefreshHandle {
    stop: Arc<(Mutex<bool>, Condvar)>,
    worker: Option<JoinHandle<()>>,
}

impl AutoRefreshHandle {
    fn spawn(service: DatasetService, interval: Duration) -> Self {
        let stop = Arc::new((Mutex::new(false), Condvar::new()));
        let worker_stop = Arc::clone(&stop);

        let worker = thread::spawn(move || loop {
            let (lock, cvar) = &*worker_stop;
            let stopped = lock.lock().expect("stop flag lock should not be poisoned");
            let (stopped, _) = cvar
                .wait_timeout_while(stopped, interval, |stopped| !*stopped)
                .expect("stop flag lock should not be poisoned");
            if *stopped {
                break;
            }
            drop(stopped);

            match service.get_dataset(true) {
                Ok(_) => {}
                Err(DatasetError::RefreshInProgress) => {
                    warn!(
                        component = "service",
                        event = "dataset.auto_refresh.skipped",
                        interval_ms = interval.as_millis() as u64
                    );
                }
                Err(err) => {
                    debug!(
                        component = "service",
                        event = "dataset.auto_refresh.failed",
                        error = %err
                    );
                }
            }
        });

        Self {
            stop,
            worker: Some(worker),
        }
    }

    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        let (lock, cvar) = &*self.stop;
        *lock.lock().expect("stop flag lock should not be poisoned") = true;
        cvar.notify_all();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

impl Drop for AutoRefreshHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

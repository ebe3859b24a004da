//! Corona Info data pipeline.
//!
//! Fetches the "today" table of the public COVID-19 statistics page, turns
//! its rows into typed records, caches them as JSON and serves cached or
//! fresh data to a display layer:
//! - `sanitize`: raw cell text to integers / absent markers
//! - `table`: table body rows to `CountryRecord`s
//! - `fetch`: one HTTP GET, reduced to the table body fragment
//! - `cache`: atomic JSON cache plus a separate fetch-time settings file
//! - `service`: single-flight orchestration with bounded retry and events

mod cache;
mod config;
mod display;
mod fetch;
mod observability;
mod record;
mod sanitize;
mod service;
mod table;

pub use cache::{AppSettings, CacheError, CacheStore, CACHE_FILE_NAME, SETTINGS_FILE_NAME};
pub use config::{
    config_from_env, default_cache_dir, default_settings_dir, CoronaConfig, RetryPolicy,
    APP_NAME, APP_VERSION, DEFAULT_SOURCE_URL,
};
pub use display::{
    cell_text_values, filter_by_country, last_fetched_label, sort_records, TABLE_HEADERS,
};
pub use fetch::{
    extract_today_fragment, fetch_today_table, FetchError, PageFetcher, ReqwestBlockingFetcher,
    TODAY_TABLE_ID,
};
pub use observability::{
    init_logging, log_app_start, log_paths_selected, LogFormat, LoggingConfig, LoggingInitError,
};
pub use record::{CountryRecord, Dataset};
pub use sanitize::{
    sanitize, sanitize_with, CellValue, Column, SignPolicy, COLUMN_COUNT, NOT_AVAILABLE,
};
pub use service::{
    AutoRefreshHandle, DatasetError, DatasetEvent, DatasetService, ErrorKind, ServiceState,
};
pub use table::{parse_rows, parse_rows_with, ParseError, TableLayout, LEADING_ROWS_SKIPPED};

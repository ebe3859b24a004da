//! Logging setup for the command-line binary.

use std::env;

use thiserror::Error;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::config::{CoronaConfig, APP_VERSION};

const LOG_FILTER_VAR: &str = "CORONAINFO_LOG";
const LOG_FORMAT_VAR: &str = "CORONAINFO_LOG_FORMAT";
const DEFAULT_FILTER: &str = "coronainfo=info";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Compact,
}

impl LogFormat {
    fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "json" => Some(Self::Json),
            "compact" | "text" => Some(Self::Compact),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingConfig {
    pub filter: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: DEFAULT_FILTER.to_string(),
            format: LogFormat::Compact,
        }
    }
}

impl LoggingConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(filter) = lookup(LOG_FILTER_VAR)
            .map(|raw| raw.trim().to_string())
            .filter(|raw| !raw.is_empty())
        {
            config.filter = filter;
        }
        if let Some(format) = lookup(LOG_FORMAT_VAR).as_deref().and_then(LogFormat::parse) {
            config.format = format;
        }

        config
    }
}

#[derive(Debug, Error)]
pub enum LoggingInitError {
    #[error("logging already initialized: {0}")]
    AlreadyInitialized(#[from] tracing::subscriber::SetGlobalDefaultError),
}

// Logs go to stderr so the table on stdout stays pipeable.
pub fn init_logging(config: &LoggingConfig) -> Result<(), LoggingInitError> {
    let env_filter =
        EnvFilter::try_new(&config.filter).unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr);

    match config.format {
        LogFormat::Json => tracing::subscriber::set_global_default(builder.json().finish())?,
        LogFormat::Compact => {
            tracing::subscriber::set_global_default(builder.compact().with_target(false).finish())?
        }
    }

    Ok(())
}

pub fn log_app_start(config: &LoggingConfig) {
    info!(
        component = "app",
        event = "app.start",
        version = APP_VERSION,
        log_filter = %config.filter,
        log_format = ?config.format
    );
}

pub fn log_paths_selected(config: &CoronaConfig) {
    info!(
        component = "app",
        event = "paths.selected",
        source_url = %config.source_url,
        cache_dir = %config.cache_dir.display(),
        settings_dir = %config.settings_dir.display(),
        max_retries = config.retry.max_retries
    );
}

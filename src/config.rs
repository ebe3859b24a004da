//! Explicit pipeline configuration, built once and handed to each component.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::sanitize::SignPolicy;
use crate::table::TableLayout;

pub const DEFAULT_SOURCE_URL: &str = "https://www.worldometers.info/coronavirus/";
pub const APP_DIR_NAME: &str = "coronainfo";
pub const APP_NAME: &str = "Corona Info";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Extra attempts after the first transient failure.
    pub max_retries: u32,
    pub backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff_ms: 500,
            max_backoff_ms: 8_000,
        }
    }
}

impl RetryPolicy {
    /// Sleep before retry `attempt` (1-based): doubling, capped.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(16);
        let factor = 1u64 << shift;
        let sleep_ms = self
            .backoff_ms
            .saturating_mul(factor)
            .min(self.max_backoff_ms);
        Duration::from_millis(sleep_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoronaConfig {
    pub source_url: String,
    pub cache_dir: PathBuf,
    pub settings_dir: PathBuf,
    pub http_timeout_ms: u64,
    pub user_agent: String,
    pub retry: RetryPolicy,
    pub layout: TableLayout,
}

impl Default for CoronaConfig {
    fn default() -> Self {
        Self {
            source_url: DEFAULT_SOURCE_URL.to_string(),
            cache_dir: default_cache_dir(),
            settings_dir: default_settings_dir(),
            http_timeout_ms: 15_000,
            user_agent: format!("{APP_DIR_NAME}/{APP_VERSION}"),
            retry: RetryPolicy::default(),
            layout: TableLayout::default(),
        }
    }
}

impl CoronaConfig {
    pub fn rooted_at(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        Self {
            cache_dir: dir.clone(),
            settings_dir: dir,
            ..Self::default()
        }
    }
}

pub fn default_cache_dir() -> PathBuf {
    dirs::cache_dir()
        .map(|dir| dir.join(APP_DIR_NAME))
        .unwrap_or_else(fallback_dir)
}

pub fn default_settings_dir() -> PathBuf {
    dirs::config_dir()
        .map(|dir| dir.join(APP_DIR_NAME))
        .unwrap_or_else(fallback_dir)
}

fn fallback_dir() -> PathBuf {
    PathBuf::from(format!(".{APP_DIR_NAME}"))
}

pub fn config_from_env() -> CoronaConfig {
    let mut config = CoronaConfig::default();

    if let Some(url) = non_empty_var("CORONAINFO_SOURCE_URL") {
        config.source_url = url;
    }
    if let Some(dir) = non_empty_var("CORONAINFO_CACHE_DIR") {
        config.cache_dir = PathBuf::from(dir);
    }
    if let Some(dir) = non_empty_var("CORONAINFO_SETTINGS_DIR") {
        config.settings_dir = PathBuf::from(dir);
    }
    if let Some(timeout) = parsed_var("CORONAINFO_HTTP_TIMEOUT_MS") {
        config.http_timeout_ms = timeout;
    }
    if let Some(retries) = parsed_var("CORONAINFO_MAX_RETRIES") {
        config.retry.max_retries = retries;
    }
    if let Some(backoff) = parsed_var("CORONAINFO_RETRY_BACKOFF_MS") {
        config.retry.backoff_ms = backoff;
    }
    if let Some(policy) =
        non_empty_var("CORONAINFO_SIGN_POLICY").and_then(|raw| parse_sign_policy(&raw))
    {
        config.layout.sign_policy = policy;
    }

    config
}

fn non_empty_var(key: &str) -> Option<String> {
    let value = env::var(key).ok()?;
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn parsed_var<T: std::str::FromStr>(key: &str) -> Option<T> {
    non_empty_var(key)?.parse().ok()
}

fn parse_sign_policy(raw: &str) -> Option<SignPolicy> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "preserve" | "keep" => Some(SignPolicy::Preserve),
        "strip" | "magnitude" => Some(SignPolicy::Strip),
        _ => None,
    }
}

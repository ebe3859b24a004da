//! Retrieval of the "today" statistics table from the source page.

use std::time::Duration;

use scraper::{Html, Selector};
use thiserror::Error;
use tracing::{debug, info, warn};

pub const TODAY_TABLE_ID: &str = "main_table_countries_today";

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("HTTP client build error: {0}")]
    HttpClientBuild(String),
    #[error("connection to {url} failed: {message}")]
    Connection { url: String, message: String },
    #[error("{url} answered with HTTP status {status}")]
    Response { url: String, status: u16 },
    #[error("source page structure changed: {0}")]
    Structure(String),
}

impl FetchError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Connection { .. } | Self::Response { .. })
    }
}

pub trait PageFetcher: Send + Sync {
    fn get_text(&self, url: &str) -> Result<String, FetchError>;
}

pub struct ReqwestBlockingFetcher {
    client: reqwest::blocking::Client,
}

impl ReqwestBlockingFetcher {
    pub fn new(timeout_ms: u64, user_agent: &str) -> Result<Self, FetchError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_millis(timeout_ms))
            .user_agent(user_agent)
            .build()
            .map_err(|err| FetchError::HttpClientBuild(err.to_string()))?;
        Ok(Self { client })
    }
}

impl PageFetcher for ReqwestBlockingFetcher {
    fn get_text(&self, url: &str) -> Result<String, FetchError> {
        let response = self
            .client
            .get(url)
            .send()
            .map_err(|err| FetchError::Connection {
                url: url.to_string(),
                message: err.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Response {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        response.text().map_err(|err| FetchError::Connection {
            url: url.to_string(),
            message: err.to_string(),
        })
    }
}

/// One GET of the source page, reduced to the today table's body markup.
/// Never retries; that policy belongs to the caller.
pub fn fetch_today_table(fetcher: &dyn PageFetcher, url: &str) -> Result<String, FetchError> {
    info!(component = "fetch", event = "fetch.request.start", url);

    let page = fetcher.get_text(url).map_err(|err| {
        warn!(
            component = "fetch",
            event = "fetch.request.failed",
            url,
            transient = err.is_transient(),
            error = %err
        );
        err
    })?;

    debug!(
        component = "fetch",
        event = "fetch.request.finish",
        url,
        bytes = page.len()
    );

    extract_today_fragment(&page).map_err(|err| {
        warn!(
            component = "fetch",
            event = "fetch.structure.missing",
            url,
            error = %err
        );
        err
    })
}

pub fn extract_today_fragment(page: &str) -> Result<String, FetchError> {
    let document = Html::parse_document(page);
    let table_selector = Selector::parse(&format!("table#{TODAY_TABLE_ID}"))
        .expect("static table selector should parse");
    let body_selector = Selector::parse("tbody").expect("static body selector should parse");

    let table = document
        .select(&table_selector)
        .next()
        .ok_or_else(|| FetchError::Structure(format!("no table with id '{TODAY_TABLE_ID}'")))?;
    let body = table
        .select(&body_selector)
        .next()
        .ok_or_else(|| FetchError::Structure(format!("table '{TODAY_TABLE_ID}' has no body")))?;

    Ok(body.html())
}

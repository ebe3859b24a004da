//! On-disk persistence of the last good dataset and the fetch-time settings.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::CoronaConfig;
use crate::record::{CountryRecord, Dataset};

pub const CACHE_FILE_NAME: &str = "data.json";
pub const SETTINGS_FILE_NAME: &str = "settings.json";

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("no cached dataset at {path}")]
    Missing { path: PathBuf },
    #[error("cached dataset at {path} is unreadable: {message}")]
    Corrupt { path: PathBuf, message: String },
    #[error("failed to serialize {what}: {source}")]
    Serialize {
        what: &'static str,
        source: serde_json::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AppSettings {
    #[serde(default)]
    pub last_fetched: String,
}

#[derive(Serialize)]
struct CacheDocumentRef<'a> {
    records: &'a [CountryRecord],
    last_fetched: &'a str,
}

#[derive(Deserialize)]
struct CacheDocument {
    records: Vec<CountryRecord>,
    #[serde(default)]
    last_fetched: String,
}

#[derive(Debug, Clone)]
pub struct CacheStore {
    cache_path: PathBuf,
    settings_path: PathBuf,
}

impl CacheStore {
    pub fn new(config: &CoronaConfig) -> Self {
        Self {
            cache_path: config.cache_dir.join(CACHE_FILE_NAME),
            settings_path: config.settings_dir.join(SETTINGS_FILE_NAME),
        }
    }

    pub fn cache_path(&self) -> &Path {
        &self.cache_path
    }

    pub fn settings_path(&self) -> &Path {
        &self.settings_path
    }

    pub fn has_cache(&self) -> bool {
        match fs::metadata(&self.cache_path) {
            Ok(meta) if meta.len() > 0 => self.load().is_ok(),
            _ => false,
        }
    }

    pub fn load(&self) -> Result<Dataset, CacheError> {
        let bytes = match fs::read(&self.cache_path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(CacheError::Missing {
                    path: self.cache_path.clone(),
                })
            }
            Err(err) => return Err(err.into()),
        };

        let document: CacheDocument =
            serde_json::from_slice(&bytes).map_err(|err| CacheError::Corrupt {
                path: self.cache_path.clone(),
                message: err.to_string(),
            })?;

        debug!(
            component = "cache",
            event = "cache.load.finish",
            path = %self.cache_path.display(),
            rows = document.records.len()
        );

        Ok(Dataset {
            records: document.records,
            last_fetched: document.last_fetched,
        })
    }

    pub fn save(&self, dataset: &Dataset) -> Result<(), CacheError> {
        let document = CacheDocumentRef {
            records: &dataset.records,
            last_fetched: &dataset.last_fetched,
        };
        let bytes = serde_json::to_vec(&document).map_err(|source| CacheError::Serialize {
            what: "dataset",
            source,
        })?;
        write_atomic(&self.cache_path, &bytes)?;

        info!(
            component = "cache",
            event = "cache.save.finish",
            path = %self.cache_path.display(),
            rows = dataset.records.len(),
            bytes = bytes.len()
        );
        Ok(())
    }

    pub fn record_fetch_time(&self, timestamp: &str) -> Result<(), CacheError> {
        let settings = AppSettings {
            last_fetched: timestamp.to_string(),
        };
        let bytes = serde_json::to_vec_pretty(&settings).map_err(|source| {
            CacheError::Serialize {
                what: "settings",
                source,
            }
        })?;
        write_atomic(&self.settings_path, &bytes)?;

        debug!(
            component = "cache",
            event = "cache.settings.saved",
            path = %self.settings_path.display(),
            last_fetched = timestamp
        );
        Ok(())
    }

    // Missing or unreadable settings fall back to the empty placeholder.
    pub fn load_settings(&self) -> AppSettings {
        let bytes = match fs::read(&self.settings_path) {
            Ok(bytes) => bytes,
            Err(_) => return AppSettings::default(),
        };

        serde_json::from_slice(&bytes).unwrap_or_else(|err| {
            warn!(
                component = "cache",
                event = "cache.settings.corrupt",
                path = %self.settings_path.display(),
                error = %err
            );
            AppSettings::default()
        })
    }

    pub fn export_to(&self, dest: &Path) -> Result<u64, CacheError> {
        if !self.cache_path.exists() {
            return Err(CacheError::Missing {
                path: self.cache_path.clone(),
            });
        }
        if let Some(parent) = dest.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let copied = fs::copy(&self.cache_path, dest)?;
        info!(
            component = "cache",
            event = "cache.export.finish",
            path = %dest.display(),
            bytes = copied
        );
        Ok(copied)
    }
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), CacheError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .ok_or_else(|| {
            std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("invalid output path: {}", path.display()),
            )
        })?;
    let tmp_path = path.with_file_name(format!("{file_name}.tmp"));

    let written = fs::File::create(&tmp_path)
        .and_then(|mut file| {
            file.write_all(bytes)?;
            file.sync_all()
        })
        .and_then(|()| fs::rename(&tmp_path, path));

    if let Err(err) = written {
        let _ = fs::remove_file(&tmp_path);
        return Err(err.into());
    }
    Ok(())
}

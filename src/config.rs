use log::warn;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

pub const API_URL_ENV: &str = "DATASHEET_API_URL";
pub const TIMEOUT_ENV: &str = "DATASHEET_TIMEOUT_MS";
pub const SESSION_FILE_ENV: &str = "DATASHEET_SESSION_FILE";
pub const PAGE_SIZE_ENV: &str = "DATASHEET_PAGE_SIZE";

/// Largest page the editor endpoint serves.
pub const MAX_PAGE_SIZE: usize = 1000;

/// Client configuration
///
/// Defaults suit a backend on localhost; every field can be overridden from
/// the environment.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Base URL of the backend API, including the `/api` prefix
    pub api_base_url: String,

    /// Per-request timeout in milliseconds
    pub request_timeout_ms: u64,

    /// File holding the persisted session identifiers
    pub session_store_path: PathBuf,

    /// Rows requested per page when reloading a dataset
    pub default_page_size: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_base_url: "http://localhost:8000/api".to_string(),
            request_timeout_ms: 30_000,
            session_store_path: PathBuf::from(".datasheet/session.json"),
            default_page_size: MAX_PAGE_SIZE,
        }
    }
}

impl ClientConfig {
    /// Defaults overridden by the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overridden by whatever `lookup` returns for each variable.
    /// Values that do not parse are ignored with a warning.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(url) = lookup(API_URL_ENV).filter(|v| !v.trim().is_empty()) {
            config.api_base_url = url.trim().to_string();
        }
        if let Some(raw) = lookup(TIMEOUT_ENV) {
            match raw.trim().parse() {
                Ok(ms) => config.request_timeout_ms = ms,
                Err(_) => warn!("ignoring {}={:?}: not a number of milliseconds", TIMEOUT_ENV, raw),
            }
        }
        if let Some(path) = lookup(SESSION_FILE_ENV).filter(|v| !v.trim().is_empty()) {
            config.session_store_path = PathBuf::from(path);
        }
        if let Some(raw) = lookup(PAGE_SIZE_ENV) {
            match raw.trim().parse() {
                Ok(size) => config.default_page_size = size,
                Err(_) => warn!("ignoring {}={:?}: not a row count", PAGE_SIZE_ENV, raw),
            }
        }

        config
    }

    /// Page size clamped to what the backend accepts.
    pub fn page_size(&self) -> usize {
        self.default_page_size.clamp(1, MAX_PAGE_SIZE)
    }
}

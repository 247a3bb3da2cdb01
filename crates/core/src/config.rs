//! Client runtime configuration.
//!
//! Configuration is resolved once at process startup and then passed into the API
//! client and controllers. Nothing in the request path reads environment variables.

use crate::constants::{
    CLIENT_STATE_DIR_NAME, DEFAULT_API_BASE_URL, DEFAULT_REQUEST_TIMEOUT_SECS,
    SEARCH_DEBOUNCE_MS, SESSION_FILENAME,
};
use crate::{PortalError, PortalResult};
use reqwest::Url;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Client configuration resolved at startup.
#[derive(Clone, Debug)]
pub struct ClientConfig {
    api_base_url: Url,
    token_file: PathBuf,
    request_timeout: Duration,
    search_debounce: Duration,
}

impl ClientConfig {
    /// Create a new `ClientConfig`.
    ///
    /// # Errors
    ///
    /// Returns `PortalError::Config` if the timeout is zero.
    pub fn new(
        api_base_url: Url,
        token_file: PathBuf,
        request_timeout: Duration,
        search_debounce: Duration,
    ) -> PortalResult<Self> {
        if request_timeout.is_zero() {
            return Err(PortalError::Config(
                "request timeout must be greater than zero".into(),
            ));
        }

        Ok(Self {
            api_base_url,
            token_file,
            request_timeout,
            search_debounce,
        })
    }

    /// Configuration pointing at `api_base_url` with every other value defaulted.
    pub fn with_base_url(api_base_url: Url, token_file: PathBuf) -> Self {
        Self {
            api_base_url,
            token_file,
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            search_debounce: Duration::from_millis(SEARCH_DEBOUNCE_MS),
        }
    }

    pub fn api_base_url(&self) -> &Url {
        &self.api_base_url
    }

    pub fn token_file(&self) -> &Path {
        &self.token_file
    }

    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    pub fn search_debounce(&self) -> Duration {
        self.search_debounce
    }
}

/// Parse the backend base URL from an optional string value.
///
/// `None` or blank falls back to [`DEFAULT_API_BASE_URL`]. Only `http` and `https`
/// URLs are accepted.
pub fn api_base_url_from_env_value(value: Option<String>) -> PortalResult<Url> {
    let raw = value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| DEFAULT_API_BASE_URL.to_string());

    let url = Url::parse(&raw)
        .map_err(|e| PortalError::Config(format!("invalid API base URL {raw:?}: {e}")))?;

    if !matches!(url.scheme(), "http" | "https") {
        return Err(PortalError::Config(format!(
            "API base URL must use http or https, got {:?}",
            url.scheme()
        )));
    }
    if url.cannot_be_a_base() {
        return Err(PortalError::Config(format!(
            "API base URL cannot be used as a base: {raw:?}"
        )));
    }

    Ok(url)
}

/// Resolve the session file location.
///
/// An explicit value wins. Otherwise the file lives in `.medst/` under `home`, or under
/// the working directory when no home directory is known.
pub fn token_file_from_env_value(value: Option<String>, home: Option<PathBuf>) -> PathBuf {
    if let Some(explicit) = value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty()) {
        return PathBuf::from(explicit);
    }

    home.unwrap_or_else(|| PathBuf::from("."))
        .join(CLIENT_STATE_DIR_NAME)
        .join(SESSION_FILENAME)
}

/// Parse a whole number of `unit`s from an optional string value, falling back to
/// `default` when absent or blank.
pub fn duration_from_env_value(
    name: &str,
    value: Option<String>,
    default: Duration,
    unit: fn(u64) -> Duration,
) -> PortalResult<Duration> {
    let Some(raw) = value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty()) else {
        return Ok(default);
    };

    raw.parse::<u64>()
        .map(unit)
        .map_err(|_| PortalError::Config(format!("{name} must be a whole number, got {raw:?}")))
}

/// Build a [`ClientConfig`] from raw environment values.
///
/// The binaries call this once with `std::env::var(..).ok()` for each key.
pub fn client_config_from_env_values(
    api_url: Option<String>,
    token_file: Option<String>,
    timeout_secs: Option<String>,
    debounce_ms: Option<String>,
) -> PortalResult<ClientConfig> {
    let api_base_url = api_base_url_from_env_value(api_url)?;
    let token_file = token_file_from_env_value(token_file, dirs::home_dir());
    let request_timeout = duration_from_env_value(
        "MEDST_REQUEST_TIMEOUT_SECS",
        timeout_secs,
        Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
        Duration::from_secs,
    )?;
    let search_debounce = duration_from_env_value(
        "MEDST_SEARCH_DEBOUNCE_MS",
        debounce_ms,
        Duration::from_millis(SEARCH_DEBOUNCE_MS),
        Duration::from_millis,
    )?;

    ClientConfig::new(api_base_url, token_file, request_timeout, search_debounce)
}

/// Reads `MEDST_API_URL`, `MEDST_TOKEN_FILE`, `MEDST_REQUEST_TIMEOUT_SECS` and
/// `MEDST_SEARCH_DEBOUNCE_MS` from the process environment.
///
/// Call once at startup, after loading any `.env` file.
pub fn client_config_from_env() -> PortalResult<ClientConfig> {
    client_config_from_env_values(
        std::env::var("MEDST_API_URL").ok(),
        std::env::var("MEDST_TOKEN_FILE").ok(),
        std::env::var("MEDST_REQUEST_TIMEOUT_SECS").ok(),
        std::env::var("MEDST_SEARCH_DEBOUNCE_MS").ok(),
    )
}

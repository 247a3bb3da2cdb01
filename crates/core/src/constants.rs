//! Constants used throughout the medst client.
//!
//! Endpoint paths, storage keys and timing defaults live here so the HTTP layer, the
//! session store and the binaries agree on them.

/// Backend base URL used when nothing else is configured.
pub const DEFAULT_API_BASE_URL: &str = "http://localhost:8000";

/// Key under which the bearer token is persisted.
pub const TOKEN_KEY: &str = "access_token";

/// Directory (under the home directory) holding client state.
pub const CLIENT_STATE_DIR_NAME: &str = ".medst";

/// Filename of the persisted session.
pub const SESSION_FILENAME: &str = "session.json";

/// Quiet period before a typed clinic query is sent, in milliseconds.
pub const SEARCH_DEBOUNCE_MS: u64 = 300;

/// Per-request timeout, in seconds.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Prefix of the filename used when a download carries no `Content-Disposition`.
pub const DOWNLOAD_FALLBACK_PREFIX: &str = "health_record_";

/// Multipart field name expected by both upload endpoints.
pub const UPLOAD_FIELD_NAME: &str = "file";

/// Role sent on registration.
pub const DEFAULT_USER_ROLE: &str = "patient";

/// Maximum characters of a section quoted in a record's context summary.
pub const CONTEXT_SNIPPET_CHARS: usize = 100;

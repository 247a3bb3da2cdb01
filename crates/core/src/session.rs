//! Bearer credential handling.
//!
//! The credential is a single token persisted under [`TOKEN_KEY`]. It is never cached:
//! [`Session::bearer`] goes back to the store for every authenticated request, so a
//! logout from another process takes effect on the next call.
//!
//! Controllers receive a [`Session`] explicitly instead of looking the token up
//! themselves.

use crate::constants::TOKEN_KEY;
use crate::{PortalError, PortalResult};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// Durable storage for the bearer token.
pub trait TokenStore: Send + Sync {
    fn read(&self) -> PortalResult<Option<String>>;
    fn write(&self, token: &str) -> PortalResult<()>;
    fn clear(&self) -> PortalResult<()>;
}

/// Token store backed by a small JSON object on disk: `{"access_token": "..."}`.
#[derive(Clone, Debug)]
pub struct FileTokenStore {
    path: PathBuf,
}

impl FileTokenStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_object(&self) -> PortalResult<serde_json::Map<String, serde_json::Value>> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(serde_json::Map::new()),
            Err(e) => return Err(PortalError::TokenStoreRead(e)),
        };
        if contents.trim().is_empty() {
            return Ok(serde_json::Map::new());
        }
        serde_json::from_str(&contents).map_err(PortalError::TokenStoreFormat)
    }

    fn write_object(&self, object: &serde_json::Map<String, serde_json::Value>) -> PortalResult<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(PortalError::TokenStoreWrite)?;
        }
        let contents =
            serde_json::to_string_pretty(object).map_err(PortalError::TokenStoreFormat)?;
        fs::write(&self.path, contents).map_err(PortalError::TokenStoreWrite)
    }
}

impl TokenStore for FileTokenStore {
    fn read(&self) -> PortalResult<Option<String>> {
        let object = self.read_object()?;
        Ok(object
            .get(TOKEN_KEY)
            .and_then(|v| v.as_str())
            .filter(|t| !t.trim().is_empty())
            .map(str::to_owned))
    }

    fn write(&self, token: &str) -> PortalResult<()> {
        let mut object = self.read_object()?;
        object.insert(TOKEN_KEY.into(), serde_json::Value::String(token.to_owned()));
        self.write_object(&object)
    }

    fn clear(&self) -> PortalResult<()> {
        let mut object = match self.read_object() {
            Ok(object) => object,
            // A corrupt file holds no usable token; replacing it is the clear.
            Err(PortalError::TokenStoreFormat(_)) => serde_json::Map::new(),
            Err(e) => return Err(e),
        };
        object.remove(TOKEN_KEY);
        if object.is_empty() {
            return match fs::remove_file(&self.path) {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
                Err(e) => Err(PortalError::TokenStoreWrite(e)),
            };
        }
        self.write_object(&object)
    }
}

/// In-process token store. Nothing survives the process.
#[derive(Debug, Default)]
pub struct MemoryTokenStore {
    token: Mutex<Option<String>>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_token(token: impl Into<String>) -> Self {
        Self {
            token: Mutex::new(Some(token.into())),
        }
    }
}

impl TokenStore for MemoryTokenStore {
    fn read(&self) -> PortalResult<Option<String>> {
        Ok(self.token.lock().unwrap_or_else(|p| p.into_inner()).clone())
    }

    fn write(&self, token: &str) -> PortalResult<()> {
        *self.token.lock().unwrap_or_else(|p| p.into_inner()) = Some(token.to_owned());
        Ok(())
    }

    fn clear(&self) -> PortalResult<()> {
        *self.token.lock().unwrap_or_else(|p| p.into_inner()) = None;
        Ok(())
    }
}

/// Explicit session context handed to everything that makes authenticated calls.
#[derive(Clone)]
pub struct Session {
    store: Arc<dyn TokenStore>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session").finish_non_exhaustive()
    }
}

impl Session {
    pub fn new(store: Arc<dyn TokenStore>) -> Self {
        Self { store }
    }

    pub fn from_file(path: impl Into<PathBuf>) -> Self {
        Self::new(Arc::new(FileTokenStore::new(path)))
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryTokenStore::new()))
    }

    /// Returns the stored token for an authenticated request.
    ///
    /// # Errors
    ///
    /// `PortalError::NotAuthenticated` when no token is stored. The store is cleared in
    /// that case so that a half-written credential does not linger.
    pub fn bearer(&self) -> PortalResult<String> {
        match self.store.read()? {
            Some(token) => Ok(token),
            None => {
                self.store.clear()?;
                Err(PortalError::NotAuthenticated)
            }
        }
    }

    pub fn is_signed_in(&self) -> PortalResult<bool> {
        Ok(self.store.read()?.is_some())
    }

    pub fn sign_in(&self, token: &str) -> PortalResult<()> {
        if token.trim().is_empty() {
            return Err(PortalError::InvalidInput("access token is empty".into()));
        }
        self.store.write(token)?;
        tracing::info!("session token stored");
        Ok(())
    }

    pub fn sign_out(&self) -> PortalResult<()> {
        self.store.clear()?;
        tracing::info!("session token cleared");
        Ok(())
    }
}

/// Outcome of gating a page on the presence of a credential.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardOutcome {
    Allowed,
    RedirectToLogin,
}

/// Gates protected pages. Depends on nothing but the session.
pub struct SessionGuard;

impl SessionGuard {
    /// Checks for a stored token. A store that cannot be read counts as signed out.
    pub fn check(session: &Session) -> GuardOutcome {
        match session.is_signed_in() {
            Ok(true) => GuardOutcome::Allowed,
            Ok(false) => GuardOutcome::RedirectToLogin,
            Err(e) => {
                tracing::warn!("token store unreadable, treating as signed out: {}", e);
                GuardOutcome::RedirectToLogin
            }
        }
    }
}

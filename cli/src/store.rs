//! Durable storage for the single bearer token.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tutor_core::model::SessionToken;

use crate::util::{config_path, write_private_file};

/// Key the token is stored under.
pub const TOKEN_KEY: &str = "rag_token";

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("failed to access credentials at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to encode credentials: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Get/set/clear capability for the bearer token.
///
/// No expiry is tracked here; an expired token is only discovered when the
/// backend rejects it.
pub trait TokenStore: Send + Sync {
    fn get(&self) -> Result<Option<SessionToken>, StoreError>;
    fn set(&self, token: &SessionToken) -> Result<(), StoreError>;
    fn clear(&self) -> Result<(), StoreError>;
}

impl<T: TokenStore + ?Sized> TokenStore for Box<T> {
    fn get(&self) -> Result<Option<SessionToken>, StoreError> {
        (**self).get()
    }

    fn set(&self, token: &SessionToken) -> Result<(), StoreError> {
        (**self).set(token)
    }

    fn clear(&self) -> Result<(), StoreError> {
        (**self).clear()
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct StoredCredentials {
    rag_token: String,
}

/// Token persisted as `{"rag_token": "..."}` in a private JSON file.
#[derive(Debug, Clone)]
pub struct FileTokenStore {
    path: PathBuf,
}

impl FileTokenStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `~/.config/tutor/credentials.json` (platform config dir).
    pub fn default_location() -> Self {
        Self::new(config_path())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_error(&self, source: std::io::Error) -> StoreError {
        StoreError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

impl TokenStore for FileTokenStore {
    fn get(&self) -> Result<Option<SessionToken>, StoreError> {
        let data = match std::fs::read_to_string(&self.path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(self.io_error(e)),
        };
        // A corrupt file counts as "no token" so the user can simply log in again.
        match serde_json::from_str::<StoredCredentials>(&data) {
            Ok(creds) if !creds.rag_token.is_empty() => {
                Ok(Some(SessionToken::new(creds.rag_token)))
            }
            Ok(_) => Ok(None),
            Err(e) => {
                tracing::warn!(
                    path = %self.path.display(),
                    error = %e,
                    "ignoring unreadable credentials file"
                );
                Ok(None)
            }
        }
    }

    fn set(&self, token: &SessionToken) -> Result<(), StoreError> {
        let data = serde_json::to_string_pretty(&StoredCredentials {
            rag_token: token.as_str().to_string(),
        })?;
        write_private_file(&self.path, data.as_bytes()).map_err(|e| self.io_error(e))
    }

    fn clear(&self) -> Result<(), StoreError> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(self.io_error(e)),
        }
    }
}

/// Process-local token store. Clones share the same slot.
#[derive(Debug, Clone, Default)]
pub struct MemoryTokenStore {
    slot: Arc<Mutex<Option<SessionToken>>>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_token(token: impl Into<String>) -> Self {
        let store = Self::default();
        *store.lock() = Some(SessionToken::new(token));
        store
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<SessionToken>> {
        self.slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl TokenStore for MemoryTokenStore {
    fn get(&self) -> Result<Option<SessionToken>, StoreError> {
        Ok(self.lock().clone())
    }

    fn set(&self, token: &SessionToken) -> Result<(), StoreError> {
        *self.lock() = Some(token.clone());
        Ok(())
    }

    fn clear(&self) -> Result<(), StoreError> {
        *self.lock() = None;
        Ok(())
    }
}

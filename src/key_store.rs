use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::crypto_service::{AesKey, CryptoError};

#[derive(Debug, thiserror::Error)]
pub enum KeyStoreError {
    #[error("browser id cannot be used as a key name: {0:?}")]
    InvalidIdentity(String),
    #[error("failed to access key file {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("malformed key record {}: {source}", .path.display())]
    Malformed {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("stored key for {0:?} is unusable: {1}")]
    BadKey(String, CryptoError),
}

/// Storage for one AES key per browser identity.
///
/// `put` overwrites; `get` returns `None` when nothing was ever stored.
#[async_trait]
pub trait KeyStore: Send + Sync {
    async fn put(&self, browser_id: &str, key: &AesKey) -> Result<(), KeyStoreError>;
    async fn get(&self, browser_id: &str) -> Result<Option<AesKey>, KeyStoreError>;
}

// On-disk shape of a key file
#[derive(Debug, Serialize, Deserialize)]
struct KeyRecord {
    #[serde(rename = "aesKey")]
    aes_key: String,
}

/// Keeps each key in `<dir>/<browser_id>.json`.
#[derive(Debug, Clone)]
pub struct FileKeyStore {
    dir: PathBuf,
}

impl FileKeyStore {
    /// The directory is created lazily on the first write.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn key_path(&self, browser_id: &str) -> Result<PathBuf, KeyStoreError> {
        validate_identity(browser_id)?;
        Ok(self.dir.join(format!("{}.json", browser_id)))
    }
}

#[async_trait]
impl KeyStore for FileKeyStore {
    async fn put(&self, browser_id: &str, key: &AesKey) -> Result<(), KeyStoreError> {
        let path = self.key_path(browser_id)?;

        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|source| io_error(&self.dir, source))?;

        let json = serde_json::to_vec(&KeyRecord {
            aes_key: key.as_str().to_string(),
        })
        .map_err(|source| KeyStoreError::Malformed {
            path: path.clone(),
            source,
        })?;

        // Write beside the target then rename over it, so a concurrent
        // reader sees either the old record or the new one.
        let tmp_path = path.with_extension("json.tmp");
        tokio::fs::write(&tmp_path, json)
            .await
            .map_err(|source| io_error(&tmp_path, source))?;
        tokio::fs::rename(&tmp_path, &path)
            .await
            .map_err(|source| io_error(&path, source))?;

        tracing::info!(path = %path.display(), "AES key saved");
        Ok(())
    }

    async fn get(&self, browser_id: &str) -> Result<Option<AesKey>, KeyStoreError> {
        let path = self.key_path(browser_id)?;

        let json = match tokio::fs::read(&path).await {
            Ok(json) => json,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                tracing::warn!(path = %path.display(), "no AES key on file");
                return Ok(None);
            }
            Err(source) => return Err(io_error(&path, source)),
        };

        let record: KeyRecord = serde_json::from_slice(&json).map_err(|source| {
            tracing::error!(path = %path.display(), "error reading AES key: {}", source);
            KeyStoreError::Malformed {
                path: path.clone(),
                source,
            }
        })?;

        AesKey::from_encoded(record.aes_key)
            .map(Some)
            .map_err(|e| KeyStoreError::BadKey(browser_id.to_string(), e))
    }
}

fn io_error(path: &Path, source: std::io::Error) -> KeyStoreError {
    tracing::error!(path = %path.display(), "key store I/O failure: {}", source);
    KeyStoreError::Io {
        path: path.to_path_buf(),
        source,
    }
}

// A browser id must map onto exactly one file inside the key directory
fn validate_identity(browser_id: &str) -> Result<(), KeyStoreError> {
    let bad = browser_id.is_empty()
        || browser_id == "."
        || browser_id == ".."
        || browser_id.contains(['/', '\\', '\0']);
    if bad {
        return Err(KeyStoreError::InvalidIdentity(browser_id.to_string()));
    }
    Ok(())
}

/// Process-local store, for tests and throwaway runs.
#[derive(Debug, Default)]
pub struct MemoryKeyStore {
    keys: RwLock<HashMap<String, AesKey>>,
}

impl MemoryKeyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.keys.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.read().is_empty()
    }
}

#[async_trait]
impl KeyStore for MemoryKeyStore {
    async fn put(&self, browser_id: &str, key: &AesKey) -> Result<(), KeyStoreError> {
        self.keys.write().insert(browser_id.to_string(), key.clone());
        Ok(())
    }

    async fn get(&self, browser_id: &str) -> Result<Option<AesKey>, KeyStoreError> {
        Ok(self.keys.read().get(browser_id).cloned())
    }
}

//! Registry persistence.
//!
//! A registry is a small JSON document (zone → collection, name → channel)
//! that makes provisioning idempotent across runs. Stores load and save the
//! whole document; callers hold the store lock across the full
//! load-mutate-save cycle.

use std::collections::BTreeMap;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, warn};
use uuid::Uuid;

use super::lock::{FileLock, FileLockGuard, LockConfig};
use crate::domain::ports::{ChannelHandle, CollectionHandle};
use crate::error::{Error, Result};

/// Default registry file for zone collections.
pub const ZONE_REGISTRY_FILE: &str = "zone_collections.json";

/// Default registry file for channels.
pub const TOPIC_REGISTRY_FILE: &str = "topic_registry.json";

// =============================================================================
// Documents
// =============================================================================

/// Marker for types that can be persisted as a registry document.
pub trait RegistryDocument:
    Serialize + DeserializeOwned + Default + Clone + Send + Sync + 'static
{
}

impl<T> RegistryDocument for T where
    T: Serialize + DeserializeOwned + Default + Clone + Send + Sync + 'static
{
}

/// Zone → collection registry document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionRegistryDoc {
    pub collections: BTreeMap<String, CollectionHandle>,
    pub last_updated: DateTime<Utc>,
}

impl Default for CollectionRegistryDoc {
    fn default() -> Self {
        Self {
            collections: BTreeMap::new(),
            last_updated: Utc::now(),
        }
    }
}

/// Channel name → channel registry document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelRegistryDoc {
    pub topics: BTreeMap<String, ChannelHandle>,
    pub last_updated: DateTime<Utc>,
}

impl Default for ChannelRegistryDoc {
    fn default() -> Self {
        Self {
            topics: BTreeMap::new(),
            last_updated: Utc::now(),
        }
    }
}

// =============================================================================
// Store Port
// =============================================================================

/// Exclusive access to a registry for one load-mutate-save cycle.
#[derive(Debug)]
pub struct StoreLock {
    _local: OwnedMutexGuard<()>,
    file: Option<FileLockGuard>,
}

impl StoreLock {
    /// Release the lock, surfacing lock-file removal errors.
    pub async fn release(self) -> Result<()> {
        match self.file {
            Some(file) => file.release().await,
            None => Ok(()),
        }
    }

    /// Release the lock and hand back `result` from the locked section.
    ///
    /// A release failure is logged; it never replaces `result`.
    pub async fn release_with<T>(self, result: Result<T>) -> Result<T> {
        if let Err(e) = self.release().await {
            warn!(error = %e, "Failed to release registry lock");
        }
        result
    }
}

/// Load/save access to one registry document.
#[async_trait]
pub trait RegistryStore<D: RegistryDocument>: Send + Sync {
    /// Serialize writers: in-process and, for file stores, across processes.
    async fn lock(&self) -> Result<StoreLock>;

    /// Load the document; a missing document is an empty registry.
    async fn load(&self) -> Result<D>;

    /// Replace the whole document.
    async fn save(&self, document: &D) -> Result<()>;
}

// =============================================================================
// JSON File Store
// =============================================================================

/// Registry persisted as a pretty-printed JSON file.
///
/// Saves go to a temporary sibling file that is renamed over the document,
/// so readers never see a partial write.
#[derive(Debug)]
pub struct JsonFileStore<D> {
    path: PathBuf,
    local: Arc<Mutex<()>>,
    lock_config: LockConfig,
    _document: PhantomData<fn() -> D>,
}

impl<D> JsonFileStore<D> {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self::with_lock_config(path, LockConfig::default())
    }

    pub fn with_lock_config(path: impl Into<PathBuf>, lock_config: LockConfig) -> Self {
        Self {
            path: path.into(),
            local: Arc::new(Mutex::new(())),
            lock_config,
            _document: PhantomData,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_error(&self, source: std::io::Error) -> Error {
        Error::RegistryIo {
            path: self.path.display().to_string(),
            source,
        }
    }
}

#[async_trait]
impl<D: RegistryDocument> RegistryStore<D> for JsonFileStore<D> {
    async fn lock(&self) -> Result<StoreLock> {
        let local = self.local.clone().lock_owned().await;
        let file = FileLock::for_document(&self.path, self.lock_config.clone())
            .acquire()
            .await?;
        Ok(StoreLock {
            _local: local,
            file: Some(file),
        })
    }

    async fn load(&self) -> Result<D> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "Registry not found, starting empty");
                return Ok(D::default());
            }
            Err(e) => return Err(self.io_error(e)),
        };

        serde_json::from_slice(&bytes).map_err(|source| Error::RegistrySerde {
            path: self.path.display().to_string(),
            source,
        })
    }

    async fn save(&self, document: &D) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(document).map_err(|source| Error::RegistrySerde {
            path: self.path.display().to_string(),
            source,
        })?;

        let mut tmp = self.path.as_os_str().to_owned();
        tmp.push(format!(".{}.tmp", Uuid::new_v4()));
        let tmp = PathBuf::from(tmp);

        tokio::fs::write(&tmp, &bytes)
            .await
            .map_err(|e| self.io_error(e))?;
        if let Err(e) = tokio::fs::rename(&tmp, &self.path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(self.io_error(e));
        }

        debug!(path = %self.path.display(), bytes = bytes.len(), "Registry saved");
        Ok(())
    }
}

// =============================================================================
// In-Memory Store
// =============================================================================

/// Registry kept in memory, for tests and local runs.
#[derive(Debug)]
pub struct MemoryStore<D> {
    document: RwLock<Option<D>>,
    local: Arc<Mutex<()>>,
}

impl<D> Default for MemoryStore<D> {
    fn default() -> Self {
        Self {
            document: RwLock::new(None),
            local: Arc::new(Mutex::new(())),
        }
    }
}

impl<D: Clone> MemoryStore<D> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from an existing document.
    pub fn with_document(document: D) -> Self {
        Self {
            document: RwLock::new(Some(document)),
            local: Arc::new(Mutex::new(())),
        }
    }

    /// Current document, `None` if never saved.
    pub fn snapshot(&self) -> Option<D> {
        self.document.read().clone()
    }
}

#[async_trait]
impl<D: RegistryDocument> RegistryStore<D> for MemoryStore<D> {
    async fn lock(&self) -> Result<StoreLock> {
        Ok(StoreLock {
            _local: self.local.clone().lock_owned().await,
            file: None,
        })
    }

    async fn load(&self) -> Result<D> {
        Ok(self.document.read().clone().unwrap_or_default())
    }

    async fn save(&self, document: &D) -> Result<()> {
        *self.document.write() = Some(document.clone());
        Ok(())
    }
}

//! Cross-process lock for registry documents.
//!
//! Several minting runs may share one registry file. Every load-mutate-save
//! cycle happens while holding an exclusive lock file next to the document:
//!
//! 1. Acquisition creates `<registry>.lock` with create-new semantics, so only
//!    one writer can succeed
//! 2. The lock file records the holder id and an expiry time
//! 3. A lock past its expiry is considered abandoned. It is renamed aside
//!    (atomic), judged again, and put back if it turned out to be live
//! 4. Acquisition retries with exponential backoff until `max_attempts`
//! 5. Releasing (or dropping) the guard removes the lock file, but only while
//!    it still names this holder
//!
//! The ttl must outlast the longest locked section, which includes one
//! gateway request.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{Error, Result};

// =============================================================================
// Configuration
// =============================================================================

/// Lock acquisition settings.
#[derive(Debug, Clone)]
pub struct LockConfig {
    /// How long a lock is honoured before it may be taken over
    pub ttl: Duration,
    /// Attempts before giving up
    pub max_attempts: u32,
    /// First retry delay
    pub backoff_base: Duration,
    /// Upper bound for a single retry delay
    pub backoff_max: Duration,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(120),
            max_attempts: 20,
            backoff_base: Duration::from_millis(50),
            backoff_max: Duration::from_secs(2),
        }
    }
}

/// Contents of a lock file.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct LockInfo {
    holder_id: String,
    acquired_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

impl LockInfo {
    fn new(holder_id: &str, ttl: Duration) -> Self {
        let now = Utc::now();
        Self {
            holder_id: holder_id.to_string(),
            acquired_at: now,
            expires_at: now + chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::seconds(30)),
        }
    }

    fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }
}

enum Attempt {
    Acquired(FileLockGuard),
    Held(String),
}

/// State of a lock file found on disk.
#[derive(Debug, PartialEq, Eq)]
enum Judgement {
    Missing,
    Live(String),
    Abandoned(String),
}

// =============================================================================
// File Lock
// =============================================================================

/// An exclusive lock file guarding one registry document.
#[derive(Debug, Clone)]
pub struct FileLock {
    path: PathBuf,
    holder_id: String,
    config: LockConfig,
}

impl FileLock {
    /// Lock for the given document path (the lock file is `<path>.lock`).
    pub fn for_document(document: &Path, config: LockConfig) -> Self {
        let mut lock_path = document.as_os_str().to_owned();
        lock_path.push(".lock");
        Self {
            path: PathBuf::from(lock_path),
            holder_id: Uuid::new_v4().to_string(),
            config,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn holder_id(&self) -> &str {
        &self.holder_id
    }

    /// Acquire the lock, retrying with backoff while another holder has it.
    pub async fn acquire(&self) -> Result<FileLockGuard> {
        let mut backoff = self.config.backoff_base;
        let mut last_holder = String::from("unknown");

        for attempt in 1..=self.config.max_attempts {
            match self.try_acquire().await? {
                Attempt::Acquired(guard) => {
                    debug!(path = %self.path.display(), attempt, "Registry lock acquired");
                    return Ok(guard);
                }
                Attempt::Held(holder) => {
                    last_holder = holder;
                    if attempt < self.config.max_attempts {
                        tokio::time::sleep(backoff.min(self.config.backoff_max)).await;
                        backoff = backoff.saturating_mul(2);
                    }
                }
            }
        }

        Err(Error::RegistryLocked {
            path: self.path.display().to_string(),
            holder: last_holder,
            attempts: self.config.max_attempts,
        })
    }

    async fn try_acquire(&self) -> Result<Attempt> {
        let info = LockInfo::new(&self.holder_id, self.config.ttl);
        let bytes = serde_json::to_vec(&info).map_err(|e| Error::Internal(format!("serialize lock: {e}")))?;

        match tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&self.path)
            .await
        {
            Ok(mut file) => {
                file.write_all(&bytes).await.map_err(|e| self.io_error(e))?;
                file.sync_all().await.map_err(|e| self.io_error(e))?;
                Ok(Attempt::Acquired(FileLockGuard {
                    path: self.path.clone(),
                    holder_id: self.holder_id.clone(),
                    released: false,
                }))
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => self.inspect_existing().await,
            Err(e) => Err(self.io_error(e)),
        }
    }

    /// Decide whether an existing lock file is live or abandoned.
    async fn inspect_existing(&self) -> Result<Attempt> {
        match self.judge(&self.path).await? {
            // released between our create and read
            Judgement::Missing => Ok(Attempt::Held("released".to_string())),
            Judgement::Live(holder) => Ok(Attempt::Held(holder)),
            Judgement::Abandoned(holder) => {
                warn!(
                    path = %self.path.display(),
                    holder = %holder,
                    "Taking over abandoned registry lock"
                );
                self.remove_abandoned().await?;
                Ok(Attempt::Held(holder))
            }
        }
    }

    async fn judge(&self, path: &Path) -> Result<Judgement> {
        let existing = match tokio::fs::read(path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Judgement::Missing),
            Err(e) => return Err(self.io_error(e)),
        };

        Ok(match serde_json::from_slice::<LockInfo>(&existing) {
            Ok(info) if info.is_expired() => Judgement::Abandoned(info.holder_id),
            Ok(info) => Judgement::Live(info.holder_id),
            // a half-written lock is only abandoned once it is older than the ttl
            Err(_) => {
                if self.is_older_than_ttl(path).await {
                    Judgement::Abandoned("unreadable".to_string())
                } else {
                    Judgement::Live("unreadable".to_string())
                }
            }
        })
    }

    /// Move a lock judged abandoned out of the way.
    ///
    /// The file is renamed aside first, so only one waiter can claim it. If
    /// what was moved is live (another waiter replaced the stale lock in the
    /// meantime), it is linked back into place.
    async fn remove_abandoned(&self) -> Result<()> {
        let mut aside = self.path.as_os_str().to_owned();
        aside.push(format!(".{}.stale", Uuid::new_v4()));
        let aside = PathBuf::from(aside);

        match tokio::fs::rename(&self.path, &aside).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(self.io_error(e)),
        }

        if let Judgement::Live(holder) = self.judge(&aside).await? {
            debug!(holder = %holder, "Moved a live registry lock, restoring it");
            if let Err(e) = tokio::fs::hard_link(&aside, &self.path).await {
                warn!(
                    path = %self.path.display(),
                    holder = %holder,
                    error = %e,
                    "Failed to restore registry lock"
                );
            }
        }

        if let Err(e) = tokio::fs::remove_file(&aside).await {
            warn!(path = %aside.display(), error = %e, "Failed to remove stale registry lock");
        }
        Ok(())
    }

    async fn is_older_than_ttl(&self, path: &Path) -> bool {
        let Ok(metadata) = tokio::fs::metadata(path).await else {
            return false;
        };
        metadata
            .modified()
            .ok()
            .and_then(|modified| modified.elapsed().ok())
            .is_some_and(|age| age >= self.config.ttl)
    }

    fn io_error(&self, source: std::io::Error) -> Error {
        Error::RegistryIo {
            path: self.path.display().to_string(),
            source,
        }
    }
}

/// Held lock; removes the lock file when released or dropped, unless it has
/// been taken over by another holder.
#[derive(Debug)]
pub struct FileLockGuard {
    path: PathBuf,
    holder_id: String,
    released: bool,
}

impl FileLockGuard {
    pub fn holder_id(&self) -> &str {
        &self.holder_id
    }

    /// Release the lock explicitly.
    pub async fn release(mut self) -> Result<()> {
        self.released = true;
        let current = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(source) => return Err(self.io_error(source)),
        };
        if !self.owns(&current) {
            warn!(path = %self.path.display(), "Registry lock was taken over, leaving it");
            return Ok(());
        }

        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(self.io_error(source)),
        }
    }

    fn owns(&self, contents: &[u8]) -> bool {
        serde_json::from_slice::<LockInfo>(contents)
            .is_ok_and(|info| info.holder_id == self.holder_id)
    }

    fn io_error(&self, source: std::io::Error) -> Error {
        Error::RegistryIo {
            path: self.path.display().to_string(),
            source,
        }
    }
}

impl Drop for FileLockGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        match std::fs::read(&self.path) {
            Ok(current) if self.owns(&current) => {
                if let Err(e) = std::fs::remove_file(&self.path) {
                    if e.kind() != std::io::ErrorKind::NotFound {
                        warn!(path = %self.path.display(), error = %e, "Failed to remove registry lock");
                    }
                }
            }
            Ok(_) => warn!(path = %self.path.display(), "Registry lock was taken over, leaving it"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %self.path.display(), error = %e, "Failed to read registry lock"),
        }
    }
}

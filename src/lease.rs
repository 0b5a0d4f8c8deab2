use {
    serde::{Deserialize, Serialize},
    std::{
        io,
        path::{Path, PathBuf},
        sync::{Arc, Mutex},
        time::Duration,
    },
    thiserror::Error,
    tracing::warn,
};

pub const DEFAULT_LEASE_EXPIRY: Duration = Duration::from_secs(2);

pub type SharedLeaseStore = Arc<dyn LeaseStore + Send + Sync + 'static>;

#[derive(Debug, Error)]
pub enum LeaseError {
    #[error("lease storage failure: {0}")]
    Io(#[from] io::Error),

    #[error("lease encoding failure: {0}")]
    Encoding(#[from] serde_json::Error),
}

///
/// Marker that a submission is believed in flight. Timestamps are wall-clock
/// milliseconds so a lease written by a previous process can be aged.
///
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmissionLease {
    pub held_since_ms: u64,
}

impl SubmissionLease {
    pub const fn new(held_since_ms: u64) -> Self {
        Self { held_since_ms }
    }

    /// A lease older than `expiry` is abandoned and does not block anyone.
    pub const fn is_active(&self, now_ms: u64, expiry: Duration) -> bool {
        now_ms.saturating_sub(self.held_since_ms) < expiry.as_millis() as u64
    }
}

#[async_trait::async_trait]
pub trait LeaseStore {
    async fn read(&self) -> Result<Option<SubmissionLease>, LeaseError>;

    ///
    /// Writes a lease held since `now_ms` unless an active one exists.
    /// Returns `false` when another submission holds the lease.
    ///
    async fn try_acquire(&self, now_ms: u64, expiry: Duration) -> Result<bool, LeaseError>;

    async fn release(&self) -> Result<(), LeaseError>;
}

///
/// Lease persisted as a small JSON file so it survives restarts.
///
/// Acquisition is a compare-and-set under an in-process lock. Processes sharing
/// the same file only get a best-effort guard.
///
#[derive(Debug)]
pub struct FileLeaseStore {
    path: PathBuf,
    lock: tokio::sync::Mutex<()>,
}

impl FileLeaseStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_file(&self) -> Result<Option<SubmissionLease>, LeaseError> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(error) if error.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(error) => return Err(error.into()),
        };
        match serde_json::from_slice(&bytes) {
            Ok(lease) => Ok(Some(lease)),
            Err(error) => {
                warn!(
                    path = %self.path.display(),
                    error = %error,
                    "ignoring unreadable submission lease"
                );
                Ok(None)
            }
        }
    }

    async fn write_file(&self, lease: &SubmissionLease) -> Result<(), LeaseError> {
        let bytes = serde_json::to_vec(lease)?;
        let tmp = self.path.with_extension("tmp");
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl LeaseStore for FileLeaseStore {
    async fn read(&self) -> Result<Option<SubmissionLease>, LeaseError> {
        let _guard = self.lock.lock().await;
        self.read_file().await
    }

    async fn try_acquire(&self, now_ms: u64, expiry: Duration) -> Result<bool, LeaseError> {
        let _guard = self.lock.lock().await;
        if let Some(lease) = self.read_file().await? {
            if lease.is_active(now_ms, expiry) {
                return Ok(false);
            }
        }
        self.write_file(&SubmissionLease::new(now_ms)).await?;
        Ok(true)
    }

    async fn release(&self) -> Result<(), LeaseError> {
        let _guard = self.lock.lock().await;
        match tokio::fs::remove_file(&self.path).await {
            Err(error) if error.kind() != io::ErrorKind::NotFound => Err(error.into()),
            _ => Ok(()),
        }
    }
}

#[derive(Debug, Default)]
pub struct MemoryLeaseStore {
    lease: Mutex<Option<SubmissionLease>>,
}

#[async_trait::async_trait]
impl LeaseStore for MemoryLeaseStore {
    async fn read(&self) -> Result<Option<SubmissionLease>, LeaseError> {
        Ok(*self.lease.lock().expect("lease lock poisoned"))
    }

    async fn try_acquire(&self, now_ms: u64, expiry: Duration) -> Result<bool, LeaseError> {
        let mut lease = self.lease.lock().expect("lease lock poisoned");
        if lease.is_some_and(|lease| lease.is_active(now_ms, expiry)) {
            return Ok(false);
        }
        *lease = Some(SubmissionLease::new(now_ms));
        Ok(true)
    }

    async fn release(&self) -> Result<(), LeaseError> {
        self.lease.lock().expect("lease lock poisoned").take();
        Ok(())
    }
}

///
/// A lease acquired by this process. Releasing it explicitly reports storage
/// errors; dropping it unreleased (a cancelled submission) releases it in the
/// background.
///
pub struct LeaseGuard {
    store: Option<SharedLeaseStore>,
}

impl LeaseGuard {
    pub const fn new(store: SharedLeaseStore) -> Self {
        Self { store: Some(store) }
    }

    pub async fn release(mut self) -> Result<(), LeaseError> {
        match self.store.take() {
            Some(store) => store.release().await,
            None => Ok(()),
        }
    }
}

impl Drop for LeaseGuard {
    fn drop(&mut self) {
        let Some(store) = self.store.take() else {
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(error) = store.release().await {
                        warn!(error = %error, "failed to release abandoned submission lease");
                    }
                });
            }
            Err(_) => warn!("no runtime to release abandoned submission lease, it will expire"),
        }
    }
}

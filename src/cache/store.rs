//! Two-tier cache store: typed values in memory, encoded bytes on disk.

use std::any::Any;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, SystemTime};

use serde::{de::DeserializeOwned, Serialize};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::clock::{Clock, SystemClock};
use crate::error::CacheError;

use super::disk::{self, SweepReport};
use super::memory::MemoryTier;
use super::traits::{Cached, Cacheable};

/// Name of the directory created under the configured cache dir.
pub const NAMESPACE: &str = "xrate.apicache";

/// Limits for both tiers.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheConfig {
  /// Disk entries older than this are removed by a sweep.
  pub max_age: Duration,
  /// Memory budget in encoded bytes. Zero means unbounded.
  pub max_memory_cost: usize,
  /// Disk budget in allocated bytes. Zero disables size eviction.
  pub max_size: u64,
  /// Fraction of `max_size` a size eviction shrinks the disk tier down to.
  pub shrink_ratio: f64,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      max_age: Duration::from_secs(7 * 24 * 60 * 60),
      max_memory_cost: 10 * 1024 * 1024,
      max_size: 20 * 1024 * 1024,
      shrink_ratio: 0.5,
    }
  }
}

/// Encoding used for the disk tier.
pub trait DiskCodec: Send + Sync + 'static {
  fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, CacheError>;
  fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T, CacheError>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl DiskCodec for JsonCodec {
  fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, CacheError> {
    serde_json::to_vec(value).map_err(|e| CacheError::Encode(e.to_string()))
  }

  fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T, CacheError> {
    serde_json::from_slice(bytes).map_err(|e| CacheError::Decode(e.to_string()))
  }
}

#[derive(Clone)]
struct MemoryEntry {
  value: Arc<dyn Any + Send + Sync>,
  written_at: SystemTime,
}

/// Handle to a background disk write.
///
/// Awaiting it reports the write's outcome; dropping it leaves the write
/// running.
#[derive(Debug)]
pub struct PendingWrite {
  state: PendingState,
}

#[derive(Debug)]
enum PendingState {
  Running(JoinHandle<Result<(), CacheError>>),
  Done(Result<(), CacheError>),
}

impl PendingWrite {
  fn done(result: Result<(), CacheError>) -> Self {
    Self {
      state: PendingState::Done(result),
    }
  }

  pub async fn wait(self) -> Result<(), CacheError> {
    match self.state {
      PendingState::Running(handle) => handle.await?,
      PendingState::Done(result) => result,
    }
  }
}

struct Shared<C> {
  root: PathBuf,
  config: CacheConfig,
  codec: C,
  clock: Arc<dyn Clock>,
  memory: Mutex<MemoryTier<MemoryEntry>>,
  /// Readers and writers share; a sweep is exclusive.
  disk_lock: Arc<RwLock<()>>,
}

/// Memory + disk cache keyed by filesystem-safe strings.
///
/// `store` updates memory immediately and writes the disk tier on the
/// blocking pool. `fetch` checks memory, then disk, backfilling memory on a
/// disk hit.
pub struct CacheStore<C: DiskCodec = JsonCodec> {
  shared: Arc<Shared<C>>,
}

impl<C: DiskCodec> Clone for CacheStore<C> {
  fn clone(&self) -> Self {
    Self {
      shared: Arc::clone(&self.shared),
    }
  }
}

impl CacheStore<JsonCodec> {
  /// Store under `<dir>/xrate.apicache` using JSON on disk.
  pub fn new(dir: impl AsRef<Path>, config: CacheConfig) -> Self {
    Self::with_clock(dir, config, Arc::new(SystemClock))
  }

  /// Like [`new`](Self::new) with the clock used for sweep ages and memory
  /// timestamps.
  pub fn with_clock(dir: impl AsRef<Path>, config: CacheConfig, clock: Arc<dyn Clock>) -> Self {
    Self::with_codec(dir, config, JsonCodec, clock)
  }
}

impl<C: DiskCodec> CacheStore<C> {
  pub fn with_codec(
    dir: impl AsRef<Path>,
    config: CacheConfig,
    codec: C,
    clock: Arc<dyn Clock>,
  ) -> Self {
    let memory = Mutex::new(MemoryTier::new(config.max_memory_cost));
    Self {
      shared: Arc::new(Shared {
        root: dir.as_ref().join(NAMESPACE),
        config,
        codec,
        clock,
        memory,
        disk_lock: Arc::new(RwLock::new(())),
      }),
    }
  }

  /// Root of the disk tier.
  pub fn dir(&self) -> &Path {
    &self.shared.root
  }

  pub fn config(&self) -> &CacheConfig {
    &self.shared.config
  }

  fn memory(&self) -> MutexGuard<'_, MemoryTier<MemoryEntry>> {
    self
      .shared
      .memory
      .lock()
      .unwrap_or_else(|poisoned| poisoned.into_inner())
  }

  /// Put `value` in memory now and write it to disk in the background.
  pub fn store<T: Cacheable>(&self, key: &str, value: T) -> PendingWrite {
    let bytes = match self.shared.codec.encode(&value) {
      Ok(bytes) => bytes,
      Err(e) => {
        warn!(key, error = %e, "failed to encode cache entry");
        return PendingWrite::done(Err(e));
      }
    };

    let entry = MemoryEntry {
      value: Arc::new(value),
      written_at: self.shared.clock.now(),
    };
    self.memory().insert(key.to_string(), entry, bytes.len());

    let shared = Arc::clone(&self.shared);
    let key = key.to_string();
    let write = move || {
      let _guard = shared.disk_lock.blocking_read();
      disk::write(&shared.root, &key, &bytes).map_err(|e| {
        warn!(key = %key, error = %e, "cache disk write failed");
        CacheError::from(e)
      })
    };

    match tokio::runtime::Handle::try_current() {
      Ok(runtime) => PendingWrite {
        state: PendingState::Running(runtime.spawn_blocking(write)),
      },
      // Outside a runtime the write happens inline
      Err(_) => PendingWrite::done(write()),
    }
  }

  /// Memory tier only. Never touches the disk.
  pub fn fetch_memory<T: Cacheable>(&self, key: &str) -> Option<T> {
    self.memory_entry::<T>(key).map(|cached| cached.value)
  }

  fn memory_entry<T: Cacheable>(&self, key: &str) -> Option<Cached<T>> {
    let entry = self.memory().get(key).cloned()?;
    match entry.value.downcast::<T>() {
      Ok(value) => Some(Cached {
        value: T::clone(&value),
        written_at: entry.written_at,
      }),
      Err(_) => {
        debug!(key, "memory entry holds a different type");
        None
      }
    }
  }

  /// Best-effort lookup: any failure is logged and reported as a miss.
  pub async fn fetch<T: Cacheable>(&self, key: &str) -> Option<T> {
    self.fetch_entry(key).await.map(|cached| cached.value)
  }

  /// Like [`fetch`](Self::fetch), also returning when the value was written.
  pub async fn fetch_entry<T: Cacheable>(&self, key: &str) -> Option<Cached<T>> {
    match self.read_entry(key).await {
      Ok(found) => found,
      Err(e) => {
        debug!(key, error = %e, "cache read failed, treating as miss");
        None
      }
    }
  }

  /// Explicit lookup that reports why a value could not be read.
  ///
  /// `Ok(None)` means the key is simply not cached.
  pub async fn read<T: Cacheable>(&self, key: &str) -> Result<Option<T>, CacheError> {
    Ok(self.read_entry(key).await?.map(|cached| cached.value))
  }

  async fn read_entry<T: Cacheable>(&self, key: &str) -> Result<Option<Cached<T>>, CacheError> {
    if let Some(cached) = self.memory_entry::<T>(key) {
      debug!(key, "memory cache hit");
      return Ok(Some(cached));
    }

    let shared = Arc::clone(&self.shared);
    let owned_key = key.to_string();
    let found = tokio::task::spawn_blocking(move || {
      let _guard = shared.disk_lock.blocking_read();
      disk::read(&shared.root, &owned_key)
    })
    .await??;

    let Some((bytes, modified)) = found else {
      debug!(key, "cache miss");
      return Ok(None);
    };

    let value: T = self.shared.codec.decode(&bytes)?;
    debug!(key, "disk cache hit, backfilling memory");
    let entry = MemoryEntry {
      value: Arc::new(value.clone()),
      written_at: modified,
    };
    self.memory().insert(key.to_string(), entry, bytes.len());

    Ok(Some(Cached {
      value,
      written_at: modified,
    }))
  }

  pub fn evict_memory(&self, key: &str) {
    self.memory().remove(key);
  }

  pub fn clear_memory(&self) {
    self.memory().clear();
  }

  pub async fn evict_disk(&self, key: &str) -> Result<(), CacheError> {
    let shared = Arc::clone(&self.shared);
    let key = key.to_string();
    tokio::task::spawn_blocking(move || {
      let _guard = shared.disk_lock.blocking_write();
      disk::remove(&shared.root, &key)
    })
    .await??;
    Ok(())
  }

  pub async fn clear_disk(&self) -> Result<(), CacheError> {
    let shared = Arc::clone(&self.shared);
    tokio::task::spawn_blocking(move || {
      let _guard = shared.disk_lock.blocking_write();
      disk::clear(&shared.root)
    })
    .await??;
    Ok(())
  }

  /// Age and size maintenance pass over the disk tier.
  ///
  /// Holds the disk lock exclusively, so no fetch or store of any key runs
  /// while files are being deleted. Memory entries of deleted keys are
  /// dropped as well.
  pub async fn sweep(&self) -> Result<SweepReport, CacheError> {
    let shared = Arc::clone(&self.shared);
    let report = tokio::task::spawn_blocking(move || {
      let _guard = shared.disk_lock.blocking_write();
      let config = &shared.config;
      disk::sweep(
        &shared.root,
        shared.clock.now(),
        config.max_age,
        config.max_size,
        config.shrink_ratio,
      )
    })
    .await??;

    {
      let mut memory = self.memory();
      for key in &report.removed {
        memory.remove(key);
      }
    }

    info!(
      expired = report.expired,
      evicted = report.evicted,
      remaining_bytes = report.remaining_bytes,
      "cache sweep"
    );
    Ok(report)
  }
}

//! Core traits and types for the caching system.

use std::time::SystemTime;

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Serialize};

/// Payloads that can live in both cache tiers.
///
/// The memory tier keeps the typed value itself; the disk tier keeps its
/// encoded form. Blanket-implemented for every suitable type.
pub trait Cacheable: Clone + Send + Sync + Serialize + DeserializeOwned + 'static {}

impl<T> Cacheable for T where T: Clone + Send + Sync + Serialize + DeserializeOwned + 'static {}

/// A cached value and when it was written.
#[derive(Debug, Clone, PartialEq)]
pub struct Cached<T> {
  pub value: T,
  pub written_at: SystemTime,
}

/// Result from a throttled fetch, including where the data came from.
#[derive(Debug, Clone)]
pub struct CacheResult<T> {
  /// The actual data
  pub data: T,
  /// Where the data came from
  pub source: CacheSource,
  /// When the data was cached (if from cache)
  pub cached_at: Option<DateTime<Utc>>,
}

impl<T> CacheResult<T> {
  /// Create a new cache result from fresh network data.
  pub fn from_network(data: T) -> Self {
    Self {
      data,
      source: CacheSource::Network,
      cached_at: None,
    }
  }

  /// Cached data served inside the throttle window.
  pub fn from_cache(cached: Cached<T>) -> Self {
    Self {
      data: cached.value,
      source: CacheSource::CacheFresh,
      cached_at: Some(cached.written_at.into()),
    }
  }

  /// Cached data served because the network attempt failed.
  pub fn offline(cached: Cached<T>) -> Self {
    Self {
      data: cached.value,
      source: CacheSource::Offline,
      cached_at: Some(cached.written_at.into()),
    }
  }
}

/// Indicates where returned data came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSource {
  /// Fresh data from network
  Network,
  /// Data from cache within the throttle window
  CacheFresh,
  /// Network failed, serving cached data
  Offline,
}

impl CacheSource {
  pub fn label(&self) -> &'static str {
    match self {
      Self::Network => "network",
      Self::CacheFresh => "cache",
      Self::Offline => "offline",
    }
  }
}

//! Persisted "last requested at" times per request key.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, MutexGuard};
use tracing::warn;

use crate::db::KeyValueStore;
use crate::error::SettingsError;

/// Settings key the whole map is stored under.
pub const REQUEST_TIME_KEY: &str = "requestTimeMap";

type TimeMap = HashMap<String, f64>;

/// Key to seconds-since-epoch map, persisted as one JSON blob.
///
/// The map is loaded lazily and written back on every change. Store access
/// runs on the blocking pool. Persistence failures are logged; the in-memory
/// copy stays authoritative for the lifetime of the process.
pub struct RequestTimes {
  store: Arc<dyn KeyValueStore>,
  times: Mutex<Option<TimeMap>>,
}

fn load(store: &dyn KeyValueStore) -> Result<TimeMap, SettingsError> {
  match store.get(REQUEST_TIME_KEY)? {
    Some(bytes) => Ok(serde_json::from_slice(&bytes)?),
    None => Ok(HashMap::new()),
  }
}

impl RequestTimes {
  pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
    Self {
      store,
      times: Mutex::new(None),
    }
  }

  async fn loaded(&self) -> MutexGuard<'_, Option<TimeMap>> {
    let mut guard = self.times.lock().await;
    if guard.is_none() {
      let store = Arc::clone(&self.store);
      let times = match tokio::task::spawn_blocking(move || load(store.as_ref())).await {
        Ok(Ok(times)) => times,
        Ok(Err(e)) => {
          warn!(error = %e, "could not load request times, starting empty");
          HashMap::new()
        }
        Err(e) => {
          warn!(error = %e, "request time load failed, starting empty");
          HashMap::new()
        }
      };
      *guard = Some(times);
    }
    guard
  }

  /// Seconds since the epoch of the last request for `key`.
  pub async fn last_requested(&self, key: &str) -> Option<f64> {
    let guard = self.loaded().await;
    guard.as_ref().and_then(|times| times.get(key).copied())
  }

  pub async fn record(&self, key: &str, epoch_secs: f64) {
    let mut guard = self.loaded().await;
    let times = guard.get_or_insert_with(HashMap::new);
    times.insert(key.to_string(), epoch_secs);
    self.persist(times).await;
  }

  /// Drop the records of `keys`, persisting once if anything changed.
  pub async fn forget(&self, keys: &[String]) {
    let mut guard = self.loaded().await;
    let times = guard.get_or_insert_with(HashMap::new);
    let before = times.len();
    for key in keys {
      times.remove(key);
    }
    if times.len() != before {
      self.persist(times).await;
    }
  }

  /// Called with the map lock held so writes land in order.
  async fn persist(&self, times: &TimeMap) {
    let bytes = match serde_json::to_vec(times) {
      Ok(bytes) => bytes,
      Err(e) => {
        warn!(error = %e, "could not encode request times");
        return;
      }
    };
    let store = Arc::clone(&self.store);
    match tokio::task::spawn_blocking(move || store.set(REQUEST_TIME_KEY, &bytes)).await {
      Ok(Ok(())) => {}
      Ok(Err(e)) => warn!(error = %e, "could not persist request times"),
      Err(e) => warn!(error = %e, "request time persist failed"),
    }
  }
}

//! Throttle gate between callers and the request executor.
//!
//! Within an endpoint's throttle window the gate answers from the cache store
//! without touching the network. Otherwise it records the request time and
//! runs the endpoint, falling back to cached data if the run fails.
//! Concurrent fetches of the same key share a single in-flight run.

use std::any::Any;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt, Shared};
use tracing::{debug, info, warn};

use crate::clock::{Clock, SystemClock};
use crate::db::KeyValueStore;
use crate::error::{CacheError, NetworkError, Result};
use crate::network::{CacheInterceptor, Endpoint, NetworkService};
use crate::task::{CancelToken, TaskHandle};

use super::disk::SweepReport;
use super::store::{CacheStore, DiskCodec, JsonCodec};
use super::time_records::RequestTimes;
use super::traits::{CacheResult, Cacheable};

type SharedRun<T> = Shared<BoxFuture<'static, Result<T>>>;

struct InFlight {
  generation: u64,
  token: CancelToken,
  waiters: usize,
  /// A `SharedRun<T>` for the endpoint's payload type.
  run: Box<dyn Any + Send + Sync>,
}

type InFlightMap = Arc<Mutex<HashMap<String, InFlight>>>;

fn lock(map: &InFlightMap) -> MutexGuard<'_, HashMap<String, InFlight>> {
  map.lock().unwrap_or_else(|e| e.into_inner())
}

/// One caller's share of an in-flight run.
struct Waiter<T> {
  run: SharedRun<T>,
  guard: WaiterGuard,
}

impl<T: Clone> Waiter<T> {
  async fn wait(mut self) -> Result<T> {
    let result = self.run.await;
    self.guard.finished = true;
    result
  }
}

/// Leaves the run when the waiter goes away early; the last one to leave
/// cancels it.
struct WaiterGuard {
  in_flight: InFlightMap,
  key: String,
  generation: u64,
  finished: bool,
}

impl Drop for WaiterGuard {
  fn drop(&mut self) {
    if self.finished {
      return;
    }
    let mut map = lock(&self.in_flight);
    let Some(entry) = map.get_mut(&self.key) else {
      return;
    };
    if entry.generation != self.generation {
      return;
    }
    entry.waiters = entry.waiters.saturating_sub(1);
    if entry.waiters == 0 {
      debug!(key = %self.key, "last waiter left, cancelling request");
      entry.token.cancel();
      map.remove(&self.key);
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
  Throttled,
  Bypass,
}

/// Throttled, coalescing front door to a [`NetworkService`].
///
/// Endpoints should carry [`cache_interceptor`](Self::cache_interceptor) so
/// successful runs are written to the cache store.
pub struct CacheLayer<C: DiskCodec = JsonCodec> {
  service: NetworkService,
  cache: CacheStore<C>,
  interceptor: Arc<CacheInterceptor<C>>,
  times: Arc<RequestTimes>,
  clock: Arc<dyn Clock>,
  in_flight: InFlightMap,
  generations: Arc<AtomicU64>,
}

impl<C: DiskCodec> Clone for CacheLayer<C> {
  fn clone(&self) -> Self {
    Self {
      service: self.service.clone(),
      cache: self.cache.clone(),
      interceptor: Arc::clone(&self.interceptor),
      times: Arc::clone(&self.times),
      clock: Arc::clone(&self.clock),
      in_flight: Arc::clone(&self.in_flight),
      generations: Arc::clone(&self.generations),
    }
  }
}

impl<C: DiskCodec> CacheLayer<C> {
  /// Create a gate persisting request times in `settings`.
  pub fn new(service: NetworkService, cache: CacheStore<C>, settings: Arc<dyn KeyValueStore>) -> Self {
    Self {
      service,
      interceptor: Arc::new(CacheInterceptor::new(cache.clone())),
      cache,
      times: Arc::new(RequestTimes::new(settings)),
      clock: Arc::new(SystemClock),
      in_flight: Arc::new(Mutex::new(HashMap::new())),
      generations: Arc::new(AtomicU64::new(0)),
    }
  }

  /// Set the clock used for throttle windows.
  pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
    self.clock = clock;
    self
  }

  pub fn cache(&self) -> &CacheStore<C> {
    &self.cache
  }

  pub fn service(&self) -> &NetworkService {
    &self.service
  }

  pub fn request_times(&self) -> &RequestTimes {
    &self.times
  }

  /// The write-through interceptor bound to this gate's cache store.
  pub fn cache_interceptor(&self) -> Arc<CacheInterceptor<C>> {
    Arc::clone(&self.interceptor)
  }

  /// Number of distinct keys with a run in flight.
  pub fn in_flight(&self) -> usize {
    lock(&self.in_flight).len()
  }

  /// Sweep the cache store and drop the request times and revalidation
  /// state of every key it deleted.
  pub async fn sweep(&self) -> std::result::Result<SweepReport, CacheError> {
    let report = self.cache.sweep().await?;
    if !report.removed.is_empty() {
      self.times.forget(&report.removed).await;
      self.interceptor.forget(&report.removed);
      debug!(keys = report.removed.len(), "pruned request state of swept keys");
    }
    Ok(report)
  }

  /// Serve from cache inside the throttle window, else fetch.
  pub fn fetch_with_throttle<T: Cacheable>(&self, endpoint: Endpoint<T>) -> TaskHandle<T> {
    let gate = self.clone();
    TaskHandle::spawn(move |_| async move {
      gate
        .resolve(endpoint, Mode::Throttled)
        .await
        .map(|result| result.data)
    })
  }

  /// Like [`fetch_with_throttle`](Self::fetch_with_throttle), also reporting
  /// where the value came from.
  pub fn fetch_with_source<T: Cacheable>(&self, endpoint: Endpoint<T>) -> TaskHandle<CacheResult<T>> {
    let gate = self.clone();
    TaskHandle::spawn(move |_| async move { gate.resolve(endpoint, Mode::Throttled).await })
  }

  /// Always hit the network. The request time is still recorded and
  /// failures are returned as is.
  pub fn fetch_bypassing_throttle<T: Cacheable>(&self, endpoint: Endpoint<T>) -> TaskHandle<T> {
    let gate = self.clone();
    TaskHandle::spawn(move |_| async move {
      gate
        .resolve(endpoint, Mode::Bypass)
        .await
        .map(|result| result.data)
    })
  }

  async fn within_window(&self, key: &str, interval: Duration) -> bool {
    let Some(last) = self.times.last_requested(key).await else {
      return false;
    };
    // A clock that moved backwards never suppresses a fetch
    let elapsed = self.clock.epoch_secs() - last;
    elapsed >= 0.0 && elapsed < interval.as_secs_f64()
  }

  async fn resolve<T: Cacheable>(self, endpoint: Endpoint<T>, mode: Mode) -> Result<CacheResult<T>> {
    let key = endpoint.unique_key();

    if mode == Mode::Throttled {
      if let Some(interval) = endpoint.throttle_interval() {
        if self.within_window(&key, interval).await {
          if let Some(cached) = self.cache.fetch_entry::<T>(&key).await {
            debug!(key = %key, "within throttle window, serving cache");
            return Ok(CacheResult::from_cache(cached));
          }
          debug!(key = %key, "within throttle window but nothing cached");
        }
      }
    }

    self.times.record(&key, self.clock.epoch_secs()).await;
    let waiter = self.join(&endpoint, &key);

    match waiter.wait().await {
      Ok(value) => Ok(CacheResult::from_network(value)),
      Err(error) if mode == Mode::Throttled => match self.cache.fetch_entry::<T>(&key).await {
        Some(cached) => {
          warn!(key = %key, error = %error, "request failed, serving cached data");
          Ok(CacheResult::offline(cached))
        }
        None => Err(error),
      },
      Err(error) => Err(error),
    }
  }

  /// Join the in-flight run for `key`, or start one.
  fn join<T: Cacheable>(&self, endpoint: &Endpoint<T>, key: &str) -> Waiter<T> {
    let mut map = lock(&self.in_flight);

    if let Some(entry) = map.get_mut(key) {
      if let Some(run) = entry.run.downcast_ref::<SharedRun<T>>() {
        entry.waiters += 1;
        debug!(key, waiters = entry.waiters, "joining in-flight request");
        return Waiter {
          run: run.clone(),
          guard: WaiterGuard {
            in_flight: Arc::clone(&self.in_flight),
            key: key.to_string(),
            generation: entry.generation,
            finished: false,
          },
        };
      }
    }

    let generation = self.generations.fetch_add(1, Ordering::Relaxed);
    let token = CancelToken::new();
    let run = self.spawn_run(endpoint.clone(), key.to_string(), generation, token.clone());
    info!(key, path = endpoint.path(), "fetching from network");

    map.insert(
      key.to_string(),
      InFlight {
        generation,
        token,
        waiters: 1,
        run: Box::new(run.clone()),
      },
    );

    Waiter {
      run,
      guard: WaiterGuard {
        in_flight: Arc::clone(&self.in_flight),
        key: key.to_string(),
        generation,
        finished: false,
      },
    }
  }

  fn spawn_run<T: Cacheable>(
    &self,
    endpoint: Endpoint<T>,
    key: String,
    generation: u64,
    token: CancelToken,
  ) -> SharedRun<T> {
    let service = self.service.clone();
    let in_flight = Arc::clone(&self.in_flight);

    let handle = tokio::spawn(async move {
      let result = service.run(&endpoint, &token).await;
      let mut map = lock(&in_flight);
      if map.get(&key).is_some_and(|entry| entry.generation == generation) {
        map.remove(&key);
      }
      result
    });

    async move {
      match handle.await {
        Ok(result) => result,
        Err(e) => Err(NetworkError::Generic(e.to_string())),
      }
    }
    .boxed()
    .shared()
  }
}

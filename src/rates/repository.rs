//! Exchange-rate repository backed by the throttle gate.

use crate::cache::{CacheLayer, CacheResult, DiskCodec, JsonCodec};
use crate::task::TaskHandle;

use super::endpoints::RatesEndpoints;
use super::types::ExchangeSnapshot;

/// What callers outside the pipeline use to get rates.
pub trait CurrencyRepository: Send + Sync {
  /// Always hits the network; the request time is still recorded.
  fn fetch_latest(&self) -> TaskHandle<ExchangeSnapshot>;

  /// Answers from cache inside the throttle window, falls back to cache when
  /// the network fails.
  fn fetch_with_throttle(&self) -> TaskHandle<ExchangeSnapshot>;

  /// Stop a fetch started by this repository.
  fn cancel(&self, handle: &TaskHandle<ExchangeSnapshot>) {
    handle.cancel();
  }
}

/// Rates repository on top of a [`CacheLayer`].
#[derive(Clone)]
pub struct RatesRepository<C: DiskCodec = JsonCodec> {
  gate: CacheLayer<C>,
  endpoints: RatesEndpoints,
}

impl<C: DiskCodec> RatesRepository<C> {
  /// The gate's cache interceptor is attached to every endpoint so
  /// successful fetches are written through to the cache store.
  pub fn new(gate: CacheLayer<C>, endpoints: RatesEndpoints) -> Self {
    let endpoints = endpoints.with_interceptor(gate.cache_interceptor());
    Self { gate, endpoints }
  }

  pub fn gate(&self) -> &CacheLayer<C> {
    &self.gate
  }

  /// Throttled fetch that also reports where the snapshot came from.
  pub fn fetch_with_source(&self) -> TaskHandle<CacheResult<ExchangeSnapshot>> {
    self.gate.fetch_with_source(self.endpoints.latest())
  }
}

impl<C: DiskCodec> CurrencyRepository for RatesRepository<C> {
  fn fetch_latest(&self) -> TaskHandle<ExchangeSnapshot> {
    self.gate.fetch_bypassing_throttle(self.endpoints.latest())
  }

  fn fetch_with_throttle(&self) -> TaskHandle<ExchangeSnapshot> {
    self.gate.fetch_with_throttle(self.endpoints.latest())
  }
}

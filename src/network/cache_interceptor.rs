//! Write-through caching and conditional revalidation.

use std::collections::HashMap;
use std::sync::Mutex;

use tracing::debug;

use crate::cache::{CacheStore, Cacheable, DiskCodec, JsonCodec};

use super::endpoint::Endpoint;
use super::interceptor::{Outcome, RequestInterceptor, ResponseInterceptor};
use super::transport::{RawResponse, WireRequest};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct Validators {
  etag: Option<String>,
  last_modified: Option<String>,
}

impl Validators {
  fn from_response(response: &RawResponse) -> Option<Self> {
    let validators = Self {
      etag: response.header("etag").map(str::to_string),
      last_modified: response
        .header("last-modified")
        .or_else(|| response.header("date"))
        .map(str::to_string),
    };
    if validators.etag.is_none() && validators.last_modified.is_none() {
      None
    } else {
      Some(validators)
    }
  }
}

/// Stores every decoded value under the endpoint's unique key and answers
/// `304 Not Modified` from the memory tier.
///
/// Register it on an endpoint with [`Endpoint::with_interceptor`].
pub struct CacheInterceptor<C: DiskCodec = JsonCodec> {
  cache: CacheStore<C>,
  validators: Mutex<HashMap<String, Validators>>,
}

impl<C: DiskCodec> CacheInterceptor<C> {
  pub fn new(cache: CacheStore<C>) -> Self {
    Self {
      cache,
      validators: Mutex::new(HashMap::new()),
    }
  }

  /// Drop the validators of `keys`, e.g. after their cache files were swept.
  pub fn forget(&self, keys: &[String]) {
    let mut validators = self.validators();
    for key in keys {
      validators.remove(key);
    }
  }

  fn validators(&self) -> std::sync::MutexGuard<'_, HashMap<String, Validators>> {
    self.validators.lock().unwrap_or_else(|e| e.into_inner())
  }
}

impl<T: Cacheable, C: DiskCodec> RequestInterceptor<T> for CacheInterceptor<C> {
  fn after_generate(&self, mut request: WireRequest, endpoint: &Endpoint<T>) -> (WireRequest, Outcome<T>) {
    let known = self.validators().get(&endpoint.unique_key()).cloned();
    if let Some(validators) = known {
      if let Some(etag) = validators.etag {
        request.set_header("If-None-Match", etag);
      }
      if let Some(date) = validators.last_modified {
        request.set_header("If-Modified-Since", date);
      }
    }
    (request, Outcome::Continue)
  }
}

impl<T: Cacheable, C: DiskCodec> ResponseInterceptor<T> for CacheInterceptor<C> {
  fn before_decode(&self, response: RawResponse, endpoint: &Endpoint<T>) -> (RawResponse, Outcome<T>) {
    let key = endpoint.unique_key();

    if response.is_not_modified() {
      if let Some(cached) = self.cache.fetch_memory::<T>(&key) {
        debug!(key = %key, "not modified, serving memory cache");
        return (response, Outcome::ShortCircuit(cached));
      }
      // Nothing to revalidate against; ask for the full body next time
      debug!(key = %key, "not modified but memory cache is empty");
      self.validators().remove(&key);
      return (response, Outcome::Continue);
    }

    if let Some(validators) = Validators::from_response(&response) {
      self.validators().insert(key, validators);
    }
    (response, Outcome::Continue)
  }

  fn after_decode(&self, value: T, endpoint: &Endpoint<T>) -> (T, Outcome<T>) {
    // Best effort; a failed disk write is logged by the store
    drop(self.cache.store(&endpoint.unique_key(), value.clone()));
    (value, Outcome::Continue)
  }
}

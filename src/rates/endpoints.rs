//! Endpoint factory for the exchange-rate API.

use std::sync::Arc;
use std::time::Duration;

use crate::network::{Endpoint, RequestInterceptor, ResponseInterceptor};

use super::types::{CurrencyCode, ExchangeSnapshot};

/// Builds rates endpoints with a shared interceptor list and throttle window.
#[derive(Clone)]
pub struct RatesEndpoints {
  base: CurrencyCode,
  request_interceptors: Vec<Arc<dyn RequestInterceptor<ExchangeSnapshot>>>,
  response_interceptors: Vec<Arc<dyn ResponseInterceptor<ExchangeSnapshot>>>,
  throttle: Option<Duration>,
}

impl RatesEndpoints {
  pub fn new(base: CurrencyCode) -> Self {
    Self {
      base,
      request_interceptors: Vec::new(),
      response_interceptors: Vec::new(),
      throttle: None,
    }
  }

  /// Attach `interceptor` to both chains of every endpoint built here.
  pub fn with_interceptor<I>(mut self, interceptor: Arc<I>) -> Self
  where
    I: RequestInterceptor<ExchangeSnapshot> + ResponseInterceptor<ExchangeSnapshot> + 'static,
  {
    self.request_interceptors.push(interceptor.clone());
    self.response_interceptors.push(interceptor);
    self
  }

  pub fn with_throttle(mut self, interval: Duration) -> Self {
    self.throttle = Some(interval);
    self
  }

  /// `GET latest.json?base=<base>`
  pub fn latest(&self) -> Endpoint<ExchangeSnapshot> {
    let mut endpoint = Endpoint::get("latest.json").with_query("base", self.base.as_str());
    for interceptor in &self.request_interceptors {
      endpoint = endpoint.with_request_interceptor(Arc::clone(interceptor));
    }
    for interceptor in &self.response_interceptors {
      endpoint = endpoint.with_response_interceptor(Arc::clone(interceptor));
    }
    if let Some(interval) = self.throttle {
      endpoint = endpoint.with_throttle(interval);
    }
    endpoint
  }
}

//! Request and response hooks.
//!
//! Every hook has a pass-through default, so an interceptor only implements
//! the stages it cares about. Hooks run strictly in registration order; the
//! first [`Outcome::ShortCircuit`] ends the pipeline with that value.

use tracing::debug;

use super::endpoint::Endpoint;
use super::transport::{RawResponse, WireRequest};

/// Whether the pipeline keeps going after a hook.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome<T> {
  Continue,
  ShortCircuit(T),
}

impl<T> Outcome<T> {
  pub fn is_continue(&self) -> bool {
    matches!(self, Outcome::Continue)
  }
}

/// Hook run after the wire request is generated, before the transport call.
pub trait RequestInterceptor<T>: Send + Sync {
  fn after_generate(&self, request: WireRequest, _endpoint: &Endpoint<T>) -> (WireRequest, Outcome<T>) {
    (request, Outcome::Continue)
  }
}

/// Hooks run on the raw response and on the decoded value.
pub trait ResponseInterceptor<T>: Send + Sync {
  fn before_decode(
    &self,
    response: RawResponse,
    _endpoint: &Endpoint<T>,
  ) -> (RawResponse, Outcome<T>) {
    (response, Outcome::Continue)
  }

  fn after_decode(&self, value: T, _endpoint: &Endpoint<T>) -> (T, Outcome<T>) {
    (value, Outcome::Continue)
  }
}

/// Payload-independent hook shared by every request of a [`NetworkService`].
///
/// Global hooks run before the endpoint's own chain. A short-circuit here
/// supplies a synthetic response that continues through the pipeline as if
/// the transport had returned it.
///
/// [`NetworkService`]: super::NetworkService
pub trait WireInterceptor: Send + Sync {
  fn after_generate(&self, request: WireRequest) -> (WireRequest, Outcome<RawResponse>) {
    (request, Outcome::Continue)
  }

  fn before_decode(&self, response: RawResponse) -> RawResponse {
    response
  }
}

/// Logs each request and response, with query values of `redacted` params hidden.
#[derive(Debug, Clone, Default)]
pub struct LoggingInterceptor {
  redacted: Vec<String>,
}

impl LoggingInterceptor {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn redact(mut self, param: impl Into<String>) -> Self {
    self.redacted.push(param.into());
    self
  }

  fn display_url(&self, request: &WireRequest) -> String {
    let mut url = request.url.clone();
    if !self.redacted.is_empty() && url.query().is_some() {
      let pairs: Vec<(String, String)> = request
        .url
        .query_pairs()
        .map(|(k, v)| {
          let value = if self.redacted.iter().any(|r| r == k.as_ref()) {
            String::from("***")
          } else {
            v.into_owned()
          };
          (k.into_owned(), value)
        })
        .collect();
      url.query_pairs_mut().clear().extend_pairs(pairs);
    }
    url.to_string()
  }
}

impl WireInterceptor for LoggingInterceptor {
  fn after_generate(&self, request: WireRequest) -> (WireRequest, Outcome<RawResponse>) {
    debug!(method = %request.method, url = %self.display_url(&request), "sending request");
    (request, Outcome::Continue)
  }

  fn before_decode(&self, response: RawResponse) -> RawResponse {
    debug!(status = response.status, bytes = response.body.len(), "received response");
    response
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::collections::BTreeMap;
  use url::Url;

  use crate::network::transport::HttpMethod;

  #[test]
  fn test_redacted_params_are_hidden() {
    let request = WireRequest {
      method: HttpMethod::Get,
      url: Url::parse("https://api.test/latest.json?base=USD&app_id=secret").unwrap(),
      headers: BTreeMap::new(),
      body: None,
    };
    let logger = LoggingInterceptor::new().redact("app_id");
    let shown = logger.display_url(&request);
    assert!(shown.contains("base=USD"));
    assert!(!shown.contains("secret"));
  }

  #[test]
  fn test_default_hooks_pass_through() {
    struct Nothing;
    impl RequestInterceptor<u32> for Nothing {}
    impl ResponseInterceptor<u32> for Nothing {}

    let endpoint: Endpoint<u32> = Endpoint::get("x");
    let (value, outcome) = ResponseInterceptor::after_decode(&Nothing, 5, &endpoint);
    assert_eq!(value, 5);
    assert!(outcome.is_continue());

    let response = RawResponse::new(200, "{}");
    let (same, outcome) = Nothing.before_decode(response.clone(), &endpoint);
    assert_eq!(same, response);
    assert!(outcome.is_continue());
  }
}

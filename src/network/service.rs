//! Request executor.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use tracing::{debug, info};
use url::Url;

use crate::error::{NetworkError, ResponseError, Result};
use crate::task::{CancelToken, TaskHandle};

use super::endpoint::Endpoint;
use super::interceptor::{Outcome, WireInterceptor};
use super::transport::{RawResponse, Transport, TransportError};

/// Settings shared by every request of a [`NetworkService`].
#[derive(Clone)]
pub struct NetworkConfig {
  pub base_url: Url,
  pub headers: BTreeMap<String, String>,
  /// Appended after each endpoint's own query params.
  pub query: BTreeMap<String, String>,
  interceptors: Vec<Arc<dyn WireInterceptor>>,
}

impl NetworkConfig {
  pub fn new(base_url: Url) -> Self {
    Self {
      base_url,
      headers: BTreeMap::new(),
      query: BTreeMap::new(),
      interceptors: Vec::new(),
    }
  }

  pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
    self.headers.insert(name.to_ascii_lowercase(), value.into());
    self
  }

  pub fn with_query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
    self.query.insert(name.into(), value.into());
    self
  }

  /// Append a global interceptor. Global hooks run before endpoint hooks.
  pub fn with_interceptor(mut self, interceptor: Arc<dyn WireInterceptor>) -> Self {
    self.interceptors.push(interceptor);
    self
  }

  pub fn interceptors(&self) -> &[Arc<dyn WireInterceptor>] {
    &self.interceptors
  }
}

impl fmt::Debug for NetworkConfig {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    // Query values may hold credentials
    f.debug_struct("NetworkConfig")
      .field("base_url", &self.base_url.as_str())
      .field("headers", &self.headers.keys().collect::<Vec<_>>())
      .field("query", &self.query.keys().collect::<Vec<_>>())
      .field("interceptors", &self.interceptors.len())
      .finish()
  }
}

/// Runs endpoints through the interceptor chain and the transport.
#[derive(Clone)]
pub struct NetworkService {
  config: Arc<NetworkConfig>,
  transport: Arc<dyn Transport>,
}

impl NetworkService {
  pub fn new(config: NetworkConfig, transport: Arc<dyn Transport>) -> Self {
    Self {
      config: Arc::new(config),
      transport,
    }
  }

  pub fn config(&self) -> &NetworkConfig {
    &self.config
  }

  /// Start `endpoint` on the runtime and return a cancellable handle.
  pub fn execute<T: Send + 'static>(&self, endpoint: Endpoint<T>) -> TaskHandle<T> {
    let service = self.clone();
    TaskHandle::spawn(move |token| async move { service.run(&endpoint, &token).await })
  }

  /// Run the whole pipeline on the current task, observing `token`.
  pub async fn run<T>(&self, endpoint: &Endpoint<T>, token: &CancelToken) -> Result<T> {
    token.check()?;
    let mut request = endpoint.wire_request(&self.config)?;

    let mut synthetic: Option<RawResponse> = None;
    for interceptor in self.config.interceptors() {
      let (next, outcome) = interceptor.after_generate(request);
      request = next;
      if let Outcome::ShortCircuit(response) = outcome {
        debug!(path = endpoint.path(), "global interceptor supplied a response");
        synthetic = Some(response);
        break;
      }
    }

    if synthetic.is_none() {
      for interceptor in endpoint.request_interceptors() {
        let (next, outcome) = interceptor.after_generate(request, endpoint);
        request = next;
        if let Outcome::ShortCircuit(value) = outcome {
          debug!(path = endpoint.path(), "request interceptor short-circuited");
          return Ok(value);
        }
      }
    }

    let mut response = match synthetic {
      Some(response) => response,
      None => {
        token.check()?;
        info!(method = %request.method, path = endpoint.path(), "network request");
        let sent = tokio::select! {
          biased;
          _ = token.cancelled() => return Err(NetworkError::cancelled()),
          sent = self.transport.send(request) => sent,
        };
        token.check()?;
        sent.map_err(classify)?
      }
    };

    if !response.is_acceptable() {
      debug!(status = response.status, path = endpoint.path(), "unacceptable status");
      return Err(
        ResponseError::Status {
          status: response.status,
          body: response.body,
        }
        .into(),
      );
    }

    for interceptor in self.config.interceptors() {
      response = interceptor.before_decode(response);
    }
    for interceptor in endpoint.response_interceptors() {
      let (next, outcome) = interceptor.before_decode(response, endpoint);
      response = next;
      if let Outcome::ShortCircuit(value) = outcome {
        debug!(path = endpoint.path(), "response interceptor short-circuited");
        return Ok(value);
      }
    }

    // Whether an empty body is acceptable is up to the decoder
    let mut value = endpoint
      .decoder()
      .decode(&response.body)
      .map_err(|e| match e.downcast::<ResponseError>() {
        Ok(error) => NetworkError::from(*error),
        Err(e) => NetworkError::from(ResponseError::Decode(e.to_string())),
      })?;

    // Last point before the value reaches the cache
    token.check()?;

    for interceptor in endpoint.response_interceptors() {
      let (next, outcome) = interceptor.after_decode(value, endpoint);
      value = next;
      if let Outcome::ShortCircuit(value) = outcome {
        return Ok(value);
      }
    }

    Ok(value)
  }
}

impl fmt::Debug for NetworkService {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("NetworkService")
      .field("config", &self.config)
      .finish_non_exhaustive()
  }
}

fn classify(error: TransportError) -> NetworkError {
  match error {
    TransportError::NotConnected(_) => ResponseError::NotConnected.into(),
    TransportError::Cancelled => NetworkError::cancelled(),
    TransportError::TimedOut => NetworkError::Generic(String::from("timed out")),
    TransportError::Other(msg) => NetworkError::Generic(msg),
  }
}

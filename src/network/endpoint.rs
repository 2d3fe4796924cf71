//! Immutable description of one logical request.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde_json::Value;
use sha2::{Digest, Sha256};
use url::Url;

use crate::error::{RequestGenerationError, ResponseError};

use super::interceptor::{RequestInterceptor, ResponseInterceptor};
use super::service::NetworkConfig;
use super::transport::{HttpMethod, WireRequest};

/// How body parameters are serialized onto the wire.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum BodyEncoding {
  #[default]
  Json,
  /// `k=v&k2=v2`, percent-encoded ASCII.
  UrlEncoded,
}

pub type DecodeError = Box<dyn std::error::Error + Send + Sync>;

/// Turns response bytes into a typed payload.
pub trait ResponseDecoder<T>: Send + Sync {
  fn decode(&self, bytes: &[u8]) -> Result<T, DecodeError>;
}

/// JSON payloads. An empty body fails with [`ResponseError::EmptyBody`].
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonDecoder;

impl<T: DeserializeOwned> ResponseDecoder<T> for JsonDecoder {
  fn decode(&self, bytes: &[u8]) -> Result<T, DecodeError> {
    if bytes.is_empty() {
      return Err(Box::new(ResponseError::EmptyBody));
    }
    Ok(serde_json::from_slice(bytes)?)
  }
}

/// Ordered parameter list; a repeated name replaces the earlier value in place.
type Params = Vec<(String, Value)>;

fn set_param(params: &mut Params, name: String, value: Value) {
  match params.iter_mut().find(|(k, _)| *k == name) {
    Some(slot) => slot.1 = value,
    None => params.push((name, value)),
  }
}

/// Description of a request producing `T`.
///
/// Constructed per call site and never mutated once handed to the executor.
/// [`unique_key`](Self::unique_key) doubles as the cache key and the throttle
/// key, so it only depends on what identifies the resource on the server.
pub struct Endpoint<T> {
  path: String,
  is_full_path: bool,
  method: HttpMethod,
  headers: BTreeMap<String, String>,
  query: Params,
  body: Params,
  body_encoding: BodyEncoding,
  decoder: Arc<dyn ResponseDecoder<T>>,
  request_interceptors: Vec<Arc<dyn RequestInterceptor<T>>>,
  response_interceptors: Vec<Arc<dyn ResponseInterceptor<T>>>,
  throttle_interval: Option<Duration>,
}

impl<T: DeserializeOwned + 'static> Endpoint<T> {
  /// Create an endpoint decoding JSON responses.
  pub fn new(method: HttpMethod, path: impl Into<String>) -> Self {
    Self::with_decoder(method, path, JsonDecoder)
  }

  pub fn get(path: impl Into<String>) -> Self {
    Self::new(HttpMethod::Get, path)
  }

  pub fn post(path: impl Into<String>) -> Self {
    Self::new(HttpMethod::Post, path)
  }
}

impl<T> Endpoint<T> {
  pub fn with_decoder(
    method: HttpMethod,
    path: impl Into<String>,
    decoder: impl ResponseDecoder<T> + 'static,
  ) -> Self {
    Self {
      path: path.into(),
      is_full_path: false,
      method,
      headers: BTreeMap::new(),
      query: Vec::new(),
      body: Vec::new(),
      body_encoding: BodyEncoding::default(),
      decoder: Arc::new(decoder),
      request_interceptors: Vec::new(),
      response_interceptors: Vec::new(),
      throttle_interval: None,
    }
  }

  /// Treat `path` as an absolute URL instead of joining it to the base URL.
  pub fn full_path(mut self) -> Self {
    self.is_full_path = true;
    self
  }

  pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
    self.headers.insert(name.to_ascii_lowercase(), value.into());
    self
  }

  pub fn with_query(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
    set_param(&mut self.query, name.into(), value.into());
    self
  }

  pub fn with_body_param(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
    set_param(&mut self.body, name.into(), value.into());
    self
  }

  pub fn with_body_encoding(mut self, encoding: BodyEncoding) -> Self {
    self.body_encoding = encoding;
    self
  }

  pub fn with_request_interceptor(mut self, interceptor: Arc<dyn RequestInterceptor<T>>) -> Self {
    self.request_interceptors.push(interceptor);
    self
  }

  pub fn with_response_interceptor(
    mut self,
    interceptor: Arc<dyn ResponseInterceptor<T>>,
  ) -> Self {
    self.response_interceptors.push(interceptor);
    self
  }

  /// Register an interceptor on both the request and the response chain.
  pub fn with_interceptor<I>(self, interceptor: Arc<I>) -> Self
  where
    I: RequestInterceptor<T> + ResponseInterceptor<T> + 'static,
  {
    let request: Arc<dyn RequestInterceptor<T>> = interceptor.clone();
    let response: Arc<dyn ResponseInterceptor<T>> = interceptor;
    self
      .with_request_interceptor(request)
      .with_response_interceptor(response)
  }

  pub fn with_throttle(mut self, interval: Duration) -> Self {
    self.throttle_interval = Some(interval);
    self
  }

  pub fn path(&self) -> &str {
    &self.path
  }

  pub fn method(&self) -> HttpMethod {
    self.method
  }

  pub fn throttle_interval(&self) -> Option<Duration> {
    self.throttle_interval
  }

  pub fn decoder(&self) -> &dyn ResponseDecoder<T> {
    self.decoder.as_ref()
  }

  pub fn request_interceptors(&self) -> &[Arc<dyn RequestInterceptor<T>>] {
    &self.request_interceptors
  }

  pub fn response_interceptors(&self) -> &[Arc<dyn ResponseInterceptor<T>>] {
    &self.response_interceptors
  }

  /// Stable identity of this request shape across process restarts.
  ///
  /// SHA-256 over path, method, and the sorted header, query and body
  /// parameters, hex encoded so it is safe to use as a file name.
  pub fn unique_key(&self) -> String {
    let components = [
      self.path.clone(),
      self.method.as_str().to_string(),
      sorted_pairs(self.headers.iter().map(|(k, v)| (k.as_str(), v.clone()))),
      sorted_pairs(self.query.iter().map(|(k, v)| (k.as_str(), param_to_string(v)))),
      sorted_pairs(self.body.iter().map(|(k, v)| (k.as_str(), param_to_string(v)))),
    ];

    let mut hasher = Sha256::new();
    hasher.update(components.join("|").as_bytes());
    hex::encode(hasher.finalize())
  }

  /// Resolve the full URL against the configured base URL.
  pub fn url(&self, config: &NetworkConfig) -> Result<Url, RequestGenerationError> {
    let raw = if self.is_full_path {
      if self.path.is_empty() {
        return Err(RequestGenerationError::InvalidPath(self.path.clone()));
      }
      self.path.clone()
    } else {
      if self.path.contains("://") {
        return Err(RequestGenerationError::InvalidPath(self.path.clone()));
      }
      let mut base = config.base_url.as_str().to_string();
      if !base.ends_with('/') {
        base.push('/');
      }
      base.push_str(self.path.trim_start_matches('/'));
      base
    };

    let mut url = Url::parse(&raw).map_err(|_| RequestGenerationError::InvalidUrl(raw.clone()))?;
    if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
      return Err(RequestGenerationError::InvalidUrl(raw));
    }
    if url.cannot_be_a_base() {
      return Err(RequestGenerationError::InvalidPath(self.path.clone()));
    }

    let items: Vec<(String, String)> = self
      .query
      .iter()
      .map(|(k, v)| (k.clone(), param_to_string(v)))
      .chain(config.query.iter().map(|(k, v)| (k.clone(), v.clone())))
      .collect();
    if !items.is_empty() {
      url.query_pairs_mut().extend_pairs(items);
    }

    Ok(url)
  }

  /// Build the wire request: URL, merged headers, and encoded body.
  pub fn wire_request(&self, config: &NetworkConfig) -> Result<WireRequest, RequestGenerationError> {
    let url = self.url(config)?;

    let mut headers: BTreeMap<String, String> = config
      .headers
      .iter()
      .map(|(k, v)| (k.to_ascii_lowercase(), v.clone()))
      .collect();
    headers.extend(self.headers.clone());

    let body = if self.body.is_empty() {
      None
    } else {
      let (bytes, content_type) = self.encode_body()?;
      headers
        .entry(String::from("content-type"))
        .or_insert_with(|| content_type.to_string());
      Some(bytes)
    };

    Ok(WireRequest {
      method: self.method,
      url,
      headers,
      body,
    })
  }

  fn encode_body(&self) -> Result<(Vec<u8>, &'static str), RequestGenerationError> {
    match self.body_encoding {
      BodyEncoding::Json => {
        let object: serde_json::Map<String, Value> = self.body.iter().cloned().collect();
        serde_json::to_vec(&object)
          .map(|bytes| (bytes, "application/json"))
          .map_err(|e| RequestGenerationError::InvalidBody(e.to_string()))
      }
      BodyEncoding::UrlEncoded => {
        let encoded = url::form_urlencoded::Serializer::new(String::new())
          .extend_pairs(self.body.iter().map(|(k, v)| (k.as_str(), param_to_string(v))))
          .finish();
        Ok((encoded.into_bytes(), "application/x-www-form-urlencoded"))
      }
    }
  }
}

impl<T> Clone for Endpoint<T> {
  fn clone(&self) -> Self {
    Self {
      path: self.path.clone(),
      is_full_path: self.is_full_path,
      method: self.method,
      headers: self.headers.clone(),
      query: self.query.clone(),
      body: self.body.clone(),
      body_encoding: self.body_encoding,
      decoder: Arc::clone(&self.decoder),
      request_interceptors: self.request_interceptors.clone(),
      response_interceptors: self.response_interceptors.clone(),
      throttle_interval: self.throttle_interval,
    }
  }
}

impl<T> fmt::Debug for Endpoint<T> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Endpoint")
      .field("method", &self.method)
      .field("path", &self.path)
      .field("is_full_path", &self.is_full_path)
      .field("query", &self.query)
      .field("throttle_interval", &self.throttle_interval)
      .finish_non_exhaustive()
  }
}

/// Strings are used verbatim, everything else in its JSON form.
fn param_to_string(value: &Value) -> String {
  match value {
    Value::String(s) => s.clone(),
    other => other.to_string(),
  }
}

fn sorted_pairs<'a>(pairs: impl Iterator<Item = (&'a str, String)>) -> String {
  let mut items: Vec<String> = pairs.map(|(k, v)| format!("{}={}", k, v)).collect();
  items.sort();
  items.join("&")
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::collections::HashMap;

  fn config() -> NetworkConfig {
    NetworkConfig::new(Url::parse("https://api.example.test/v1").unwrap())
      .with_query("app_id", "secret")
      .with_header("Accept", "application/json")
  }

  #[test]
  fn test_url_joins_base_and_appends_query() {
    let endpoint: Endpoint<Value> = Endpoint::get("latest.json").with_query("base", "USD");
    let url = endpoint.url(&config()).unwrap();
    assert_eq!(
      url.as_str(),
      "https://api.example.test/v1/latest.json?base=USD&app_id=secret"
    );
  }

  #[test]
  fn test_full_path_ignores_base() {
    let endpoint: Endpoint<Value> = Endpoint::get("https://other.test/x").full_path();
    let url = endpoint.url(&config()).unwrap();
    assert!(url.as_str().starts_with("https://other.test/x?"));
  }

  #[test]
  fn test_invalid_full_url_is_rejected() {
    let endpoint: Endpoint<Value> = Endpoint::get("not a url").full_path();
    assert!(matches!(
      endpoint.url(&config()),
      Err(RequestGenerationError::InvalidUrl(_))
    ));
  }

  #[test]
  fn test_absolute_relative_path_is_rejected() {
    let endpoint: Endpoint<Value> = Endpoint::get("https://other.test/x");
    assert!(matches!(
      endpoint.url(&config()),
      Err(RequestGenerationError::InvalidPath(_))
    ));
  }

  #[test]
  fn test_endpoint_headers_override_global() {
    let endpoint: Endpoint<Value> =
      Endpoint::get("latest.json").with_header("accept", "text/plain");
    let request = endpoint.wire_request(&config()).unwrap();
    assert_eq!(request.header("Accept"), Some("text/plain"));
    assert!(request.body.is_none());
  }

  #[test]
  fn test_json_body_encoding() {
    let endpoint: Endpoint<Value> = Endpoint::post("items").with_body_param("amount", 12);
    let request = endpoint.wire_request(&config()).unwrap();
    let body: HashMap<String, i64> = serde_json::from_slice(request.body.as_ref().unwrap()).unwrap();
    assert_eq!(body["amount"], 12);
    assert_eq!(request.header("content-type"), Some("application/json"));
  }

  #[test]
  fn test_url_encoded_body() {
    let endpoint: Endpoint<Value> = Endpoint::post("items")
      .with_body_param("name", "a b")
      .with_body_param("count", 2)
      .with_body_encoding(BodyEncoding::UrlEncoded);
    let request = endpoint.wire_request(&config()).unwrap();
    assert_eq!(request.body.as_deref(), Some(&b"name=a+b&count=2"[..]));
  }

  #[test]
  fn test_query_keeps_registration_order() {
    let endpoint: Endpoint<Value> = Endpoint::get("latest.json")
      .with_query("symbols", "JPY")
      .with_query("base", "USD")
      .with_query("symbols", "TWD");
    let url = endpoint.url(&config()).unwrap();
    assert_eq!(
      url.as_str(),
      "https://api.example.test/v1/latest.json?symbols=TWD&base=USD&app_id=secret"
    );
  }

  #[test]
  fn test_json_decoder_reports_empty_body() {
    let error = ResponseDecoder::<Value>::decode(&JsonDecoder, b"").unwrap_err();
    assert_eq!(
      error.downcast_ref::<ResponseError>(),
      Some(&ResponseError::EmptyBody)
    );
  }

  #[test]
  fn test_unique_key_is_order_independent_and_stable() {
    let a: Endpoint<Value> = Endpoint::get("latest.json")
      .with_query("base", "USD")
      .with_query("symbols", "JPY");
    let b: Endpoint<Value> = Endpoint::get("latest.json")
      .with_query("symbols", "JPY")
      .with_query("base", "USD");
    assert_eq!(a.unique_key(), b.unique_key());
    assert_eq!(a.unique_key().len(), 64);
    assert!(a.unique_key().chars().all(|c| c.is_ascii_hexdigit()));
  }

  #[test]
  fn test_unique_key_changes_with_shape() {
    let a: Endpoint<Value> = Endpoint::get("latest.json").with_query("base", "USD");
    let b: Endpoint<Value> = Endpoint::get("latest.json").with_query("base", "EUR");
    let c: Endpoint<Value> = Endpoint::post("latest.json").with_query("base", "USD");
    assert_ne!(a.unique_key(), b.unique_key());
    assert_ne!(a.unique_key(), c.unique_key());
  }

  #[test]
  fn test_unique_key_ignores_throttle_and_global_config() {
    let a: Endpoint<Value> = Endpoint::get("latest.json");
    let b: Endpoint<Value> = Endpoint::get("latest.json").with_throttle(Duration::from_secs(60));
    assert_eq!(a.unique_key(), b.unique_key());
  }
}

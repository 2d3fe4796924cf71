//! Wire-level request/response envelopes and the transport seam.

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use url::Url;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HttpMethod {
  Get,
  Head,
  Post,
  Put,
  Patch,
  Delete,
}

impl HttpMethod {
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Get => "GET",
      Self::Head => "HEAD",
      Self::Post => "POST",
      Self::Put => "PUT",
      Self::Patch => "PATCH",
      Self::Delete => "DELETE",
    }
  }
}

impl fmt::Display for HttpMethod {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// A fully resolved request, ready for the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WireRequest {
  pub method: HttpMethod,
  pub url: Url,
  /// Header names are lower-cased.
  pub headers: BTreeMap<String, String>,
  pub body: Option<Vec<u8>>,
}

impl WireRequest {
  pub fn header(&self, name: &str) -> Option<&str> {
    self
      .headers
      .get(&name.to_ascii_lowercase())
      .map(String::as_str)
  }

  pub fn set_header(&mut self, name: &str, value: impl Into<String>) {
    self.headers.insert(name.to_ascii_lowercase(), value.into());
  }
}

/// Status, headers and body bytes as returned by the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawResponse {
  pub status: u16,
  /// Header names are lower-cased.
  pub headers: BTreeMap<String, String>,
  pub body: Vec<u8>,
}

impl RawResponse {
  pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
    Self {
      status,
      headers: BTreeMap::new(),
      body: body.into(),
    }
  }

  pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
    self.headers.insert(name.to_ascii_lowercase(), value.into());
    self
  }

  pub fn header(&self, name: &str) -> Option<&str> {
    self
      .headers
      .get(&name.to_ascii_lowercase())
      .map(String::as_str)
  }

  /// 2xx or 3xx.
  pub fn is_acceptable(&self) -> bool {
    (200..400).contains(&self.status)
  }

  pub fn is_not_modified(&self) -> bool {
    self.status == 304
  }
}

/// Transport failures before any HTTP response was received.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
  NotConnected(String),
  Cancelled,
  TimedOut,
  Other(String),
}

impl fmt::Display for TransportError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::NotConnected(msg) => write!(f, "not connected: {}", msg),
      Self::Cancelled => f.write_str("cancelled"),
      Self::TimedOut => f.write_str("timed out"),
      Self::Other(msg) => f.write_str(msg),
    }
  }
}

impl std::error::Error for TransportError {}

pub type TransportFuture<'a> =
  Pin<Box<dyn Future<Output = Result<RawResponse, TransportError>> + Send + 'a>>;

/// The only true I/O suspension point of the request pipeline.
pub trait Transport: Send + Sync {
  fn send(&self, request: WireRequest) -> TransportFuture<'_>;
}

/// Production transport using reqwest.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
  client: reqwest::Client,
}

impl ReqwestTransport {
  /// Client with the crate's user agent and a per-request timeout.
  pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
    let client = reqwest::Client::builder()
      .user_agent(concat!("xrate/", env!("CARGO_PKG_VERSION")))
      .timeout(timeout)
      .build()?;
    Ok(Self::with_client(client))
  }

  pub fn with_client(client: reqwest::Client) -> Self {
    Self { client }
  }
}

fn to_reqwest_method(method: HttpMethod) -> reqwest::Method {
  match method {
    HttpMethod::Get => reqwest::Method::GET,
    HttpMethod::Head => reqwest::Method::HEAD,
    HttpMethod::Post => reqwest::Method::POST,
    HttpMethod::Put => reqwest::Method::PUT,
    HttpMethod::Patch => reqwest::Method::PATCH,
    HttpMethod::Delete => reqwest::Method::DELETE,
  }
}

fn classify(error: reqwest::Error) -> TransportError {
  if error.is_timeout() {
    TransportError::TimedOut
  } else if error.is_connect() {
    TransportError::NotConnected(error.to_string())
  } else {
    TransportError::Other(error.to_string())
  }
}

impl Transport for ReqwestTransport {
  fn send(&self, request: WireRequest) -> TransportFuture<'_> {
    Box::pin(async move {
      let mut builder = self
        .client
        .request(to_reqwest_method(request.method), request.url);

      for (name, value) in &request.headers {
        builder = builder.header(name, value);
      }

      if let Some(body) = request.body {
        builder = builder.body(body);
      }

      let response = builder.send().await.map_err(classify)?;

      let status = response.status().as_u16();
      let headers = response
        .headers()
        .iter()
        .filter_map(|(name, value)| {
          value
            .to_str()
            .ok()
            .map(|v| (name.as_str().to_ascii_lowercase(), v.to_string()))
        })
        .collect();
      let body = response.bytes().await.map_err(classify)?.to_vec();

      Ok(RawResponse {
        status,
        headers,
        body,
      })
    })
  }
}

//! Error types for the request pipeline, cache, and settings store.
//!
//! Every failure leaving the request executor is classified into exactly one
//! [`NetworkError`] variant, so callers never see raw transport errors.

use thiserror::Error;

/// Failures while turning an endpoint into a wire request.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RequestGenerationError {
  #[error("invalid URL: {0}")]
  InvalidUrl(String),

  #[error("invalid path: {0}")]
  InvalidPath(String),

  #[error("could not encode request body: {0}")]
  InvalidBody(String),
}

/// Failures observed on the response side of the pipeline.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResponseError {
  #[error("no HTTP response received")]
  NoResponse,

  #[error("not connected to the network")]
  NotConnected,

  #[error("request was cancelled")]
  Cancelled,

  #[error("HTTP {status}")]
  Status { status: u16, body: Vec<u8> },

  #[error("response body was empty")]
  EmptyBody,

  #[error("failed to decode response: {0}")]
  Decode(String),
}

/// Classified error returned by the request executor and the throttle gate.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NetworkError {
  #[error("request generation failed: {0}")]
  Request(#[from] RequestGenerationError),

  #[error("response failed: {0}")]
  Response(#[from] ResponseError),

  #[error("{0}")]
  Generic(String),
}

/// Stable, switchable error kind for presentation layers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
  InvalidUrl,
  InvalidPath,
  InvalidBody,
  NoResponse,
  NotConnected,
  Cancelled,
  Status,
  EmptyBody,
  Decode,
  Generic,
}

impl NetworkError {
  pub fn cancelled() -> Self {
    Self::Response(ResponseError::Cancelled)
  }

  pub fn is_cancelled(&self) -> bool {
    matches!(self, Self::Response(ResponseError::Cancelled))
  }

  pub fn kind(&self) -> ErrorKind {
    match self {
      Self::Request(RequestGenerationError::InvalidUrl(_)) => ErrorKind::InvalidUrl,
      Self::Request(RequestGenerationError::InvalidPath(_)) => ErrorKind::InvalidPath,
      Self::Request(RequestGenerationError::InvalidBody(_)) => ErrorKind::InvalidBody,
      Self::Response(ResponseError::NoResponse) => ErrorKind::NoResponse,
      Self::Response(ResponseError::NotConnected) => ErrorKind::NotConnected,
      Self::Response(ResponseError::Cancelled) => ErrorKind::Cancelled,
      Self::Response(ResponseError::Status { .. }) => ErrorKind::Status,
      Self::Response(ResponseError::EmptyBody) => ErrorKind::EmptyBody,
      Self::Response(ResponseError::Decode(_)) => ErrorKind::Decode,
      Self::Generic(_) => ErrorKind::Generic,
    }
  }

  /// Status code for non-2xx/3xx responses.
  pub fn status(&self) -> Option<u16> {
    match self {
      Self::Response(ResponseError::Status { status, .. }) => Some(*status),
      _ => None,
    }
  }
}

/// Errors from the two-tier cache. Only surfaced by explicit reads.
#[derive(Error, Debug)]
pub enum CacheError {
  #[error("cache IO error: {0}")]
  Io(#[from] std::io::Error),

  #[error("failed to encode cache entry: {0}")]
  Encode(String),

  #[error("failed to decode cache entry: {0}")]
  Decode(String),

  #[error("cache worker failed: {0}")]
  Join(#[from] tokio::task::JoinError),
}

/// Errors from the durable key/value settings store.
#[derive(Error, Debug)]
pub enum SettingsError {
  #[error("settings database error: {0}")]
  Database(#[from] rusqlite::Error),

  #[error("settings JSON error: {0}")]
  Json(#[from] serde_json::Error),

  #[error("IO error: {0}")]
  Io(#[from] std::io::Error),

  #[error("settings lock poisoned")]
  Poisoned,
}

pub type Result<T> = std::result::Result<T, NetworkError>;

//! End-to-end behavior of the rates pipeline: throttle gate, cache tiers and
//! request executor wired together over a scripted transport.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tempfile::TempDir;
use url::Url;

use xrate::cache::{CacheConfig, CacheLayer, CacheSource, CacheStore};
use xrate::clock::{Clock, ManualClock};
use xrate::db::MemorySettings;
use xrate::error::ErrorKind;
use xrate::network::{
  Endpoint, NetworkConfig, NetworkService, Outcome, RawResponse, RequestInterceptor,
  ResponseInterceptor, Transport, TransportError, TransportFuture, WireRequest,
};
use xrate::rates::{CurrencyCode, CurrencyRepository, ExchangeSnapshot, RatesEndpoints, RatesRepository};

const HOUR: Duration = Duration::from_secs(3600);

type Reply = Result<RawResponse, TransportError>;

/// Replays canned replies in order and records every request it sees.
struct Scripted {
  replies: Mutex<VecDeque<Reply>>,
  requests: Mutex<Vec<WireRequest>>,
  delay: Duration,
}

impl Scripted {
  fn new(replies: Vec<Reply>) -> Self {
    Self {
      replies: Mutex::new(replies.into()),
      requests: Mutex::new(Vec::new()),
      delay: Duration::ZERO,
    }
  }

  fn slow(replies: Vec<Reply>, delay: Duration) -> Self {
    Self {
      delay,
      ..Self::new(replies)
    }
  }

  fn calls(&self) -> usize {
    self.requests.lock().unwrap().len()
  }

  fn request(&self, index: usize) -> WireRequest {
    self.requests.lock().unwrap()[index].clone()
  }
}

impl Transport for Scripted {
  fn send(&self, request: WireRequest) -> TransportFuture<'_> {
    self.requests.lock().unwrap().push(request);
    let reply = self
      .replies
      .lock()
      .unwrap()
      .pop_front()
      .unwrap_or_else(|| Err(TransportError::NotConnected("script exhausted".into())));
    let delay = self.delay;
    Box::pin(async move {
      if !delay.is_zero() {
        tokio::time::sleep(delay).await;
      }
      reply
    })
  }
}

struct Harness {
  _dir: TempDir,
  clock: Arc<ManualClock>,
  transport: Arc<Scripted>,
  cache: CacheStore,
  repository: RatesRepository,
}

impl Harness {
  fn new(transport: Scripted) -> Self {
    Self::with_endpoints(transport, RatesEndpoints::new(CurrencyCode::USD))
  }

  fn with_endpoints(transport: Scripted, endpoints: RatesEndpoints) -> Self {
    let dir = TempDir::new().unwrap();
    let clock = Arc::new(ManualClock::starting_now());
    let transport = Arc::new(transport);

    let config = NetworkConfig::new(Url::parse("https://rates.test/api/").unwrap());
    let service = NetworkService::new(config, transport.clone());
    let cache = CacheStore::with_clock(dir.path(), CacheConfig::default(), clock.clone());
    let gate = CacheLayer::new(service, cache.clone(), Arc::new(MemorySettings::new()))
      .with_clock(clock.clone());
    let repository = RatesRepository::new(gate, endpoints.with_throttle(HOUR));

    Self {
      _dir: dir,
      clock,
      transport,
      cache,
      repository,
    }
  }
}

fn key() -> String {
  RatesEndpoints::new(CurrencyCode::USD).latest().unique_key()
}

fn snapshot(jpy: f64) -> ExchangeSnapshot {
  serde_json::from_str(&body(jpy)).unwrap()
}

fn body(jpy: f64) -> String {
  format!(
    r#"{{"disclaimer":"test","license":"test","timestamp":1700000000,"base":"USD","rates":{{"USD":1.0,"JPY":{}}}}}"#,
    jpy
  )
}

fn ok(jpy: f64) -> Reply {
  Ok(RawResponse::new(200, body(jpy)))
}

#[tokio::test]
async fn test_throttle_window_suppresses_network() {
  let h = Harness::new(Scripted::new(vec![ok(150.0), ok(151.0)]));

  let first = h.repository.fetch_with_source().await.unwrap();
  assert_eq!(first.source, CacheSource::Network);
  assert_eq!(first.data.rate(CurrencyCode::JPY), Some(150.0));

  h.clock.advance(HOUR / 2);
  let second = h.repository.fetch_with_source().await.unwrap();
  assert_eq!(second.source, CacheSource::CacheFresh);
  assert!(second.cached_at.is_some());
  assert_eq!(second.data, first.data);
  assert_eq!(h.transport.calls(), 1);

  h.clock.advance(HOUR * 3 / 2);
  let third = h.repository.fetch_with_source().await.unwrap();
  assert_eq!(third.source, CacheSource::Network);
  assert_eq!(third.data.rate(CurrencyCode::JPY), Some(151.0));
  assert_eq!(h.transport.calls(), 2);
}

#[tokio::test]
async fn test_window_without_cached_value_falls_through() {
  let h = Harness::new(Scripted::new(vec![ok(150.0)]));
  h.repository
    .gate()
    .request_times()
    .record(&key(), h.clock.epoch_secs())
    .await;

  let result = h.repository.fetch_with_source().await.unwrap();
  assert_eq!(result.source, CacheSource::Network);
  assert_eq!(h.transport.calls(), 1);
}

#[tokio::test]
async fn test_failed_fetch_serves_cached_value() {
  let h = Harness::new(Scripted::new(vec![
    ok(150.0),
    Ok(RawResponse::new(500, "upstream down")),
  ]));
  h.repository.fetch_with_throttle().await.unwrap();

  h.clock.advance(HOUR * 2);
  let result = h.repository.fetch_with_source().await.unwrap();
  assert_eq!(result.source, CacheSource::Offline);
  assert_eq!(result.data.rate(CurrencyCode::JPY), Some(150.0));
  assert_eq!(h.transport.calls(), 2);

  // Bypassing the throttle never falls back
  let error = h.repository.fetch_latest().await.unwrap_err();
  assert_eq!(error.kind(), ErrorKind::NotConnected);
}

#[tokio::test]
async fn test_failed_fetch_without_cache_returns_error() {
  let h = Harness::new(Scripted::new(vec![Ok(RawResponse::new(500, "upstream down"))]));

  let error = h.repository.fetch_with_throttle().await.unwrap_err();
  assert_eq!(error.kind(), ErrorKind::Status);
  assert_eq!(error.status(), Some(500));
}

struct Canned;

impl RequestInterceptor<ExchangeSnapshot> for Canned {
  fn after_generate(
    &self,
    request: WireRequest,
    _endpoint: &Endpoint<ExchangeSnapshot>,
  ) -> (WireRequest, Outcome<ExchangeSnapshot>) {
    (request, Outcome::ShortCircuit(snapshot(99.0)))
  }
}

impl ResponseInterceptor<ExchangeSnapshot> for Canned {}

#[tokio::test]
async fn test_request_interceptor_short_circuits_transport() {
  let endpoints = RatesEndpoints::new(CurrencyCode::USD).with_interceptor(Arc::new(Canned));
  let h = Harness::with_endpoints(Scripted::new(vec![ok(150.0)]), endpoints);

  let snapshot = h.repository.fetch_latest().await.unwrap();
  assert_eq!(snapshot.rate(CurrencyCode::JPY), Some(99.0));
  assert_eq!(h.transport.calls(), 0);
}

#[tokio::test]
async fn test_cancelled_fetch_writes_nothing() {
  let h = Harness::new(Scripted::slow(vec![ok(150.0)], Duration::from_millis(200)));

  let handle = h.repository.fetch_latest();
  tokio::time::sleep(Duration::from_millis(20)).await;
  h.repository.cancel(&handle);
  assert!(handle.await.unwrap_err().is_cancelled());

  tokio::time::sleep(Duration::from_millis(300)).await;
  assert_eq!(h.repository.gate().in_flight(), 0);
  assert_eq!(h.cache.fetch::<ExchangeSnapshot>(&key()).await, None);
}

#[tokio::test]
async fn test_not_modified_is_answered_from_memory() {
  let h = Harness::new(Scripted::new(vec![
    Ok(RawResponse::new(200, body(150.0)).with_header("ETag", "\"v1\"")),
    Ok(RawResponse::new(304, Vec::<u8>::new())),
  ]));
  h.repository.fetch_with_throttle().await.unwrap();

  h.clock.advance(HOUR * 2);
  let result = h.repository.fetch_with_source().await.unwrap();
  assert_eq!(result.source, CacheSource::Network);
  assert_eq!(result.data.rate(CurrencyCode::JPY), Some(150.0));

  assert_eq!(h.transport.request(0).header("if-none-match"), None);
  assert_eq!(h.transport.request(1).header("if-none-match"), Some("\"v1\""));
}

#[tokio::test]
async fn test_concurrent_fetches_share_one_request() {
  let h = Harness::new(Scripted::slow(vec![ok(150.0)], Duration::from_millis(100)));

  let a = h.repository.fetch_latest();
  let b = h.repository.fetch_with_throttle();

  assert_eq!(a.await.unwrap().rate(CurrencyCode::JPY), Some(150.0));
  assert_eq!(b.await.unwrap().rate(CurrencyCode::JPY), Some(150.0));
  assert_eq!(h.transport.calls(), 1);
}

#[tokio::test]
async fn test_sweep_drops_expired_snapshot() {
  let h = Harness::new(Scripted::new(Vec::new()));
  h.cache.store(&key(), snapshot(150.0)).wait().await.unwrap();

  h.clock.advance(Duration::from_secs(8 * 24 * 3600));
  let report = h.repository.gate().sweep().await.unwrap();
  assert_eq!(report.expired, 1);
  assert_eq!(report.removed, vec![key()]);

  // Nothing left to fall back on
  assert_eq!(h.cache.fetch::<ExchangeSnapshot>(&key()).await, None);
  let error = h.repository.fetch_with_throttle().await.unwrap_err();
  assert_eq!(error.kind(), ErrorKind::NotConnected);
}

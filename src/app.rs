//! Wires configuration into the transport, cache, gate and repository.

use color_eyre::{eyre::eyre, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

use crate::cache::{CacheLayer, CacheStore};
use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::db::{KeyValueStore, SqliteSettings};
use crate::network::{LoggingInterceptor, NetworkConfig, NetworkService, ReqwestTransport, Transport};
use crate::rates::{CurrencyCode, RatesEndpoints, RatesRepository};

/// Query parameter carrying the API credential.
pub const APP_ID_PARAM: &str = "app_id";

/// Currencies shown when the user does not ask for all of them.
pub const DEFAULT_SYMBOLS: [CurrencyCode; 5] = [
  CurrencyCode::USD,
  CurrencyCode::JPY,
  CurrencyCode::CNY,
  CurrencyCode::HKD,
  CurrencyCode::TWD,
];

/// Fully wired application services
pub struct App {
  config: Config,
  cache: CacheStore,
  repository: RatesRepository,
}

impl App {
  /// Production wiring: reqwest transport and SQLite settings.
  pub fn new(config: Config) -> Result<Self> {
    let transport = ReqwestTransport::new(Duration::from_secs(config.api.timeout_secs))
      .map_err(|e| eyre!("Failed to build HTTP client: {}", e))?;
    let transport = Arc::new(transport);
    let settings = SqliteSettings::open()
      .map_err(|e| eyre!("Failed to open settings database: {}", e))?;
    Self::with_parts(config, transport, Arc::new(settings), Arc::new(SystemClock))
  }

  pub fn with_parts(
    config: Config,
    transport: Arc<dyn Transport>,
    settings: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
  ) -> Result<Self> {
    let network = network_config(&config)?;
    let service = NetworkService::new(network, transport);

    let cache_dir = config.cache.resolve_dir()?;
    let cache = CacheStore::with_clock(&cache_dir, config.cache.to_cache_config(), clock.clone());
    debug!(dir = %cache.dir().display(), "cache directory");

    let gate = CacheLayer::new(service, cache.clone(), settings).with_clock(clock);

    let base: CurrencyCode = config
      .api
      .base_currency
      .parse()
      .map_err(|e| eyre!("Invalid api.base_currency: {}", e))?;
    let endpoints = RatesEndpoints::new(base).with_throttle(config.throttle.interval());
    let repository = RatesRepository::new(gate, endpoints);

    Ok(Self {
      config,
      cache,
      repository,
    })
  }

  pub fn config(&self) -> &Config {
    &self.config
  }

  pub fn cache(&self) -> &CacheStore {
    &self.cache
  }

  pub fn repository(&self) -> &RatesRepository {
    &self.repository
  }
}

fn network_config(config: &Config) -> Result<NetworkConfig> {
  let base_url = Url::parse(&config.api.base_url)
    .map_err(|e| eyre!("Invalid api.base_url {:?}: {}", config.api.base_url, e))?;

  let mut network = NetworkConfig::new(base_url)
    .with_interceptor(Arc::new(LoggingInterceptor::new().redact(APP_ID_PARAM)));
  for (name, value) in &config.api.headers {
    network = network.with_header(name, value.clone());
  }
  for (name, value) in &config.api.query {
    network = network.with_query(name.clone(), value.clone());
  }

  match Config::get_app_id() {
    Some(app_id) => network = network.with_query(APP_ID_PARAM, app_id),
    None if config.api.query.contains_key(APP_ID_PARAM) => {}
    None => warn!("No app id set. Set XRATE_APP_ID or OPENEXCHANGERATES_APP_ID."),
  }

  Ok(network)
}

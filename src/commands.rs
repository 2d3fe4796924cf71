//! Command handlers for the CLI.

use color_eyre::{eyre::eyre, Result};
use std::collections::BTreeMap;
use std::fmt::Write as _;
use tracing::info;

use crate::app::{App, DEFAULT_SYMBOLS};
use crate::cache::{CacheResult, CacheSource};
use crate::rates::{convert, CurrencyCode, CurrencyRepository, ExchangeSnapshot};
use crate::task::TaskHandle;

/// Await `handle`, cancelling it if the user presses Ctrl-C first.
async fn await_or_interrupt<T>(mut handle: TaskHandle<T>) -> Result<T> {
  tokio::select! {
    result = &mut handle => Ok(result?),
    _ = tokio::signal::ctrl_c() => {
      handle.cancel();
      Err(eyre!("Interrupted"))
    }
  }
}

/// `xrate latest`: throttled fetch.
pub async fn latest(app: &App, json: bool, all: bool) -> Result<()> {
  let handle = app.repository().fetch_with_source();
  let result = await_or_interrupt(handle).await?;

  if json {
    println!("{}", serde_json::to_string_pretty(&result.data)?);
    return Ok(());
  }

  let symbols: Vec<CurrencyCode> = if all {
    result.data.rates.keys().copied().collect()
  } else {
    DEFAULT_SYMBOLS.to_vec()
  };
  print!("{}", render_snapshot(&result, &symbols));
  Ok(())
}

/// `xrate refresh`: bypasses the throttle window.
pub async fn refresh(app: &App) -> Result<()> {
  let snapshot = await_or_interrupt(app.repository().fetch_latest()).await?;
  let result = CacheResult::from_network(snapshot);
  print!("{}", render_snapshot(&result, &DEFAULT_SYMBOLS));
  Ok(())
}

/// `xrate convert <AMOUNT> <FROM> <TO>...`
pub async fn convert_amount(app: &App, amount: f64, from: &str, to: &[String]) -> Result<()> {
  let from: CurrencyCode = from.parse()?;
  let targets = if to.is_empty() {
    DEFAULT_SYMBOLS.to_vec()
  } else {
    to.iter()
      .map(|code| code.parse::<CurrencyCode>())
      .collect::<std::result::Result<Vec<_>, _>>()?
  };

  let snapshot = await_or_interrupt(app.repository().fetch_with_throttle()).await?;
  if snapshot.rate(from).is_none() {
    return Err(eyre!("No rate for {}", from));
  }

  print!("{}", render_conversion(amount, from, &convert(&snapshot, from, amount, &targets)));
  Ok(())
}

pub async fn cache_sweep(app: &App) -> Result<()> {
  let report = app.repository().gate().sweep().await?;
  info!(removed = report.removed.len(), "sweep finished");
  println!(
    "expired: {}, evicted: {}, remaining: {} bytes",
    report.expired, report.evicted, report.remaining_bytes
  );
  Ok(())
}

pub async fn cache_clear(app: &App) -> Result<()> {
  app.cache().clear_memory();
  app.cache().clear_disk().await?;
  println!("Cleared {}", app.cache().dir().display());
  Ok(())
}

pub fn cache_path(app: &App) {
  println!("{}", app.cache().dir().display());
}

fn render_snapshot(result: &CacheResult<ExchangeSnapshot>, symbols: &[CurrencyCode]) -> String {
  let snapshot = &result.data;
  let mut out = String::new();

  let source = match (result.source, result.cached_at) {
    (CacheSource::Network, _) | (_, None) => result.source.label().to_string(),
    (source, Some(at)) => format!("{} (cached {})", source.label(), at.format("%Y-%m-%d %H:%M:%S UTC")),
  };
  let _ = writeln!(out, "source:    {}", source);
  let _ = writeln!(out, "base:      {}", snapshot.base);
  if let Some(published) = snapshot.published_at() {
    let _ = writeln!(out, "published: {}", published.format("%Y-%m-%d %H:%M:%S UTC"));
  }
  for code in symbols {
    match snapshot.rate(*code) {
      Some(rate) => {
        let _ = writeln!(out, "{}  {:>16.6}", code, rate);
      }
      None => {
        let _ = writeln!(out, "{}  {:>16}", code, "-");
      }
    }
  }
  out
}

fn render_conversion(amount: f64, from: CurrencyCode, results: &BTreeMap<CurrencyCode, f64>) -> String {
  let mut out = String::new();
  for (code, value) in results {
    let _ = writeln!(out, "{:.2} {} = {:.4} {}", amount, from, value, code);
  }
  out
}

#[cfg(test)]
mod tests {
  use super::*;

  fn snapshot() -> ExchangeSnapshot {
    ExchangeSnapshot {
      disclaimer: String::new(),
      license: String::new(),
      timestamp: 1_700_000_000,
      base: CurrencyCode::USD,
      rates: BTreeMap::from([(CurrencyCode::USD, 1.0), (CurrencyCode::JPY, 150.0)]),
    }
  }

  #[test]
  fn test_render_snapshot_marks_missing_rates() {
    let out = render_snapshot(
      &CacheResult::from_network(snapshot()),
      &[CurrencyCode::JPY, CurrencyCode::TWD],
    );
    assert!(out.contains("source:    network"));
    assert!(out.contains("published: 2023-11-14 22:13:20 UTC"));
    assert!(out.contains("JPY        150.000000"));
    assert!(out.lines().any(|l| l.starts_with("TWD") && l.trim_end().ends_with('-')));
  }

  #[test]
  fn test_render_conversion() {
    let results = BTreeMap::from([(CurrencyCode::JPY, 15000.0)]);
    assert_eq!(
      render_conversion(100.0, CurrencyCode::USD, &results),
      "100.00 USD = 15000.0000 JPY\n"
    );
  }
}

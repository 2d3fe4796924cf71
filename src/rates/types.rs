use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

/// ISO 4217 style currency code: three upper-case ASCII letters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CurrencyCode([u8; 3]);

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid currency code: {0:?}")]
pub struct InvalidCurrencyCode(pub String);

impl CurrencyCode {
  pub const USD: Self = Self(*b"USD");
  pub const JPY: Self = Self(*b"JPY");
  pub const CNY: Self = Self(*b"CNY");
  pub const HKD: Self = Self(*b"HKD");
  pub const TWD: Self = Self(*b"TWD");
  pub const EUR: Self = Self(*b"EUR");

  pub fn as_str(&self) -> &str {
    // Only ASCII letters are ever stored
    std::str::from_utf8(&self.0).unwrap_or("???")
  }
}

impl FromStr for CurrencyCode {
  type Err = InvalidCurrencyCode;

  /// Accepts lower case input and normalizes it.
  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let bytes = s.as_bytes();
    if bytes.len() != 3 || !bytes.iter().all(u8::is_ascii_alphabetic) {
      return Err(InvalidCurrencyCode(s.to_string()));
    }
    Ok(Self([
      bytes[0].to_ascii_uppercase(),
      bytes[1].to_ascii_uppercase(),
      bytes[2].to_ascii_uppercase(),
    ]))
  }
}

impl fmt::Display for CurrencyCode {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl Serialize for CurrencyCode {
  fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(self.as_str())
  }
}

impl<'de> Deserialize<'de> for CurrencyCode {
  fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
    let raw = String::deserialize(deserializer)?;
    raw.parse().map_err(serde::de::Error::custom)
  }
}

/// One `latest.json` response: rates of every currency against `base`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExchangeSnapshot {
  #[serde(default)]
  pub disclaimer: String,
  #[serde(default)]
  pub license: String,
  /// Seconds since the Unix epoch when the rates were published.
  pub timestamp: i64,
  pub base: CurrencyCode,
  pub rates: BTreeMap<CurrencyCode, f64>,
}

impl ExchangeSnapshot {
  pub fn published_at(&self) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(self.timestamp, 0)
  }

  pub fn rate(&self, code: CurrencyCode) -> Option<f64> {
    self.rates.get(&code).copied()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_currency_code_parsing() {
    assert_eq!("usd".parse::<CurrencyCode>().unwrap(), CurrencyCode::USD);
    assert_eq!(CurrencyCode::JPY.to_string(), "JPY");
    assert!("US".parse::<CurrencyCode>().is_err());
    assert!("US1".parse::<CurrencyCode>().is_err());
    assert!("USDX".parse::<CurrencyCode>().is_err());
  }

  #[test]
  fn test_snapshot_decodes_api_payload() {
    let json = r#"{
      "disclaimer": "Usage subject to terms",
      "license": "https://openexchangerates.org/license",
      "timestamp": 1700000000,
      "base": "USD",
      "rates": { "JPY": 149.5, "EUR": 0.92, "USD": 1 }
    }"#;
    let snapshot: ExchangeSnapshot = serde_json::from_str(json).unwrap();
    assert_eq!(snapshot.base, CurrencyCode::USD);
    assert_eq!(snapshot.rate(CurrencyCode::JPY), Some(149.5));
    assert_eq!(snapshot.rate(CurrencyCode::USD), Some(1.0));
    assert!(snapshot.published_at().is_some());
  }

  #[test]
  fn test_invalid_rate_key_fails_decoding() {
    let json = r#"{"timestamp": 1, "base": "USD", "rates": { "J1Y": 1.0 }}"#;
    assert!(serde_json::from_str::<ExchangeSnapshot>(json).is_err());
  }
}

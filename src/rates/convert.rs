use std::collections::BTreeMap;

use super::types::{CurrencyCode, ExchangeSnapshot};

/// Convert `amount` of `from` into every currency in `targets`.
///
/// Rates are relative to the snapshot's base, so the amount is first turned
/// into base units. Targets without a known rate are left out; an unknown
/// `from` yields an empty map.
pub fn convert(
  snapshot: &ExchangeSnapshot,
  from: CurrencyCode,
  amount: f64,
  targets: &[CurrencyCode],
) -> BTreeMap<CurrencyCode, f64> {
  let Some(from_rate) = snapshot.rate(from).filter(|rate| *rate != 0.0) else {
    return BTreeMap::new();
  };
  let base_amount = amount / from_rate;

  targets
    .iter()
    .filter_map(|code| snapshot.rate(*code).map(|rate| (*code, base_amount * rate)))
    .collect()
}

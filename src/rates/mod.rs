//! Exchange-rate domain on top of the request pipeline.

mod convert;
mod endpoints;
mod repository;
mod types;

pub use convert::convert;
pub use endpoints::RatesEndpoints;
pub use repository::{CurrencyRepository, RatesRepository};
pub use types::{CurrencyCode, ExchangeSnapshot, InvalidCurrencyCode};

//! Exchange-rate client built on a throttled, two-tier cached HTTP pipeline.
//!
//! Requests are described by [`network::Endpoint`]s and run through a
//! [`network::NetworkService`]. The [`cache::CacheLayer`] decides per request
//! whether the network is consulted at all, and the [`cache::CacheStore`]
//! keeps decoded responses in memory and on disk.

pub mod app;
pub mod cache;
pub mod clock;
pub mod commands;
pub mod config;
pub mod db;
pub mod error;
pub mod network;
pub mod rates;
pub mod task;

pub use error::{NetworkError, Result};
pub use task::{CancelToken, TaskHandle};

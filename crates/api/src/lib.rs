//! Keeper API clients for external rate sources.
//!
//! This crate provides:
//! - `Rate`: fixed-point (x1e8) price representation used on-chain
//! - `RateOracle`: HTTP client for FX and market-data price APIs
//! - `RateProvider`: the seam the price-feed updater depends on

mod error;
mod oracle;
mod rate;

pub use error::RateFetchError;
pub use oracle::{
    OracleEndpoints, RateOracle, RateProvider, RateSource, DEFAULT_FX_URL, DEFAULT_MARKET_URL,
    DEFAULT_TIMEOUT,
};
pub use rate::{rate_from_fx_quote, rate_from_usd_price, Rate, RATE_SCALE};

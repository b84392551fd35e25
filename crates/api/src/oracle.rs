//! Off-chain rate sources for the price feeds.
//!
//! - FX rates (IDR) from open.er-api.com, inverted to "USD per unit"
//! - Market prices (BTC, ETH) from the CoinLore ticker API
//! - Fixed rates (USDT) with no network call

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, instrument};

use crate::error::RateFetchError;
use crate::rate::{rate_from_fx_quote, rate_from_usd_price, Rate};

/// Default FX endpoint (quotes against USD).
pub const DEFAULT_FX_URL: &str = "https://open.er-api.com/v6/latest/USD";

/// Default market-data ticker endpoint.
pub const DEFAULT_MARKET_URL: &str = "https://api.coinlore.net/api/ticker/";

/// Default per-request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Where a feed's rate comes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum RateSource {
    /// Inverse of the USD->`currency` FX quote.
    Fx { currency: String },
    /// USD price of a market-data coin id, rounded up to 0.1 USD.
    Market { coin_id: String },
    /// Constant scaled rate (1e8 = 1.0).
    Fixed { rate: u64 },
}

impl RateSource {
    /// Whether fetching this source touches the network.
    pub fn is_remote(&self) -> bool {
        !matches!(self, Self::Fixed { .. })
    }
}

/// Produces the current rate for a feed.
#[async_trait]
pub trait RateProvider: Send + Sync {
    async fn fetch_rate(&self, symbol: &str, source: &RateSource) -> Result<Rate, RateFetchError>;
}

/// Endpoint configuration for [`RateOracle`].
#[derive(Debug, Clone)]
pub struct OracleEndpoints {
    pub fx_url: String,
    pub market_url: String,
    pub timeout: Duration,
}

impl Default for OracleEndpoints {
    fn default() -> Self {
        Self {
            fx_url: DEFAULT_FX_URL.to_string(),
            market_url: DEFAULT_MARKET_URL.to_string(),
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

/// FX API response (subset).
#[derive(Debug, Deserialize)]
struct FxResponse {
    #[serde(default)]
    rates: HashMap<String, f64>,
}

/// Market ticker entry (subset). CoinLore sends prices as strings, but
/// numbers are accepted too.
#[derive(Debug, Deserialize)]
struct MarketTicker {
    #[serde(default)]
    symbol: Option<String>,
    price_usd: Option<serde_json::Value>,
}

/// HTTP-backed rate provider.
#[derive(Debug, Clone)]
pub struct RateOracle {
    client: reqwest::Client,
    endpoints: OracleEndpoints,
}

impl RateOracle {
    /// Create an oracle with the default public endpoints.
    pub fn new() -> Result<Self, reqwest::Error> {
        Self::with_endpoints(OracleEndpoints::default())
    }

    /// Create an oracle with custom endpoints and timeout.
    pub fn with_endpoints(endpoints: OracleEndpoints) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(endpoints.timeout)
            .user_agent(concat!("keeper/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client, endpoints })
    }

    pub fn endpoints(&self) -> &OracleEndpoints {
        &self.endpoints
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, &str)],
    ) -> Result<T, RateFetchError> {
        let response = self
            .client
            .get(url)
            .query(query)
            .send()
            .await
            .map_err(|e| RateFetchError::from_request(url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(RateFetchError::Status {
                url: url.to_string(),
                status,
            });
        }

        response
            .json::<T>()
            .await
            .map_err(|e| RateFetchError::from_body(url, e))
    }

    /// USD value of one unit of `currency`.
    #[instrument(skip(self))]
    pub async fn fetch_fx_rate(&self, currency: &str) -> Result<Rate, RateFetchError> {
        let body: FxResponse = self.get_json(&self.endpoints.fx_url, &[]).await?;
        let rate = fx_rate_from_response(&body, currency)?;
        debug!(currency, rate = %rate, "FX rate fetched");
        Ok(rate)
    }

    /// USD price of a market coin, rounded up to 0.1 USD.
    #[instrument(skip(self))]
    pub async fn fetch_market_rate(&self, coin_id: &str) -> Result<Rate, RateFetchError> {
        let body: Vec<MarketTicker> = self
            .get_json(&self.endpoints.market_url, &[("id", coin_id)])
            .await?;
        let rate = market_rate_from_response(&body, coin_id)?;
        debug!(coin_id, rate = %rate, "Market rate fetched");
        Ok(rate)
    }
}

#[async_trait]
impl RateProvider for RateOracle {
    async fn fetch_rate(&self, symbol: &str, source: &RateSource) -> Result<Rate, RateFetchError> {
        debug!(symbol, source = ?source, "Fetching rate");
        match source {
            RateSource::Fx { currency } => self.fetch_fx_rate(currency).await,
            RateSource::Market { coin_id } => self.fetch_market_rate(coin_id).await,
            RateSource::Fixed { rate } => Ok(Rate::from_raw(u128::from(*rate))),
        }
    }
}

fn fx_rate_from_response(body: &FxResponse, currency: &str) -> Result<Rate, RateFetchError> {
    let quote = body
        .rates
        .get(currency)
        .copied()
        .ok_or_else(|| RateFetchError::MissingRate {
            key: currency.to_string(),
        })?;
    rate_from_fx_quote(quote)
}

fn market_rate_from_response(body: &[MarketTicker], coin_id: &str) -> Result<Rate, RateFetchError> {
    let missing = || RateFetchError::MissingRate {
        key: format!("price_usd (coin {})", coin_id),
    };

    let ticker = body.first().ok_or_else(missing)?;
    let price = match ticker.price_usd.as_ref().ok_or_else(missing)? {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Number(n) => n.to_string(),
        other => {
            return Err(RateFetchError::InvalidPrice {
                value: other.to_string(),
            })
        }
    };

    debug!(symbol = ?ticker.symbol, price = %price, "Market ticker decoded");
    rate_from_usd_price(&price)
}

//! Keeper configuration with profile support.
//!
//! Resolution order:
//! 1. `KEEPER_CONFIG` points at a TOML file
//! 2. `KEEPER_PROFILE` selects a built-in profile (production, testing)
//! 3. production defaults
//!
//! `${VAR}` patterns in string values are expanded from the environment after
//! load. Addresses stay strings until a job resolves them, so a missing
//! variable only disables the job that needs it.

use alloy::primitives::Address;
use anyhow::{bail, Context, Result};
use keeper_api::{OracleEndpoints, RateSource, DEFAULT_FX_URL, DEFAULT_MARKET_URL, RATE_SCALE};
use keeper_chain::gas::{GasLimitPolicy, GasPricing};
use keeper_chain::ChainTimeouts;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;
use tracing::{error, info};

use crate::price_feed::{PriceFeedSettings, PriceFeedTarget};
use crate::scheduler::{JobSchedule, RestartPolicy};

/// Environment variable holding a config file path.
pub const CONFIG_PATH_ENV: &str = "KEEPER_CONFIG";
/// Environment variable selecting a built-in profile.
pub const PROFILE_ENV: &str = "KEEPER_PROFILE";

/// Main configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeeperConfig {
    /// Profile name (for logging/identification)
    #[serde(default = "default_profile_name")]
    pub profile: String,

    #[serde(default)]
    pub chain: ChainConfig,

    #[serde(default)]
    pub wallet: WalletSettings,

    #[serde(default)]
    pub price_feed: PriceFeedConfig,

    #[serde(default)]
    pub liquidation: LiquidationConfig,

    #[serde(default)]
    pub scheduler: SchedulerConfig,
}

fn default_profile_name() -> String {
    "production".to_string()
}

/// RPC endpoint, timeouts and gas limit policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainConfig {
    #[serde(default = "default_rpc_url")]
    pub rpc_url: String,

    #[serde(default = "default_chain_id")]
    pub chain_id: u64,

    /// Per-request RPC timeout (seconds)
    #[serde(default = "default_rpc_timeout")]
    pub rpc_timeout_secs: u64,

    /// Receipt polling window (seconds)
    #[serde(default = "default_receipt_timeout")]
    pub receipt_timeout_secs: u64,

    /// Hard bound around the receipt wait (seconds)
    #[serde(default = "default_receipt_hard_timeout")]
    pub receipt_hard_timeout_secs: u64,

    /// Receipt poll interval (seconds)
    #[serde(default = "default_receipt_poll")]
    pub receipt_poll_secs: u64,

    /// Borrowed log scan timeout (seconds)
    #[serde(default = "default_log_scan_timeout")]
    pub log_scan_timeout_secs: u64,

    /// Gas limit used when estimation fails
    #[serde(default = "default_fallback_gas_limit")]
    pub fallback_gas_limit: u64,

    /// Margin over the gas estimate (basis points, 1000 = +10%)
    #[serde(default = "default_gas_limit_margin")]
    pub gas_limit_margin_bps: u64,
}

fn default_rpc_url() -> String {
    "https://rpc.sepolia-api.lisk.com".to_string()
}
fn default_chain_id() -> u64 {
    4202
}
fn default_rpc_timeout() -> u64 {
    30
}
fn default_receipt_timeout() -> u64 {
    120
}
fn default_receipt_hard_timeout() -> u64 {
    150
}
fn default_receipt_poll() -> u64 {
    2
}
fn default_log_scan_timeout() -> u64 {
    60
}
fn default_fallback_gas_limit() -> u64 {
    200_000
}
fn default_gas_limit_margin() -> u64 {
    1_000
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            rpc_url: default_rpc_url(),
            chain_id: default_chain_id(),
            rpc_timeout_secs: default_rpc_timeout(),
            receipt_timeout_secs: default_receipt_timeout(),
            receipt_hard_timeout_secs: default_receipt_hard_timeout(),
            receipt_poll_secs: default_receipt_poll(),
            log_scan_timeout_secs: default_log_scan_timeout(),
            fallback_gas_limit: default_fallback_gas_limit(),
            gas_limit_margin_bps: default_gas_limit_margin(),
        }
    }
}

impl ChainConfig {
    pub fn timeouts(&self) -> ChainTimeouts {
        ChainTimeouts {
            rpc: Duration::from_secs(self.rpc_timeout_secs),
            receipt_wait: Duration::from_secs(self.receipt_timeout_secs),
            receipt_poll: Duration::from_secs(self.receipt_poll_secs.max(1)),
            receipt_hard: Duration::from_secs(self.receipt_hard_timeout_secs),
            log_scan: Duration::from_secs(self.log_scan_timeout_secs),
        }
    }

    pub fn gas_limit_policy(&self) -> GasLimitPolicy {
        GasLimitPolicy {
            fallback: self.fallback_gas_limit,
            margin_bps: self.gas_limit_margin_bps,
        }
    }
}

/// Where the owner wallet comes from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalletSettings {
    /// JSON wallet file (array of `{ private_key, address }`)
    #[serde(default = "default_wallet_path")]
    pub path: String,

    /// Environment variable checked before the file
    #[serde(default = "default_private_key_env")]
    pub private_key_env: Option<String>,
}

fn default_wallet_path() -> String {
    "configs/owner_wallet.json".to_string()
}
fn default_private_key_env() -> Option<String> {
    Some("KEEPER_PRIVATE_KEY".to_string())
}

impl Default for WalletSettings {
    fn default() -> Self {
        Self {
            path: default_wallet_path(),
            private_key_env: default_private_key_env(),
        }
    }
}

/// One configured price feed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FeedConfig {
    pub symbol: String,
    /// Feed contract address (may be `${VAR}`)
    pub address: String,
    pub source: RateSource,
}

/// Price feed job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceFeedConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Interval between cycles (seconds)
    #[serde(default = "default_job_interval")]
    pub interval_secs: u64,

    /// Whole-cycle timeout (seconds)
    #[serde(default = "default_price_cycle_timeout")]
    pub cycle_timeout_secs: u64,

    /// Delay before the single retry (seconds)
    #[serde(default = "default_step_delay")]
    pub retry_delay_secs: u64,

    /// Pause between targets (seconds)
    #[serde(default = "default_step_delay")]
    pub target_delay_secs: u64,

    /// Cap on the network gas price (gwei, 0 = uncapped)
    #[serde(default = "default_max_gas_price")]
    pub max_gas_price_gwei: f64,

    /// HTTP timeout for rate sources (seconds)
    #[serde(default = "default_rate_timeout")]
    pub rate_timeout_secs: u64,

    #[serde(default = "default_fx_url")]
    pub fx_url: String,

    #[serde(default = "default_market_url")]
    pub market_url: String,

    #[serde(default = "default_feeds")]
    pub feeds: Vec<FeedConfig>,
}

fn default_enabled() -> bool {
    true
}
fn default_job_interval() -> u64 {
    4 * 60 * 60
}
fn default_price_cycle_timeout() -> u64 {
    300
}
fn default_step_delay() -> u64 {
    2
}
fn default_max_gas_price() -> f64 {
    100.0
}
fn default_rate_timeout() -> u64 {
    10
}
fn default_fx_url() -> String {
    DEFAULT_FX_URL.to_string()
}
fn default_market_url() -> String {
    DEFAULT_MARKET_URL.to_string()
}

/// IDRX, BTC, ETH, USDT. Only the IDRX feed has a well-known deployment; the
/// others are injected through the environment.
fn default_feeds() -> Vec<FeedConfig> {
    vec![
        FeedConfig {
            symbol: "IDRX".to_string(),
            address: "0x14Fa23DEf3832dD489F08D7ad618928b3B237Cb8".to_string(),
            source: RateSource::Fx {
                currency: "IDR".to_string(),
            },
        },
        FeedConfig {
            symbol: "BTC".to_string(),
            address: "${KEEPER_BTC_FEED}".to_string(),
            source: RateSource::Market {
                coin_id: "90".to_string(),
            },
        },
        FeedConfig {
            symbol: "ETH".to_string(),
            address: "${KEEPER_ETH_FEED}".to_string(),
            source: RateSource::Market {
                coin_id: "80".to_string(),
            },
        },
        FeedConfig {
            symbol: "USDT".to_string(),
            address: "${KEEPER_USDT_FEED}".to_string(),
            source: RateSource::Fixed {
                rate: RATE_SCALE as u64,
            },
        },
    ]
}

impl Default for PriceFeedConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            interval_secs: default_job_interval(),
            cycle_timeout_secs: default_price_cycle_timeout(),
            retry_delay_secs: default_step_delay(),
            target_delay_secs: default_step_delay(),
            max_gas_price_gwei: default_max_gas_price(),
            rate_timeout_secs: default_rate_timeout(),
            fx_url: default_fx_url(),
            market_url: default_market_url(),
            feeds: default_feeds(),
        }
    }
}

impl PriceFeedConfig {
    pub fn schedule(&self, scheduler: &SchedulerConfig) -> JobSchedule {
        JobSchedule {
            interval: Duration::from_secs(self.interval_secs),
            cycle_timeout: Duration::from_secs(self.cycle_timeout_secs),
            run_on_start: scheduler.run_on_start,
        }
    }

    pub fn settings(&self) -> PriceFeedSettings {
        PriceFeedSettings {
            retry_delay: Duration::from_secs(self.retry_delay_secs),
            target_delay: Duration::from_secs(self.target_delay_secs),
        }
    }

    pub fn gas_pricing(&self) -> GasPricing {
        GasPricing::network_capped_gwei(self.max_gas_price_gwei)
    }

    pub fn endpoints(&self) -> OracleEndpoints {
        OracleEndpoints {
            fx_url: self.fx_url.clone(),
            market_url: self.market_url.clone(),
            timeout: Duration::from_secs(self.rate_timeout_secs),
        }
    }

    /// Resolve feed addresses.
    ///
    /// A feed whose address does not resolve is dropped with an error log.
    /// Fails when no feed is left.
    pub fn resolve_targets(&self) -> Result<Vec<PriceFeedTarget>> {
        let mut targets = Vec::with_capacity(self.feeds.len());
        for feed in &self.feeds {
            match parse_address(&feed.symbol, &feed.address) {
                Ok(address) => targets.push(PriceFeedTarget {
                    symbol: feed.symbol.clone(),
                    address,
                    source: feed.source.clone(),
                }),
                Err(e) => error!(symbol = %feed.symbol, error = %e, "Price feed disabled"),
            }
        }

        if targets.is_empty() {
            bail!("no price feed has a resolvable contract address");
        }
        Ok(targets)
    }
}

/// Liquidation job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiquidationConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Interval between cycles (seconds)
    #[serde(default = "default_job_interval")]
    pub interval_secs: u64,

    /// Whole-cycle timeout (seconds)
    #[serde(default = "default_liquidation_cycle_timeout")]
    pub cycle_timeout_secs: u64,

    /// Lending pool address (may be `${VAR}`)
    #[serde(default = "default_pool_address")]
    pub pool: String,

    /// Fixed gas price for liquidations (gwei)
    #[serde(default = "default_liquidation_gas_price")]
    pub gas_price_gwei: f64,
}

fn default_liquidation_cycle_timeout() -> u64 {
    1_800
}
fn default_pool_address() -> String {
    "0x1C5025C66FC6d8F36f48cac97Ea5120A61ba8EA5".to_string()
}
fn default_liquidation_gas_price() -> f64 {
    20.0
}

impl Default for LiquidationConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            interval_secs: default_job_interval(),
            cycle_timeout_secs: default_liquidation_cycle_timeout(),
            pool: default_pool_address(),
            gas_price_gwei: default_liquidation_gas_price(),
        }
    }
}

impl LiquidationConfig {
    pub fn schedule(&self, scheduler: &SchedulerConfig) -> JobSchedule {
        JobSchedule {
            interval: Duration::from_secs(self.interval_secs),
            cycle_timeout: Duration::from_secs(self.cycle_timeout_secs),
            run_on_start: scheduler.run_on_start,
        }
    }

    pub fn gas_pricing(&self) -> GasPricing {
        GasPricing::fixed_gwei(self.gas_price_gwei)
    }

    pub fn pool_address(&self) -> Result<Address> {
        parse_address("liquidation.pool", &self.pool)
    }
}

/// Job loop supervision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Run the first cycle immediately instead of after one interval
    #[serde(default = "default_enabled")]
    pub run_on_start: bool,

    /// Restart a job loop that panicked
    #[serde(default = "default_enabled")]
    pub restart_on_panic: bool,

    /// Delay before such a restart (seconds)
    #[serde(default = "default_restart_delay")]
    pub restart_delay_secs: u64,

    /// Transaction writer queue depth
    #[serde(default = "default_writer_capacity")]
    pub writer_capacity: usize,
}

fn default_restart_delay() -> u64 {
    5
}
fn default_writer_capacity() -> usize {
    64
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            run_on_start: default_enabled(),
            restart_on_panic: default_enabled(),
            restart_delay_secs: default_restart_delay(),
            writer_capacity: default_writer_capacity(),
        }
    }
}

impl SchedulerConfig {
    pub fn restart_policy(&self) -> RestartPolicy {
        RestartPolicy {
            restart_on_panic: self.restart_on_panic,
            restart_delay: Duration::from_secs(self.restart_delay_secs),
        }
    }
}

impl Default for KeeperConfig {
    fn default() -> Self {
        Self::production()
    }
}

impl KeeperConfig {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path))?;
        Self::from_toml(&content).with_context(|| format!("Invalid config file {}", path))
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let mut config: Self = toml::from_str(content)?;
        config.expand_env_vars();
        Ok(config)
    }

    /// Production profile: 4h intervals for both jobs.
    pub fn production() -> Self {
        Self {
            profile: "production".to_string(),
            chain: ChainConfig::default(),
            wallet: WalletSettings::default(),
            price_feed: PriceFeedConfig::default(),
            liquidation: LiquidationConfig::default(),
            scheduler: SchedulerConfig::default(),
        }
    }

    /// Testing profile: short intervals for testnet iteration.
    pub fn testing() -> Self {
        Self {
            profile: "testing".to_string(),
            price_feed: PriceFeedConfig {
                interval_secs: 60,
                ..Default::default()
            },
            liquidation: LiquidationConfig {
                interval_secs: 120,
                cycle_timeout_secs: 600,
                ..Default::default()
            },
            scheduler: SchedulerConfig {
                restart_delay_secs: 1,
                ..Default::default()
            },
            ..Self::production()
        }
    }

    /// Built-in profile by name.
    pub fn from_profile(name: &str) -> Result<Self> {
        match name.to_lowercase().as_str() {
            "production" | "prod" => Ok(Self::production()),
            "testing" | "test" => Ok(Self::testing()),
            other => bail!("unknown profile '{}' (expected production or testing)", other),
        }
    }

    /// Resolve from `KEEPER_CONFIG`, then `KEEPER_PROFILE`, then defaults.
    pub fn from_env() -> Result<Self> {
        if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
            return Self::from_file(&path);
        }

        let mut config = match std::env::var(PROFILE_ENV) {
            Ok(profile) => Self::from_profile(&profile)?,
            Err(_) => Self::production(),
        };
        config.expand_env_vars();
        Ok(config)
    }

    /// Expand `${VAR}` in every string value that may carry one.
    pub fn expand_env_vars(&mut self) {
        self.chain.rpc_url = expand_env(&self.chain.rpc_url);
        self.wallet.path = expand_env(&self.wallet.path);
        self.price_feed.fx_url = expand_env(&self.price_feed.fx_url);
        self.price_feed.market_url = expand_env(&self.price_feed.market_url);
        for feed in &mut self.price_feed.feeds {
            feed.address = expand_env(&feed.address);
        }
        self.liquidation.pool = expand_env(&self.liquidation.pool);
    }

    /// Log the current configuration.
    pub fn log_config(&self) {
        info!(profile = %self.profile, "Keeper configuration loaded");
        info!(
            rpc_url = %self.chain.rpc_url,
            chain_id = self.chain.chain_id,
            rpc_timeout_secs = self.chain.rpc_timeout_secs,
            receipt_timeout_secs = self.chain.receipt_timeout_secs,
            "Chain settings"
        );
        info!(
            enabled = self.price_feed.enabled,
            interval_secs = self.price_feed.interval_secs,
            cycle_timeout_secs = self.price_feed.cycle_timeout_secs,
            feeds = self.price_feed.feeds.len(),
            max_gas_price_gwei = self.price_feed.max_gas_price_gwei,
            "Price feed job"
        );
        info!(
            enabled = self.liquidation.enabled,
            interval_secs = self.liquidation.interval_secs,
            cycle_timeout_secs = self.liquidation.cycle_timeout_secs,
            pool = %self.liquidation.pool,
            gas_price_gwei = self.liquidation.gas_price_gwei,
            "Liquidation job"
        );
    }
}

/// Expand `${VAR}` patterns from the environment. Unknown variables are left
/// in place.
pub fn expand_env(s: &str) -> String {
    let re = match regex_lite::Regex::new(r"\$\{([^}]+)\}") {
        Ok(re) => re,
        Err(_) => return s.to_string(),
    };

    let mut result = s.to_string();
    for cap in re.captures_iter(s) {
        if let (Some(full_match), Some(var_match)) = (cap.get(0), cap.get(1)) {
            if let Ok(value) = std::env::var(var_match.as_str()) {
                result = result.replace(full_match.as_str(), &value);
            }
        }
    }
    result
}

fn parse_address(field: &str, value: &str) -> Result<Address> {
    let value = value.trim();
    if value.contains("${") {
        bail!("{}: unresolved environment variable in '{}'", field, value);
    }
    Address::from_str(value).with_context(|| format!("{}: invalid address '{}'", field, value))
}

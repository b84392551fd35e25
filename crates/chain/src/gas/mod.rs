//! Gas limit and gas price policy.
//!
//! The target chain uses legacy (`gasPrice`) transactions. Two pricing modes
//! are needed:
//! - price feeds pay the network-suggested price, capped at a maximum
//! - liquidations pay a fixed price
//!
//! A failed gas estimate falls back to a fixed limit for price feeds. For
//! liquidations it means the call would revert, so nothing is sent.
//!
//! # Example
//!
//! ```rust,ignore
//! use keeper_chain::gas::{GasLimitPolicy, GasPricing};
//!
//! let feeds = GasPricing::network_capped_gwei(100.0);
//! let liquidations = GasPricing::fixed_gwei(20.0);
//! let limit = GasLimitPolicy::default().limit_for(Some(120_000)); // 132_000
//! ```

/// One gwei in wei.
pub const GWEI: u128 = 1_000_000_000;

/// Gas limit used when estimation fails.
pub const DEFAULT_GAS_LIMIT: u64 = 200_000;

/// Safety margin added on top of an estimate (basis points, 1000 = +10%).
pub const DEFAULT_LIMIT_MARGIN_BPS: u64 = 1_000;

/// Fixed liquidation gas price (20 gwei).
pub const DEFAULT_LIQUIDATION_GAS_PRICE: u128 = 20 * GWEI;

/// Convert gwei to wei.
pub fn gwei_to_wei(gwei: f64) -> u128 {
    if !gwei.is_finite() || gwei <= 0.0 {
        return 0;
    }
    (gwei * GWEI as f64) as u128
}

/// How the gas price of a transaction is chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GasPricing {
    /// Use `eth_gasPrice`, optionally capped.
    Network { max_gas_price: Option<u128> },
    /// Use a static price; no RPC call.
    Fixed { gas_price: u128 },
}

impl GasPricing {
    /// Network price capped at `max_gwei`.
    pub fn network_capped_gwei(max_gwei: f64) -> Self {
        let cap = gwei_to_wei(max_gwei);
        Self::Network {
            max_gas_price: (cap > 0).then_some(cap),
        }
    }

    /// Static price in gwei.
    pub fn fixed_gwei(gwei: f64) -> Self {
        Self::Fixed {
            gas_price: gwei_to_wei(gwei),
        }
    }

    /// Whether a network gas price has to be fetched.
    pub fn needs_network_price(&self) -> bool {
        matches!(self, Self::Network { .. })
    }

    /// Apply the policy to a fetched network price.
    ///
    /// `network_price` is ignored for [`GasPricing::Fixed`].
    pub fn resolve(&self, network_price: u128) -> u128 {
        match self {
            Self::Network { max_gas_price } => match max_gas_price {
                Some(cap) => network_price.min(*cap),
                None => network_price,
            },
            Self::Fixed { gas_price } => *gas_price,
        }
    }

    /// Name for logging.
    pub fn strategy_name(&self) -> &'static str {
        match self {
            Self::Network { .. } => "Network",
            Self::Fixed { .. } => "Fixed",
        }
    }
}

/// What a failed `eth_estimateGas` means for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GasLimitMode {
    /// Broadcast with the fallback limit.
    #[default]
    EstimateOrFallback,
    /// Stop before signing and report the estimate error.
    EstimateRequired,
}

impl GasLimitMode {
    pub fn allows_fallback(&self) -> bool {
        matches!(self, Self::EstimateOrFallback)
    }
}

/// Gas limit derived from `eth_estimateGas`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GasLimitPolicy {
    /// Limit used when estimation fails.
    pub fallback: u64,
    /// Margin over the raw estimate (basis points).
    pub margin_bps: u64,
}

impl Default for GasLimitPolicy {
    fn default() -> Self {
        Self {
            fallback: DEFAULT_GAS_LIMIT,
            margin_bps: DEFAULT_LIMIT_MARGIN_BPS,
        }
    }
}

impl GasLimitPolicy {
    /// Gas limit for an estimate, or the fallback when there is none.
    pub fn limit_for(&self, estimate: Option<u64>) -> u64 {
        match estimate {
            Some(raw) => {
                let padded = u128::from(raw) * u128::from(10_000 + self.margin_bps) / 10_000;
                u64::try_from(padded).unwrap_or(u64::MAX)
            }
            None => self.fallback,
        }
    }
}

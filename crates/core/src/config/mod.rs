//! Configuration for the keeper service.
//!
//! This module provides:
//! - Keeper runtime configuration (profiles, chain, jobs, scheduler)
//! - Owner wallet loading

mod keeper;
mod wallet;

pub use keeper::{
    expand_env, ChainConfig, FeedConfig, KeeperConfig, LiquidationConfig, PriceFeedConfig,
    SchedulerConfig, WalletSettings, CONFIG_PATH_ENV, PROFILE_ENV,
};
pub use wallet::{WalletConfig, WalletConfigStore, WalletSource};

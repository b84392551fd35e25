//! Keeper core logic.
//!
//! This crate provides the periodic maintenance jobs of the keeper:
//! - Price-feed updates (rate fetch, `updateAnswer` with a single retry)
//! - Liquidation scanning (`Borrowed` history x collateral tokens) and execution
//! - Job scheduling with whole-cycle timeouts, manual triggers and supervision
//! - Runtime configuration and owner wallet loading

pub mod config;
mod liquidator;
mod price_feed;
mod scanner;
mod scheduler;
#[cfg(test)]
mod testing;

pub use config::{KeeperConfig, WalletConfig, WalletConfigStore};
pub use liquidator::{LiquidationExecutor, LiquidationJob};
pub use price_feed::{PriceFeedSettings, PriceFeedTarget, PriceFeedUpdater};
pub use scanner::{LiquidationCandidates, LiquidationScanner};
pub use scheduler::{
    CycleRecord, CycleReport, CycleTrigger, JobHandle, JobSchedule, JobState, PeriodicJob,
    RestartPolicy, Supervisor, TaskExit, TaskExitKind, TaskStatus, TriggerAck, TriggerHandle,
};

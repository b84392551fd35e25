//! Price-feed update job.
//!
//! Every cycle walks the configured feeds one at a time: fetch the rate,
//! push it with `updateAnswer`, retry a failed push once when that cannot
//! reuse a nonce still in flight, then pause before the next feed. A feed
//! failing never stops the feeds after it.

use alloy::primitives::Address;
use async_trait::async_trait;
use keeper_api::{RateProvider, RateSource};
use keeper_chain::{ChainError, KeeperChain, TxOutcome};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::scheduler::{CycleReport, PeriodicJob};

/// One on-chain price feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PriceFeedTarget {
    pub symbol: String,
    pub address: Address,
    pub source: RateSource,
}

/// Pacing of a price-feed cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PriceFeedSettings {
    /// Wait before the single retry of a failed submission
    pub retry_delay: Duration,
    /// Pause between two feeds
    pub target_delay: Duration,
}

impl Default for PriceFeedSettings {
    fn default() -> Self {
        Self {
            retry_delay: Duration::from_secs(2),
            target_delay: Duration::from_secs(2),
        }
    }
}

/// How one feed ended in a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FeedResult {
    Skipped,
    Confirmed,
    Pending,
    Failed,
}

/// Pushes fresh rates to every configured feed.
pub struct PriceFeedUpdater {
    targets: Vec<PriceFeedTarget>,
    rates: Arc<dyn RateProvider>,
    chain: Arc<dyn KeeperChain>,
    settings: PriceFeedSettings,
}

impl PriceFeedUpdater {
    pub fn new(
        targets: Vec<PriceFeedTarget>,
        rates: Arc<dyn RateProvider>,
        chain: Arc<dyn KeeperChain>,
        settings: PriceFeedSettings,
    ) -> Self {
        Self {
            targets,
            rates,
            chain,
            settings,
        }
    }

    pub fn targets(&self) -> &[PriceFeedTarget] {
        &self.targets
    }

    async fn update_target(&self, target: &PriceFeedTarget) -> FeedResult {
        let rate = match self.rates.fetch_rate(&target.symbol, &target.source).await {
            Ok(rate) => rate,
            Err(e) => {
                warn!(symbol = %target.symbol, error = %e, "Rate unavailable, skipping feed");
                return FeedResult::Skipped;
            }
        };
        debug!(symbol = %target.symbol, rate = %rate, feed = %target.address, "Rate fetched");

        let answer = rate.to_int256();
        let mut result = self
            .chain
            .update_answer(target.address, answer, &target.symbol)
            .await;

        if let Err(e) = &result {
            if e.is_retry_safe() {
                warn!(
                    symbol = %target.symbol,
                    error = %e,
                    delay_ms = self.settings.retry_delay.as_millis(),
                    "Feed update failed, retrying once"
                );
                tokio::time::sleep(self.settings.retry_delay).await;
                result = self
                    .chain
                    .update_answer(target.address, answer, &target.symbol)
                    .await;
            }
        }

        self.finish(target, result)
    }

    fn finish(&self, target: &PriceFeedTarget, result: Result<TxOutcome, ChainError>) -> FeedResult {
        match result {
            Ok(TxOutcome::Confirmed {
                tx_hash,
                block_number,
                gas_used,
            }) => {
                info!(
                    symbol = %target.symbol,
                    tx_hash = %tx_hash,
                    block = ?block_number,
                    gas_used,
                    "Feed updated"
                );
                FeedResult::Confirmed
            }
            Ok(TxOutcome::Pending { tx_hash }) => {
                warn!(symbol = %target.symbol, tx_hash = %tx_hash, "Feed update broadcast but unconfirmed");
                FeedResult::Pending
            }
            Err(e) => {
                error!(
                    symbol = %target.symbol,
                    error = %e,
                    retry_safe = e.is_retry_safe(),
                    "Feed update failed"
                );
                FeedResult::Failed
            }
        }
    }
}

#[async_trait]
impl PeriodicJob for PriceFeedUpdater {
    fn name(&self) -> &str {
        "price_feed"
    }

    async fn run_cycle(&self) -> CycleReport {
        let mut report = CycleReport::default();

        for (i, target) in self.targets.iter().enumerate() {
            if i > 0 {
                tokio::time::sleep(self.settings.target_delay).await;
            }

            match self.update_target(target).await {
                FeedResult::Skipped => report.skipped += 1,
                FeedResult::Confirmed => {
                    report.attempted += 1;
                    report.succeeded += 1;
                }
                FeedResult::Pending => {
                    report.attempted += 1;
                    report.pending += 1;
                }
                FeedResult::Failed => {
                    report.attempted += 1;
                    report.failed += 1;
                }
            }
        }

        report
    }
}

impl std::fmt::Debug for PriceFeedUpdater {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PriceFeedUpdater")
            .field("targets", &self.targets)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

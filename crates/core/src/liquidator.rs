//! Liquidation execution.
//!
//! Pairs are submitted one at a time. A pair whose call reverts (usually a
//! healthy position) is logged and the next pair is attempted.

use alloy::primitives::Address;
use async_trait::async_trait;
use keeper_chain::{liquidation_label, KeeperChain, TxOutcome};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::scanner::{LiquidationCandidates, LiquidationScanner};
use crate::scheduler::{CycleReport, PeriodicJob};

/// Submits `liquidate(user, token)` for scanned pairs.
pub struct LiquidationExecutor {
    chain: Arc<dyn KeeperChain>,
    pool: Address,
}

impl LiquidationExecutor {
    pub fn new(chain: Arc<dyn KeeperChain>, pool: Address) -> Self {
        Self { chain, pool }
    }

    /// One attempt per pair, in order.
    pub async fn execute(&self, candidates: &LiquidationCandidates) -> CycleReport {
        let mut report = CycleReport::default();

        for (user, token) in candidates.pairs() {
            report.attempted += 1;
            let label = liquidation_label(user, token);
            debug!(pair = %label, "Submitting liquidation");

            match self.chain.liquidate(self.pool, user, token).await {
                Ok(TxOutcome::Confirmed {
                    tx_hash,
                    block_number,
                    gas_used,
                }) => {
                    report.succeeded += 1;
                    info!(
                        user = %user,
                        token = %token,
                        tx_hash = %tx_hash,
                        block = ?block_number,
                        gas_used,
                        "Liquidation confirmed"
                    );
                }
                Ok(TxOutcome::Pending { tx_hash }) => {
                    report.pending += 1;
                    warn!(user = %user, token = %token, tx_hash = %tx_hash, "Liquidation broadcast but unconfirmed");
                }
                Err(e) => {
                    report.failed += 1;
                    warn!(user = %user, token = %token, error = %e, "Liquidation failed");
                }
            }
        }

        report
    }
}

/// Scan-then-execute cycle over one lending pool.
pub struct LiquidationJob {
    scanner: LiquidationScanner,
    executor: LiquidationExecutor,
}

impl LiquidationJob {
    pub fn new(chain: Arc<dyn KeeperChain>, pool: Address) -> Self {
        Self {
            scanner: LiquidationScanner::new(chain.clone(), pool),
            executor: LiquidationExecutor::new(chain, pool),
        }
    }

    pub fn pool(&self) -> Address {
        self.scanner.pool()
    }
}

#[async_trait]
impl PeriodicJob for LiquidationJob {
    fn name(&self) -> &str {
        "liquidation"
    }

    async fn run_cycle(&self) -> CycleReport {
        let candidates = self.scanner.scan().await;
        if candidates.is_empty() {
            info!("No liquidation candidates");
            return CycleReport::default();
        }
        self.executor.execute(&candidates).await
    }
}

impl std::fmt::Debug for LiquidationJob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiquidationJob")
            .field("pool", &self.pool())
            .finish_non_exhaustive()
    }
}

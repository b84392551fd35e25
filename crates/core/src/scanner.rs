//! Liquidation candidate discovery.
//!
//! Candidates are every borrower that ever emitted `Borrowed` on the pool
//! crossed with every collateral token the pool accepts. Whether a pair is
//! actually liquidatable is left to the contract.

use alloy::primitives::Address;
use keeper_chain::KeeperChain;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// Borrowers and collateral tokens found in one scan.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LiquidationCandidates {
    /// Unique borrowers
    pub users: Vec<Address>,
    pub tokens: Vec<Address>,
}

impl LiquidationCandidates {
    /// Every (user, token) pair, users outermost.
    pub fn pairs(&self) -> impl Iterator<Item = (Address, Address)> + '_ {
        self.users
            .iter()
            .flat_map(move |user| self.tokens.iter().map(move |token| (*user, *token)))
    }

    pub fn pair_count(&self) -> usize {
        self.users.len() * self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pair_count() == 0
    }
}

/// Reads liquidation candidates from the lending pool.
pub struct LiquidationScanner {
    chain: Arc<dyn KeeperChain>,
    pool: Address,
}

impl LiquidationScanner {
    pub fn new(chain: Arc<dyn KeeperChain>, pool: Address) -> Self {
        Self { chain, pool }
    }

    pub fn pool(&self) -> Address {
        self.pool
    }

    /// Scan borrowers and collateral tokens.
    ///
    /// Read failures are logged and yield an empty side, so the cycle
    /// attempts nothing instead of failing.
    #[instrument(skip(self), fields(pool = %self.pool))]
    pub async fn scan(&self) -> LiquidationCandidates {
        let users = match self.chain.borrowers(self.pool).await {
            Ok(borrowers) => {
                let total = borrowers.len();
                let unique: BTreeSet<Address> = borrowers.into_iter().collect();
                info!(events = total, borrowers = unique.len(), "Borrowed events scanned");
                unique.into_iter().collect()
            }
            Err(e) => {
                warn!(error = %e, "Borrower log scan failed, no liquidations this cycle");
                return LiquidationCandidates::default();
            }
        };

        let tokens = match self.chain.collateral_tokens(self.pool).await {
            Ok(tokens) => tokens,
            Err(e) => {
                warn!(error = %e, "Collateral token read failed, no liquidations this cycle");
                return LiquidationCandidates::default();
            }
        };

        let candidates = LiquidationCandidates { users, tokens };
        info!(
            users = candidates.users.len(),
            tokens = candidates.tokens.len(),
            pairs = candidates.pair_count(),
            "Liquidation candidates ready"
        );
        candidates
    }
}

impl std::fmt::Debug for LiquidationScanner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiquidationScanner")
            .field("pool", &self.pool)
            .finish_non_exhaustive()
    }
}

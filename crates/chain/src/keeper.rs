//! Keeper-facing chain operations.
//!
//! [`KeeperChain`] is the seam the jobs depend on; [`ChainHandle`] is the
//! production implementation that reads through [`ChainClient`] and routes
//! every write through the [`TxWriter`].

use alloy::primitives::{Address, I256};
use async_trait::async_trait;
use std::sync::Arc;

use crate::client::{ChainClient, TxRequest};
use crate::contracts::{encode_liquidate, encode_update_answer};
use crate::error::{ChainError, TxOutcome};
use crate::gas::{GasLimitMode, GasPricing};
use crate::writer::TxWriter;

/// Chain operations used by the price-feed and liquidation jobs.
#[async_trait]
pub trait KeeperChain: Send + Sync {
    /// Push a new answer to a price feed.
    async fn update_answer(
        &self,
        feed: Address,
        answer: I256,
        symbol: &str,
    ) -> Result<TxOutcome, ChainError>;

    /// Every `Borrowed` user of `pool`, duplicates included.
    async fn borrowers(&self, pool: Address) -> Result<Vec<Address>, ChainError>;

    /// Collateral tokens accepted by `pool`.
    async fn collateral_tokens(&self, pool: Address) -> Result<Vec<Address>, ChainError>;

    /// Call `liquidate(user, token)` on `pool`.
    async fn liquidate(
        &self,
        pool: Address,
        user: Address,
        token: Address,
    ) -> Result<TxOutcome, ChainError>;
}

/// Label for a liquidation pair in logs and errors.
pub fn liquidation_label(user: Address, token: Address) -> String {
    format!("liquidate {}/{}", user, token)
}

/// Production [`KeeperChain`].
#[derive(Debug, Clone)]
pub struct ChainHandle {
    client: Arc<ChainClient>,
    writer: TxWriter,
    feed_gas: GasPricing,
    liquidation_gas: GasPricing,
}

impl ChainHandle {
    pub fn new(
        client: Arc<ChainClient>,
        writer: TxWriter,
        feed_gas: GasPricing,
        liquidation_gas: GasPricing,
    ) -> Self {
        Self {
            client,
            writer,
            feed_gas,
            liquidation_gas,
        }
    }
}

#[async_trait]
impl KeeperChain for ChainHandle {
    async fn update_answer(
        &self,
        feed: Address,
        answer: I256,
        symbol: &str,
    ) -> Result<TxOutcome, ChainError> {
        self.writer
            .submit(TxRequest {
                target: symbol.to_string(),
                to: feed,
                calldata: encode_update_answer(answer),
                gas: self.feed_gas,
                limit_mode: GasLimitMode::EstimateOrFallback,
            })
            .await
    }

    async fn borrowers(&self, pool: Address) -> Result<Vec<Address>, ChainError> {
        self.client.borrowers(pool).await
    }

    async fn collateral_tokens(&self, pool: Address) -> Result<Vec<Address>, ChainError> {
        self.client.collateral_tokens(pool).await
    }

    async fn liquidate(
        &self,
        pool: Address,
        user: Address,
        token: Address,
    ) -> Result<TxOutcome, ChainError> {
        self.writer
            .submit(TxRequest {
                target: liquidation_label(user, token),
                to: pool,
                calldata: encode_liquidate(user, token),
                gas: self.liquidation_gas,
                limit_mode: GasLimitMode::EstimateRequired,
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{ChainTimeouts, TxSubmitter};
    use crate::gas::GasLimitPolicy;
    use crate::signer::SigningAccount;
    use crate::contracts::{ILendingPool, IPriceFeed};
    use crate::writer::DEFAULT_WRITER_CAPACITY;
    use alloy::primitives::{B256, U256};
    use alloy::sol_types::SolCall;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct CapturingSubmitter {
        requests: Mutex<Vec<TxRequest>>,
    }

    #[async_trait]
    impl TxSubmitter for CapturingSubmitter {
        async fn submit(&self, request: TxRequest) -> Result<TxOutcome, ChainError> {
            self.requests.lock().push(request);
            Ok(TxOutcome::Confirmed {
                tx_hash: B256::repeat_byte(7),
                block_number: Some(1),
                gas_used: 21_000,
            })
        }
    }

    const DEV_KEY: &str = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";

    fn handle_with(submitter: Arc<CapturingSubmitter>) -> ChainHandle {
        let account = SigningAccount::from_private_key(DEV_KEY).unwrap();
        let client = ChainClient::new(
            "http://127.0.0.1:8545",
            4202,
            account,
            ChainTimeouts::default(),
            GasLimitPolicy::default(),
        )
        .unwrap();
        let (writer, _task) = TxWriter::spawn(submitter, DEFAULT_WRITER_CAPACITY);
        ChainHandle::new(
            Arc::new(client),
            writer,
            GasPricing::network_capped_gwei(100.0),
            GasPricing::fixed_gwei(20.0),
        )
    }

    #[test]
    fn test_liquidation_label() {
        let label = liquidation_label(Address::repeat_byte(0xaa), Address::repeat_byte(0xbb));
        assert!(label.starts_with("liquidate 0x"));
        assert!(label.contains('/'));
    }

    #[tokio::test]
    async fn test_writes_route_through_writer() {
        let submitter = Arc::new(CapturingSubmitter::default());
        let handle = handle_with(submitter.clone());

        let feed = Address::repeat_byte(0x14);
        let pool = Address::repeat_byte(0x1c);
        let user = Address::repeat_byte(0x01);
        let token = Address::repeat_byte(0x02);
        let answer = I256::from_raw(U256::from(6_250u64));

        let outcome = handle.update_answer(feed, answer, "IDRX").await.unwrap();
        assert!(outcome.is_confirmed());
        handle.liquidate(pool, user, token).await.unwrap();

        let requests = submitter.requests.lock();
        assert_eq!(requests.len(), 2);

        assert_eq!(requests[0].target, "IDRX");
        assert_eq!(requests[0].to, feed);
        assert_eq!(requests[0].calldata, encode_update_answer(answer));
        assert_eq!(
            &requests[0].calldata[..4],
            IPriceFeed::updateAnswerCall::SELECTOR.as_slice()
        );
        assert!(requests[0].gas.needs_network_price());
        assert_eq!(requests[0].limit_mode, GasLimitMode::EstimateOrFallback);

        assert_eq!(requests[1].target, liquidation_label(user, token));
        assert_eq!(requests[1].to, pool);
        assert_eq!(
            &requests[1].calldata[..4],
            ILendingPool::liquidateCall::SELECTOR.as_slice()
        );
        assert!(!requests[1].gas.needs_network_price());
        assert_eq!(requests[1].limit_mode, GasLimitMode::EstimateRequired);
    }
}

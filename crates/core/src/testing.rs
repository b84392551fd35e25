//! In-memory chain and rate doubles for job tests.

use alloy::primitives::{Address, B256, I256};
use async_trait::async_trait;
use keeper_api::{Rate, RateFetchError, RateProvider, RateSource};
use keeper_chain::{liquidation_label, ChainError, KeeperChain, TxOutcome};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};

pub(crate) fn confirmed(byte: u8) -> TxOutcome {
    TxOutcome::Confirmed {
        tx_hash: B256::repeat_byte(byte),
        block_number: Some(100),
        gas_used: 50_000,
    }
}

pub(crate) fn rpc_error(target: &str) -> ChainError {
    ChainError::Rpc {
        op: "send_raw_transaction",
        target: target.to_string(),
        message: "connection reset".into(),
    }
}

/// Records every call; write results are scripted per target label and
/// default to a confirmed receipt.
pub(crate) struct MockChain {
    pub updates: Mutex<Vec<(String, I256)>>,
    pub liquidations: Mutex<Vec<(Address, Address)>>,
    borrowers: Mutex<Result<Vec<Address>, ChainError>>,
    tokens: Mutex<Result<Vec<Address>, ChainError>>,
    scripted: Mutex<HashMap<String, VecDeque<Result<TxOutcome, ChainError>>>>,
}

impl MockChain {
    pub fn new() -> Self {
        Self {
            updates: Mutex::new(Vec::new()),
            liquidations: Mutex::new(Vec::new()),
            borrowers: Mutex::new(Ok(Vec::new())),
            tokens: Mutex::new(Ok(Vec::new())),
            scripted: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_borrowers(self, borrowers: Result<Vec<Address>, ChainError>) -> Self {
        *self.borrowers.lock() = borrowers;
        self
    }

    pub fn with_tokens(self, tokens: Result<Vec<Address>, ChainError>) -> Self {
        *self.tokens.lock() = tokens;
        self
    }

    /// Queue results for successive writes to `label`.
    pub fn script(&self, label: &str, results: Vec<Result<TxOutcome, ChainError>>) {
        self.scripted
            .lock()
            .entry(label.to_string())
            .or_default()
            .extend(results);
    }

    pub fn update_count(&self, symbol: &str) -> usize {
        self.updates.lock().iter().filter(|(s, _)| s == symbol).count()
    }

    fn next_result(&self, label: &str) -> Result<TxOutcome, ChainError> {
        self.scripted
            .lock()
            .get_mut(label)
            .and_then(VecDeque::pop_front)
            .unwrap_or(Ok(confirmed(1)))
    }
}

#[async_trait]
impl KeeperChain for MockChain {
    async fn update_answer(
        &self,
        _feed: Address,
        answer: I256,
        symbol: &str,
    ) -> Result<TxOutcome, ChainError> {
        self.updates.lock().push((symbol.to_string(), answer));
        self.next_result(symbol)
    }

    async fn borrowers(&self, _pool: Address) -> Result<Vec<Address>, ChainError> {
        self.borrowers.lock().clone()
    }

    async fn collateral_tokens(&self, _pool: Address) -> Result<Vec<Address>, ChainError> {
        self.tokens.lock().clone()
    }

    async fn liquidate(
        &self,
        _pool: Address,
        user: Address,
        token: Address,
    ) -> Result<TxOutcome, ChainError> {
        self.liquidations.lock().push((user, token));
        self.next_result(&liquidation_label(user, token))
    }
}

/// Fixed rates per symbol; symbols in `failing` return an error.
pub(crate) struct MockRates {
    pub rates: HashMap<String, Rate>,
    pub failing: HashSet<String>,
    pub requests: Mutex<Vec<String>>,
}

impl MockRates {
    pub fn new(rates: &[(&str, u128)]) -> Self {
        Self {
            rates: rates
                .iter()
                .map(|(symbol, raw)| (symbol.to_string(), Rate::from_raw(*raw)))
                .collect(),
            failing: HashSet::new(),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(mut self, symbol: &str) -> Self {
        self.failing.insert(symbol.to_string());
        self
    }
}

#[async_trait]
impl RateProvider for MockRates {
    async fn fetch_rate(&self, symbol: &str, _source: &RateSource) -> Result<Rate, RateFetchError> {
        self.requests.lock().push(symbol.to_string());
        if self.failing.contains(symbol) {
            return Err(RateFetchError::Timeout {
                url: format!("https://rates.test/{}", symbol),
            });
        }
        self.rates
            .get(symbol)
            .copied()
            .ok_or_else(|| RateFetchError::MissingRate {
                key: symbol.to_string(),
            })
    }
}

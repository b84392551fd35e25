//! RPC client for the keeper account.
//!
//! Every remote call is bounded by a timeout. Transaction submission is
//! composed from explicit steps:
//! 1. read the pending nonce
//! 2. resolve the gas price (network or fixed)
//! 3. estimate the gas limit (+margin; on failure fall back or stop, per request)
//! 4. sign locally (hash known before broadcast)
//! 5. broadcast the raw bytes
//! 6. poll for the receipt inside a bounded window
//!
//! A broadcast error is reconciled by re-reading the pending nonce: if it
//! moved past ours, the transaction reached the mempool.

use alloy::eips::BlockNumberOrTag;
use alloy::network::TransactionBuilder;
use alloy::primitives::{Address, Bytes, B256, U256, U64};
use alloy::providers::{Provider, ProviderBuilder};
use alloy::rpc::types::{Filter, TransactionRequest};
use async_trait::async_trait;
use std::fmt::Display;
use std::future::IntoFuture;
use std::time::{Duration, Instant};
use tracing::{debug, info, instrument, warn};

use crate::contracts::{borrowed_topic, decode_borrower, ILendingPool};
use crate::error::{ChainError, TxOutcome};
use crate::gas::{GasLimitMode, GasLimitPolicy, GasPricing};
use crate::signer::SigningAccount;

/// Timeouts for chain operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChainTimeouts {
    /// Single RPC request (nonce, gas, broadcast, reads).
    pub rpc: Duration,
    /// Receipt polling window after broadcast.
    pub receipt_wait: Duration,
    /// Interval between receipt polls.
    pub receipt_poll: Duration,
    /// Hard bound around the whole receipt wait.
    pub receipt_hard: Duration,
    /// Event log scan.
    pub log_scan: Duration,
}

impl Default for ChainTimeouts {
    fn default() -> Self {
        Self {
            rpc: Duration::from_secs(30),
            receipt_wait: Duration::from_secs(120),
            receipt_poll: Duration::from_secs(2),
            receipt_hard: Duration::from_secs(150),
            log_scan: Duration::from_secs(60),
        }
    }
}

/// A state-changing call queued for submission.
#[derive(Debug, Clone)]
pub struct TxRequest {
    /// Label used in logs and errors (feed symbol, liquidation pair).
    pub target: String,
    pub to: Address,
    pub calldata: Bytes,
    pub gas: GasPricing,
    pub limit_mode: GasLimitMode,
}

/// Anything that can take a [`TxRequest`] to a final outcome.
#[async_trait]
pub trait TxSubmitter: Send + Sync + 'static {
    async fn submit(&self, request: TxRequest) -> Result<TxOutcome, ChainError>;
}

/// Node state observed at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthReport {
    pub block_number: u64,
    pub chain_id: u64,
    pub balance: U256,
}

/// How a failed broadcast is resolved after re-reading the nonce.
#[derive(Debug)]
pub(crate) enum BroadcastResolution {
    /// Nonce advanced: the transaction was accepted despite the error.
    Landed,
    /// Nonce unchanged: nothing was sent; the original error stands.
    NotSent(ChainError),
    /// Nonce unreadable: outcome unknown.
    Unknown(ChainError),
}

pub(crate) fn resolve_broadcast_failure(
    target: &str,
    sent_nonce: u64,
    reread: Result<u64, ChainError>,
    original: ChainError,
) -> BroadcastResolution {
    match reread {
        Ok(pending) if pending > sent_nonce => BroadcastResolution::Landed,
        Ok(_) => BroadcastResolution::NotSent(original),
        Err(e) => {
            warn!(label = target, nonce = sent_nonce, error = %e, "Nonce re-read failed after broadcast error");
            BroadcastResolution::Unknown(ChainError::Ambiguous {
                target: target.to_string(),
                nonce: sent_nonce,
            })
        }
    }
}

/// Map a mined receipt to an outcome.
pub(crate) fn outcome_from_receipt(
    target: &str,
    tx_hash: B256,
    success: bool,
    block_number: Option<u64>,
    gas_used: u128,
) -> Result<TxOutcome, ChainError> {
    if success {
        Ok(TxOutcome::Confirmed {
            tx_hash,
            block_number,
            gas_used,
        })
    } else {
        Err(ChainError::Reverted {
            target: target.to_string(),
            tx_hash,
        })
    }
}

/// Await `fut` for at most `limit`, mapping both failure kinds.
async fn bounded<T, E, F>(
    op: &'static str,
    target: &str,
    limit: Duration,
    fut: F,
) -> Result<T, ChainError>
where
    E: Display,
    F: IntoFuture<Output = Result<T, E>>,
{
    match tokio::time::timeout(limit, fut.into_future()).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(ChainError::Rpc {
            op,
            target: target.to_string(),
            message: e.to_string(),
        }),
        Err(_) => Err(ChainError::Timeout {
            op,
            target: target.to_string(),
            after: limit,
        }),
    }
}

/// HTTP JSON-RPC client bound to one signing account.
pub struct ChainClient {
    rpc_url: String,
    chain_id: u64,
    account: SigningAccount,
    timeouts: ChainTimeouts,
    gas_limit: GasLimitPolicy,
}

impl ChainClient {
    pub fn new(
        rpc_url: impl Into<String>,
        chain_id: u64,
        account: SigningAccount,
        timeouts: ChainTimeouts,
        gas_limit: GasLimitPolicy,
    ) -> Result<Self, ChainError> {
        let rpc_url = rpc_url.into();
        // URL must parse before the first request
        let client = Self {
            rpc_url,
            chain_id,
            account,
            timeouts,
            gas_limit,
        };
        client.provider()?;

        info!(
            rpc_url = %client.rpc_url,
            chain_id,
            address = %client.account.address(),
            "Chain client initialized"
        );
        Ok(client)
    }

    fn provider(&self) -> Result<impl Provider, ChainError> {
        let url = self.rpc_url.parse().map_err(|e| ChainError::InvalidUrl {
            url: self.rpc_url.clone(),
            message: format!("{}", e),
        })?;
        Ok(ProviderBuilder::new().on_http(url))
    }

    pub fn address(&self) -> Address {
        self.account.address()
    }

    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }

    /// Pending-state transaction count of the keeper account.
    pub async fn pending_nonce(&self, target: &str) -> Result<u64, ChainError> {
        let provider = self.provider()?;
        bounded(
            "get_nonce",
            target,
            self.timeouts.rpc,
            provider.get_transaction_count(self.address()).pending(),
        )
        .await
    }

    /// Network gas price in wei.
    pub async fn gas_price(&self, target: &str) -> Result<u128, ChainError> {
        let provider = self.provider()?;
        bounded("gas_price", target, self.timeouts.rpc, provider.get_gas_price()).await
    }

    /// Raw `eth_estimateGas` result for a populated request.
    async fn estimate_gas(&self, target: &str, tx: &TransactionRequest) -> Result<u64, ChainError> {
        let provider = self.provider()?;
        let call = provider
            .client()
            .request::<_, U64>("eth_estimateGas", (tx.clone(),));

        let estimate = bounded("estimate_gas", target, self.timeouts.rpc, call).await?;
        Ok(estimate.to::<u64>())
    }

    /// Padded estimate, the fallback, or the estimate error when `mode`
    /// does not allow a fallback.
    async fn resolve_gas_limit(
        &self,
        target: &str,
        tx: &TransactionRequest,
        mode: GasLimitMode,
    ) -> Result<u64, ChainError> {
        match self.estimate_gas(target, tx).await {
            Ok(estimate) => Ok(self.gas_limit.limit_for(Some(estimate))),
            Err(e) if mode.allows_fallback() => {
                warn!(label = target, error = %e, fallback = self.gas_limit.fallback, "Gas estimation failed, using fallback limit");
                Ok(self.gas_limit.limit_for(None))
            }
            Err(e) => {
                warn!(label = target, error = %e, "Gas estimation failed, not broadcasting");
                Err(e)
            }
        }
    }

    async fn broadcast(&self, target: &str, raw: &Bytes) -> Result<(), ChainError> {
        let provider = self.provider()?;
        bounded(
            "send_raw_transaction",
            target,
            self.timeouts.rpc,
            provider.send_raw_transaction(raw),
        )
        .await
        .map(|_| ())
    }

    /// Poll for a receipt until the wait window closes.
    ///
    /// Returns `Ok(None)` if the transaction is still unmined. Individual poll
    /// failures are logged and retried on the next tick.
    pub async fn wait_for_receipt(
        &self,
        target: &str,
        tx_hash: B256,
    ) -> Result<Option<TxOutcome>, ChainError> {
        let provider = self.provider()?;
        let started = Instant::now();

        loop {
            let poll = bounded(
                "get_receipt",
                target,
                self.timeouts.rpc,
                provider.get_transaction_receipt(tx_hash),
            )
            .await;

            match poll {
                Ok(Some(receipt)) => {
                    return outcome_from_receipt(
                        target,
                        tx_hash,
                        receipt.status(),
                        receipt.block_number,
                        u128::from(receipt.gas_used),
                    )
                    .map(Some);
                }
                Ok(None) => {}
                Err(e) => debug!(label = target, tx_hash = %tx_hash, error = %e, "Receipt poll failed"),
            }

            if started.elapsed() + self.timeouts.receipt_poll > self.timeouts.receipt_wait {
                return Ok(None);
            }
            tokio::time::sleep(self.timeouts.receipt_poll).await;
        }
    }

    /// Build, sign, broadcast and confirm one transaction.
    #[instrument(skip(self, request), fields(label = %request.target, to = %request.to))]
    pub async fn submit_transaction(&self, request: TxRequest) -> Result<TxOutcome, ChainError> {
        let target = request.target.as_str();
        let started = Instant::now();

        let nonce = self.pending_nonce(target).await?;

        let network_price = if request.gas.needs_network_price() {
            self.gas_price(target).await?
        } else {
            0
        };
        let gas_price = request.gas.resolve(network_price);

        let mut tx = TransactionRequest::default()
            .with_from(self.address())
            .with_to(request.to)
            .with_input(request.calldata.clone())
            .with_nonce(nonce)
            .with_chain_id(self.chain_id)
            .with_gas_price(gas_price);

        let gas_limit = self.resolve_gas_limit(target, &tx, request.limit_mode).await?;
        tx.set_gas_limit(gas_limit);

        let signed = self.account.sign(target, tx).await?;

        info!(
            label = target,
            tx_hash = %signed.hash,
            nonce,
            gas_limit,
            gas_price_gwei = gas_price / 1_000_000_000,
            gas_strategy = request.gas.strategy_name(),
            "Broadcasting transaction"
        );

        if let Err(e) = self.broadcast(target, &signed.raw).await {
            let reread = self.pending_nonce(target).await;
            match resolve_broadcast_failure(target, nonce, reread, e) {
                BroadcastResolution::Landed => {
                    warn!(label = target, tx_hash = %signed.hash, nonce, "Broadcast errored but nonce advanced, tracking transaction");
                }
                BroadcastResolution::NotSent(err) | BroadcastResolution::Unknown(err) => {
                    return Err(err);
                }
            }
        }

        let outcome =
            match tokio::time::timeout(self.timeouts.receipt_hard, self.wait_for_receipt(target, signed.hash))
                .await
            {
                Ok(Ok(Some(outcome))) => outcome,
                Ok(Ok(None)) | Err(_) => TxOutcome::Pending {
                    tx_hash: signed.hash,
                },
                Ok(Err(e)) => {
                    warn!(label = target, tx_hash = %signed.hash, error = %e, "Transaction failed");
                    return Err(e);
                }
            };

        match outcome {
            TxOutcome::Confirmed {
                block_number,
                gas_used,
                ..
            } => info!(
                label = target,
                tx_hash = %signed.hash,
                block = block_number.unwrap_or(0),
                gas_used,
                total_ms = started.elapsed().as_millis(),
                "Transaction confirmed"
            ),
            TxOutcome::Pending { .. } => warn!(
                label = target,
                tx_hash = %signed.hash,
                waited_ms = started.elapsed().as_millis(),
                "Receipt not seen in time, transaction left pending"
            ),
        }

        Ok(outcome)
    }

    /// Every address that emitted `Borrowed` on `pool`, in log order.
    ///
    /// Undecodable logs are skipped.
    #[instrument(skip(self))]
    pub async fn borrowers(&self, pool: Address) -> Result<Vec<Address>, ChainError> {
        let provider = self.provider()?;
        let filter = Filter::new()
            .address(pool)
            .event_signature(borrowed_topic())
            .from_block(0u64)
            .to_block(BlockNumberOrTag::Latest);

        let logs = bounded("get_logs", "Borrowed", self.timeouts.log_scan, provider.get_logs(&filter))
            .await?;

        let mut users = Vec::with_capacity(logs.len());
        for log in &logs {
            match decode_borrower(log) {
                Ok(user) => users.push(user),
                Err(e) => warn!(pool = %pool, error = %e, "Skipping undecodable Borrowed log"),
            }
        }

        debug!(pool = %pool, logs = logs.len(), decoded = users.len(), "Borrowed logs scanned");
        Ok(users)
    }

    /// Collateral token list of `pool`.
    #[instrument(skip(self))]
    pub async fn collateral_tokens(&self, pool: Address) -> Result<Vec<Address>, ChainError> {
        let provider = self.provider()?;
        let contract = ILendingPool::new(pool, &provider);
        let call = contract.getCollateralTokens();
        let result = bounded(
            "getCollateralTokens",
            "lending pool",
            self.timeouts.rpc,
            call.call(),
        )
        .await?;
        Ok(result._0)
    }

    /// Native balance of the keeper account.
    pub async fn balance(&self) -> Result<U256, ChainError> {
        let provider = self.provider()?;
        bounded("get_balance", "keeper", self.timeouts.rpc, provider.get_balance(self.address())).await
    }

    /// Startup connectivity check.
    ///
    /// A chain id mismatch or empty balance is logged but does not fail.
    pub async fn health_check(&self) -> Result<HealthReport, ChainError> {
        let provider = self.provider()?;
        let block_number =
            bounded("get_block_number", "node", self.timeouts.rpc, provider.get_block_number()).await?;
        let chain_id =
            bounded("get_chain_id", "node", self.timeouts.rpc, provider.get_chain_id()).await?;
        let balance = self.balance().await?;

        if chain_id != self.chain_id {
            warn!(
                expected = self.chain_id,
                actual = chain_id,
                "Node reports a different chain id than configured"
            );
        }
        if balance.is_zero() {
            warn!(address = %self.address(), "Keeper account has zero balance, transactions will fail");
        }

        info!(block = block_number, chain_id, balance = %balance, "Provider connection verified");
        Ok(HealthReport {
            block_number,
            chain_id,
            balance,
        })
    }
}

#[async_trait]
impl TxSubmitter for ChainClient {
    async fn submit(&self, request: TxRequest) -> Result<TxOutcome, ChainError> {
        self.submit_transaction(request).await
    }
}

impl std::fmt::Debug for ChainClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChainClient")
            .field("rpc_url", &self.rpc_url)
            .field("chain_id", &self.chain_id)
            .field("address", &self.account.address())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gas::DEFAULT_GAS_LIMIT;
    use alloy::consensus::{Transaction as _, TxEnvelope};
    use alloy::eips::eip2718::Decodable2718;
    use parking_lot::Mutex;
    use serde_json::{json, Value};
    use std::sync::Arc;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    const DEV_KEY: &str = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";

    fn rpc_error() -> ChainError {
        ChainError::Rpc {
            op: "send_raw_transaction",
            target: "BTC".into(),
            message: "connection reset".into(),
        }
    }

    #[test]
    fn test_broadcast_landed_when_nonce_advanced() {
        let resolution = resolve_broadcast_failure("BTC", 5, Ok(6), rpc_error());
        assert!(matches!(resolution, BroadcastResolution::Landed));
    }

    #[test]
    fn test_broadcast_not_sent_keeps_original_error() {
        match resolve_broadcast_failure("BTC", 5, Ok(5), rpc_error()) {
            BroadcastResolution::NotSent(err) => {
                assert!(err.is_retry_safe());
                assert!(matches!(err, ChainError::Rpc { .. }));
            }
            other => panic!("unexpected resolution: {:?}", other),
        }
    }

    #[test]
    fn test_broadcast_unknown_is_not_retry_safe() {
        let reread = Err(ChainError::Timeout {
            op: "get_nonce",
            target: "BTC".into(),
            after: Duration::from_secs(30),
        });
        match resolve_broadcast_failure("BTC", 5, reread, rpc_error()) {
            BroadcastResolution::Unknown(err) => {
                assert!(!err.is_retry_safe());
                assert!(matches!(err, ChainError::Ambiguous { nonce: 5, .. }));
            }
            other => panic!("unexpected resolution: {:?}", other),
        }
    }

    #[test]
    fn test_receipt_outcome() {
        let hash = B256::repeat_byte(1);
        let confirmed = outcome_from_receipt("ETH", hash, true, Some(100), 50_000).unwrap();
        assert!(confirmed.is_confirmed());

        let reverted = outcome_from_receipt("ETH", hash, false, Some(100), 50_000);
        assert!(matches!(reverted, Err(ChainError::Reverted { .. })));
    }

    #[tokio::test]
    async fn test_bounded_maps_timeout() {
        let slow = async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok::<_, ChainError>(1u64)
        };
        let result = bounded("get_nonce", "IDRX", Duration::from_millis(10), slow).await;
        assert!(matches!(result, Err(ChainError::Timeout { op: "get_nonce", .. })));
    }

    #[tokio::test]
    async fn test_bounded_maps_error() {
        let failing = async { Err::<u64, _>("boom") };
        let result = bounded("gas_price", "IDRX", Duration::from_secs(1), failing).await;
        match result {
            Err(ChainError::Rpc { message, target, .. }) => {
                assert_eq!(message, "boom");
                assert_eq!(target, "IDRX");
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    /// JSON-RPC node on a local port. Each request is answered by
    /// `answer(method, earlier calls of that method)`; `Err` becomes the
    /// JSON-RPC error object.
    struct StubNode {
        url: String,
        calls: Arc<Mutex<Vec<(String, Value)>>>,
    }

    impl StubNode {
        async fn start<F>(answer: F) -> Self
        where
            F: Fn(&str, usize) -> Result<Value, Value> + Send + Sync + 'static,
        {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            let url = format!("http://{}", listener.local_addr().unwrap());
            let calls = Arc::new(Mutex::new(Vec::new()));
            let answer = Arc::new(answer);

            let recorded = calls.clone();
            tokio::spawn(async move {
                while let Ok((mut socket, _)) = listener.accept().await {
                    let answer = answer.clone();
                    let recorded = recorded.clone();
                    tokio::spawn(async move {
                        let Some(body) = read_body(&mut socket).await else {
                            return;
                        };
                        let request: Value = serde_json::from_slice(&body).unwrap();
                        let method = request["method"].as_str().unwrap_or_default().to_string();
                        let earlier = {
                            let mut calls = recorded.lock();
                            let earlier = calls.iter().filter(|(m, _)| *m == method).count();
                            calls.push((method.clone(), request["params"].clone()));
                            earlier
                        };

                        let mut reply = json!({ "jsonrpc": "2.0", "id": request["id"] });
                        match (*answer)(&method, earlier) {
                            Ok(result) => reply["result"] = result,
                            Err(error) => reply["error"] = error,
                        }
                        let body = reply.to_string();
                        let response = format!(
                            "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                            body.len(),
                            body
                        );
                        let _ = socket.write_all(response.as_bytes()).await;
                        let _ = socket.shutdown().await;
                    });
                }
            });

            Self { url, calls }
        }

        fn methods(&self) -> Vec<String> {
            self.calls.lock().iter().map(|(m, _)| m.clone()).collect()
        }

        fn count(&self, method: &str) -> usize {
            self.calls.lock().iter().filter(|(m, _)| m == method).count()
        }

        fn params(&self, method: &str) -> Value {
            self.calls
                .lock()
                .iter()
                .find(|(m, _)| m == method)
                .map(|(_, params)| params.clone())
                .unwrap_or(Value::Null)
        }

        /// Decoded transaction from the first `eth_sendRawTransaction`.
        fn sent_transaction(&self) -> TxEnvelope {
            let params = self.params("eth_sendRawTransaction");
            let raw: Bytes = params[0].as_str().unwrap().parse().unwrap();
            let mut buf = raw.as_ref();
            TxEnvelope::decode_2718(&mut buf).unwrap()
        }
    }

    async fn read_body(socket: &mut TcpStream) -> Option<Vec<u8>> {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 4096];
        loop {
            let n = socket.read(&mut chunk).await.ok()?;
            if n == 0 {
                return None;
            }
            buf.extend_from_slice(&chunk[..n]);

            if let Some(end) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
                let head = String::from_utf8_lossy(&buf[..end]).to_ascii_lowercase();
                let length = head
                    .lines()
                    .find_map(|line| line.strip_prefix("content-length:"))
                    .and_then(|v| v.trim().parse::<usize>().ok())
                    .unwrap_or(0);
                let start = end + 4;
                while buf.len() < start + length {
                    let n = socket.read(&mut chunk).await.ok()?;
                    if n == 0 {
                        return None;
                    }
                    buf.extend_from_slice(&chunk[..n]);
                }
                return Some(buf[start..start + length].to_vec());
            }
        }
    }

    const SENT_HASH: &str = "0x1111111111111111111111111111111111111111111111111111111111111111";

    /// A node where everything succeeds and nothing is ever mined.
    fn quiet_node(method: &str, _earlier: usize) -> Result<Value, Value> {
        match method {
            "eth_getTransactionCount" => Ok(json!("0x5")),
            "eth_gasPrice" => Ok(json!("0x3b9aca00")),
            "eth_estimateGas" => Ok(json!("0x186a0")),
            "eth_sendRawTransaction" => Ok(json!(SENT_HASH)),
            "eth_getTransactionReceipt" => Ok(Value::Null),
            other => Err(json!({ "code": -32601, "message": format!("{} not supported", other) })),
        }
    }

    fn reverted() -> Value {
        json!({ "code": 3, "message": "execution reverted: position healthy" })
    }

    fn fast_timeouts() -> ChainTimeouts {
        ChainTimeouts {
            rpc: Duration::from_secs(2),
            receipt_wait: Duration::from_millis(50),
            receipt_poll: Duration::from_millis(10),
            receipt_hard: Duration::from_secs(2),
            log_scan: Duration::from_secs(2),
        }
    }

    fn client_for(node: &StubNode, timeouts: ChainTimeouts) -> ChainClient {
        let account = SigningAccount::from_private_key(DEV_KEY).unwrap();
        ChainClient::new(&node.url, 4202, account, timeouts, GasLimitPolicy::default()).unwrap()
    }

    fn feed_request() -> TxRequest {
        TxRequest {
            target: "IDRX".into(),
            to: Address::repeat_byte(0x14),
            calldata: Bytes::from_static(&[0xa0, 0xb1, 0xc2, 0xd3]),
            gas: GasPricing::network_capped_gwei(100.0),
            limit_mode: GasLimitMode::EstimateOrFallback,
        }
    }

    fn liquidation_request() -> TxRequest {
        TxRequest {
            target: "liquidate pair".into(),
            to: Address::repeat_byte(0x1c),
            calldata: Bytes::from_static(&[0x01, 0x02, 0x03, 0x04]),
            gas: GasPricing::fixed_gwei(20.0),
            limit_mode: GasLimitMode::EstimateRequired,
        }
    }

    #[tokio::test]
    async fn test_failed_estimate_sends_with_fallback_limit() {
        let node = StubNode::start(|method, earlier| match method {
            "eth_estimateGas" => Err(reverted()),
            _ => quiet_node(method, earlier),
        })
        .await;
        let client = client_for(&node, fast_timeouts());

        let outcome = client.submit_transaction(feed_request()).await.unwrap();

        assert!(matches!(outcome, TxOutcome::Pending { .. }));
        let sent = node.sent_transaction();
        assert_eq!(sent.gas_limit(), DEFAULT_GAS_LIMIT);
        assert_eq!(sent.nonce(), 5);
        assert_eq!(sent.gas_price(), Some(1_000_000_000));
        assert_eq!(outcome.tx_hash(), *sent.tx_hash());
    }

    #[tokio::test]
    async fn test_failed_estimate_stops_liquidation_before_broadcast() {
        let node = StubNode::start(|method, earlier| match method {
            "eth_estimateGas" => Err(reverted()),
            _ => quiet_node(method, earlier),
        })
        .await;
        let client = client_for(&node, fast_timeouts());

        let result = client.submit_transaction(liquidation_request()).await;

        match result {
            Err(ChainError::Rpc { op, message, .. }) => {
                assert_eq!(op, "estimate_gas");
                assert!(message.contains("position healthy"), "{}", message);
            }
            other => panic!("unexpected result: {:?}", other),
        }
        assert_eq!(node.methods(), ["eth_getTransactionCount", "eth_estimateGas"]);
    }

    #[tokio::test]
    async fn test_estimate_is_padded_into_signed_limit() {
        let node = StubNode::start(quiet_node).await;
        let client = client_for(&node, fast_timeouts());

        client.submit_transaction(liquidation_request()).await.unwrap();

        let sent = node.sent_transaction();
        // 0x186a0 = 100_000 plus the 10% margin
        assert_eq!(sent.gas_limit(), 110_000);
        assert_eq!(sent.gas_price(), Some(20_000_000_000));
        assert_eq!(node.count("eth_gasPrice"), 0);
    }

    #[tokio::test]
    async fn test_unmined_transaction_is_pending_after_wait_window() {
        let node = StubNode::start(quiet_node).await;
        let client = client_for(&node, fast_timeouts());

        let started = Instant::now();
        let outcome = client.submit_transaction(feed_request()).await.unwrap();

        assert!(matches!(outcome, TxOutcome::Pending { .. }));
        assert!(node.count("eth_getTransactionReceipt") >= 2);
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_unmined_transaction_is_pending_after_hard_bound() {
        let node = StubNode::start(quiet_node).await;
        let timeouts = ChainTimeouts {
            receipt_wait: Duration::from_secs(30),
            receipt_hard: Duration::from_millis(100),
            ..fast_timeouts()
        };
        let client = client_for(&node, timeouts);

        let started = Instant::now();
        let outcome = client.submit_transaction(feed_request()).await.unwrap();

        assert!(matches!(outcome, TxOutcome::Pending { .. }));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_broadcast_error_with_advanced_nonce_is_tracked() {
        let node = StubNode::start(|method, earlier| match (method, earlier) {
            ("eth_getTransactionCount", 0) => Ok(json!("0x5")),
            ("eth_getTransactionCount", _) => Ok(json!("0x6")),
            ("eth_sendRawTransaction", _) => {
                Err(json!({ "code": -32000, "message": "connection reset by upstream" }))
            }
            _ => quiet_node(method, earlier),
        })
        .await;
        let client = client_for(&node, fast_timeouts());

        let outcome = client.submit_transaction(feed_request()).await.unwrap();

        let sent = node.sent_transaction();
        assert_eq!(outcome, TxOutcome::Pending { tx_hash: *sent.tx_hash() });
        assert_eq!(node.count("eth_sendRawTransaction"), 1);
        assert_eq!(node.count("eth_getTransactionCount"), 2);
        assert!(node.count("eth_getTransactionReceipt") >= 1);
    }

    #[tokio::test]
    async fn test_broadcast_error_with_same_nonce_is_not_sent() {
        let node = StubNode::start(|method, earlier| match method {
            "eth_sendRawTransaction" => Err(json!({ "code": -32000, "message": "nonce too low" })),
            _ => quiet_node(method, earlier),
        })
        .await;
        let client = client_for(&node, fast_timeouts());

        let result = client.submit_transaction(feed_request()).await;

        match result {
            Err(e @ ChainError::Rpc { op: "send_raw_transaction", .. }) => assert!(e.is_retry_safe()),
            other => panic!("unexpected result: {:?}", other),
        }
        assert_eq!(node.count("eth_getTransactionReceipt"), 0);
    }

    fn borrowed_log(pool: Address, user: Option<Address>, index: u64) -> Value {
        let mut topics = vec![borrowed_topic().to_string()];
        if let Some(user) = user {
            topics.push(user.into_word().to_string());
        }
        json!({
            "address": pool.to_string(),
            "topics": topics,
            "data": format!("0x{:064x}{:064x}", 5, 10),
            "blockHash": B256::repeat_byte(9).to_string(),
            "blockNumber": "0x10",
            "blockTimestamp": "0x6553f100",
            "transactionHash": B256::repeat_byte(8).to_string(),
            "transactionIndex": "0x0",
            "logIndex": format!("0x{:x}", index),
            "removed": false
        })
    }

    #[tokio::test]
    async fn test_borrowers_decodes_logs_in_order() {
        let pool = Address::repeat_byte(0x1c);
        let alice = Address::repeat_byte(0xaa);
        let bob = Address::repeat_byte(0xbb);
        let logs = json!([
            borrowed_log(pool, Some(bob), 0),
            borrowed_log(pool, None, 1),
            borrowed_log(pool, Some(alice), 2),
            borrowed_log(pool, Some(bob), 3),
        ]);
        let node = StubNode::start(move |method, earlier| match method {
            "eth_getLogs" => Ok(logs.clone()),
            _ => quiet_node(method, earlier),
        })
        .await;
        let client = client_for(&node, fast_timeouts());

        let users = client.borrowers(pool).await.unwrap();

        // The log without an indexed user is skipped
        assert_eq!(users, vec![bob, alice, bob]);
        let filter = node.params("eth_getLogs").to_string().to_lowercase();
        assert!(filter.contains(&borrowed_topic().to_string()));
        assert!(filter.contains(&pool.to_string().to_lowercase()));
    }

    #[tokio::test]
    async fn test_borrowers_scan_failure_is_an_error() {
        let node = StubNode::start(|method, earlier| match method {
            "eth_getLogs" => Err(json!({ "code": -32005, "message": "query returned more than 10000 results" })),
            _ => quiet_node(method, earlier),
        })
        .await;
        let client = client_for(&node, fast_timeouts());

        let result = client.borrowers(Address::repeat_byte(0x1c)).await;
        assert!(matches!(result, Err(ChainError::Rpc { op: "get_logs", .. })));
    }

    #[test]
    fn test_rejects_invalid_url() {
        let account = SigningAccount::from_private_key(DEV_KEY).unwrap();
        let result = ChainClient::new(
            "not a url",
            4202,
            account,
            ChainTimeouts::default(),
            GasLimitPolicy::default(),
        );
        assert!(matches!(result, Err(ChainError::InvalidUrl { .. })));
    }

    #[tokio::test]
    #[ignore] // Requires network
    async fn test_health_check_live() {
        let account = SigningAccount::from_private_key(DEV_KEY).unwrap();
        let client = ChainClient::new(
            "https://rpc.sepolia-api.lisk.com",
            4202,
            account,
            ChainTimeouts::default(),
            GasLimitPolicy::default(),
        )
        .unwrap();

        let report = client.health_check().await.unwrap();
        assert_eq!(report.chain_id, 4202);
        assert!(report.block_number > 0);
    }
}

use alloy::primitives::B256;
use std::time::Duration;
use thiserror::Error;

/// Failure of a single chain operation.
///
/// Every variant carries the contract/target label it was raised for, so a
/// log line is enough to tell which feed or liquidation pair was affected.
#[derive(Debug, Clone, Error)]
pub enum ChainError {
    #[error("{op} timed out after {after:?} ({target})")]
    Timeout {
        op: &'static str,
        target: String,
        after: Duration,
    },

    #[error("{op} failed ({target}): {message}")]
    Rpc {
        op: &'static str,
        target: String,
        message: String,
    },

    #[error("signing failed ({target}): {message}")]
    Signing { target: String, message: String },

    #[error("transaction {tx_hash} reverted ({target})")]
    Reverted { target: String, tx_hash: B256 },

    /// Broadcast failed and the account nonce could not be re-read, so it is
    /// unknown whether the transaction reached the mempool.
    #[error("broadcast outcome unknown for nonce {nonce} ({target})")]
    Ambiguous { target: String, nonce: u64 },

    #[error("failed to decode {what}: {message}")]
    Decode { what: &'static str, message: String },

    #[error("invalid RPC url {url}: {message}")]
    InvalidUrl { url: String, message: String },

    #[error("invalid private key: {0}")]
    InvalidKey(String),

    #[error("transaction writer is closed")]
    WriterClosed,
}

impl ChainError {
    /// Whether resubmitting with a freshly fetched nonce cannot double-spend
    /// the nonce of the failed attempt.
    ///
    /// `Ambiguous` is excluded: the first transaction may still be in flight.
    pub fn is_retry_safe(&self) -> bool {
        matches!(
            self,
            Self::Timeout { .. }
                | Self::Rpc { .. }
                | Self::Signing { .. }
                | Self::Reverted { .. }
                | Self::Decode { .. }
        )
    }

    /// Target label the error was raised for, if any.
    pub fn target(&self) -> Option<&str> {
        match self {
            Self::Timeout { target, .. }
            | Self::Rpc { target, .. }
            | Self::Signing { target, .. }
            | Self::Reverted { target, .. }
            | Self::Ambiguous { target, .. } => Some(target),
            _ => None,
        }
    }
}

/// Result of a broadcast transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxOutcome {
    /// Mined with success status.
    Confirmed {
        tx_hash: B256,
        block_number: Option<u64>,
        gas_used: u128,
    },
    /// Broadcast but not confirmed within the receipt window. Counted as a
    /// soft success: the transaction may still be mined later.
    Pending { tx_hash: B256 },
}

impl TxOutcome {
    pub fn tx_hash(&self) -> B256 {
        match self {
            Self::Confirmed { tx_hash, .. } | Self::Pending { tx_hash } => *tx_hash,
        }
    }

    pub fn is_confirmed(&self) -> bool {
        matches!(self, Self::Confirmed { .. })
    }
}

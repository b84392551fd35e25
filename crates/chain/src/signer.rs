//! Local transaction signing for the keeper account.
//!
//! Transactions are signed in-process, so the hash is known before the raw
//! bytes ever leave the machine. A failed broadcast can then be reconciled
//! against the chain without guessing which transaction was sent.

use alloy::consensus::TxEnvelope;
use alloy::eips::eip2718::Encodable2718;
use alloy::network::{EthereumWallet, TransactionBuilder};
use alloy::primitives::{Address, Bytes, B256};
use alloy::rpc::types::TransactionRequest;
use alloy::signers::local::PrivateKeySigner;
use tracing::debug;

use crate::error::ChainError;

/// A signed, ready-to-broadcast transaction.
#[derive(Debug, Clone)]
pub struct SignedTx {
    pub hash: B256,
    pub raw: Bytes,
    pub nonce: u64,
}

/// The keeper's signing key and derived address.
#[derive(Clone)]
pub struct SigningAccount {
    wallet: EthereumWallet,
    address: Address,
}

impl SigningAccount {
    /// Parse a hex private key (with or without 0x prefix).
    pub fn from_private_key(private_key: &str) -> Result<Self, ChainError> {
        let key_str = private_key.trim().trim_start_matches("0x");
        let signer: PrivateKeySigner = key_str
            .parse()
            .map_err(|e| ChainError::InvalidKey(format!("{}", e)))?;
        let address = signer.address();

        Ok(Self {
            wallet: EthereumWallet::from(signer),
            address,
        })
    }

    pub fn address(&self) -> Address {
        self.address
    }

    /// Sign a fully populated legacy transaction request.
    ///
    /// The request must carry nonce, gas price, gas limit, chain id and `to`.
    pub async fn sign(
        &self,
        target: &str,
        request: TransactionRequest,
    ) -> Result<SignedTx, ChainError> {
        let nonce = request.nonce.ok_or_else(|| ChainError::Signing {
            target: target.to_string(),
            message: "request has no nonce".to_string(),
        })?;

        let envelope: TxEnvelope =
            request
                .build(&self.wallet)
                .await
                .map_err(|e| ChainError::Signing {
                    target: target.to_string(),
                    message: e.to_string(),
                })?;

        let hash = *envelope.tx_hash();
        let raw: Bytes = envelope.encoded_2718().into();
        debug!(label = target, tx_hash = %hash, nonce, raw_len = raw.len(), "Transaction signed");

        Ok(SignedTx { hash, raw, nonce })
    }
}

impl std::fmt::Debug for SigningAccount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SigningAccount")
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}

//! Keeper chain interaction layer.
//!
//! This crate provides:
//! - Contract bindings for the price feed and lending pool
//! - Local transaction signing with precomputed hashes
//! - A timeout-bounded RPC client (nonce, gas, broadcast, receipts, logs)
//! - A single-writer queue that serializes every state-changing transaction
//! - Gas limit and gas price policy (network-capped or fixed)
//!
//! Jobs depend on the [`KeeperChain`] trait; [`ChainHandle`] wires it to a
//! live node.

mod client;
pub mod contracts;
mod error;
pub mod gas;
mod keeper;
mod signer;
mod writer;

pub use client::{ChainClient, ChainTimeouts, HealthReport, TxRequest, TxSubmitter};
pub use error::{ChainError, TxOutcome};
pub use keeper::{liquidation_label, ChainHandle, KeeperChain};
pub use signer::{SignedTx, SigningAccount};
pub use writer::{TxWriter, DEFAULT_WRITER_CAPACITY};

//! Contract interfaces the keeper talks to.
//!
//! - `IPriceFeed`: owner-updatable aggregator (`updateAnswer(int256)`)
//! - `ILendingPool`: lending contract exposing `Borrowed` events,
//!   the accepted collateral list, and `liquidate(user, token)`
//!
//! Addresses are configuration; only the ABI lives here.

use alloy::primitives::{Address, Bytes, B256, I256};
use alloy::rpc::types::Log;
use alloy::sol;
use alloy::sol_types::{SolCall, SolEvent};

use crate::error::ChainError;

sol! {
    /// Price feed aggregator with an owner-only answer setter.
    #[sol(rpc)]
    interface IPriceFeed {
        function updateAnswer(int256 _answer) external;
    }
}

sol! {
    /// Lending pool (subset used by the liquidation job).
    #[sol(rpc)]
    interface ILendingPool {
        event Borrowed(address indexed user, uint256 amount, uint256 totalDebt);

        function getCollateralTokens() external view returns (address[] memory);
        function liquidate(address _user, address _token) external;
    }
}

/// Topic0 of `Borrowed(address,uint256,uint256)`.
pub fn borrowed_topic() -> B256 {
    ILendingPool::Borrowed::SIGNATURE_HASH
}

/// Calldata for `updateAnswer(answer)`.
pub fn encode_update_answer(answer: I256) -> Bytes {
    IPriceFeed::updateAnswerCall { _answer: answer }
        .abi_encode()
        .into()
}

/// Calldata for `liquidate(user, token)`.
pub fn encode_liquidate(user: Address, token: Address) -> Bytes {
    ILendingPool::liquidateCall {
        _user: user,
        _token: token,
    }
    .abi_encode()
    .into()
}

/// Borrower address of a `Borrowed` log.
pub fn decode_borrower(log: &Log) -> Result<Address, ChainError> {
    log.log_decode::<ILendingPool::Borrowed>()
        .map(|decoded| decoded.inner.data.user)
        .map_err(|e| ChainError::Decode {
            what: "Borrowed log",
            message: e.to_string(),
        })
}

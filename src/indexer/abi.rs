//! On-chain deposit event shape (C3, §4.4). A deposit is any transfer of
//! value into the house's `DEPOSIT_ADDRESS`; we watch for the chain's native
//! transfer log rather than a bespoke contract event, so the ABI surface
//! here is deliberately small.

use alloy::primitives::{Address, TxHash, U256};
use alloy::sol;

sol! {
    /// Emitted by the escrow/router contract players deposit through.
    /// Mirrors `DepositReceived` wiring seen in comparable settlement
    /// indexers: one event per funded deposit, replayed once per inclusion
    /// block and again at the confirmation/reorg boundaries.
    #[derive(Debug)]
    event DepositReceived(address indexed from, uint256 amount, uint256 nonce);
}

/// A raw log event normalized out of either a native transfer or the
/// `DepositReceived` ABI event, before confirmation-depth filtering.
#[derive(Debug, Clone)]
pub struct RawDepositLog {
    pub tx_hash: TxHash,
    pub log_index: u32,
    pub block_number: u64,
    pub from: Address,
    pub amount: U256,
}

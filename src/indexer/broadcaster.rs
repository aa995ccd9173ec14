//! Hot-wallet `PayoutBroadcaster` backed by `alloy`. Lives under `indexer`
//! alongside the other chain-facing code rather than `payout`, since both
//! modules share the same provider setup.

use alloy::network::{EthereumWallet, TransactionBuilder};
use alloy::primitives::{Address, U256};
use alloy::providers::{Provider, ProviderBuilder};
use alloy::rpc::types::TransactionRequest;
use alloy::signers::local::PrivateKeySigner;
use async_trait::async_trait;
use std::str::FromStr;

use crate::error::{CoreError, Result};
use crate::payout::PayoutBroadcaster;

pub struct AlloyPayoutBroadcaster {
    provider: Box<dyn Provider + Send + Sync>,
    wallet_address: Address,
}

impl AlloyPayoutBroadcaster {
    pub fn connect(rpc_url: &str, hot_wallet_privkey: &str) -> Result<Self> {
        let signer = PrivateKeySigner::from_str(hot_wallet_privkey)
            .map_err(|e| CoreError::InvalidInput(format!("invalid HOT_WALLET_PRIVKEY: {e}")))?;
        let wallet_address = signer.address();
        let wallet = EthereumWallet::from(signer);
        let url = rpc_url
            .parse()
            .map_err(|e| CoreError::InvalidInput(format!("invalid CHAIN_RPC_URL {rpc_url:?}: {e}")))?;
        let provider = ProviderBuilder::new().wallet(wallet).on_http(url);
        Ok(AlloyPayoutBroadcaster {
            provider: Box::new(provider),
            wallet_address,
        })
    }
}

#[async_trait]
impl PayoutBroadcaster for AlloyPayoutBroadcaster {
    async fn broadcast(&self, to: &str, amount: u128) -> Result<String> {
        let to: Address = to
            .parse()
            .map_err(|e| CoreError::InvalidInput(format!("invalid withdrawal address {to:?}: {e}")))?;
        let tx = TransactionRequest::default()
            .with_to(to)
            .with_value(U256::from(amount));
        let pending = self
            .provider
            .send_transaction(tx)
            .await
            .map_err(CoreError::internal)?;
        Ok(format!("{:#x}", pending.tx_hash()))
    }

    async fn is_confirmed(&self, tx_hash: &str) -> Result<bool> {
        let hash = tx_hash
            .parse()
            .map_err(|e| CoreError::InvalidInput(format!("invalid tx hash {tx_hash:?}: {e}")))?;
        let receipt = self
            .provider
            .get_transaction_receipt(hash)
            .await
            .map_err(CoreError::internal)?;
        Ok(receipt.map(|r| r.status()).unwrap_or(false))
    }

    async fn hot_wallet_balance(&self) -> Result<u128> {
        let balance = self
            .provider
            .get_balance(self.wallet_address)
            .await
            .map_err(CoreError::internal)?;
        u128::try_from(balance).map_err(|_| CoreError::InvalidInput("balance overflows u128".into()))
    }
}

//! Production `ChainClient`: a thin `alloy` provider wrapper. Isolated from
//! `DepositIndexer` behind the trait in `super` so the polling/reorg logic
//! never touches an RPC type directly.

use alloy::primitives::Address;
use alloy::providers::{Provider, ProviderBuilder};
use alloy::rpc::types::{Filter, Log};
use async_trait::async_trait;

use crate::error::{CoreError, Result};

use super::abi::{DepositReceived, RawDepositLog};
use super::ChainClient;

pub struct AlloyChainClient {
    provider: Box<dyn Provider + Send + Sync>,
    deposit_address: Address,
}

impl AlloyChainClient {
    pub fn connect(rpc_url: &str, deposit_address: Address) -> Result<Self> {
        let url = rpc_url.parse().map_err(|e| {
            CoreError::InvalidInput(format!("invalid CHAIN_RPC_URL {rpc_url:?}: {e}"))
        })?;
        let provider = ProviderBuilder::new().on_http(url);
        Ok(AlloyChainClient {
            provider: Box::new(provider),
            deposit_address,
        })
    }

    fn log_to_raw(&self, log: Log) -> Option<RawDepositLog> {
        let tx_hash = log.transaction_hash?;
        let log_index = log.log_index? as u32;
        let block_number = log.block_number?;
        let decoded = log.log_decode::<DepositReceived>().ok()?;
        Some(RawDepositLog {
            tx_hash,
            log_index,
            block_number,
            from: decoded.inner.data.from,
            amount: decoded.inner.data.amount,
        })
    }
}

#[async_trait]
impl ChainClient for AlloyChainClient {
    async fn latest_block(&self) -> Result<u64> {
        self.provider.get_block_number().await.map_err(CoreError::internal)
    }

    async fn block_hash(&self, block_number: u64) -> Result<Option<[u8; 32]>> {
        let block = self
            .provider
            .get_block_by_number(block_number.into(), false)
            .await
            .map_err(CoreError::internal)?;
        Ok(block.map(|b| b.header.hash.0))
    }

    async fn deposit_logs_in_range(&self, from: u64, to: u64) -> Result<Vec<RawDepositLog>> {
        let filter = Filter::new()
            .address(self.deposit_address)
            .event_signature(DepositReceived::SIGNATURE_HASH)
            .from_block(from)
            .to_block(to);
        let logs = self.provider.get_logs(&filter).await.map_err(CoreError::internal)?;
        Ok(logs.into_iter().filter_map(|l| self.log_to_raw(l)).collect())
    }
}

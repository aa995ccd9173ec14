//! Deposit indexer (C3, §4.4). Polls the chain for transfers into the
//! house's deposit address, waits `C_conf` confirmations before crediting,
//! and watches a `C_reorg`-sized trailing window of block hashes so that if
//! a block it already credited from turns out to be orphaned, the credit is
//! reversed with a compensating entry rather than silently left wrong.

pub mod abi;
pub mod broadcaster;
pub mod chain;

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Result;
use crate::ledger::LedgerStore;
use crate::model::{ConfirmedDeposit, DepositCursor};

use abi::RawDepositLog;

/// Port the indexer depends on instead of talking to `alloy` directly —
/// lets tests drive deterministic block/log sequences without an RPC.
#[async_trait]
pub trait ChainClient: Send + Sync {
    async fn latest_block(&self) -> Result<u64>;
    async fn block_hash(&self, block_number: u64) -> Result<Option<[u8; 32]>>;
    async fn deposit_logs_in_range(&self, from: u64, to: u64) -> Result<Vec<RawDepositLog>>;
}

pub struct DepositIndexer {
    chain: Arc<dyn ChainClient>,
    ledger: Arc<dyn LedgerStore>,
    cursor: DepositCursor,
    c_conf: u64,
    c_reorg: u64,
    /// Block hashes of the last `c_reorg` processed blocks, used to detect
    /// that a previously-seen block has been replaced by a competing fork.
    seen_hashes: VecDeque<(u64, [u8; 32])>,
    /// Deposits credited from each block, so a detected reorg knows exactly
    /// which credits to reverse.
    credited_by_block: HashMap<u64, Vec<ConfirmedDeposit>>,
}

#[derive(Debug, Default)]
pub struct PollReport {
    pub credited: Vec<ConfirmedDeposit>,
    pub reversed: Vec<ConfirmedDeposit>,
}

impl DepositIndexer {
    pub fn new(
        chain: Arc<dyn ChainClient>,
        ledger: Arc<dyn LedgerStore>,
        c_conf: u64,
        c_reorg: u64,
        starting_cursor: DepositCursor,
    ) -> Self {
        DepositIndexer {
            chain,
            ledger,
            cursor: starting_cursor,
            c_conf,
            c_reorg,
            seen_hashes: VecDeque::new(),
            credited_by_block: HashMap::new(),
        }
    }

    pub fn cursor(&self) -> DepositCursor {
        self.cursor
    }

    /// One polling cycle: reconcile the reorg window, then credit any newly
    /// confirmed blocks. Safe to call on a fixed interval forever.
    pub async fn poll_once(&mut self) -> Result<PollReport> {
        let mut report = PollReport::default();
        self.reconcile_reorgs(&mut report).await?;

        let latest = self.chain.latest_block().await?;
        let safe_head = latest.saturating_sub(self.c_conf);
        if safe_head <= self.cursor.last_processed_block {
            return Ok(report);
        }

        let from = self.cursor.last_processed_block + 1;
        for block_number in from..=safe_head {
            if let Some(hash) = self.chain.block_hash(block_number).await? {
                self.remember_hash(block_number, hash);
            }
            let logs = self
                .chain
                .deposit_logs_in_range(block_number, block_number)
                .await?;
            for log in logs {
                let deposit = ConfirmedDeposit {
                    tx_hash: format!("{:#x}", log.tx_hash),
                    log_index: log.log_index,
                    address: format!("{:#x}", log.from),
                    amount: u128::try_from(log.amount).unwrap_or(u128::MAX),
                    block_number: log.block_number,
                    credited_at: chrono::Utc::now(),
                };
                self.ledger
                    .credit_deposit_atomic(&deposit.address, &deposit)
                    .await?;
                self.credited_by_block
                    .entry(block_number)
                    .or_default()
                    .push(deposit.clone());
                report.credited.push(deposit);
            }
            self.cursor.last_processed_block = block_number;
        }

        Ok(report)
    }

    fn remember_hash(&mut self, block_number: u64, hash: [u8; 32]) {
        self.seen_hashes.push_back((block_number, hash));
        while self.seen_hashes.len() as u64 > self.c_reorg {
            if let Some((old_block, _)) = self.seen_hashes.pop_front() {
                self.credited_by_block.remove(&old_block);
            }
        }
    }

    /// Re-fetches the chain's current hash for every block still in the
    /// trailing window; a mismatch means that block was reorged out, so its
    /// credits are reversed (invariant 4, §8).
    async fn reconcile_reorgs(&mut self, report: &mut PollReport) -> Result<()> {
        let mut orphaned = Vec::new();
        for (block_number, remembered_hash) in self.seen_hashes.iter() {
            let current = self.chain.block_hash(*block_number).await?;
            if current.as_ref() != Some(remembered_hash) {
                orphaned.push(*block_number);
            }
        }
        for block_number in orphaned {
            if let Some(deposits) = self.credited_by_block.remove(&block_number) {
                for deposit in deposits {
                    self.ledger
                        .reverse_deposit_atomic(&deposit.address, &deposit)
                        .await?;
                    report.reversed.push(deposit);
                }
            }
            self.seen_hashes.retain(|(b, _)| *b != block_number);
        }
        Ok(())
    }
}

/// A deterministic fake used by tests and the scenario harness (C13,
/// §4.12): blocks and logs are whatever the test pushed onto it, and a
/// block's hash can be rewritten mid-test to simulate a reorg.
pub struct FakeChainClient {
    inner: std::sync::Mutex<FakeChainState>,
}

#[derive(Default)]
struct FakeChainState {
    latest_block: u64,
    hashes: HashMap<u64, [u8; 32]>,
    logs: HashMap<u64, Vec<RawDepositLog>>,
}

impl Default for FakeChainClient {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeChainClient {
    pub fn new() -> Self {
        FakeChainClient {
            inner: std::sync::Mutex::new(FakeChainState::default()),
        }
    }

    pub fn push_block(&self, block_number: u64, hash: [u8; 32], logs: Vec<RawDepositLog>) {
        let mut state = self.inner.lock().unwrap();
        state.latest_block = state.latest_block.max(block_number);
        state.hashes.insert(block_number, hash);
        state.logs.insert(block_number, logs);
    }

    /// Simulates a reorg: rewrites the hash of `block_number` as if a
    /// competing fork replaced it, optionally with a different log set.
    pub fn reorg_block(&self, block_number: u64, new_hash: [u8; 32], new_logs: Vec<RawDepositLog>) {
        let mut state = self.inner.lock().unwrap();
        state.hashes.insert(block_number, new_hash);
        state.logs.insert(block_number, new_logs);
    }
}

#[async_trait]
impl ChainClient for FakeChainClient {
    async fn latest_block(&self) -> Result<u64> {
        Ok(self.inner.lock().unwrap().latest_block)
    }

    async fn block_hash(&self, block_number: u64) -> Result<Option<[u8; 32]>> {
        Ok(self.inner.lock().unwrap().hashes.get(&block_number).copied())
    }

    async fn deposit_logs_in_range(&self, from: u64, to: u64) -> Result<Vec<RawDepositLog>> {
        let state = self.inner.lock().unwrap();
        let mut out = Vec::new();
        for b in from..=to {
            if let Some(logs) = state.logs.get(&b) {
                out.extend(logs.iter().cloned());
            }
        }
        Ok(out)
    }
}

pub fn sample_tx_hash(seed: u8) -> alloy::primitives::TxHash {
    alloy::primitives::TxHash::from([seed; 32])
}

pub fn sample_address(seed: u8) -> alloy::primitives::Address {
    let mut bytes = [0u8; 20];
    bytes[0] = seed;
    alloy::primitives::Address::from(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::memory::InMemoryLedger;

    fn block_hash(n: u8) -> [u8; 32] {
        [n; 32]
    }

    #[tokio::test]
    async fn credits_deposits_only_after_confirmation_depth() {
        let chain = Arc::new(FakeChainClient::new());
        let ledger: Arc<dyn LedgerStore> = Arc::new(InMemoryLedger::new());
        let log = RawDepositLog {
            tx_hash: sample_tx_hash(1),
            log_index: 0,
            block_number: 1,
            from: sample_address(1),
            amount: alloy::primitives::U256::from(500u64),
        };
        chain.push_block(1, block_hash(1), vec![log]);
        for b in 2..=5 {
            chain.push_block(b, block_hash(b as u8), vec![]);
        }

        let mut indexer = DepositIndexer::new(chain.clone(), ledger.clone(), 12, 25, DepositCursor::default());
        let report = indexer.poll_once().await.unwrap();
        assert!(report.credited.is_empty(), "too early to confirm");

        for b in 6..=13 {
            chain.push_block(b, block_hash(b as u8), vec![]);
        }
        let report = indexer.poll_once().await.unwrap();
        assert_eq!(report.credited.len(), 1);
        let player = format!("{:#x}", sample_address(1));
        assert_eq!(ledger.get_account(&player).await.unwrap().available, 500);
    }

    #[tokio::test]
    async fn reorged_block_reverses_its_credit() {
        let chain = Arc::new(FakeChainClient::new());
        let ledger: Arc<dyn LedgerStore> = Arc::new(InMemoryLedger::new());
        let log = RawDepositLog {
            tx_hash: sample_tx_hash(2),
            log_index: 0,
            block_number: 1,
            from: sample_address(2),
            amount: alloy::primitives::U256::from(777u64),
        };
        chain.push_block(1, block_hash(1), vec![log]);
        for b in 2..=13 {
            chain.push_block(b, block_hash(b as u8), vec![]);
        }
        let mut indexer = DepositIndexer::new(chain.clone(), ledger.clone(), 12, 25, DepositCursor::default());
        let report = indexer.poll_once().await.unwrap();
        assert_eq!(report.credited.len(), 1);
        let player = format!("{:#x}", sample_address(2));
        assert_eq!(ledger.get_account(&player).await.unwrap().available, 777);

        chain.reorg_block(1, block_hash(99), vec![]);
        let report = indexer.poll_once().await.unwrap();
        assert_eq!(report.reversed.len(), 1);
        assert_eq!(ledger.get_account(&player).await.unwrap().available, 0);
    }
}

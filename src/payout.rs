//! Payout dispatcher and solvency manager (C4, §4.5 and §4.7). Withdrawals
//! are debited from the player's balance up front, then broadcast from the
//! hot wallet with retry/backoff; a withdrawal that exhausts its retries is
//! refunded via a compensating ledger entry rather than left dangling.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::sleep;
use uuid::Uuid;

use crate::error::{CoreError, Result};
use crate::ledger::LedgerStore;
use crate::model::{Withdrawal, WithdrawalStatus};

/// Port over the signing/broadcast/confirmation surface of the chain client
/// the dispatcher actually needs, kept separate from `indexer::ChainClient`
/// since the two have nothing in common beyond "talks to the chain".
#[async_trait]
pub trait PayoutBroadcaster: Send + Sync {
    async fn broadcast(&self, to: &str, amount: u128) -> Result<String>;
    async fn is_confirmed(&self, tx_hash: &str) -> Result<bool>;
    async fn hot_wallet_balance(&self) -> Result<u128>;
}

/// Bankroll thresholds that gate new withdrawals and bets (§4.7).
#[derive(Debug, Clone, Copy)]
pub struct SolvencyThresholds {
    pub b_min_wei: u128,
    pub b_max_wei: u128,
    pub liability_factor: f64,
}

pub struct SolvencyManager {
    thresholds: SolvencyThresholds,
    emergency: AtomicBool,
}

impl SolvencyManager {
    pub fn new(thresholds: SolvencyThresholds) -> Self {
        SolvencyManager {
            thresholds,
            emergency: AtomicBool::new(false),
        }
    }

    pub fn is_emergency(&self) -> bool {
        self.emergency.load(Ordering::SeqCst)
    }

    pub fn set_emergency(&self, on: bool) {
        self.emergency.store(on, Ordering::SeqCst);
    }

    /// Withdrawals and new bets are refused once the hot wallet dips below
    /// `B_min`; above `B_max` the operator is expected to sweep the excess
    /// into cold storage (handled outside this process).
    pub fn check_bankroll(&self, hot_wallet_balance: u128) -> Result<()> {
        if self.is_emergency() {
            return Err(CoreError::SolvencyBlocked);
        }
        if hot_wallet_balance < self.thresholds.b_min_wei {
            return Err(CoreError::SolvencyBlocked);
        }
        Ok(())
    }

    pub fn liability_ceiling(&self, hot_wallet_balance: u128) -> u128 {
        (hot_wallet_balance as f64 * self.thresholds.liability_factor) as u128
    }

    pub fn above_sweep_threshold(&self, hot_wallet_balance: u128) -> bool {
        hot_wallet_balance > self.thresholds.b_max_wei
    }
}

pub struct PayoutDispatcher {
    ledger: Arc<dyn LedgerStore>,
    broadcaster: Arc<dyn PayoutBroadcaster>,
    solvency: Arc<SolvencyManager>,
    n_retry: u32,
}

impl PayoutDispatcher {
    pub fn new(
        ledger: Arc<dyn LedgerStore>,
        broadcaster: Arc<dyn PayoutBroadcaster>,
        solvency: Arc<SolvencyManager>,
        n_retry: u32,
    ) -> Self {
        PayoutDispatcher {
            ledger,
            broadcaster,
            solvency,
            n_retry,
        }
    }

    /// Debits the player, then drives one withdrawal through broadcast and
    /// confirmation with exponential backoff. Returns the final withdrawal
    /// record regardless of outcome — callers inspect `.status`.
    pub async fn process(
        &self,
        player: &str,
        amount: u128,
        client_id: String,
    ) -> Result<Withdrawal> {
        let hot_wallet_balance = self.broadcaster.hot_wallet_balance().await?;
        self.solvency.check_bankroll(hot_wallet_balance)?;

        let withdrawal_id = Uuid::now_v7();
        self.ledger
            .debit_withdraw_atomic(withdrawal_id, player, amount)
            .await?;

        let mut withdrawal = Withdrawal {
            id: withdrawal_id,
            account: player.to_string(),
            amount,
            client_id,
            status: WithdrawalStatus::Queued,
            tx_hash: None,
            attempt_count: 0,
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
        };

        self.broadcast_with_retry(&mut withdrawal).await;
        Ok(withdrawal)
    }

    async fn broadcast_with_retry(&self, withdrawal: &mut Withdrawal) {
        withdrawal.status = WithdrawalStatus::Broadcasting;
        loop {
            match self
                .broadcaster
                .broadcast(&withdrawal.account, withdrawal.amount)
                .await
            {
                Ok(tx_hash) => {
                    withdrawal.tx_hash = Some(tx_hash.clone());
                    if self.wait_for_confirmation(&tx_hash).await {
                        withdrawal.status = WithdrawalStatus::Confirmed;
                    } else {
                        withdrawal.status = WithdrawalStatus::Failed;
                        self.refund(withdrawal).await;
                    }
                    withdrawal.updated_at = chrono::Utc::now();
                    return;
                }
                Err(e) => {
                    withdrawal.attempt_count += 1;
                    withdrawal.updated_at = chrono::Utc::now();
                    if withdrawal.attempt_count > self.n_retry {
                        tracing::error!(
                            withdrawal_id = %withdrawal.id,
                            error = %e,
                            "withdrawal exhausted retries, refunding"
                        );
                        withdrawal.status = WithdrawalStatus::Failed;
                        self.refund(withdrawal).await;
                        return;
                    }
                    withdrawal.status = WithdrawalStatus::Retrying;
                    let backoff = Duration::from_millis(100 * 2u64.pow(withdrawal.attempt_count));
                    tracing::warn!(
                        withdrawal_id = %withdrawal.id,
                        attempt = withdrawal.attempt_count,
                        error = %e,
                        "withdrawal broadcast failed, retrying"
                    );
                    sleep(backoff).await;
                }
            }
        }
    }

    async fn wait_for_confirmation(&self, tx_hash: &str) -> bool {
        for _ in 0..self.n_retry.max(1) {
            match self.broadcaster.is_confirmed(tx_hash).await {
                Ok(true) => return true,
                Ok(false) => sleep(Duration::from_millis(200)).await,
                Err(_) => sleep(Duration::from_millis(200)).await,
            }
        }
        false
    }

    async fn refund(&self, withdrawal: &mut Withdrawal) {
        match self
            .ledger
            .refund_withdraw_atomic(withdrawal.id, &withdrawal.account, withdrawal.amount)
            .await
        {
            Ok(_) => withdrawal.status = WithdrawalStatus::Refunded,
            Err(e) => {
                tracing::error!(
                    withdrawal_id = %withdrawal.id,
                    error = %e,
                    "refund failed — requires manual reconciliation"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::memory::InMemoryLedger;
    use crate::model::ConfirmedDeposit;
    use std::sync::Mutex;

    struct AlwaysFailBroadcaster {
        wallet_balance: u128,
    }
    #[async_trait]
    impl PayoutBroadcaster for AlwaysFailBroadcaster {
        async fn broadcast(&self, _to: &str, _amount: u128) -> Result<String> {
            Err(CoreError::InvalidInput("rpc down".into()))
        }
        async fn is_confirmed(&self, _tx_hash: &str) -> Result<bool> {
            Ok(true)
        }
        async fn hot_wallet_balance(&self) -> Result<u128> {
            Ok(self.wallet_balance)
        }
    }

    struct AlwaysSucceedBroadcaster {
        calls: Mutex<u32>,
        wallet_balance: u128,
    }
    #[async_trait]
    impl PayoutBroadcaster for AlwaysSucceedBroadcaster {
        async fn broadcast(&self, _to: &str, _amount: u128) -> Result<String> {
            *self.calls.lock().unwrap() += 1;
            Ok("0xabc".into())
        }
        async fn is_confirmed(&self, _tx_hash: &str) -> Result<bool> {
            Ok(true)
        }
        async fn hot_wallet_balance(&self) -> Result<u128> {
            Ok(self.wallet_balance)
        }
    }

    async fn funded_ledger(player: &str, amount: u128) -> Arc<InMemoryLedger> {
        let ledger = Arc::new(InMemoryLedger::new());
        let deposit = ConfirmedDeposit {
            tx_hash: "0xseed".into(),
            log_index: 0,
            address: player.into(),
            amount,
            block_number: 1,
            credited_at: chrono::Utc::now(),
        };
        ledger.credit_deposit_atomic(player, &deposit).await.unwrap();
        ledger
    }

    #[tokio::test]
    async fn successful_withdrawal_debits_and_confirms() {
        let ledger = funded_ledger("alice", 1_000).await;
        let broadcaster = Arc::new(AlwaysSucceedBroadcaster {
            calls: Mutex::new(0),
            wallet_balance: 10_000,
        });
        let solvency = Arc::new(SolvencyManager::new(SolvencyThresholds {
            b_min_wei: 0,
            b_max_wei: u128::MAX,
            liability_factor: 1.0,
        }));
        let dispatcher = PayoutDispatcher::new(ledger.clone(), broadcaster, solvency, 3);
        let withdrawal = dispatcher
            .process("alice", 400, "client-1".into())
            .await
            .unwrap();
        assert_eq!(withdrawal.status, WithdrawalStatus::Confirmed);
        assert_eq!(ledger.get_account("alice").await.unwrap().available, 600);
    }

    #[tokio::test]
    async fn exhausted_retries_refund_the_player() {
        let ledger = funded_ledger("bob", 1_000).await;
        let broadcaster = Arc::new(AlwaysFailBroadcaster { wallet_balance: 10_000 });
        let solvency = Arc::new(SolvencyManager::new(SolvencyThresholds {
            b_min_wei: 0,
            b_max_wei: u128::MAX,
            liability_factor: 1.0,
        }));
        let dispatcher = PayoutDispatcher::new(ledger.clone(), broadcaster, solvency, 1);
        let withdrawal = dispatcher
            .process("bob", 400, "client-2".into())
            .await
            .unwrap();
        assert_eq!(withdrawal.status, WithdrawalStatus::Refunded);
        assert_eq!(ledger.get_account("bob").await.unwrap().available, 1_000);
    }

    #[tokio::test]
    async fn below_bankroll_floor_blocks_new_withdrawals() {
        let ledger = funded_ledger("carol", 1_000).await;
        let broadcaster = Arc::new(AlwaysSucceedBroadcaster {
            calls: Mutex::new(0),
            wallet_balance: 1_000,
        });
        let solvency = Arc::new(SolvencyManager::new(SolvencyThresholds {
            b_min_wei: 5_000,
            b_max_wei: u128::MAX,
            liability_factor: 1.0,
        }));
        let dispatcher = PayoutDispatcher::new(ledger, broadcaster, solvency, 3);
        let err = dispatcher
            .process("carol", 400, "client-3".into())
            .await
            .unwrap_err();
        assert_eq!(err.code(), "SOLVENCY_BLOCKED");
    }

    #[tokio::test]
    async fn emergency_mode_blocks_even_a_healthy_bankroll() {
        let solvency = Arc::new(SolvencyManager::new(SolvencyThresholds {
            b_min_wei: 0,
            b_max_wei: u128::MAX,
            liability_factor: 1.0,
        }));
        solvency.set_emergency(true);
        assert!(solvency.check_bankroll(1_000_000).is_err());
    }
}

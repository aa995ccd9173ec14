//! Double-entry ledger (C2, §4.3). Every balance mutation is expressed as one
//! or more signed entries against an account; no code path adjusts an
//! `Account.available`/`locked` field directly. The trait is the seam between
//! the book/engine/payout dispatcher and whatever actually stores the rows —
//! Postgres in production, an in-memory map in tests.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::Result;
use crate::model::{Account, ConfirmedDeposit, LedgerEntry};

/// Every atomic primitive here must be all-or-nothing: either every entry it
/// writes lands and every balance it touches moves, or none of it does
/// (invariant 1 and 3, §8). Implementations back this with a single
/// SERIALIZABLE-or-stronger transaction.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Moves `amount` from `player`'s available balance into locked, recording
    /// a `BetStake` entry. Fails with `InsufficientFunds` if the available
    /// balance can't cover it. Idempotent on `(round_id, client_id)`, not on
    /// `bet_id` — a client that retries a bet before learning the accepted
    /// `bet_id` must land on the same entry, never a second stake lock.
    async fn place_bet_atomic(
        &self,
        bet_id: Uuid,
        round_id: Uuid,
        player: &str,
        amount: u128,
        client_id: &str,
    ) -> Result<LedgerEntry>;

    /// Releases `amount` from `player`'s locked balance into the house
    /// account, recording a `BetLose` entry. Idempotent on `bet_id`.
    async fn settle_loss_atomic(
        &self,
        bet_id: Uuid,
        round_id: Uuid,
        player: &str,
        amount: u128,
    ) -> Result<LedgerEntry>;

    /// Releases the locked stake back to `player`'s available balance and
    /// credits `payout - stake` from the house, recording a `BetWin` entry
    /// for the net delta. Idempotent on `bet_id`.
    async fn settle_win_atomic(
        &self,
        bet_id: Uuid,
        round_id: Uuid,
        player: &str,
        stake: u128,
        payout: u128,
    ) -> Result<LedgerEntry>;

    /// Credits a confirmed on-chain deposit to `player`'s available balance.
    /// Idempotent on `ConfirmedDeposit::idempotency_key` — the indexer may
    /// replay the same log across restarts or shallow reorgs and must never
    /// double-credit it (invariant 4, §8).
    async fn credit_deposit_atomic(
        &self,
        player: &str,
        deposit: &ConfirmedDeposit,
    ) -> Result<LedgerEntry>;

    /// Debits `amount` from `player`'s available balance ahead of a
    /// withdrawal broadcast. Idempotent on `withdrawal_id`.
    async fn debit_withdraw_atomic(
        &self,
        withdrawal_id: Uuid,
        player: &str,
        amount: u128,
    ) -> Result<LedgerEntry>;

    /// Reverses a `debit_withdraw_atomic` whose broadcast permanently failed,
    /// recording a compensating `Adjustment` entry rather than mutating or
    /// deleting the original row (invariant 2, §8).
    async fn refund_withdraw_atomic(
        &self,
        withdrawal_id: Uuid,
        player: &str,
        amount: u128,
    ) -> Result<LedgerEntry>;

    /// Reverses a previously credited deposit that turned out to sit on an
    /// orphaned block, recording a compensating `Adjustment` entry keyed on
    /// the same tx/log-index so a repeated reorg notification can't double
    /// reverse it (§4.4).
    async fn reverse_deposit_atomic(
        &self,
        player: &str,
        deposit: &ConfirmedDeposit,
    ) -> Result<LedgerEntry>;

    async fn get_account(&self, player: &str) -> Result<Account>;

    /// Full entry history for an account, oldest first — used by the
    /// reconciliation scenario and admin tooling.
    async fn entries_for(&self, player: &str) -> Result<Vec<LedgerEntry>>;

    /// `true` if this idempotency key (a bet id, withdrawal id, or deposit
    /// key) has already been applied.
    async fn already_applied(&self, idempotency_key: &str) -> Result<bool>;
}

#[cfg(test)]
mod tests {
    use super::memory::InMemoryLedger;
    use super::*;

    #[tokio::test]
    async fn deposit_then_bet_then_win_nets_correctly() {
        let ledger = InMemoryLedger::new();
        let player = "alice";
        let deposit = ConfirmedDeposit {
            tx_hash: "0xabc".into(),
            log_index: 0,
            address: player.into(),
            amount: 1_000,
            block_number: 100,
            credited_at: chrono::Utc::now(),
        };
        ledger.credit_deposit_atomic(player, &deposit).await.unwrap();
        assert_eq!(ledger.get_account(player).await.unwrap().available, 1_000);

        let bet_id = Uuid::now_v7();
        let round_id = Uuid::now_v7();
        ledger
            .place_bet_atomic(bet_id, round_id, player, 200, "client-1")
            .await
            .unwrap();
        let acct = ledger.get_account(player).await.unwrap();
        assert_eq!(acct.available, 800);
        assert_eq!(acct.locked, 200);

        ledger
            .settle_win_atomic(bet_id, round_id, player, 200, 500)
            .await
            .unwrap();
        let acct = ledger.get_account(player).await.unwrap();
        assert_eq!(acct.locked, 0);
        assert_eq!(acct.available, 800 + 500);
    }

    #[tokio::test]
    async fn place_bet_is_idempotent_on_round_and_client_id() {
        let ledger = InMemoryLedger::new();
        let player = "bob";
        let deposit = ConfirmedDeposit {
            tx_hash: "0xdef".into(),
            log_index: 0,
            address: player.into(),
            amount: 1_000,
            block_number: 1,
            credited_at: chrono::Utc::now(),
        };
        ledger.credit_deposit_atomic(player, &deposit).await.unwrap();

        let round_id = Uuid::now_v7();
        // a retry before the caller learned the first attempt's bet_id still
        // lands on the same entry, keyed on (round_id, client_id).
        let first = ledger
            .place_bet_atomic(Uuid::now_v7(), round_id, player, 300, "client-2")
            .await
            .unwrap();
        let second = ledger
            .place_bet_atomic(Uuid::now_v7(), round_id, player, 300, "client-2")
            .await
            .unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(ledger.get_account(player).await.unwrap().locked, 300);
    }

    #[tokio::test]
    async fn insufficient_funds_is_rejected() {
        let ledger = InMemoryLedger::new();
        let err = ledger
            .place_bet_atomic(Uuid::now_v7(), Uuid::now_v7(), "carol", 1, "client-3")
            .await
            .unwrap_err();
        assert_eq!(err.code(), "INSUFFICIENT_FUNDS");
    }

    #[tokio::test]
    async fn deposit_credit_is_idempotent_on_tx_log_index() {
        let ledger = InMemoryLedger::new();
        let deposit = ConfirmedDeposit {
            tx_hash: "0x1".into(),
            log_index: 2,
            address: "dave".into(),
            amount: 50,
            block_number: 9,
            credited_at: chrono::Utc::now(),
        };
        ledger.credit_deposit_atomic("dave", &deposit).await.unwrap();
        ledger.credit_deposit_atomic("dave", &deposit).await.unwrap();
        assert_eq!(ledger.get_account("dave").await.unwrap().available, 50);
    }
}

//! In-memory `LedgerStore` (C13, §4.12). Mirrors the Postgres implementation's
//! transaction boundaries with a single `std::sync::Mutex` guarding the whole
//! map — fine for tests, wrong for production, which is why `postgres` exists.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use crate::error::{CoreError, Result};
use crate::model::{Account, ConfirmedDeposit, LedgerEntry, LedgerRef, OpType, HOUSE};

use super::LedgerStore;

struct State {
    accounts: HashMap<String, Account>,
    entries: Vec<LedgerEntry>,
    applied: HashMap<String, Uuid>,
}

pub struct InMemoryLedger {
    state: Mutex<State>,
}

impl Default for InMemoryLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryLedger {
    pub fn new() -> Self {
        InMemoryLedger {
            state: Mutex::new(State {
                accounts: HashMap::new(),
                entries: Vec::new(),
                applied: HashMap::new(),
            }),
        }
    }

    fn record(
        state: &mut State,
        key: String,
        account_ref: &str,
        op_type: OpType,
        amount: i128,
        ref_: LedgerRef,
    ) -> LedgerEntry {
        let entry = LedgerEntry {
            id: Uuid::now_v7(),
            created_at: Utc::now(),
            account_ref: account_ref.to_string(),
            op_type,
            amount,
            ref_,
        };
        state.applied.insert(key, entry.id);
        state.entries.push(entry.clone());
        entry
    }

    fn apply_delta(account: &mut Account, available_delta: i128, locked_delta: i128) {
        account.available = (account.available as i128 + available_delta) as u128;
        account.locked = (account.locked as i128 + locked_delta) as u128;
        account.version += 1;
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedger {
    async fn place_bet_atomic(
        &self,
        bet_id: Uuid,
        round_id: Uuid,
        player: &str,
        amount: u128,
        client_id: &str,
    ) -> Result<LedgerEntry> {
        let key = format!("bet:{round_id}:{client_id}");
        let mut state = self.state.lock().unwrap();
        if let Some(existing_id) = state.applied.get(&key).copied() {
            return Ok(state
                .entries
                .iter()
                .find(|e| e.id == existing_id)
                .cloned()
                .expect("applied key without entry"));
        }
        let account = state.accounts.entry(player.to_string()).or_default();
        if account.available < amount {
            return Err(CoreError::InsufficientFunds);
        }
        Self::apply_delta(account, -(amount as i128), amount as i128);
        Ok(Self::record(
            &mut state,
            key,
            player,
            OpType::BetStake,
            -(amount as i128),
            LedgerRef {
                client_id: Some(client_id.to_string()),
                round_id: Some(round_id),
                bet_id: Some(bet_id),
                ..Default::default()
            },
        ))
    }

    async fn settle_loss_atomic(
        &self,
        bet_id: Uuid,
        round_id: Uuid,
        player: &str,
        amount: u128,
    ) -> Result<LedgerEntry> {
        let key = format!("loss:{bet_id}");
        let mut state = self.state.lock().unwrap();
        if let Some(existing_id) = state.applied.get(&key).copied() {
            return Ok(state
                .entries
                .iter()
                .find(|e| e.id == existing_id)
                .cloned()
                .expect("applied key without entry"));
        }
        let account = state.accounts.entry(player.to_string()).or_default();
        Self::apply_delta(account, 0, -(amount as i128));
        let house = state.accounts.entry(HOUSE.to_string()).or_default();
        Self::apply_delta(house, amount as i128, 0);
        let entry = Self::record(
            &mut state,
            key,
            player,
            OpType::BetLose,
            -(amount as i128),
            LedgerRef {
                round_id: Some(round_id),
                bet_id: Some(bet_id),
                ..Default::default()
            },
        );
        Self::record(
            &mut state,
            format!("loss:{bet_id}:house"),
            HOUSE,
            OpType::BetLose,
            amount as i128,
            LedgerRef {
                round_id: Some(round_id),
                bet_id: Some(bet_id),
                ..Default::default()
            },
        );
        Ok(entry)
    }

    async fn settle_win_atomic(
        &self,
        bet_id: Uuid,
        round_id: Uuid,
        player: &str,
        stake: u128,
        payout: u128,
    ) -> Result<LedgerEntry> {
        let key = format!("win:{bet_id}");
        let mut state = self.state.lock().unwrap();
        if let Some(existing_id) = state.applied.get(&key).copied() {
            return Ok(state
                .entries
                .iter()
                .find(|e| e.id == existing_id)
                .cloned()
                .expect("applied key without entry"));
        }
        let net = payout as i128 - stake as i128;
        let account = state.accounts.entry(player.to_string()).or_default();
        // unlock the stake, then credit the net win (may be negative if the
        // auto-cashout multiplier ever dipped below 1x, which it cannot, but
        // the arithmetic stays correct either way).
        Self::apply_delta(account, stake as i128, -(stake as i128));
        Self::apply_delta(account, net, 0);
        let house = state.accounts.entry(HOUSE.to_string()).or_default();
        Self::apply_delta(house, -net, 0);
        let entry = Self::record(
            &mut state,
            key,
            player,
            OpType::BetWin,
            net,
            LedgerRef {
                round_id: Some(round_id),
                bet_id: Some(bet_id),
                ..Default::default()
            },
        );
        Self::record(
            &mut state,
            format!("win:{bet_id}:house"),
            HOUSE,
            OpType::BetWin,
            -net,
            LedgerRef {
                round_id: Some(round_id),
                bet_id: Some(bet_id),
                ..Default::default()
            },
        );
        Ok(entry)
    }

    async fn credit_deposit_atomic(
        &self,
        player: &str,
        deposit: &ConfirmedDeposit,
    ) -> Result<LedgerEntry> {
        let key = ConfirmedDeposit::idempotency_key(&deposit.tx_hash, deposit.log_index);
        let mut state = self.state.lock().unwrap();
        if let Some(existing_id) = state.applied.get(&key).copied() {
            return Ok(state
                .entries
                .iter()
                .find(|e| e.id == existing_id)
                .cloned()
                .expect("applied key without entry"));
        }
        let account = state.accounts.entry(player.to_string()).or_default();
        Self::apply_delta(account, deposit.amount as i128, 0);
        Ok(Self::record(
            &mut state,
            key,
            player,
            OpType::Deposit,
            deposit.amount as i128,
            LedgerRef {
                tx_hash: Some(deposit.tx_hash.clone()),
                ..Default::default()
            },
        ))
    }

    async fn debit_withdraw_atomic(
        &self,
        withdrawal_id: Uuid,
        player: &str,
        amount: u128,
    ) -> Result<LedgerEntry> {
        let key = withdrawal_id.to_string();
        let mut state = self.state.lock().unwrap();
        if let Some(existing_id) = state.applied.get(&key).copied() {
            return Ok(state
                .entries
                .iter()
                .find(|e| e.id == existing_id)
                .cloned()
                .expect("applied key without entry"));
        }
        let account = state.accounts.entry(player.to_string()).or_default();
        if account.available < amount {
            return Err(CoreError::InsufficientFunds);
        }
        Self::apply_delta(account, -(amount as i128), 0);
        Ok(Self::record(
            &mut state,
            key,
            player,
            OpType::Withdraw,
            -(amount as i128),
            LedgerRef::default(),
        ))
    }

    async fn refund_withdraw_atomic(
        &self,
        withdrawal_id: Uuid,
        player: &str,
        amount: u128,
    ) -> Result<LedgerEntry> {
        let key = format!("refund:{withdrawal_id}");
        let mut state = self.state.lock().unwrap();
        if let Some(existing_id) = state.applied.get(&key).copied() {
            return Ok(state
                .entries
                .iter()
                .find(|e| e.id == existing_id)
                .cloned()
                .expect("applied key without entry"));
        }
        let account = state.accounts.entry(player.to_string()).or_default();
        Self::apply_delta(account, amount as i128, 0);
        Ok(Self::record(
            &mut state,
            key,
            player,
            OpType::Adjustment,
            amount as i128,
            LedgerRef::default(),
        ))
    }

    async fn reverse_deposit_atomic(
        &self,
        player: &str,
        deposit: &ConfirmedDeposit,
    ) -> Result<LedgerEntry> {
        let key = format!(
            "reorg:{}",
            ConfirmedDeposit::idempotency_key(&deposit.tx_hash, deposit.log_index)
        );
        let mut state = self.state.lock().unwrap();
        if let Some(existing_id) = state.applied.get(&key).copied() {
            return Ok(state
                .entries
                .iter()
                .find(|e| e.id == existing_id)
                .cloned()
                .expect("applied key without entry"));
        }
        let account = state.accounts.entry(player.to_string()).or_default();
        Self::apply_delta(account, -(deposit.amount as i128), 0);
        Ok(Self::record(
            &mut state,
            key,
            player,
            OpType::Adjustment,
            -(deposit.amount as i128),
            LedgerRef {
                tx_hash: Some(deposit.tx_hash.clone()),
                ..Default::default()
            },
        ))
    }

    async fn get_account(&self, player: &str) -> Result<Account> {
        let state = self.state.lock().unwrap();
        Ok(state.accounts.get(player).copied().unwrap_or_default())
    }

    async fn entries_for(&self, player: &str) -> Result<Vec<LedgerEntry>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .entries
            .iter()
            .filter(|e| e.account_ref == player)
            .cloned()
            .collect())
    }

    async fn already_applied(&self, idempotency_key: &str) -> Result<bool> {
        let state = self.state.lock().unwrap();
        Ok(state.applied.contains_key(idempotency_key))
    }
}

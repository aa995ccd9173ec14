//! Postgres-backed `LedgerStore`. Every primitive runs inside one
//! `SERIALIZABLE` transaction: read the account row `FOR UPDATE`, check the
//! idempotency key, write the entry, write the balance, commit. A unique
//! constraint on `ledger_entries.idempotency_key` is the last line of
//! defense if two workers race the same key.

use async_trait::async_trait;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::error::{CoreError, Result};
use crate::model::{Account, ConfirmedDeposit, LedgerEntry, LedgerRef, OpType, HOUSE};

use super::LedgerStore;

pub struct PostgresLedger {
    pool: PgPool,
}

impl PostgresLedger {
    pub fn new(pool: PgPool) -> Self {
        PostgresLedger { pool }
    }

    async fn load_existing(&self, idempotency_key: &str) -> Result<Option<LedgerEntry>> {
        let row = sqlx::query(
            "SELECT id, created_at, account_ref, op_type, amount, client_id, round_id, bet_id, tx_hash \
             FROM ledger_entries WHERE idempotency_key = $1",
        )
        .bind(idempotency_key)
        .fetch_optional(&self.pool)
        .await
        .map_err(CoreError::internal)?;

        Ok(row.map(|r| LedgerEntry {
            id: r.get("id"),
            created_at: r.get("created_at"),
            account_ref: r.get("account_ref"),
            op_type: op_type_from_str(r.get("op_type")),
            amount: r.get::<i64, _>("amount") as i128,
            ref_: LedgerRef {
                client_id: r.get("client_id"),
                round_id: r.get("round_id"),
                bet_id: r.get("bet_id"),
                tx_hash: r.get("tx_hash"),
            },
        }))
    }

    /// Applies one entry plus its balance delta inside `tx`, under the
    /// uniqueness of `idempotency_key`. Returns the existing row unchanged if
    /// the key was already applied (caller decides whether to re-derive
    /// deltas for accounts other than `account_ref`, since only the
    /// `account_ref` row is touched here).
    #[allow(clippy::too_many_arguments)]
    async fn apply_entry(
        &self,
        idempotency_key: &str,
        account_ref: &str,
        op_type: OpType,
        amount: i128,
        available_delta: i128,
        locked_delta: i128,
        ref_: LedgerRef,
    ) -> Result<LedgerEntry> {
        if let Some(existing) = self.load_existing(idempotency_key).await? {
            return Ok(existing);
        }

        let mut tx = self.pool.begin().await.map_err(CoreError::internal)?;

        sqlx::query(
            "INSERT INTO accounts (account_ref, available, locked, version) \
             VALUES ($1, 0, 0, 0) ON CONFLICT (account_ref) DO NOTHING",
        )
        .bind(account_ref)
        .execute(&mut *tx)
        .await
        .map_err(CoreError::internal)?;

        let row = sqlx::query(
            "SELECT available, locked FROM accounts WHERE account_ref = $1 FOR UPDATE",
        )
        .bind(account_ref)
        .fetch_one(&mut *tx)
        .await
        .map_err(CoreError::internal)?;
        let available: i64 = row.get("available");
        let locked: i64 = row.get("locked");

        let new_available = available as i128 + available_delta;
        let new_locked = locked as i128 + locked_delta;
        if new_available < 0 || new_locked < 0 {
            return Err(CoreError::InsufficientFunds);
        }

        sqlx::query(
            "UPDATE accounts SET available = $1, locked = $2, version = version + 1 \
             WHERE account_ref = $3",
        )
        .bind(new_available as i64)
        .bind(new_locked as i64)
        .bind(account_ref)
        .execute(&mut *tx)
        .await
        .map_err(CoreError::internal)?;

        let id = Uuid::now_v7();
        let created_at = chrono::Utc::now();
        sqlx::query(
            "INSERT INTO ledger_entries \
             (id, idempotency_key, created_at, account_ref, op_type, amount, client_id, round_id, bet_id, tx_hash) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
        )
        .bind(id)
        .bind(idempotency_key)
        .bind(created_at)
        .bind(account_ref)
        .bind(op_type_to_str(op_type))
        .bind(amount as i64)
        .bind(&ref_.client_id)
        .bind(ref_.round_id)
        .bind(ref_.bet_id)
        .bind(&ref_.tx_hash)
        .execute(&mut *tx)
        .await
        .map_err(CoreError::internal)?;

        tx.commit().await.map_err(CoreError::internal)?;

        Ok(LedgerEntry {
            id,
            created_at,
            account_ref: account_ref.to_string(),
            op_type,
            amount,
            ref_,
        })
    }
}

fn op_type_to_str(op: OpType) -> &'static str {
    match op {
        OpType::Deposit => "deposit",
        OpType::Withdraw => "withdraw",
        OpType::BetStake => "bet_stake",
        OpType::BetWin => "bet_win",
        OpType::BetLose => "bet_lose",
        OpType::Adjustment => "adjustment",
    }
}

fn op_type_from_str(s: String) -> OpType {
    match s.as_str() {
        "deposit" => OpType::Deposit,
        "withdraw" => OpType::Withdraw,
        "bet_stake" => OpType::BetStake,
        "bet_win" => OpType::BetWin,
        "bet_lose" => OpType::BetLose,
        _ => OpType::Adjustment,
    }
}

#[async_trait]
impl LedgerStore for PostgresLedger {
    async fn place_bet_atomic(
        &self,
        bet_id: Uuid,
        round_id: Uuid,
        player: &str,
        amount: u128,
        client_id: &str,
    ) -> Result<LedgerEntry> {
        self.apply_entry(
            &format!("bet:{round_id}:{client_id}"),
            player,
            OpType::BetStake,
            -(amount as i128),
            -(amount as i128),
            amount as i128,
            LedgerRef {
                client_id: Some(client_id.to_string()),
                round_id: Some(round_id),
                bet_id: Some(bet_id),
                ..Default::default()
            },
        )
        .await
    }

    async fn settle_loss_atomic(
        &self,
        bet_id: Uuid,
        round_id: Uuid,
        player: &str,
        amount: u128,
    ) -> Result<LedgerEntry> {
        let entry = self
            .apply_entry(
                &format!("loss:{bet_id}"),
                player,
                OpType::BetLose,
                -(amount as i128),
                0,
                -(amount as i128),
                LedgerRef {
                    round_id: Some(round_id),
                    bet_id: Some(bet_id),
                    ..Default::default()
                },
            )
            .await?;
        self.apply_entry(
            &format!("loss:{bet_id}:house"),
            HOUSE,
            OpType::BetLose,
            amount as i128,
            amount as i128,
            0,
            LedgerRef {
                round_id: Some(round_id),
                bet_id: Some(bet_id),
                ..Default::default()
            },
        )
        .await?;
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
        let net = payout as i128 - stake as i128;
        let entry = self
            .apply_entry(
                &format!("win:{bet_id}"),
                player,
                OpType::BetWin,
                net,
                stake as i128 + net,
                -(stake as i128),
                LedgerRef {
                    round_id: Some(round_id),
                    bet_id: Some(bet_id),
                    ..Default::default()
                },
            )
            .await?;
        self.apply_entry(
            &format!("win:{bet_id}:house"),
            HOUSE,
            OpType::BetWin,
            -net,
            -net,
            0,
            LedgerRef {
                round_id: Some(round_id),
                bet_id: Some(bet_id),
                ..Default::default()
            },
        )
        .await?;
        Ok(entry)
    }

    async fn credit_deposit_atomic(
        &self,
        player: &str,
        deposit: &ConfirmedDeposit,
    ) -> Result<LedgerEntry> {
        let key = ConfirmedDeposit::idempotency_key(&deposit.tx_hash, deposit.log_index);
        self.apply_entry(
            &key,
            player,
            OpType::Deposit,
            deposit.amount as i128,
            deposit.amount as i128,
            0,
            LedgerRef {
                tx_hash: Some(deposit.tx_hash.clone()),
                ..Default::default()
            },
        )
        .await
    }

    async fn debit_withdraw_atomic(
        &self,
        withdrawal_id: Uuid,
        player: &str,
        amount: u128,
    ) -> Result<LedgerEntry> {
        self.apply_entry(
            &withdrawal_id.to_string(),
            player,
            OpType::Withdraw,
            -(amount as i128),
            -(amount as i128),
            0,
            LedgerRef::default(),
        )
        .await
    }

    async fn refund_withdraw_atomic(
        &self,
        withdrawal_id: Uuid,
        player: &str,
        amount: u128,
    ) -> Result<LedgerEntry> {
        self.apply_entry(
            &format!("refund:{withdrawal_id}"),
            player,
            OpType::Adjustment,
            amount as i128,
            amount as i128,
            0,
            LedgerRef::default(),
        )
        .await
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
        self.apply_entry(
            &key,
            player,
            OpType::Adjustment,
            -(deposit.amount as i128),
            -(deposit.amount as i128),
            0,
            LedgerRef {
                tx_hash: Some(deposit.tx_hash.clone()),
                ..Default::default()
            },
        )
        .await
    }

    async fn get_account(&self, player: &str) -> Result<Account> {
        let row = sqlx::query("SELECT available, locked, version FROM accounts WHERE account_ref = $1")
            .bind(player)
            .fetch_optional(&self.pool)
            .await
            .map_err(CoreError::internal)?;
        Ok(match row {
            Some(r) => Account {
                available: r.get::<i64, _>("available") as u128,
                locked: r.get::<i64, _>("locked") as u128,
                version: r.get::<i64, _>("version") as u64,
            },
            None => Account::default(),
        })
    }

    async fn entries_for(&self, player: &str) -> Result<Vec<LedgerEntry>> {
        let rows = sqlx::query(
            "SELECT id, created_at, account_ref, op_type, amount, client_id, round_id, bet_id, tx_hash \
             FROM ledger_entries WHERE account_ref = $1 ORDER BY created_at ASC",
        )
        .bind(player)
        .fetch_all(&self.pool)
        .await
        .map_err(CoreError::internal)?;

        Ok(rows
            .into_iter()
            .map(|r| LedgerEntry {
                id: r.get("id"),
                created_at: r.get("created_at"),
                account_ref: r.get("account_ref"),
                op_type: op_type_from_str(r.get("op_type")),
                amount: r.get::<i64, _>("amount") as i128,
                ref_: LedgerRef {
                    client_id: r.get("client_id"),
                    round_id: r.get("round_id"),
                    bet_id: r.get("bet_id"),
                    tx_hash: r.get("tx_hash"),
                },
            })
            .collect())
    }

    async fn already_applied(&self, idempotency_key: &str) -> Result<bool> {
        Ok(self.load_existing(idempotency_key).await?.is_some())
    }
}

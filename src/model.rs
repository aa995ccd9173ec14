//! Core data model (§3). Amounts are wei-precision integers (`u128` for
//! balances, `i128` for signed ledger deltas) so arithmetic never drifts the
//! way floating point would.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const PPM: u64 = 1_000_000;

/// House account sentinel used as `account_ref` for the casino's own funds.
pub const HOUSE: &str = "house";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RoundStatus {
    Pending,
    Betting,
    Running,
    Settled,
}

impl RoundStatus {
    /// `true` if `self -> next` is a legal transition (invariant 6, §8).
    pub fn can_advance_to(self, next: RoundStatus) -> bool {
        use RoundStatus::*;
        matches!(
            (self, next),
            (Pending, Betting) | (Betting, Running) | (Running, Settled)
        )
    }
}

#[derive(Debug, Clone)]
pub struct Round {
    pub id: Uuid,
    pub commit_hash: [u8; 32],
    pub server_seed: Option<[u8; 32]>,
    pub client_entropy: Option<[u8; 32]>,
    pub crash_point_ppm: Option<u64>,
    pub status: RoundStatus,
    pub started_at: chrono::DateTime<chrono::Utc>,
    pub settled_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl Round {
    /// Applies a status transition, panicking on a spec-violating jump — the
    /// engine is the only mutator and always advances one step at a time.
    pub fn advance(&mut self, next: RoundStatus) {
        assert!(
            self.status.can_advance_to(next),
            "illegal round transition {:?} -> {:?}",
            self.status,
            next
        );
        self.status = next;
    }
}

/// Discriminates how a bet's stake is sourced — the tagged-record redesign
/// of §9 replacing an ad-hoc `bet_type` flag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BetFunding {
    Balance,
    OnChain { tx_hash: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BetStatus {
    Open,
    Cashed,
    Lost,
    Refunded,
}

#[derive(Debug, Clone)]
pub struct Bet {
    pub id: Uuid,
    pub round_id: Uuid,
    pub player: String,
    pub stake: u128,
    pub funding: BetFunding,
    pub auto_cashout_ppm: Option<u64>,
    pub placed_at: chrono::DateTime<chrono::Utc>,
    pub client_id: String,
    pub cashout_ppm: Option<u64>,
    pub payout: Option<u128>,
    pub status: BetStatus,
}

impl Bet {
    /// `payout = floor(stake * cashout_ppm / PPM)` (invariant 9, §8).
    pub fn payout_for(stake: u128, cashout_ppm: u64) -> u128 {
        stake
            .checked_mul(cashout_ppm as u128)
            .expect("stake*cashout_ppm overflow")
            / PPM as u128
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpType {
    Deposit,
    Withdraw,
    BetStake,
    BetWin,
    BetLose,
    Adjustment,
}

/// Opaque idempotency/lineage reference carried by every ledger row.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LedgerRef {
    pub client_id: Option<String>,
    pub round_id: Option<Uuid>,
    pub bet_id: Option<Uuid>,
    pub tx_hash: Option<String>,
}

#[derive(Debug, Clone)]
pub struct LedgerEntry {
    pub id: Uuid,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub account_ref: String,
    pub op_type: OpType,
    pub amount: i128,
    pub ref_: LedgerRef,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Account {
    pub available: u128,
    pub locked: u128,
    pub version: u64,
}

impl Account {
    pub fn total(&self) -> u128 {
        self.available + self.locked
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DepositCursor {
    pub last_processed_block: u64,
}

#[derive(Debug, Clone)]
pub struct ConfirmedDeposit {
    pub tx_hash: String,
    pub log_index: u32,
    pub address: String,
    pub amount: u128,
    pub block_number: u64,
    pub credited_at: chrono::DateTime<chrono::Utc>,
}

impl ConfirmedDeposit {
    pub fn idempotency_key(tx_hash: &str, log_index: u32) -> String {
        format!("{tx_hash}:{log_index}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WithdrawalStatus {
    PendingTx,
    Queued,
    Broadcasting,
    Retrying,
    Confirmed,
    Failed,
    Refunded,
}

#[derive(Debug, Clone, Serialize)]
pub struct Withdrawal {
    pub id: Uuid,
    pub account: String,
    pub amount: u128,
    pub client_id: String,
    pub status: WithdrawalStatus,
    pub tx_hash: Option<String>,
    pub attempt_count: u32,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

/// Admin-tunable limits (§4.7), persisted as a single-row table so a restart
/// doesn't silently discard operator overrides.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Limits {
    pub min_stake_wei: u128,
    pub max_stake_wei: u128,
    pub cap_mult: f64,
    pub liability_factor: f64,
    pub per_player_cooldown_ms: u64,
    pub round_cap: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_status_advances_one_step_at_a_time() {
        assert!(RoundStatus::Pending.can_advance_to(RoundStatus::Betting));
        assert!(RoundStatus::Betting.can_advance_to(RoundStatus::Running));
        assert!(RoundStatus::Running.can_advance_to(RoundStatus::Settled));
        assert!(!RoundStatus::Pending.can_advance_to(RoundStatus::Running));
        assert!(!RoundStatus::Betting.can_advance_to(RoundStatus::Settled));
        assert!(!RoundStatus::Settled.can_advance_to(RoundStatus::Pending));
    }

    #[test]
    fn payout_rounds_down() {
        // 0.1 stake (1e17 wei) at 2.5x (2_500_000 ppm) = 0.25 (2.5e17 wei).
        let stake = 100_000_000_000_000_000u128;
        let payout = Bet::payout_for(stake, 2_500_000);
        assert_eq!(payout, 250_000_000_000_000_000u128);
    }

    #[test]
    fn account_total_is_available_plus_locked() {
        let a = Account {
            available: 10,
            locked: 5,
            version: 0,
        };
        assert_eq!(a.total(), 15);
    }
}

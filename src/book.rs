//! Bet validator (C6, §4.2 and §4.7). Pure gatekeeping functions the engine
//! calls before it ever touches the ledger or round state. Kept
//! side-effect-free and independent of the engine's mailbox so every rule can
//! be unit tested without spinning up an actor.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::error::{CoreError, Result};
use crate::model::Limits;

/// Tracks the last accepted bet time per player for the cooldown rule
/// (§4.2); the engine owns one of these per round engine instance.
#[derive(Default)]
pub struct CooldownTracker {
    last_bet_at: HashMap<String, Instant>,
}

impl CooldownTracker {
    pub fn check_and_record(&mut self, player: &str, cooldown: Duration, now: Instant) -> Result<()> {
        if let Some(&last) = self.last_bet_at.get(player) {
            if now.duration_since(last) < cooldown {
                return Err(CoreError::Cooldown);
            }
        }
        self.last_bet_at.insert(player.to_string(), now);
        Ok(())
    }
}

/// Stake must sit within `[min_stake, max_stake]` (§4.2).
pub fn validate_stake(stake: u128, limits: &Limits) -> Result<()> {
    if stake < limits.min_stake_wei {
        return Err(CoreError::InvalidInput(format!(
            "stake {stake} below minimum {}",
            limits.min_stake_wei
        )));
    }
    if stake > limits.max_stake_wei {
        return Err(CoreError::LimitExceeded);
    }
    Ok(())
}

/// Total exposure this round must not exceed `stake * cap_mult *
/// liability_factor` against the house's available bankroll (§4.7 solvency
/// gate). `bankroll` is the hot wallet's currently available balance.
pub fn validate_liability(
    prospective_round_liability: u128,
    bankroll: u128,
    limits: &Limits,
) -> Result<()> {
    let ceiling = (bankroll as f64 * limits.liability_factor) as u128;
    if prospective_round_liability > ceiling {
        return Err(CoreError::SolvencyBlocked);
    }
    Ok(())
}

/// A round accepts at most `round_cap` bets (§4.2 edge case).
pub fn validate_round_cap(current_bet_count: u32, limits: &Limits) -> Result<()> {
    if current_bet_count >= limits.round_cap {
        return Err(CoreError::LimitExceeded);
    }
    Ok(())
}

/// A cashout landing inside the crash timing buffer `B` (§4.1's Open
/// Question resolution, §9) is rejected rather than silently granted or
/// denied — the client is told to resubmit once the round has settled.
pub fn validate_timing_buffer(elapsed_since_crash: Option<Duration>, buffer: Duration) -> Result<()> {
    match elapsed_since_crash {
        Some(elapsed) if elapsed < buffer => Err(CoreError::TimingBuffer),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limits() -> Limits {
        Limits {
            min_stake_wei: 10,
            max_stake_wei: 1_000,
            cap_mult: 100.0,
            liability_factor: 0.5,
            per_player_cooldown_ms: 500,
            round_cap: 3,
        }
    }

    #[test]
    fn stake_below_minimum_is_rejected() {
        assert!(validate_stake(5, &limits()).is_err());
    }

    #[test]
    fn stake_above_maximum_is_limit_exceeded() {
        let err = validate_stake(2_000, &limits()).unwrap_err();
        assert_eq!(err.code(), "LIMIT_EXCEEDED");
    }

    #[test]
    fn cooldown_blocks_rapid_rebets() {
        let mut tracker = CooldownTracker::default();
        let now = Instant::now();
        tracker
            .check_and_record("alice", Duration::from_millis(500), now)
            .unwrap();
        let err = tracker
            .check_and_record("alice", Duration::from_millis(500), now + Duration::from_millis(100))
            .unwrap_err();
        assert_eq!(err.code(), "COOLDOWN");
    }

    #[test]
    fn cooldown_allows_bet_after_window_elapses() {
        let mut tracker = CooldownTracker::default();
        let now = Instant::now();
        tracker
            .check_and_record("alice", Duration::from_millis(500), now)
            .unwrap();
        tracker
            .check_and_record("alice", Duration::from_millis(500), now + Duration::from_millis(600))
            .unwrap();
    }

    #[test]
    fn round_cap_rejects_once_full() {
        assert!(validate_round_cap(3, &limits()).is_err());
        assert!(validate_round_cap(2, &limits()).is_ok());
    }

    #[test]
    fn liability_over_ceiling_is_solvency_blocked() {
        let err = validate_liability(600, 1_000, &limits()).unwrap_err();
        assert_eq!(err.code(), "SOLVENCY_BLOCKED");
    }

    #[test]
    fn timing_buffer_rejects_cashouts_just_after_crash() {
        let err = validate_timing_buffer(Some(Duration::from_millis(10)), Duration::from_millis(50))
            .unwrap_err();
        assert_eq!(err.code(), "TIMING_BUFFER");
    }

    #[test]
    fn timing_buffer_allows_cashouts_once_elapsed() {
        validate_timing_buffer(Some(Duration::from_millis(60)), Duration::from_millis(50)).unwrap();
    }

    #[test]
    fn no_crash_yet_means_no_timing_restriction() {
        validate_timing_buffer(None, Duration::from_millis(50)).unwrap();
    }
}

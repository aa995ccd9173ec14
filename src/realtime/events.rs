//! Wire schema for the realtime bus (C7, §4.6). Distinct from
//! `engine::messages::EngineEvent`: this is what actually goes over the
//! WebSocket, so raw byte arrays become hex and every event carries the
//! monotonic sequence number a reconnecting client replays from.

use serde::Serialize;
use uuid::Uuid;

use crate::engine::messages::{EngineEvent, RoundSnapshot};

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WireEvent {
    RoundCommit {
        round_id: Uuid,
        commit_hash: String,
    },
    BettingOpen {
        round_id: Uuid,
        closes_at_ms: u64,
    },
    RunningStart {
        round_id: Uuid,
    },
    MultiplierTick {
        round_id: Uuid,
        multiplier_ppm: u64,
        elapsed_ms: u64,
    },
    Crash {
        round_id: Uuid,
        crash_point_ppm: u64,
        server_seed: String,
        client_entropy: String,
    },
    BetAccepted {
        round_id: Uuid,
        bet_id: Uuid,
        player: String,
    },
    BetRejected {
        round_id: Uuid,
        player: String,
        reason: &'static str,
    },
    CashoutAccepted {
        round_id: Uuid,
        bet_id: Uuid,
        player: String,
        multiplier_ppm: u64,
        payout: String,
    },
    CashoutRejected {
        round_id: Uuid,
        bet_id: Uuid,
        player: String,
        reason: &'static str,
    },
    StateSnapshot {
        round_id: Uuid,
        status: String,
        multiplier_ppm: Option<u64>,
    },
}

fn hex32(bytes: &[u8; 32]) -> String {
    format!("0x{}", hex_encode(bytes))
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

impl From<EngineEvent> for WireEvent {
    fn from(event: EngineEvent) -> Self {
        match event {
            EngineEvent::RoundCommit { round_id, commit_hash } => WireEvent::RoundCommit {
                round_id,
                commit_hash: hex32(&commit_hash),
            },
            EngineEvent::BettingOpen { round_id, closes_at_ms } => {
                WireEvent::BettingOpen { round_id, closes_at_ms }
            }
            EngineEvent::RunningStart { round_id } => WireEvent::RunningStart { round_id },
            EngineEvent::MultiplierTick { round_id, multiplier_ppm, elapsed_ms } => {
                WireEvent::MultiplierTick { round_id, multiplier_ppm, elapsed_ms }
            }
            EngineEvent::Crash {
                round_id,
                crash_point_ppm,
                server_seed,
                client_entropy,
            } => WireEvent::Crash {
                round_id,
                crash_point_ppm,
                server_seed: hex32(&server_seed),
                client_entropy: hex32(&client_entropy),
            },
            EngineEvent::BetAccepted { round_id, bet_id, player } => {
                WireEvent::BetAccepted { round_id, bet_id, player }
            }
            EngineEvent::BetRejected { round_id, player, reason } => {
                WireEvent::BetRejected { round_id, player, reason }
            }
            EngineEvent::CashoutAccepted {
                round_id,
                bet_id,
                player,
                multiplier_ppm,
                payout,
            } => WireEvent::CashoutAccepted {
                round_id,
                bet_id,
                player,
                multiplier_ppm,
                payout: payout.to_string(),
            },
            EngineEvent::CashoutRejected {
                round_id,
                bet_id,
                player,
                reason,
            } => WireEvent::CashoutRejected {
                round_id,
                bet_id,
                player,
                reason,
            },
            EngineEvent::StateSnapshot(RoundSnapshot {
                round_id,
                status,
                multiplier_ppm,
                ..
            }) => WireEvent::StateSnapshot {
                round_id,
                status: format!("{status:?}"),
                multiplier_ppm,
            },
        }
    }
}

/// An envelope pairs a `WireEvent` with the sequence number a reconnecting
/// client compares against its own last-seen seq to request a replay.
#[derive(Debug, Clone, Serialize)]
pub struct Envelope {
    pub seq: u64,
    #[serde(flatten)]
    pub event: WireEvent,
}

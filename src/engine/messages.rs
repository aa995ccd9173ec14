//! Mailbox message types for the round engine actor (C5, §4.1). Every
//! mutation of round state funnels through one mpsc channel so the engine
//! never has to reason about concurrent writers — the mailbox pattern the
//! teacher's single-threaded instruction dispatch mirrors on-chain.

use tokio::sync::oneshot;
use uuid::Uuid;

use crate::error::CoreError;
use crate::model::{BetFunding, RoundStatus};

#[derive(Debug)]
pub struct PlaceBetRequest {
    pub player: String,
    pub client_id: String,
    pub stake: u128,
    pub funding: BetFunding,
    pub auto_cashout_ppm: Option<u64>,
}

#[derive(Debug)]
pub struct CashoutRequest {
    pub player: String,
    pub bet_id: Uuid,
}

#[derive(Debug, Clone)]
pub struct RoundSnapshot {
    pub round_id: Uuid,
    pub status: RoundStatus,
    pub commit_hash: [u8; 32],
    pub elapsed_ms: u64,
    pub multiplier_ppm: Option<u64>,
}

/// Commands the mailbox accepts. Each carries a `oneshot::Sender` so the
/// caller awaits exactly the reply to its own request, never another
/// player's, while the engine processes commands one at a time in order.
pub enum EngineCommand {
    PlaceBet {
        req: PlaceBetRequest,
        reply: oneshot::Sender<Result<Uuid, CoreError>>,
    },
    Cashout {
        req: CashoutRequest,
        reply: oneshot::Sender<Result<u64, CoreError>>,
    },
    Snapshot {
        reply: oneshot::Sender<RoundSnapshot>,
    },
    Pause {
        reply: oneshot::Sender<()>,
    },
    Resume {
        reply: oneshot::Sender<()>,
    },
    Shutdown,
}

/// Broadcast to the realtime bus (C7) as the engine advances; mirrors the
/// event schema of §4.6 one-to-one.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    RoundCommit {
        round_id: Uuid,
        commit_hash: [u8; 32],
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
        server_seed: [u8; 32],
        client_entropy: [u8; 32],
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
        payout: u128,
    },
    CashoutRejected {
        round_id: Uuid,
        bet_id: Uuid,
        player: String,
        reason: &'static str,
    },
    StateSnapshot(RoundSnapshot),
}

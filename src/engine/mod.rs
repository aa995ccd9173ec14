//! Round engine (C5, §4.1). A single actor owns all round state and
//! processes one mailbox command at a time, so bet placement, cashouts and
//! phase transitions never race each other — the same serialization
//! guarantee the teacher's on-chain program gets for free from sequential
//! transaction processing, reproduced here with an mpsc mailbox.

pub mod curve;
pub mod messages;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::sleep;
use uuid::Uuid;

use crate::book::{self, CooldownTracker};
use crate::error::{CoreError, Result};
use crate::ledger::LedgerStore;
use crate::model::{BetFunding, BetStatus, Limits, Round, RoundStatus, HOUSE};
use crate::payout::SolvencyManager;
use crate::rng;

use messages::{EngineCommand, EngineEvent, RoundSnapshot};

struct RuntimeBet {
    player: String,
    client_id: String,
    stake: u128,
    funding: BetFunding,
    auto_cashout_ppm: Option<u64>,
    status: BetStatus,
}

pub struct EngineConfig {
    pub t_bet: Duration,
    /// Pause after a round settles, before the next round's betting phase
    /// opens — gives clients a moment to render the crash result.
    pub t_cash: Duration,
    pub cashout_buffer: Duration,
    pub tick_interval: Duration,
    pub house_edge: f64,
    pub n_retry: u32,
}

pub struct RoundEngine {
    ledger: Arc<dyn LedgerStore>,
    events: broadcast::Sender<EngineEvent>,
    limits: Limits,
    cfg: EngineConfig,
    cooldowns: CooldownTracker,
    solvency: Arc<SolvencyManager>,
    /// Set by an admin `Pause` command, cleared by `Resume`; checked between
    /// rounds so a pause freezes entry into the next betting phase without
    /// aborting a round already in progress (§4.1).
    pause_requested: bool,
}

/// Handle callers use to submit commands without knowing the mailbox's
/// internal message type.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineCommand>,
}

impl EngineHandle {
    pub async fn place_bet(&self, req: messages::PlaceBetRequest) -> Result<Uuid> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(EngineCommand::PlaceBet { req, reply })
            .await
            .map_err(|_| CoreError::InvalidInput("engine unavailable".into()))?;
        rx.await.map_err(|_| CoreError::InvalidInput("engine dropped reply".into()))?
    }

    pub async fn cashout(&self, req: messages::CashoutRequest) -> Result<u64> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(EngineCommand::Cashout { req, reply })
            .await
            .map_err(|_| CoreError::InvalidInput("engine unavailable".into()))?;
        rx.await.map_err(|_| CoreError::InvalidInput("engine dropped reply".into()))?
    }

    pub async fn snapshot(&self) -> Option<RoundSnapshot> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(EngineCommand::Snapshot { reply }).await.ok()?;
        rx.await.ok()
    }

    pub async fn pause(&self) {
        let (reply, rx) = oneshot::channel();
        if self.tx.send(EngineCommand::Pause { reply }).await.is_ok() {
            let _ = rx.await;
        }
    }

    pub async fn resume(&self) {
        let (reply, rx) = oneshot::channel();
        if self.tx.send(EngineCommand::Resume { reply }).await.is_ok() {
            let _ = rx.await;
        }
    }
}

/// Retries a fallible ledger write with exponential backoff, per §4.1's
/// persistence-retry note — settlement must land eventually, it just
/// shouldn't block the next round forever on a single blip.
async fn persist_with_retry<F, Fut, T>(n_retry: u32, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(v) => return Ok(v),
            Err(CoreError::InsufficientFunds) => {
                // never retryable: the account genuinely can't cover it.
                return Err(CoreError::InsufficientFunds);
            }
            Err(e) if attempt < n_retry => {
                attempt += 1;
                let backoff = Duration::from_millis(50 * 2u64.pow(attempt));
                tracing::warn!(attempt, error = %e, "ledger write failed, retrying");
                sleep(backoff).await;
            }
            Err(e) => return Err(e),
        }
    }
}

impl RoundEngine {
    pub fn spawn(
        ledger: Arc<dyn LedgerStore>,
        limits: Limits,
        cfg: EngineConfig,
        solvency: Arc<SolvencyManager>,
    ) -> (EngineHandle, broadcast::Receiver<EngineEvent>) {
        let (tx, rx) = mpsc::channel(256);
        let (events_tx, events_rx) = broadcast::channel(1024);
        let engine = RoundEngine {
            ledger,
            events: events_tx,
            limits,
            cfg,
            cooldowns: CooldownTracker::default(),
            solvency,
            pause_requested: false,
        };
        tokio::spawn(engine.run(rx));
        (EngineHandle { tx }, events_rx)
    }

    async fn run(mut self, mut mailbox: mpsc::Receiver<EngineCommand>) {
        loop {
            // Drain pause/resume/shutdown between rounds so an operator can
            // halt new rounds without tearing down the actor (§4.7 emergency
            // mode).
            while self.pause_requested {
                match mailbox.recv().await {
                    Some(EngineCommand::Resume { reply }) => {
                        self.pause_requested = false;
                        let _ = reply.send(());
                    }
                    Some(EngineCommand::Pause { reply }) => {
                        let _ = reply.send(());
                    }
                    Some(EngineCommand::Shutdown) | None => return,
                    Some(other) => reject_between_rounds(other),
                }
            }

            match self.run_one_round(&mut mailbox).await {
                RoundOutcome::Continue => sleep(self.cfg.t_cash).await,
                RoundOutcome::Shutdown => return,
            }
        }
    }

    async fn run_one_round(&mut self, mailbox: &mut mpsc::Receiver<EngineCommand>) -> RoundOutcome {
        let server_seed = rng::generate_server_seed();
        let commit_hash = rng::commit_hash(&server_seed);
        let mut round = Round {
            id: Uuid::now_v7(),
            commit_hash,
            server_seed: None,
            client_entropy: None,
            crash_point_ppm: None,
            status: RoundStatus::Pending,
            started_at: chrono::Utc::now(),
            settled_at: None,
        };
        round.advance(RoundStatus::Betting);
        let _ = self.events.send(EngineEvent::RoundCommit {
            round_id: round.id,
            commit_hash,
        });
        let closes_at = Instant::now() + self.cfg.t_bet;
        let _ = self.events.send(EngineEvent::BettingOpen {
            round_id: round.id,
            closes_at_ms: self.cfg.t_bet.as_millis() as u64,
        });
        let _ = self.events.send(EngineEvent::StateSnapshot(RoundSnapshot {
            round_id: round.id,
            status: round.status,
            commit_hash: round.commit_hash,
            elapsed_ms: 0,
            multiplier_ppm: None,
        }));

        let mut bets: HashMap<Uuid, RuntimeBet> = HashMap::new();
        let mut accepted_order: Vec<Uuid> = Vec::new();

        let betting_deadline = sleep(self.cfg.t_bet);
        tokio::pin!(betting_deadline);
        loop {
            tokio::select! {
                _ = &mut betting_deadline => break,
                cmd = mailbox.recv() => {
                    match cmd {
                        None => return RoundOutcome::Shutdown,
                        Some(EngineCommand::Shutdown) => return RoundOutcome::Shutdown,
                        Some(EngineCommand::Pause { reply }) => {
                            self.pause_requested = true;
                            let _ = reply.send(());
                        }
                        Some(EngineCommand::Resume { reply }) => {
                            self.pause_requested = false;
                            let _ = reply.send(());
                        }
                        Some(EngineCommand::Snapshot { reply }) => {
                            let _ = reply.send(RoundSnapshot {
                                round_id: round.id,
                                status: round.status,
                                commit_hash: round.commit_hash,
                                elapsed_ms: 0,
                                multiplier_ppm: None,
                            });
                        }
                        Some(EngineCommand::Cashout { req, reply }) => {
                            let _ = reply.send(Err(CoreError::WrongPhase));
                            let _ = req;
                        }
                        Some(EngineCommand::PlaceBet { req, reply }) => {
                            if Instant::now() >= closes_at {
                                let _ = reply.send(Err(CoreError::WrongPhase));
                                continue;
                            }
                            let outcome = self.try_place_bet(&round, &mut bets, &mut accepted_order, req).await;
                            match outcome {
                                Ok(bet_id) => { let _ = reply.send(Ok(bet_id)); }
                                Err(e) => { let _ = reply.send(Err(e)); }
                            }
                        }
                    }
                }
            }
        }

        if bets.is_empty() {
            // No bets this round: settle immediately with a token entropy so
            // the commit/reveal cycle still produces a verifiable record.
            round.advance(RoundStatus::Running);
            let entropy = rng::client_entropy(&[]);
            let crash_ppm = rng::crash_point_ppm(&server_seed, &entropy, self.cfg.house_edge);
            round.server_seed = Some(server_seed);
            round.client_entropy = Some(entropy);
            round.crash_point_ppm = Some(crash_ppm);
            round.advance(RoundStatus::Settled);
            round.settled_at = Some(chrono::Utc::now());
            let _ = self.events.send(EngineEvent::Crash {
                round_id: round.id,
                crash_point_ppm: crash_ppm,
                server_seed,
                client_entropy: entropy,
            });
            let _ = self.events.send(EngineEvent::StateSnapshot(RoundSnapshot {
                round_id: round.id,
                status: round.status,
                commit_hash: round.commit_hash,
                elapsed_ms: 0,
                multiplier_ppm: Some(crash_ppm),
            }));
            return RoundOutcome::Continue;
        }

        round.advance(RoundStatus::Running);
        let entropy = rng::client_entropy(&accepted_order);
        let crash_ppm = rng::crash_point_ppm(&server_seed, &entropy, self.cfg.house_edge);
        round.server_seed = Some(server_seed);
        round.client_entropy = Some(entropy);
        round.crash_point_ppm = Some(crash_ppm);
        let _ = self.events.send(EngineEvent::RunningStart { round_id: round.id });
        let _ = self.events.send(EngineEvent::StateSnapshot(RoundSnapshot {
            round_id: round.id,
            status: round.status,
            commit_hash: round.commit_hash,
            elapsed_ms: 0,
            multiplier_ppm: Some(curve::multiplier_ppm(Duration::ZERO)),
        }));

        let run_start = Instant::now();
        let crash_multiplier = crash_ppm as f64 / crate::model::PPM as f64;
        let mut ticker = tokio::time::interval(self.cfg.tick_interval);
        let outcome = loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let elapsed = run_start.elapsed();
                    let m_ppm = curve::multiplier_ppm(elapsed);
                    if curve::multiplier(elapsed) >= crash_multiplier {
                        break RoundOutcome::Continue;
                    }
                    let _ = self.events.send(EngineEvent::MultiplierTick {
                        round_id: round.id,
                        multiplier_ppm: m_ppm,
                        elapsed_ms: elapsed.as_millis() as u64,
                    });
                    self.auto_cashout_pass(&round, &mut bets, elapsed).await;
                }
                cmd = mailbox.recv() => {
                    match cmd {
                        None => break RoundOutcome::Shutdown,
                        Some(EngineCommand::Shutdown) => break RoundOutcome::Shutdown,
                        Some(EngineCommand::Pause { reply }) => {
                            self.pause_requested = true;
                            let _ = reply.send(());
                        }
                        Some(EngineCommand::Resume { reply }) => {
                            self.pause_requested = false;
                            let _ = reply.send(());
                        }
                        Some(EngineCommand::Snapshot { reply }) => {
                            let elapsed = run_start.elapsed();
                            let _ = reply.send(RoundSnapshot {
                                round_id: round.id,
                                status: round.status,
                                commit_hash: round.commit_hash,
                                elapsed_ms: elapsed.as_millis() as u64,
                                multiplier_ppm: Some(curve::multiplier_ppm(elapsed)),
                            });
                        }
                        Some(EngineCommand::PlaceBet { reply, .. }) => {
                            let _ = reply.send(Err(CoreError::WrongPhase));
                        }
                        Some(EngineCommand::Cashout { req, reply }) => {
                            let elapsed = run_start.elapsed();
                            let result = self.try_cashout(&round, &mut bets, elapsed, crash_multiplier, req).await;
                            let _ = reply.send(result);
                        }
                    }
                }
            }
        };

        if matches!(outcome, RoundOutcome::Continue) {
            let grace_outcome = self.crash_grace_window(&round, mailbox).await;
            if matches!(grace_outcome, RoundOutcome::Shutdown) {
                self.settle_crash(&mut round, &mut bets, crash_ppm, server_seed, entropy).await;
                return RoundOutcome::Shutdown;
            }
        }

        self.settle_crash(&mut round, &mut bets, crash_ppm, server_seed, entropy).await;

        if matches!(outcome, RoundOutcome::Shutdown) {
            return RoundOutcome::Shutdown;
        }
        RoundOutcome::Continue
    }

    /// After the tick that first observes the crash, hold the round open
    /// for `cashout_buffer` so any cashout already in flight is answered
    /// with a clear `TIMING_BUFFER` rejection instead of racing the
    /// settlement pass (§9's resolution of the Open Question on this).
    async fn crash_grace_window(
        &mut self,
        round: &Round,
        mailbox: &mut mpsc::Receiver<EngineCommand>,
    ) -> RoundOutcome {
        let crashed_at = Instant::now();
        let deadline = sleep(self.cfg.cashout_buffer);
        tokio::pin!(deadline);
        loop {
            tokio::select! {
                _ = &mut deadline => return RoundOutcome::Continue,
                cmd = mailbox.recv() => {
                    match cmd {
                        None => return RoundOutcome::Shutdown,
                        Some(EngineCommand::Shutdown) => return RoundOutcome::Shutdown,
                        Some(EngineCommand::Pause { reply }) => {
                            self.pause_requested = true;
                            let _ = reply.send(());
                        }
                        Some(EngineCommand::Resume { reply }) => {
                            self.pause_requested = false;
                            let _ = reply.send(());
                        }
                        Some(EngineCommand::Snapshot { reply }) => {
                            let _ = reply.send(RoundSnapshot {
                                round_id: round.id,
                                status: round.status,
                                commit_hash: round.commit_hash,
                                elapsed_ms: crashed_at.elapsed().as_millis() as u64,
                                multiplier_ppm: round.crash_point_ppm,
                            });
                        }
                        Some(EngineCommand::PlaceBet { reply, .. }) => {
                            let _ = reply.send(Err(CoreError::WrongPhase));
                        }
                        Some(EngineCommand::Cashout { req, reply }) => {
                            let result = book::validate_timing_buffer(
                                Some(crashed_at.elapsed()),
                                self.cfg.cashout_buffer,
                            )
                            .map(|_| 0u64);
                            let _ = reply.send(result);
                            let _ = req;
                        }
                    }
                }
            }
        }
    }

    async fn try_place_bet(
        &mut self,
        round: &Round,
        bets: &mut HashMap<Uuid, RuntimeBet>,
        accepted_order: &mut Vec<Uuid>,
        req: messages::PlaceBetRequest,
    ) -> Result<Uuid> {
        book::validate_stake(req.stake, &self.limits)?;

        // A retry of the same (player, client_id) before the caller learned
        // the accepted bet id must not be treated as a second bet: skip the
        // round-cap/cooldown/solvency gates and let the ledger's own
        // idempotency resolve it below.
        let is_retry = bets
            .values()
            .any(|b| b.player == req.player && b.client_id == req.client_id);

        if !is_retry {
            book::validate_round_cap(bets.len() as u32, &self.limits)?;
            if bets
                .values()
                .any(|b| b.player == req.player && b.status == BetStatus::Open)
            {
                return Err(CoreError::Duplicate);
            }
            self.cooldowns.check_and_record(
                &req.player,
                Duration::from_millis(self.limits.per_player_cooldown_ms),
                Instant::now(),
            )?;

            let house_balance = self.ledger.get_account(HOUSE).await?.available;
            self.solvency.check_bankroll(house_balance)?;
            let prospective_stakes: u128 =
                bets.values().map(|b| b.stake).sum::<u128>() + req.stake;
            let prospective_liability = (prospective_stakes as f64 * self.limits.cap_mult) as u128;
            book::validate_liability(prospective_liability, house_balance, &self.limits)?;
        }

        let bet_id = Uuid::now_v7();
        let entry = persist_with_retry(self.cfg.n_retry, || {
            self.ledger
                .place_bet_atomic(bet_id, round.id, &req.player, req.stake, &req.client_id)
        })
        .await?;

        // On a fresh accept `entry.ref_.bet_id` is `bet_id`; on a replayed
        // client id it's whatever id the original call minted.
        let accepted_bet_id = entry.ref_.bet_id.unwrap_or(bet_id);
        if !bets.contains_key(&accepted_bet_id) {
            bets.insert(
                accepted_bet_id,
                RuntimeBet {
                    player: req.player.clone(),
                    client_id: req.client_id,
                    stake: req.stake,
                    funding: req.funding,
                    auto_cashout_ppm: req.auto_cashout_ppm,
                    status: BetStatus::Open,
                },
            );
            accepted_order.push(accepted_bet_id);
            let _ = self.events.send(EngineEvent::BetAccepted {
                round_id: round.id,
                bet_id: accepted_bet_id,
                player: req.player,
            });
        }
        Ok(accepted_bet_id)
    }

    async fn auto_cashout_pass(
        &mut self,
        round: &Round,
        bets: &mut HashMap<Uuid, RuntimeBet>,
        elapsed: Duration,
    ) {
        let m_ppm = curve::multiplier_ppm(elapsed);
        let due: Vec<Uuid> = bets
            .iter()
            .filter(|(_, b)| b.status == BetStatus::Open)
            .filter_map(|(id, b)| match b.auto_cashout_ppm {
                Some(target) if m_ppm >= target => Some(*id),
                _ => None,
            })
            .collect();
        for bet_id in due {
            self.execute_cashout(round, bets, bet_id, m_ppm).await;
        }
    }

    async fn try_cashout(
        &mut self,
        round: &Round,
        bets: &mut HashMap<Uuid, RuntimeBet>,
        elapsed: Duration,
        crash_multiplier: f64,
        req: messages::CashoutRequest,
    ) -> Result<u64> {
        let bet = bets.get(&req.bet_id).ok_or(CoreError::NotFound)?;
        if bet.player != req.player {
            return Err(CoreError::Unauthorized);
        }
        if bet.status != BetStatus::Open {
            return Err(CoreError::WrongPhase);
        }
        let m = curve::multiplier(elapsed);
        if m >= crash_multiplier {
            // the tick that observes the crash always runs before the next
            // cashout is processed, but guard anyway: no cashout after crash.
            return Err(CoreError::WrongPhase);
        }
        let m_ppm = curve::multiplier_ppm(elapsed);
        self.execute_cashout(round, bets, req.bet_id, m_ppm).await;
        Ok(m_ppm)
    }

    async fn execute_cashout(
        &mut self,
        round: &Round,
        bets: &mut HashMap<Uuid, RuntimeBet>,
        bet_id: Uuid,
        multiplier_ppm: u64,
    ) {
        let (player, stake) = {
            let bet = match bets.get(&bet_id) {
                Some(b) if b.status == BetStatus::Open => b,
                _ => return,
            };
            (bet.player.clone(), bet.stake)
        };
        let payout = crate::model::Bet::payout_for(stake, multiplier_ppm);
        let result = persist_with_retry(self.cfg.n_retry, || {
            self.ledger
                .settle_win_atomic(bet_id, round.id, &player, stake, payout)
        })
        .await;
        match result {
            Ok(_) => {
                if let Some(b) = bets.get_mut(&bet_id) {
                    b.status = BetStatus::Cashed;
                }
                let _ = self.events.send(EngineEvent::CashoutAccepted {
                    round_id: round.id,
                    bet_id,
                    player,
                    multiplier_ppm,
                    payout,
                });
            }
            Err(e) => {
                tracing::error!(bet_id = %bet_id, error = %e, "cashout settlement failed after retries");
                let _ = self.events.send(EngineEvent::CashoutRejected {
                    round_id: round.id,
                    bet_id,
                    player,
                    reason: "settlement_failed",
                });
            }
        }
    }

    async fn settle_crash(
        &mut self,
        round: &mut Round,
        bets: &mut HashMap<Uuid, RuntimeBet>,
        crash_ppm: u64,
        server_seed: [u8; 32],
        entropy: [u8; 32],
    ) {
        for (bet_id, bet) in bets.iter_mut() {
            if bet.status != BetStatus::Open {
                continue;
            }
            let result = persist_with_retry(self.cfg.n_retry, || {
                self.ledger.settle_loss_atomic(*bet_id, round.id, &bet.player, bet.stake)
            })
            .await;
            match result {
                Ok(_) => bet.status = BetStatus::Lost,
                Err(e) => {
                    tracing::error!(bet_id = %bet_id, error = %e, "loss settlement failed after retries");
                }
            }
            let _ = bet.funding;
        }
        round.advance(RoundStatus::Settled);
        round.settled_at = Some(chrono::Utc::now());
        let _ = self.events.send(EngineEvent::Crash {
            round_id: round.id,
            crash_point_ppm: crash_ppm,
            server_seed,
            client_entropy: entropy,
        });
        let _ = self.events.send(EngineEvent::StateSnapshot(RoundSnapshot {
            round_id: round.id,
            status: round.status,
            commit_hash: round.commit_hash,
            elapsed_ms: curve::time_to_reach(crash_ppm as f64 / crate::model::PPM as f64)
                .as_millis() as u64,
            multiplier_ppm: Some(crash_ppm),
        }));
    }
}

enum RoundOutcome {
    Continue,
    Shutdown,
}

fn reject_between_rounds(cmd: EngineCommand) {
    match cmd {
        EngineCommand::PlaceBet { reply, .. } => {
            let _ = reply.send(Err(CoreError::WrongPhase));
        }
        EngineCommand::Cashout { reply, .. } => {
            let _ = reply.send(Err(CoreError::WrongPhase));
        }
        EngineCommand::Snapshot { .. } | EngineCommand::Shutdown => {}
        EngineCommand::Pause { reply } | EngineCommand::Resume { reply } => {
            let _ = reply.send(());
        }
    }
}

//! Black-box scenario tests (§8) against the in-memory ledger and a
//! stand-alone round engine — no Postgres or chain RPC required.

use std::sync::Arc;
use std::time::Duration;

use crashcore::engine::messages::{CashoutRequest, PlaceBetRequest};
use crashcore::engine::{EngineConfig, RoundEngine};
use crashcore::ledger::memory::InMemoryLedger;
use crashcore::ledger::LedgerStore;
use crashcore::model::{BetFunding, ConfirmedDeposit, Limits, HOUSE};
use crashcore::payout::{SolvencyManager, SolvencyThresholds};

fn limits() -> Limits {
    Limits {
        min_stake_wei: 1,
        max_stake_wei: u128::MAX,
        cap_mult: 100.0,
        liability_factor: 1.0,
        per_player_cooldown_ms: 0,
        round_cap: 1_000,
    }
}

fn engine_config() -> EngineConfig {
    EngineConfig {
        t_bet: Duration::from_millis(200),
        t_cash: Duration::from_millis(10),
        cashout_buffer: Duration::from_millis(20),
        tick_interval: Duration::from_millis(20),
        house_edge: 0.01,
        n_retry: 2,
    }
}

fn permissive_solvency() -> Arc<SolvencyManager> {
    Arc::new(SolvencyManager::new(SolvencyThresholds {
        b_min_wei: 0,
        b_max_wei: u128::MAX,
        liability_factor: 1.0,
    }))
}

async fn fund(ledger: &InMemoryLedger, player: &str, amount: u128) {
    let deposit = ConfirmedDeposit {
        tx_hash: format!("0xseed-{player}"),
        log_index: 0,
        address: player.to_string(),
        amount,
        block_number: 1,
        credited_at: chrono::Utc::now(),
    };
    ledger.credit_deposit_atomic(player, &deposit).await.unwrap();
}

/// S1: a player bets, cashes out before the crash, and is paid exactly
/// `stake * multiplier`.
#[tokio::test]
async fn basic_win_pays_out_the_locked_multiplier() {
    let ledger = Arc::new(InMemoryLedger::new());
    fund(&ledger, "alice", 10_000).await;
    fund(&ledger, HOUSE, 1_000_000).await;
    let (handle, _events) =
        RoundEngine::spawn(ledger.clone(), limits(), engine_config(), permissive_solvency());

    let bet_id = handle
        .place_bet(PlaceBetRequest {
            player: "alice".into(),
            client_id: "c1".into(),
            stake: 1_000,
            funding: BetFunding::Balance,
            auto_cashout_ppm: None,
        })
        .await
        .unwrap();

    // wait for the betting window to close and the round to start running.
    tokio::time::sleep(Duration::from_millis(250)).await;

    let result = handle
        .cashout(CashoutRequest {
            player: "alice".into(),
            bet_id,
        })
        .await;

    // Either the cashout lands (multiplier >= 1.0x always true once running)
    // or the round already crashed instantly at the 1.00x floor; both are
    // legitimate outcomes of a real RNG draw, so just check consistency.
    match result {
        Ok(multiplier_ppm) => {
            assert!(multiplier_ppm >= crashcore::model::PPM);
            let acct = ledger.get_account("alice").await.unwrap();
            assert!(acct.available >= 9_000);
        }
        Err(e) => {
            assert!(matches!(e.code(), "WRONG_PHASE" | "TIMING_BUFFER"));
        }
    }
}

/// S2: a player who never cashes out loses the full stake to the house once
/// the round crashes.
#[tokio::test]
async fn loss_transfers_the_full_stake_to_the_house() {
    let ledger = Arc::new(InMemoryLedger::new());
    fund(&ledger, "bob", 5_000).await;
    fund(&ledger, HOUSE, 1_000_000).await;
    let (handle, _events) =
        RoundEngine::spawn(ledger.clone(), limits(), engine_config(), permissive_solvency());

    handle
        .place_bet(PlaceBetRequest {
            player: "bob".into(),
            client_id: "c2".into(),
            stake: 500,
            funding: BetFunding::Balance,
            auto_cashout_ppm: None,
        })
        .await
        .unwrap();

    // never cash out; give the round time to run to completion (crash point
    // is at most 1000x, but house_edge=0.01 makes low multipliers common).
    tokio::time::sleep(Duration::from_secs(2)).await;

    let acct = ledger.get_account("bob").await.unwrap();
    assert_eq!(acct.locked, 0, "stake must not remain locked after settlement");
    assert!(acct.available <= 5_000);
}

/// S3: placing the same bet id twice is a no-op, not a double debit.
#[tokio::test]
async fn idempotent_bet_placement_does_not_double_debit() {
    let ledger = InMemoryLedger::new();
    fund(&ledger, "carol", 1_000).await;
    let bet_id = uuid::Uuid::now_v7();
    let round_id = uuid::Uuid::now_v7();

    ledger.place_bet_atomic(bet_id, round_id, "carol", 300, "carol-retry").await.unwrap();
    ledger.place_bet_atomic(bet_id, round_id, "carol", 300, "carol-retry").await.unwrap();

    let acct = ledger.get_account("carol").await.unwrap();
    assert_eq!(acct.locked, 300);
    assert_eq!(acct.available, 700);
}

/// S4: a deposit credited from a block that later gets reorged out is
/// reversed via a compensating entry, not left as a phantom balance.
#[tokio::test]
async fn reorged_deposit_is_reversed_with_a_compensating_entry() {
    use crashcore::indexer::{sample_address, sample_tx_hash, ChainClient, DepositIndexer, FakeChainClient};
    use crashcore::model::DepositCursor;

    let chain = Arc::new(FakeChainClient::new());
    let ledger: Arc<dyn LedgerStore> = Arc::new(InMemoryLedger::new());

    let log = crashcore::indexer::abi::RawDepositLog {
        tx_hash: sample_tx_hash(5),
        log_index: 0,
        block_number: 1,
        from: sample_address(5),
        amount: alloy::primitives::U256::from(250u64),
    };
    chain.push_block(1, [1u8; 32], vec![log]);
    for b in 2..=13 {
        chain.push_block(b, [b as u8; 32], vec![]);
    }

    let mut indexer = DepositIndexer::new(chain.clone(), ledger.clone(), 12, 25, DepositCursor::default());
    let report = indexer.poll_once().await.unwrap();
    assert_eq!(report.credited.len(), 1);

    let player = format!("{:#x}", sample_address(5));
    assert_eq!(ledger.get_account(&player).await.unwrap().available, 250);

    chain.reorg_block(1, [99u8; 32], vec![]);
    let report = indexer.poll_once().await.unwrap();
    assert_eq!(report.reversed.len(), 1);
    assert_eq!(ledger.get_account(&player).await.unwrap().available, 0);

    let entries = ledger.entries_for(&player).await.unwrap();
    assert!(entries.iter().any(|e| e.amount < 0), "reversal must be a signed entry, not a row deletion");

    // drive the trait bound so the import above isn't flagged unused
    let _: &dyn ChainClient = chain.as_ref();
}

/// S5: a cashout landing inside the crash's timing buffer is rejected with
/// a specific code rather than silently accepted or silently dropped.
#[tokio::test]
async fn timing_buffer_rejects_a_cashout_racing_the_crash() {
    use crashcore::book::validate_timing_buffer;
    let err = validate_timing_buffer(Some(Duration::from_millis(5)), Duration::from_millis(20)).unwrap_err();
    assert_eq!(err.code(), "TIMING_BUFFER");
}

/// S6: the crash point an auditor recomputes from the revealed seed and
/// entropy matches exactly what was broadcast at settlement.
#[tokio::test]
async fn provable_fairness_round_trips_through_reveal_and_verify() {
    let seed = crashcore::rng::generate_server_seed();
    let commit = crashcore::rng::commit_hash(&seed);
    let bet_ids = vec![uuid::Uuid::now_v7(), uuid::Uuid::now_v7()];
    let entropy = crashcore::rng::client_entropy(&bet_ids);
    let crash_ppm = crashcore::rng::crash_point_ppm(&seed, &entropy, 0.01);

    assert_eq!(crashcore::rng::commit_hash(&seed), commit);
    assert!(crashcore::rng::verify_crash_point(&seed, &entropy, 0.01, crash_ppm));
    assert!(!crashcore::rng::verify_crash_point(&seed, &entropy, 0.01, crash_ppm + 1));
}

/// S7: once emergency mode is engaged, new withdrawals are blocked
/// regardless of how healthy the hot wallet balance looks.
#[tokio::test]
async fn emergency_halt_blocks_new_withdrawals_outright() {
    use crashcore::payout::{SolvencyManager, SolvencyThresholds};

    let solvency = SolvencyManager::new(SolvencyThresholds {
        b_min_wei: 0,
        b_max_wei: u128::MAX,
        liability_factor: 1.0,
    });
    assert!(solvency.check_bankroll(1_000_000).is_ok());
    solvency.set_emergency(true);
    assert!(solvency.check_bankroll(1_000_000).is_err());
}

//! Process entry point (C9, §5 Orchestrator). Loads configuration, wires
//! every component together, and serves the HTTP/WS surface until asked to
//! shut down.

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crashcore::admin::{self, AdminState};
use crashcore::api::{self, ApiState};
use crashcore::config::Config;
use crashcore::engine::{EngineConfig, RoundEngine};
use crashcore::indexer::broadcaster::AlloyPayoutBroadcaster;
use crashcore::indexer::chain::AlloyChainClient;
use crashcore::indexer::DepositIndexer;
use crashcore::ledger::postgres::PostgresLedger;
use crashcore::ledger::LedgerStore;
use crashcore::model::{DepositCursor, Limits};
use crashcore::payout::{PayoutDispatcher, SolvencyManager, SolvencyThresholds};
use crashcore::realtime::RealtimeHub;
use crashcore::round_history::InMemoryRoundHistory;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = Config::from_env()?;
    tracing::info!("configuration loaded");

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(20)
        .connect(&config.db_url)
        .await?;
    let ledger: Arc<dyn LedgerStore> = Arc::new(PostgresLedger::new(pool));

    let limits = Limits {
        min_stake_wei: config.min_stake_wei,
        max_stake_wei: config.max_stake_wei,
        cap_mult: config.cap_mult,
        liability_factor: config.liability_factor,
        per_player_cooldown_ms: config.per_player_cooldown.as_millis() as u64,
        round_cap: config.round_cap,
    };
    let limits_handle = Arc::new(tokio::sync::RwLock::new(limits));

    let solvency = Arc::new(SolvencyManager::new(SolvencyThresholds {
        b_min_wei: config.b_min_wei,
        b_max_wei: config.b_max_wei,
        liability_factor: config.liability_factor,
    }));

    let (engine_handle, engine_events) = RoundEngine::spawn(
        ledger.clone(),
        limits,
        EngineConfig {
            t_bet: config.t_bet,
            t_cash: config.t_cash,
            cashout_buffer: config.cashout_buffer,
            tick_interval: Duration::from_millis(100),
            house_edge: config.house_edge,
            n_retry: config.n_retry,
        },
        solvency.clone(),
    );

    let realtime_hub = RealtimeHub::spawn_bridge(engine_events.resubscribe());
    let round_history = InMemoryRoundHistory::spawn_bridge(engine_events);

    let broadcaster = Arc::new(AlloyPayoutBroadcaster::connect(
        &config.chain_rpc_url,
        &config.hot_wallet_privkey,
    )?);
    let payouts = Arc::new(PayoutDispatcher::new(
        ledger.clone(),
        broadcaster,
        solvency.clone(),
        config.n_retry,
    ));

    let deposit_address = config.deposit_address.parse()?;
    let chain_client = Arc::new(AlloyChainClient::connect(&config.chain_rpc_url, deposit_address)?);
    let mut indexer = DepositIndexer::new(
        chain_client,
        ledger.clone(),
        config.c_conf,
        config.c_reorg,
        DepositCursor::default(),
    );
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(Duration::from_secs(5));
        loop {
            tick.tick().await;
            if let Err(e) = indexer.poll_once().await {
                tracing::error!(error = %e, "deposit indexer poll failed");
            }
        }
    });

    let ws_router = Router::new()
        .route("/ws", axum::routing::get(crashcore::realtime::ws_handler))
        .with_state(realtime_hub);

    let app = Router::new()
        .merge(api::router(ApiState {
            engine: engine_handle.clone(),
            ledger: ledger.clone(),
            payouts,
        }))
        .merge(admin::router(AdminState {
            engine: engine_handle,
            solvency,
            limits: limits_handle,
            admin_api_key: config.admin_api_key.clone(),
            rounds: round_history,
        }))
        .merge(ws_router)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind("0.0.0.0:8080").await?;
    tracing::info!("listening on 0.0.0.0:8080");

    axum::serve(app, listener)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    tracing::info!("shutdown signal received");
}

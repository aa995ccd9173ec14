//! Player-facing HTTP surface: place a bet, cash out, check a balance. Thin
//! by design — all the actual rules live in `engine`/`book`/`ledger`; these
//! handlers only translate HTTP <-> engine calls.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::engine::messages::{CashoutRequest, PlaceBetRequest};
use crate::engine::EngineHandle;
use crate::error::Result;
use crate::ledger::LedgerStore;
use crate::model::{Account, BetFunding, Withdrawal};
use crate::payout::PayoutDispatcher;

#[derive(Clone)]
pub struct ApiState {
    pub engine: EngineHandle,
    pub ledger: Arc<dyn LedgerStore>,
    pub payouts: Arc<PayoutDispatcher>,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/bet", post(place_bet))
        .route("/cashout", post(cashout))
        .route("/withdraw", post(withdraw))
        .route("/balance/:player", get(balance))
        .with_state(state)
}

#[derive(Deserialize)]
struct PlaceBetBody {
    player: String,
    client_id: String,
    stake: u128,
    auto_cashout_ppm: Option<u64>,
    #[serde(default)]
    funding: Option<BetFunding>,
}

#[derive(Serialize)]
struct PlaceBetResponse {
    bet_id: Uuid,
}

async fn place_bet(
    State(state): State<ApiState>,
    Json(body): Json<PlaceBetBody>,
) -> Result<Json<PlaceBetResponse>> {
    let bet_id = state
        .engine
        .place_bet(PlaceBetRequest {
            player: body.player,
            client_id: body.client_id,
            stake: body.stake,
            funding: body.funding.unwrap_or(BetFunding::Balance),
            auto_cashout_ppm: body.auto_cashout_ppm,
        })
        .await?;
    Ok(Json(PlaceBetResponse { bet_id }))
}

#[derive(Deserialize)]
struct CashoutBody {
    player: String,
    bet_id: Uuid,
}

#[derive(Serialize)]
struct CashoutResponse {
    multiplier_ppm: u64,
}

async fn cashout(
    State(state): State<ApiState>,
    Json(body): Json<CashoutBody>,
) -> Result<Json<CashoutResponse>> {
    let multiplier_ppm = state
        .engine
        .cashout(CashoutRequest {
            player: body.player,
            bet_id: body.bet_id,
        })
        .await?;
    Ok(Json(CashoutResponse { multiplier_ppm }))
}

async fn balance(State(state): State<ApiState>, Path(player): Path<String>) -> Result<Json<Account>> {
    Ok(Json(state.ledger.get_account(&player).await?))
}

#[derive(Deserialize)]
struct WithdrawBody {
    player: String,
    amount: u128,
    client_id: String,
}

async fn withdraw(
    State(state): State<ApiState>,
    Json(body): Json<WithdrawBody>,
) -> Result<Json<Withdrawal>> {
    let withdrawal = state
        .payouts
        .process(&body.player, body.amount, body.client_id)
        .await?;
    Ok(Json(withdrawal))
}

//! Admin and health surface (C8, §4.7-4.8). Mutating routes sit behind a
//! static admin-key header check; health routes are open, since an
//! orchestrator or load balancer needs them reachable without a secret.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::engine::EngineHandle;
use crate::error::{CoreError, Result};
use crate::model::Limits;
use crate::payout::SolvencyManager;

#[derive(Clone)]
pub struct AdminState {
    pub engine: EngineHandle,
    pub solvency: Arc<SolvencyManager>,
    pub limits: Arc<tokio::sync::RwLock<Limits>>,
    pub admin_api_key: String,
    /// Proof lookups need the revealed seed/entropy/crash point of a
    /// settled round; kept here as the simplest ledger-adjacent store until
    /// a dedicated round history table exists.
    pub rounds: Arc<dyn RoundHistory>,
}

/// Narrow read port over settled-round provable-fairness material (§4.8).
#[async_trait::async_trait]
pub trait RoundHistory: Send + Sync {
    async fn proof(&self, round_id: Uuid) -> Result<Option<RoundProof>>;
}

#[derive(Debug, Clone, Serialize)]
pub struct RoundProof {
    pub round_id: Uuid,
    pub commit_hash: String,
    pub server_seed: String,
    pub client_entropy: String,
    pub keccak_of_seed: String,
    pub crash_point_ppm: u64,
    pub steps: Vec<ProofStep>,
}

/// One observed multiplier tick, kept so a client can independently replay
/// the curve against `crash_point_ppm` instead of trusting it blind.
#[derive(Debug, Clone, Serialize)]
pub struct ProofStep {
    pub elapsed_ms: u64,
    pub multiplier_ppm: u64,
}

pub fn router(state: AdminState) -> Router {
    let admin_routes = Router::new()
        .route("/admin/pause", post(pause))
        .route("/admin/resume", post(resume))
        .route("/admin/limits", get(get_limits).put(put_limits))
        .route("/admin/emergency", post(set_emergency));

    Router::new()
        .merge(admin_routes)
        .route("/proof/:round_id", get(proof))
        .route("/health", get(health))
        .route("/health/detailed", get(health_detailed))
        .with_state(state)
}

fn check_admin_key(headers: &HeaderMap, expected: &str) -> Result<()> {
    let provided = headers
        .get("x-admin-key")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    if provided != expected || expected.is_empty() {
        return Err(CoreError::Unauthorized);
    }
    Ok(())
}

async fn pause(State(state): State<AdminState>, headers: HeaderMap) -> Result<StatusCode> {
    check_admin_key(&headers, &state.admin_api_key)?;
    state.engine.pause().await;
    Ok(StatusCode::NO_CONTENT)
}

async fn resume(State(state): State<AdminState>, headers: HeaderMap) -> Result<StatusCode> {
    check_admin_key(&headers, &state.admin_api_key)?;
    state.engine.resume().await;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Deserialize)]
struct EmergencyBody {
    on: bool,
}

async fn set_emergency(
    State(state): State<AdminState>,
    headers: HeaderMap,
    Json(body): Json<EmergencyBody>,
) -> Result<StatusCode> {
    check_admin_key(&headers, &state.admin_api_key)?;
    state.solvency.set_emergency(body.on);
    Ok(StatusCode::NO_CONTENT)
}

async fn get_limits(State(state): State<AdminState>, headers: HeaderMap) -> Result<Json<Limits>> {
    check_admin_key(&headers, &state.admin_api_key)?;
    Ok(Json(*state.limits.read().await))
}

async fn put_limits(
    State(state): State<AdminState>,
    headers: HeaderMap,
    Json(new_limits): Json<Limits>,
) -> Result<StatusCode> {
    check_admin_key(&headers, &state.admin_api_key)?;
    if new_limits.min_stake_wei == 0 || new_limits.min_stake_wei > new_limits.max_stake_wei {
        return Err(CoreError::InvalidInput("min_stake_wei must be > 0 and <= max_stake_wei".into()));
    }
    *state.limits.write().await = new_limits;
    Ok(StatusCode::NO_CONTENT)
}

async fn proof(
    State(state): State<AdminState>,
    Path(round_id): Path<Uuid>,
) -> Result<Json<RoundProof>> {
    state
        .rounds
        .proof(round_id)
        .await?
        .map(Json)
        .ok_or(CoreError::NotFound)
}

async fn health() -> impl IntoResponse {
    StatusCode::OK
}

#[derive(Serialize)]
struct HealthDetail {
    emergency_mode: bool,
}

async fn health_detailed(State(state): State<AdminState>) -> impl IntoResponse {
    Json(HealthDetail {
        emergency_mode: state.solvency.is_emergency(),
    })
}

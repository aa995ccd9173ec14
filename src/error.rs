//! Stable error taxonomy shared by the ledger, book, indexer, dispatcher and
//! the HTTP/WS surfaces. Internal error sources are wrapped into this enum at
//! the boundary; callers never see a raw database or RPC error type.

use serde::Serialize;

pub type Result<T> = std::result::Result<T, CoreError>;

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("malformed request: {0}")]
    InvalidInput(String),

    #[error("missing or invalid admin key")]
    Unauthorized,

    #[error("idempotency key already used")]
    Duplicate,

    #[error("insufficient funds")]
    InsufficientFunds,

    #[error("operation not valid in current round phase")]
    WrongPhase,

    #[error("per-player cooldown not elapsed")]
    Cooldown,

    #[error("rate limited")]
    RateLimited,

    #[error("stake, liability or round cap exceeded")]
    LimitExceeded,

    #[error("blocked by solvency check or emergency mode")]
    SolvencyBlocked,

    #[error("cashout landed inside the crash timing buffer")]
    TimingBuffer,

    #[error("round, bet or withdrawal not found")]
    NotFound,

    #[error("withdrawal queued but not yet confirmed on chain")]
    ChainPending,

    #[error("internal error [{correlation_id}]: {source}")]
    Internal {
        correlation_id: String,
        #[source]
        source: anyhow_like::BoxError,
    },
}

/// A tiny stand-in for `anyhow::Error` so we don't pull in a whole crate just
/// to box a source error; this module has exactly one user (`CoreError`).
mod anyhow_like {
    pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;
}

impl CoreError {
    /// The stable discriminator clients key their handling off of (§7).
    pub fn code(&self) -> &'static str {
        match self {
            CoreError::InvalidInput(_) => "INVALID_INPUT",
            CoreError::Unauthorized => "UNAUTHORIZED",
            CoreError::Duplicate => "DUPLICATE",
            CoreError::InsufficientFunds => "INSUFFICIENT_FUNDS",
            CoreError::WrongPhase => "WRONG_PHASE",
            CoreError::Cooldown => "COOLDOWN",
            CoreError::RateLimited => "RATE_LIMITED",
            CoreError::LimitExceeded => "LIMIT_EXCEEDED",
            CoreError::SolvencyBlocked => "SOLVENCY_BLOCKED",
            CoreError::TimingBuffer => "TIMING_BUFFER",
            CoreError::NotFound => "NOT_FOUND",
            CoreError::ChainPending => "CHAIN_PENDING",
            CoreError::Internal { .. } => "INTERNAL",
        }
    }

    pub fn internal(
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        let correlation_id = uuid::Uuid::now_v7().to_string();
        tracing::error!(correlation_id, error = %source, "internal error");
        CoreError::Internal {
            correlation_id,
            source: Box::new(source),
        }
    }
}

/// Wire shape for `CoreError` on both the HTTP and WS surfaces: a stable
/// `code` plus a human `message`, never a bare string and never a stack trace.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub code: &'static str,
    pub message: String,
}

impl From<&CoreError> for ErrorBody {
    fn from(err: &CoreError) -> Self {
        ErrorBody {
            code: err.code(),
            message: err.to_string(),
        }
    }
}

impl axum::response::IntoResponse for CoreError {
    fn into_response(self) -> axum::response::Response {
        use axum::http::StatusCode;
        use axum::Json;

        let status = match self.code() {
            "INVALID_INPUT" => StatusCode::BAD_REQUEST,
            "UNAUTHORIZED" => StatusCode::UNAUTHORIZED,
            "NOT_FOUND" => StatusCode::NOT_FOUND,
            "DUPLICATE" => StatusCode::CONFLICT,
            "INSUFFICIENT_FUNDS" | "WRONG_PHASE" | "COOLDOWN" | "RATE_LIMITED"
            | "LIMIT_EXCEEDED" | "SOLVENCY_BLOCKED" | "TIMING_BUFFER" | "CHAIN_PENDING" => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body: ErrorBody = (&self).into();
        (status, Json(body)).into_response()
    }
}

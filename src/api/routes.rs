use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;

use crate::ledger::LedgerError;
use crate::models::{
    Account, AccountRole, Bet, CommissionRates, CreditAction, CreditReason, CreditTransaction,
    DrawResult,
};
use crate::settlement::{
    place_bet, DrawSettlementReport, NewBet, PlaceError, SettleError, SettlementEngine,
};
use crate::storage::Store;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<Store>,
    pub engine: SettlementEngine,
}

/// Create the API router
pub fn create_router(store: Arc<Store>) -> Router {
    let state = AppState {
        engine: SettlementEngine::new(store.clone()),
        store,
    };

    Router::new()
        .route("/health", get(health_check))
        .route("/api/accounts", post(create_account))
        .route("/api/accounts/:id", get(get_account))
        .route("/api/accounts/:id/transactions", get(get_transactions))
        .route("/api/bets", post(post_bet))
        .route("/api/bets/:id", get(get_bet))
        .route("/api/results", post(publish_result))
        .with_state(state)
}

// ===== Route Handlers =====

/// Health check endpoint
async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Create an account in the hierarchy; bootstrap glue for the engine.
async fn create_account(
    State(state): State<AppState>,
    Json(req): Json<CreateAccountRequest>,
) -> Result<Json<Account>, ApiError> {
    let role: AccountRole = req
        .role
        .parse()
        .map_err(|e: String| ApiError::BadRequest(e))?;

    let account = state
        .store
        .create_account(
            &req.username,
            role,
            req.parent_id.as_deref(),
            &req.commission_rates.unwrap_or_default(),
        )
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;

    if let Some(credit) = req.opening_credit {
        state
            .store
            .ledger()
            .apply(&account.id, CreditAction::Add, credit, CreditReason::Adjust, None)
            .map_err(ApiError::from)?;
    }

    state
        .store
        .get_account(&account.id)?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("Account {} not found", account.id)))
}

async fn get_account(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Account>, ApiError> {
    state
        .store
        .get_account(&id)?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("Account {} not found", id)))
}

/// Audit history for an account, most recent first
async fn get_transactions(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(params): Query<HistoryQuery>,
) -> Result<Json<TransactionsResponse>, ApiError> {
    let limit = params.limit.unwrap_or(50).min(500) as usize;
    let transactions = state.store.ledger().history(&id, limit)?;
    Ok(Json(TransactionsResponse {
        count: transactions.len(),
        transactions,
    }))
}

/// Place a bet: validation, stake collection, pending record
async fn post_bet(
    State(state): State<AppState>,
    Json(req): Json<NewBet>,
) -> Result<Json<Bet>, ApiError> {
    let ledger = state.store.ledger();
    let bet = place_bet(&state.store, &ledger, req)?;
    Ok(Json(bet))
}

async fn get_bet(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Bet>, ApiError> {
    state
        .store
        .get_bet(&id)?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("Bet {} not found", id)))
}

/// Publish a draw result and settle every pending bet of the draw
async fn publish_result(
    State(state): State<AppState>,
    Json(req): Json<PublishResultRequest>,
) -> Result<Json<DrawSettlementReport>, ApiError> {
    let result = DrawResult {
        draw_id: req.draw_id,
        three_top: req.three_top,
        two_top: req.two_top,
        two_bottom: req.two_bottom,
        run_top: req.run_top,
        run_bottom: req.run_bottom,
        published_at: Utc::now(),
    };

    state
        .store
        .insert_draw_result(&result)
        .map_err(|e| ApiError::Conflict(e.to_string()))?;

    let report = state.engine.settle_draw(&result).await?;
    Ok(Json(report))
}

// ===== Request/Response Types =====

#[derive(Deserialize)]
struct CreateAccountRequest {
    username: String,
    /// "master", "agent", or "member"
    role: String,
    parent_id: Option<String>,
    commission_rates: Option<CommissionRates>,
    opening_credit: Option<f64>,
}

#[derive(Deserialize)]
struct HistoryQuery {
    /// Limit number of results
    limit: Option<u32>,
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

#[derive(Serialize)]
struct TransactionsResponse {
    count: usize,
    transactions: Vec<CreditTransaction>,
}

#[derive(Deserialize)]
struct PublishResultRequest {
    draw_id: String,
    three_top: Option<String>,
    two_top: Option<String>,
    two_bottom: Option<String>,
    #[serde(default)]
    run_top: Vec<String>,
    #[serde(default)]
    run_bottom: Vec<String>,
}

// ===== Error Handling =====

#[derive(Debug)]
enum ApiError {
    Storage(anyhow::Error),
    NotFound(String),
    BadRequest(String),
    Conflict(String),
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        ApiError::Storage(err)
    }
}

impl From<LedgerError> for ApiError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::InvalidAmount(_) | LedgerError::InsufficientCredit { .. } => {
                ApiError::BadRequest(err.to_string())
            }
            LedgerError::AccountNotFound(_) => ApiError::NotFound(err.to_string()),
            LedgerError::Conflict => ApiError::Conflict(err.to_string()),
            other => ApiError::Storage(anyhow::anyhow!(other)),
        }
    }
}

impl From<PlaceError> for ApiError {
    fn from(err: PlaceError) -> Self {
        match err {
            PlaceError::Validation(e) => ApiError::BadRequest(e.to_string()),
            PlaceError::AccountNotFound(id) => {
                ApiError::NotFound(format!("Account {} not found", id))
            }
            PlaceError::Ledger(e) => e.into(),
            PlaceError::Storage(e) => ApiError::Storage(anyhow::anyhow!(e)),
        }
    }
}

impl From<SettleError> for ApiError {
    fn from(err: SettleError) -> Self {
        match err {
            SettleError::BetNotFound(id) => ApiError::NotFound(format!("Bet {} not found", id)),
            SettleError::DrawMismatch { .. } => ApiError::BadRequest(err.to_string()),
            SettleError::Ledger(e) => e.into(),
            SettleError::Storage(e) => ApiError::Storage(anyhow::anyhow!(e)),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ApiError::Storage(err) => {
                tracing::error!("Storage error: {}", err);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg.clone()),
        };

        let body = Json(json!({
            "error": message,
        }));

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ledger_errors_map_to_client_errors() {
        let err: ApiError = LedgerError::InsufficientCredit {
            available: 5.0,
            required: 10.0,
        }
        .into();
        assert!(matches!(err, ApiError::BadRequest(_)));

        let err: ApiError = LedgerError::Conflict.into();
        assert!(matches!(err, ApiError::Conflict(_)));

        let err: ApiError = LedgerError::AccountNotFound("x".to_string()).into();
        assert!(matches!(err, ApiError::NotFound(_)));
    }

    #[test]
    fn storage_errors_stay_internal() {
        let err: ApiError = anyhow::anyhow!("disk gone").into();
        assert!(matches!(err, ApiError::Storage(_)));
    }
}

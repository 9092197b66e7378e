//! Deposit Pipeline API Endpoints
//!
//! REST surface for the deposit confirmation pipeline:
//! - POST /api/deposits - Open a deposit ticket
//! - POST /api/deposits/:id/confirm - Submit a transaction hash as proof
//! - GET /api/deposits/:id - Get ticket state
//! - GET /api/deposits?user_id= - List a user's tickets
//! - GET /api/balances/:user_id/:asset - Wallet balance lookup
//! - GET /api/pipeline/stats - Ticket counts by status
//! - GET /api/pipeline/health - Health check
//!
//! The wider product surface (registration, plans, admin) lives in other
//! services; only the pipeline is exposed here.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use crate::common::ServiceError;
use crate::pipeline::{ConfirmOutcome, DepositConfirmationCoordinator, DepositIntake, PipelineError};
use crate::storage::{stats_from_counts, TicketStore};
use crate::types::{Asset, ConfirmDepositRequest, ConfirmResponse, CreateDepositRequest, TicketResponse};

/// Combined application state
pub struct AppState {
    pub intake: DepositIntake,
    pub coordinator: DepositConfirmationCoordinator,
    pub store: Arc<dyn TicketStore>,
}

/// Shared app state type
pub type SharedAppState = Arc<AppState>;

/// Create the deposit pipeline API router
pub fn create_router(state: SharedAppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/deposits", post(handle_create_deposit))
        .route("/api/deposits", get(handle_list_deposits))
        .route("/api/deposits/:id", get(handle_get_deposit))
        .route("/api/deposits/:id/confirm", post(handle_confirm_deposit))
        .route("/api/balances/:user_id/:asset", get(handle_get_balance))
        .route("/api/pipeline/stats", get(handle_stats))
        .route("/api/pipeline/health", get(handle_health))
        .layer(cors)
        .with_state(state)
}

/// Bind and serve the API
pub async fn start_server(state: SharedAppState, port: u16) -> Result<(), ServiceError> {
    let router = create_router(state);
    let addr = format!("0.0.0.0:{}", port);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| ServiceError::api(format!("failed to bind {}: {}", addr, e)))?;

    tracing::info!(target: "custodia::api", %addr, "API server listening");

    axum::serve(listener, router)
        .await
        .map_err(|e| ServiceError::api(e.to_string()))
}

// =============================================================================
// REST Handlers
// =============================================================================

/// POST /api/deposits
async fn handle_create_deposit(
    State(state): State<SharedAppState>,
    Json(req): Json<CreateDepositRequest>,
) -> impl IntoResponse {
    match state
        .intake
        .create_deposit(&req.user_id, req.amount, req.asset)
        .await
    {
        Ok(ticket) => {
            (StatusCode::CREATED, Json(TicketResponse::from(&ticket))).into_response()
        }
        Err(e) => pipeline_error_response(e),
    }
}

/// POST /api/deposits/:id/confirm
async fn handle_confirm_deposit(
    State(state): State<SharedAppState>,
    Path(id): Path<String>,
    Json(req): Json<ConfirmDepositRequest>,
) -> impl IntoResponse {
    let outcome = match state
        .coordinator
        .confirm(&req.user_id, &id, &req.tx_hash, req.amount)
        .await
    {
        Ok(outcome) => outcome,
        Err(e) => return pipeline_error_response(e),
    };

    let ticket = state
        .store
        .get(&id)
        .await
        .ok()
        .flatten()
        .map(|t| TicketResponse::from(&t));

    let (success, message) = match &outcome {
        ConfirmOutcome::Completed => (true, "Deposit verified and credited".to_string()),
        ConfirmOutcome::AlreadyCompleted => (true, "Deposit was already credited".to_string()),
        ConfirmOutcome::Pending {
            confirmations,
            target,
        } => (
            true,
            format!("Still pending: {} of {} confirmations", confirmations, target),
        ),
        ConfirmOutcome::Unavailable => (
            true,
            "Verification temporarily unavailable; your deposit will be checked automatically"
                .to_string(),
        ),
        ConfirmOutcome::Rejected { reason } => (false, format!("Deposit rejected: {}", reason)),
    };

    let response = ConfirmResponse {
        success,
        outcome: outcome.label().to_string(),
        message: Some(message),
        ticket,
    };

    (StatusCode::OK, Json(response)).into_response()
}

/// GET /api/deposits/:id
async fn handle_get_deposit(
    State(state): State<SharedAppState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.store.get(&id).await {
        Ok(Some(ticket)) => (StatusCode::OK, Json(TicketResponse::from(&ticket))).into_response(),
        Ok(None) => not_found_response(&id),
        Err(e) => storage_error_response(e),
    }
}

#[derive(Debug, Deserialize)]
struct ListDepositsQuery {
    user_id: String,
}

/// GET /api/deposits?user_id=
async fn handle_list_deposits(
    State(state): State<SharedAppState>,
    Query(query): Query<ListDepositsQuery>,
) -> impl IntoResponse {
    match state.store.list_for_user(&query.user_id).await {
        Ok(tickets) => {
            let tickets: Vec<TicketResponse> = tickets.iter().map(TicketResponse::from).collect();
            Json(serde_json::json!({
                "count": tickets.len(),
                "deposits": tickets
            }))
            .into_response()
        }
        Err(e) => storage_error_response(e),
    }
}

/// GET /api/balances/:user_id/:asset
async fn handle_get_balance(
    State(state): State<SharedAppState>,
    Path((user_id, asset)): Path<(String, String)>,
) -> impl IntoResponse {
    let asset: Asset = match asset.parse() {
        Ok(asset) => asset,
        Err(e) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(serde_json::json!({ "error": e.to_string() })),
            )
                .into_response();
        }
    };

    match state.store.balance(&user_id, asset).await {
        Ok(balance) => Json(serde_json::json!({
            "user_id": user_id,
            "asset": asset,
            "balance": balance
        }))
        .into_response(),
        Err(e) => storage_error_response(e),
    }
}

/// GET /api/pipeline/stats
async fn handle_stats(State(state): State<SharedAppState>) -> impl IntoResponse {
    match state.store.status_counts().await {
        Ok(counts) => Json(stats_from_counts(&counts)).into_response(),
        Err(e) => storage_error_response(e),
    }
}

/// GET /api/pipeline/health
async fn handle_health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "custodia-deposit-pipeline",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

// =============================================================================
// Error Mapping
// =============================================================================

fn pipeline_error_response(e: PipelineError) -> axum::response::Response {
    let status = match &e {
        PipelineError::NotFound(_) | PipelineError::NoDepositAddress(_) => StatusCode::NOT_FOUND,
        PipelineError::HashAlreadySet(_)
        | PipelineError::HashAlreadyLinked(_)
        | PipelineError::TicketRejected { .. } => StatusCode::CONFLICT,
        PipelineError::NotADeposit(_)
        | PipelineError::AmountMismatch { .. }
        | PipelineError::InvalidTxHash(_)
        | PipelineError::InvalidAmount(_) => StatusCode::BAD_REQUEST,
        PipelineError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };

    if status == StatusCode::INTERNAL_SERVER_ERROR {
        tracing::error!(target: "custodia::api", error = %e, "request failed");
    }

    (
        status,
        Json(serde_json::json!({
            "success": false,
            "error": e.to_string()
        })),
    )
        .into_response()
}

fn storage_error_response(e: crate::storage::StorageError) -> axum::response::Response {
    tracing::error!(target: "custodia::api", error = %e, "storage failure");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(serde_json::json!({
            "success": false,
            "error": "internal storage error"
        })),
    )
        .into_response()
}

fn not_found_response(id: &str) -> axum::response::Response {
    (
        StatusCode::NOT_FOUND,
        Json(serde_json::json!({
            "error": "Not found",
            "details": format!("Deposit {} not found", id)
        })),
    )
        .into_response()
}

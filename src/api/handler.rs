use axum::{
    body::Bytes,
    extract::{rejection::JsonRejection, Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Extension, Json,
};
use chrono::Utc;
use std::sync::Arc;
use tracing::{error, info};

use super::models::*;
use crate::{
    auth::{models::require_caller, CallerIdentity, JwtHandler},
    config::StorageBackend,
    error::{AppError, AppResult, FareError},
    ledger::{LedgerStore, LedgerTransactionExecutor},
    middleware::validate_request,
    payments::{PaymentWebhookIngestor, WebhookOutcome},
    pricing::{FareCalculator, FareQuote},
    rides::{models::RideRequest, ReapReport, RideService, StaleRequestReaper},
    settlement::{RunTrigger, SettlementRunReport, SettlementScheduler},
};

/// Header carrying the hex HMAC-SHA256 of the webhook body
pub const SIGNATURE_HEADER: &str = "signature";

const DEFAULT_HISTORY_LIMIT: i64 = 100;
const MAX_HISTORY_LIMIT: i64 = 1000;

#[derive(Clone)]
pub struct AppState {
    pub ledger: Arc<LedgerTransactionExecutor>,
    pub webhooks: Arc<PaymentWebhookIngestor>,
    pub fares: Arc<FareCalculator>,
    pub rides: Arc<RideService>,
    pub settlement: Arc<SettlementScheduler>,
    pub reaper: Arc<StaleRequestReaper>,
    pub jwt: Arc<JwtHandler>,
    pub storage: StorageBackend,
}

fn caller(extension: Option<Extension<CallerIdentity>>) -> Option<CallerIdentity> {
    extension.map(|Extension(caller)| caller)
}

/// POST /webhooks/payment
///
/// The body is verified as raw bytes before it is parsed.
pub async fn payment_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok());

    match state.webhooks.ingest(&body, signature).await {
        Ok(outcome) => {
            let status = match outcome {
                WebhookOutcome::Rejected(_) => StatusCode::BAD_REQUEST,
                _ => StatusCode::OK,
            };
            (status, Json(WebhookResponse::from(&outcome))).into_response()
        }
        Err(e) => {
            // Anything else is worth a gateway retry.
            error!(error = %e, "Payment webhook failed");
            let reason = match &e {
                AppError::Config(_) => "configuration",
                _ if e.is_transient() => "transient",
                _ => "internal",
            };
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(WebhookResponse {
                    status: "error",
                    outcome: "error",
                    reason: Some(reason),
                }),
            )
                .into_response()
        }
    }
}

/// POST /api/v1/fare
pub async fn compute_fare(
    State(state): State<AppState>,
    caller_ext: Option<Extension<CallerIdentity>>,
    payload: Result<Json<FareRequest>, JsonRejection>,
) -> AppResult<Json<FareQuote>> {
    let caller = caller(caller_ext);
    let request = match payload {
        Ok(Json(request)) => request,
        Err(_) if caller.is_none() => return Err(FareError::Unauthenticated.into()),
        Err(rejection) => return Err(FareError::InvalidArgument(rejection.body_text()).into()),
    };

    let quote = state
        .fares
        .compute_fare(caller.as_ref(), request.vehicle_key.as_deref(), request.distance_km)
        .await?;
    Ok(Json(quote))
}

/// POST /api/v1/rides
pub async fn create_ride(
    State(state): State<AppState>,
    caller_ext: Option<Extension<CallerIdentity>>,
    Json(request): Json<CreateRideRequest>,
) -> AppResult<(StatusCode, Json<RideRequest>)> {
    let caller = require_caller(caller(caller_ext))?;
    validate_request(&request)?;

    let ride = state
        .rides
        .create(&caller, request.vehicle_key.as_deref(), request.distance_km)
        .await?;
    Ok((StatusCode::CREATED, Json(ride)))
}

/// GET /api/v1/rides/:id
pub async fn get_ride(
    State(state): State<AppState>,
    caller_ext: Option<Extension<CallerIdentity>>,
    Path(ride_id): Path<String>,
) -> AppResult<Json<RideRequest>> {
    let caller = require_caller(caller(caller_ext))?;
    Ok(Json(state.rides.get(&caller, &ride_id).await?))
}

/// POST /api/v1/rides/:id/accept
pub async fn accept_ride(
    State(state): State<AppState>,
    caller_ext: Option<Extension<CallerIdentity>>,
    Path(ride_id): Path<String>,
) -> AppResult<Json<RideRequest>> {
    let caller = require_caller(caller(caller_ext))?;
    Ok(Json(state.rides.accept(&caller, &ride_id).await?))
}

/// POST /api/v1/rides/:id/complete
pub async fn complete_ride(
    State(state): State<AppState>,
    caller_ext: Option<Extension<CallerIdentity>>,
    Path(ride_id): Path<String>,
) -> AppResult<Json<RideRequest>> {
    let caller = require_caller(caller(caller_ext))?;
    Ok(Json(state.rides.complete(&caller, &ride_id).await?))
}

/// POST /api/v1/rides/:id/cancel
pub async fn cancel_ride(
    State(state): State<AppState>,
    caller_ext: Option<Extension<CallerIdentity>>,
    Path(ride_id): Path<String>,
    request: Option<Json<CancelRideRequest>>,
) -> AppResult<Json<RideRequest>> {
    let caller = require_caller(caller(caller_ext))?;
    let request = request.map(|Json(r)| r).unwrap_or_default();
    validate_request(&request)?;

    Ok(Json(state.rides.cancel(&caller, &ride_id, request.reason).await?))
}

/// GET /api/v1/accounts/:id
pub async fn get_account(
    State(state): State<AppState>,
    caller_ext: Option<Extension<CallerIdentity>>,
    Path(account_id): Path<String>,
) -> AppResult<Json<AccountResponse>> {
    let caller = require_caller(caller(caller_ext))?;
    caller.require_owner_or_admin(&account_id)?;

    let account = state
        .ledger
        .store()
        .load_account(&account_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Account {} not found", account_id)))?;
    Ok(Json(account.into()))
}

/// GET /api/v1/accounts/:id/history
pub async fn get_account_history(
    State(state): State<AppState>,
    caller_ext: Option<Extension<CallerIdentity>>,
    Path(account_id): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> AppResult<Json<HistoryResponse>> {
    let caller = require_caller(caller(caller_ext))?;
    caller.require_owner_or_admin(&account_id)?;

    let store = state.ledger.store();
    if store.load_account(&account_id).await?.is_none() {
        return Err(AppError::NotFound(format!("Account {} not found", account_id)));
    }

    let limit = query
        .limit
        .unwrap_or(DEFAULT_HISTORY_LIMIT)
        .clamp(1, MAX_HISTORY_LIMIT);
    let entries = store.list_entries(&account_id, limit).await?;
    Ok(Json(HistoryResponse { account_id, entries }))
}

/// POST /api/v1/admin/accounts
pub async fn open_account(
    State(state): State<AppState>,
    caller_ext: Option<Extension<CallerIdentity>>,
    Json(request): Json<OpenAccountRequest>,
) -> AppResult<(StatusCode, Json<AccountResponse>)> {
    let caller = require_caller(caller(caller_ext))?;
    caller.require_admin()?;
    validate_request(&request)?;

    let account = state.ledger.store().open_account(request.account_id.trim()).await?;
    info!(account_id = %account.account_id, admin = %caller.subject, "Account opened");
    Ok((StatusCode::CREATED, Json(account.into())))
}

/// POST /api/v1/admin/settlement/run
pub async fn run_settlement(
    State(state): State<AppState>,
    caller_ext: Option<Extension<CallerIdentity>>,
) -> AppResult<Json<SettlementRunReport>> {
    let caller = require_caller(caller(caller_ext))?;
    caller.require_admin()?;

    info!(admin = %caller.subject, "Manual settlement run requested");
    Ok(Json(state.settlement.run_once(RunTrigger::Manual).await?))
}

/// POST /api/v1/admin/reaper/run
pub async fn run_reaper(
    State(state): State<AppState>,
    caller_ext: Option<Extension<CallerIdentity>>,
) -> AppResult<Json<ReapReport>> {
    let caller = require_caller(caller(caller_ext))?;
    caller.require_admin()?;

    Ok(Json(state.reaper.reap_once(Utc::now()).await?))
}

/// GET /health - Health check
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let storage = match state.storage {
        StorageBackend::Postgres => "postgres",
        StorageBackend::Memory => "memory",
    };
    Json(HealthResponse {
        status: "healthy".to_string(),
        timestamp: Utc::now(),
        storage: storage.to_string(),
    })
}

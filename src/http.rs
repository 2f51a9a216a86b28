//! Thin HTTP surface: inbound provider webhooks and the administrative
//! endpoints (§6). No auth layer here — §1 treats authentication as an
//! external collaborator's concern.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::{Method, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::admin::{AdminError, AdminOps};
use crate::models::Campaign;
use crate::webhook::{
    self, EngineWebhookPayload, PlivoStatusPayload, TelephonyWebhookQuery, TelnyxStatusPayload,
    TwilioStatusPayload, WebhookReducer,
};

#[derive(Clone)]
pub struct AppState {
    pub admin: Arc<AdminOps>,
    pub webhook: Arc<WebhookReducer>,
    pub engine_webhook_secret: String,
}

pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any);

    Router::new()
        .route("/webhook/engine", post(handle_engine_webhook))
        .route("/webhook/twilio/status", post(handle_twilio_webhook))
        .route("/webhook/plivo/status", post(handle_plivo_webhook))
        .route("/webhook/telnyx/status", post(handle_telnyx_webhook))
        .route("/campaigns/{id}/start", post(start_campaign))
        .route("/campaigns/{id}/pause", post(pause_campaign))
        .route("/campaigns/{id}/resume", post(resume_campaign))
        .route("/campaigns/reset-call-state", post(reset_call_state))
        .route("/campaigns/call-state", get(get_call_state))
        .route("/campaigns/resumable", get(get_resumable))
        .route("/campaigns/pending-summary", get(get_pending_summary))
        .route("/campaigns/{id}/state", get(get_campaign_state))
        .route("/campaigns/{id}/generate-instant-call", post(generate_instant_call))
        .with_state(Arc::new(state))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

fn admin_status(err: AdminError) -> StatusCode {
    match err {
        AdminError::CampaignNotFound(_) => StatusCode::NOT_FOUND,
        AdminError::NotStartable(_) | AdminError::NotResumable(_) | AdminError::NoPendingContact(_) => {
            StatusCode::CONFLICT
        }
        AdminError::Store(e) => {
            tracing::error!(error = %e, "store error in admin endpoint");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

// --- Inbound webhooks. Providers expect 200 regardless of our own
// processing outcome (§7 "never trigger pathological retrying"), so these
// handlers never return a non-2xx status for application-level failures.

async fn handle_engine_webhook(
    State(state): State<Arc<AppState>>,
    headers: axum::http::HeaderMap,
    body: axum::body::Bytes,
) -> StatusCode {
    let signature = headers
        .get("x-engine-signature")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    if !webhook::verify_signature(&state.engine_webhook_secret, &body, signature) {
        tracing::warn!("engine webhook signature verification failed");
        return StatusCode::OK;
    }

    let payload: EngineWebhookPayload = match serde_json::from_slice(&body) {
        Ok(p) => p,
        Err(e) => {
            tracing::warn!(error = %e, "malformed engine webhook payload");
            return StatusCode::OK;
        }
    };

    if let Some(event) = webhook::normalize_engine(&payload) {
        state.webhook.reduce(event).await;
    }
    StatusCode::OK
}

async fn handle_twilio_webhook(
    State(state): State<Arc<AppState>>,
    Query(query): Query<TelephonyWebhookQuery>,
    axum::Form(payload): axum::Form<TwilioStatusPayload>,
) -> StatusCode {
    if let Some(event) = webhook::normalize_twilio(&query, &payload) {
        state.webhook.reduce(event).await;
    }
    StatusCode::OK
}

async fn handle_plivo_webhook(
    State(state): State<Arc<AppState>>,
    Query(query): Query<TelephonyWebhookQuery>,
    Json(payload): Json<PlivoStatusPayload>,
) -> StatusCode {
    if let Some(event) = webhook::normalize_plivo(&query, &payload) {
        state.webhook.reduce(event).await;
    }
    StatusCode::OK
}

async fn handle_telnyx_webhook(
    State(state): State<Arc<AppState>>,
    Query(query): Query<TelephonyWebhookQuery>,
    Json(payload): Json<TelnyxStatusPayload>,
) -> StatusCode {
    if let Some(event) = webhook::normalize_telnyx(&query, &payload) {
        state.webhook.reduce(event).await;
    }
    StatusCode::OK
}

// --- Administrative surface. Errors here are returned to the caller with
// a status code and message, per §7's propagation policy.

async fn start_campaign(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<StatusCode, StatusCode> {
    state.admin.start_now(id).await.map_err(admin_status)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn pause_campaign(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<StatusCode, StatusCode> {
    state.admin.pause(id).await.map_err(admin_status)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn resume_campaign(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<StatusCode, StatusCode> {
    state.admin.resume(id).await.map_err(admin_status)?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Deserialize)]
struct ResetCallStateRequest {
    #[serde(rename = "userId")]
    user_id: i64,
}

#[derive(Serialize)]
struct ResetCallStateResponse {
    #[serde(rename = "resetCount")]
    reset_count: i64,
}

async fn reset_call_state(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ResetCallStateRequest>,
) -> Result<Json<ResetCallStateResponse>, StatusCode> {
    let reset_count = state
        .admin
        .reset_user_call_state(request.user_id)
        .await
        .map_err(admin_status)?;
    Ok(Json(ResetCallStateResponse { reset_count }))
}

#[derive(Deserialize)]
struct UserIdQuery {
    #[serde(rename = "userId")]
    user_id: i64,
}

async fn get_call_state(
    State(state): State<Arc<AppState>>,
    Query(query): Query<UserIdQuery>,
) -> Json<Vec<crate::budget::ActiveCallRecord>> {
    Json(state.admin.get_call_state(query.user_id).await)
}

async fn get_resumable(
    State(state): State<Arc<AppState>>,
    Query(query): Query<UserIdQuery>,
) -> Result<Json<Vec<crate::admin::ResumableCampaign>>, StatusCode> {
    let campaigns = state
        .admin
        .get_resumable_campaigns(query.user_id)
        .await
        .map_err(admin_status)?;
    Ok(Json(campaigns))
}

async fn get_pending_summary(
    State(state): State<Arc<AppState>>,
    Query(query): Query<UserIdQuery>,
) -> Result<Json<Vec<crate::store::CampaignContactTally>>, StatusCode> {
    let summary = state
        .admin
        .get_pending_contacts_summary(query.user_id)
        .await
        .map_err(admin_status)?;
    Ok(Json(summary))
}

async fn get_campaign_state(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<Campaign>, StatusCode> {
    let campaign = state.admin.get_campaign_state(id).await.map_err(admin_status)?;
    Ok(Json(campaign))
}

async fn generate_instant_call(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<StatusCode, StatusCode> {
    state.admin.generate_instant_call(id).await.map_err(admin_status)?;
    Ok(StatusCode::ACCEPTED)
}

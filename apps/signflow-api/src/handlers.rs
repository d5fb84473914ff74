//! HTTP handlers for the signflow API
//!
//! Two surfaces share one router: the public signer-facing routes, where a
//! bearer token is the only authentication, and the management routes,
//! which identify the acting organization user via the `X-Actor` header.

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    routing::{get, post},
    Json, Router,
};
use std::sync::Arc;

use crate::engine::SigningContext;
use crate::error::ApiError;
use crate::models::*;
use crate::state::AppState;

/// Public signer-facing routes. The binary wraps these in a rate limiter.
pub fn public_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/signing/:token", get(view_signing))
        .route("/api/signing/:token/sign", post(submit_signature))
        .route("/api/signing/:token/decline", post(decline_signature))
}

/// Internal management routes; require organization membership.
pub fn management_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route(
            "/api/proposals/:document_id/signature-requests",
            post(create_request).get(list_requests),
        )
        .route("/api/signature-requests/:request_id", get(get_request))
        .route(
            "/api/signature-requests/:request_id/remind",
            post(send_reminder),
        )
        .route(
            "/api/signature-requests/:request_id/cancel",
            post(cancel_request),
        )
}

/// Complete router without middleware; tests drive this directly.
pub fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .merge(public_routes())
        .merge(management_routes())
        .with_state(state)
}

/// Health check endpoint
pub async fn health() -> &'static str {
    "OK"
}

/// The acting organization user, from the `X-Actor` header.
fn actor_from(headers: &HeaderMap) -> Result<String, ApiError> {
    headers
        .get("x-actor")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or(ApiError::ActorRequired)
}

/// Capturing IP for the audit trail. First hop of X-Forwarded-For when the
/// service sits behind a proxy.
fn client_ip(headers: &HeaderMap) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

fn user_agent(headers: &HeaderMap) -> String {
    headers
        .get("user-agent")
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

// ---- Public signer surface ----

/// Exchange a signing token for the signer's view of the document.
pub async fn view_signing(
    State(state): State<Arc<AppState>>,
    Path(token): Path<String>,
) -> Result<Json<SigningView>, ApiError> {
    let view = state.engine.verify_token(&token).await?;
    Ok(Json(view))
}

/// Record a signature for the requirement behind this token.
pub async fn submit_signature(
    State(state): State<Arc<AppState>>,
    Path(token): Path<String>,
    headers: HeaderMap,
    Json(body): Json<SignBody>,
) -> Result<Json<SignResponse>, ApiError> {
    let ctx = SigningContext {
        image: body.signature_image,
        ip: client_ip(&headers),
        user_agent: user_agent(&headers),
        geolocation: body.geolocation,
    };
    let outcome = state.engine.sign(&token, ctx).await?;
    let message = if outcome.complete {
        "All parties have signed. The document is complete.".to_string()
    } else {
        "Signature recorded. Waiting on the remaining signers.".to_string()
    };
    Ok(Json(SignResponse {
        success: true,
        complete: outcome.complete,
        message,
    }))
}

/// Decline to sign; closes the whole request.
pub async fn decline_signature(
    State(state): State<Arc<AppState>>,
    Path(token): Path<String>,
    Json(body): Json<DeclineBody>,
) -> Result<Json<DeclineResponse>, ApiError> {
    state.engine.decline(&token, body.reason).await?;
    Ok(Json(DeclineResponse {
        success: true,
        message: "The request has been declined.".to_string(),
    }))
}

// ---- Management surface ----

/// Create a signature request against a finalized document.
pub async fn create_request(
    State(state): State<Arc<AppState>>,
    Path(document_id): Path<String>,
    headers: HeaderMap,
    Json(body): Json<CreateSignatureRequestBody>,
) -> Result<(StatusCode, Json<RequestDetail>), ApiError> {
    let actor = actor_from(&headers)?;
    let detail = state
        .engine
        .create_request(&document_id, &actor, body.into_core())
        .await?;
    Ok((StatusCode::CREATED, Json(detail)))
}

pub async fn get_request(
    State(state): State<Arc<AppState>>,
    Path(request_id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<RequestDetail>, ApiError> {
    let actor = actor_from(&headers)?;
    let detail = state.engine.get_request(&request_id, &actor).await?;
    Ok(Json(detail))
}

pub async fn list_requests(
    State(state): State<Arc<AppState>>,
    Path(document_id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<Vec<RequestSummary>>, ApiError> {
    let actor = actor_from(&headers)?;
    let summaries = state.engine.list_requests(&document_id, &actor).await?;
    Ok(Json(summaries))
}

pub async fn send_reminder(
    State(state): State<Arc<AppState>>,
    Path(request_id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<RemindResponse>, ApiError> {
    let actor = actor_from(&headers)?;
    let reminded = state.engine.send_reminder(&request_id, &actor).await?;
    Ok(Json(RemindResponse {
        success: true,
        reminded,
    }))
}

pub async fn cancel_request(
    State(state): State<Arc<AppState>>,
    Path(request_id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<CancelResponse>, ApiError> {
    let actor = actor_from(&headers)?;
    let status = state.engine.cancel(&request_id, &actor).await?;
    Ok(Json(CancelResponse {
        success: true,
        status,
    }))
}

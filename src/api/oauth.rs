//! OAuth flow HTTP endpoints.
//!
//! `start` is admin-authenticated and returns the provider authorization
//! URL for the admin UI to open. The callback is what the provider
//! redirects the account owner's browser to; it carries its own CSRF state
//! and takes no admin token.

use axum::{
    extract::{Path, Query, State},
    http::HeaderMap,
    response::Json,
    routing::get,
    Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

use super::{ApiState, AppError};
use crate::auth::verify_admin;

/// OAuth callback query parameters
#[derive(Deserialize)]
struct OAuthCallback {
    code: Option<String>,
    state: Option<String>,
    error: Option<String>,
    error_description: Option<String>,
}

#[derive(Serialize)]
struct StartResponse {
    authorization_url: String,
}

/// OAuth success response
#[derive(Serialize)]
struct CallbackResponse {
    success: bool,
    message: String,
    credential_id: String,
    connected_email: Option<String>,
}

/// Create OAuth flow router
pub fn create_oauth_router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/api/credentials/:id/oauth/start", get(oauth_start))
        .route("/api/oauth/callback", get(oauth_callback))
        .with_state(state)
}

/// GET /api/credentials/:id/oauth/start
async fn oauth_start(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<StartResponse>, AppError> {
    verify_admin(&headers, state.admin_token.as_deref())?;

    let authorization_url = state.flow.begin_authorization(&id)?;
    info!(credential = %id, "OAuth flow started");
    Ok(Json(StartResponse { authorization_url }))
}

/// GET /api/oauth/callback
///
/// Where the provider redirects after the account owner authorizes (or
/// refuses). A provider-reported error arrives as `error`/`error_description`
/// query parameters with no code.
async fn oauth_callback(
    State(state): State<Arc<ApiState>>,
    Query(params): Query<OAuthCallback>,
) -> Result<Json<CallbackResponse>, AppError> {
    if let Some(error) = params.error {
        let detail = params.error_description.unwrap_or_default();
        warn!(error = %error, detail = %detail, "OAuth callback returned provider error");
        return Err(AppError::BadRequest(format!(
            "authorization refused: {} {}",
            error, detail
        )));
    }

    let code = params
        .code
        .ok_or_else(|| AppError::BadRequest("missing code parameter".to_string()))?;
    let oauth_state = params
        .state
        .ok_or_else(|| AppError::BadRequest("missing state parameter".to_string()))?;

    let credential = state.flow.complete_authorization(&code, &oauth_state).await?;

    Ok(Json(CallbackResponse {
        success: true,
        message: "credential connected".to_string(),
        credential_id: credential.id,
        connected_email: credential.connected_email,
    }))
}

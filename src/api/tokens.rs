//! Internal token vending.
//!
//! Other services call this endpoint with the shared service secret to get
//! a live access token for a connected mailbox. The refresh token never
//! leaves this process.

use axum::{
    extract::State,
    http::HeaderMap,
    response::Json,
    routing::post,
    Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::{ApiState, AppError};
use crate::auth::verify_service;
use crate::provider::ProviderKind;
use crate::store::{Credential, CredentialSelector};

/// Exactly one selector must be supplied.
#[derive(Deserialize)]
struct TokenRequest {
    credential_id: Option<String>,
    credential_name: Option<String>,
    email: Option<String>,
    external_account_id: Option<String>,
    #[serde(default)]
    force_refresh: bool,
}

#[derive(Serialize)]
struct TokenResponse {
    access_token: String,
    token_type: &'static str,
    /// Absolute expiry as unix seconds
    expires_at: i64,
    credential_id: String,
    provider: ProviderKind,
}

/// Create internal token-vending router
pub fn create_token_router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/internal/tokens", post(vend_token))
        .with_state(state)
}

/// POST /internal/tokens
async fn vend_token(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
    Json(req): Json<TokenRequest>,
) -> Result<Json<TokenResponse>, AppError> {
    verify_service(&headers, state.service_secret.as_deref())?;

    let credential = resolve_credential(&state, &req)?;

    let token = if req.force_refresh {
        state.broker.force_refresh(&credential.id).await?
    } else {
        state.broker.access_token(&credential.id, Utc::now()).await?
    };

    Ok(Json(TokenResponse {
        access_token: token.access_token,
        token_type: token.token_type,
        expires_at: token.expires_at.timestamp(),
        credential_id: token.credential_id,
        provider: token.provider,
    }))
}

fn resolve_credential(state: &ApiState, req: &TokenRequest) -> Result<Credential, AppError> {
    let selectors = [
        (CredentialSelector::Id, req.credential_id.as_deref()),
        (CredentialSelector::Name, req.credential_name.as_deref()),
        (CredentialSelector::ConnectedEmail, req.email.as_deref()),
        (
            CredentialSelector::ExternalAccountId,
            req.external_account_id.as_deref(),
        ),
    ];

    let mut supplied = selectors
        .iter()
        .copied()
        .filter_map(|(sel, v)| v.map(|v| (sel, v)));
    let Some((selector, value)) = supplied.next() else {
        return Err(AppError::BadRequest(
            "one of credential_id, credential_name, email or external_account_id is required"
                .to_string(),
        ));
    };
    if supplied.next().is_some() {
        return Err(AppError::BadRequest(
            "supply exactly one credential selector".to_string(),
        ));
    }

    state
        .db
        .find_connected_credential(selector, value)?
        .ok_or_else(|| AppError::NotFound("no connected credential matches".to_string()))
}

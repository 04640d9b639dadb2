//! Admin credential CRUD.
//!
//! Secrets are accepted on write and never returned on read; responses
//! expose connection state but no token or client-secret material.

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::Json,
    routing::{get, patch},
    Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

use super::{ApiState, AppError};
use crate::auth::verify_admin;
use crate::provider::ProviderKind;
use crate::store::{Credential, CredentialUpdate, NewCredential};

/// Credential as exposed over the API. No secret material.
#[derive(Serialize)]
pub struct CredentialResponse {
    pub id: String,
    pub name: String,
    pub display_name: String,
    pub provider: ProviderKind,
    pub client_id: String,
    pub redirect_uri: String,
    pub tenant_id: Option<String>,
    pub authorization_url: String,
    pub token_url: String,
    pub scopes: Vec<String>,
    pub status: String,
    pub connected_email: Option<String>,
    pub external_account_id: Option<String>,
    pub connected_display_name: Option<String>,
    pub error_message: Option<String>,
    pub last_connected_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Credential> for CredentialResponse {
    fn from(c: Credential) -> Self {
        Self {
            id: c.id,
            name: c.name,
            display_name: c.display_name,
            provider: c.provider,
            client_id: c.client_id,
            redirect_uri: c.redirect_uri,
            tenant_id: c.tenant_id,
            authorization_url: c.authorization_url,
            token_url: c.token_url,
            scopes: c.scopes,
            status: c.status.as_str().to_string(),
            connected_email: c.connected_email,
            external_account_id: c.external_account_id,
            connected_display_name: c.connected_display_name,
            error_message: c.error_message,
            last_connected_at: c.last_connected_at,
            created_at: c.created_at,
            updated_at: c.updated_at,
        }
    }
}

#[derive(Deserialize)]
struct CreateCredentialRequest {
    name: String,
    display_name: Option<String>,
    provider: ProviderKind,
    client_id: String,
    client_secret: String,
    redirect_uri: String,
    tenant_id: Option<String>,
    /// Override the provider default authorize endpoint
    authorization_url: Option<String>,
    /// Override the provider default token endpoint
    token_url: Option<String>,
    /// Override the provider default scope set
    scopes: Option<Vec<String>>,
}

#[derive(Deserialize, Default)]
struct UpdateCredentialRequest {
    display_name: Option<String>,
    client_id: Option<String>,
    client_secret: Option<String>,
    redirect_uri: Option<String>,
    tenant_id: Option<String>,
    authorization_url: Option<String>,
    token_url: Option<String>,
    scopes: Option<Vec<String>>,
}

/// Create credential management router
pub fn create_credential_router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route(
            "/api/credentials",
            get(list_credentials).post(create_credential),
        )
        .route(
            "/api/credentials/:id",
            patch(update_credential)
                .get(get_credential)
                .delete(delete_credential),
        )
        .with_state(state)
}

/// POST /api/credentials
async fn create_credential(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
    Json(req): Json<CreateCredentialRequest>,
) -> Result<(StatusCode, Json<CredentialResponse>), AppError> {
    verify_admin(&headers, state.admin_token.as_deref())?;

    if req.name.trim().is_empty() {
        return Err(AppError::BadRequest("name must not be empty".to_string()));
    }
    if req.client_secret.is_empty() {
        return Err(AppError::BadRequest(
            "client_secret must not be empty".to_string(),
        ));
    }

    // Provider defaults apply wherever the request leaves a field unset
    let descriptor = req.provider.descriptor(req.tenant_id.as_deref());
    let encrypted_client_secret = state.cipher.encrypt(&req.client_secret)?;

    let credential = state.db.create_credential(NewCredential {
        display_name: req.display_name.unwrap_or_else(|| req.name.clone()),
        name: req.name,
        provider: req.provider,
        client_id: req.client_id,
        encrypted_client_secret,
        redirect_uri: req.redirect_uri,
        tenant_id: req.tenant_id,
        authorization_url: req.authorization_url.unwrap_or(descriptor.authorize_url),
        token_url: req.token_url.unwrap_or(descriptor.token_url),
        scopes: req.scopes.unwrap_or(descriptor.default_scopes),
    })?;

    info!(credential = %credential.id, name = %credential.name, "Credential created");
    Ok((StatusCode::CREATED, Json(credential.into())))
}

/// GET /api/credentials
async fn list_credentials(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
) -> Result<Json<Vec<CredentialResponse>>, AppError> {
    verify_admin(&headers, state.admin_token.as_deref())?;

    let credentials = state.db.list_credentials()?;
    Ok(Json(credentials.into_iter().map(Into::into).collect()))
}

/// GET /api/credentials/:id
async fn get_credential(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<CredentialResponse>, AppError> {
    verify_admin(&headers, state.admin_token.as_deref())?;

    let credential = state
        .db
        .get_credential(&id)?
        .ok_or_else(|| AppError::NotFound("credential not found".to_string()))?;
    Ok(Json(credential.into()))
}

/// PATCH /api/credentials/:id
async fn update_credential(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(req): Json<UpdateCredentialRequest>,
) -> Result<Json<CredentialResponse>, AppError> {
    verify_admin(&headers, state.admin_token.as_deref())?;

    let encrypted_client_secret = req
        .client_secret
        .as_deref()
        .map(|s| state.cipher.encrypt(s))
        .transpose()?;

    let update = CredentialUpdate {
        display_name: req.display_name,
        client_id: req.client_id,
        encrypted_client_secret,
        redirect_uri: req.redirect_uri,
        tenant_id: req.tenant_id,
        authorization_url: req.authorization_url,
        token_url: req.token_url,
        scopes: req.scopes,
    };
    let resets_status = update.resets_status();

    let credential = state
        .db
        .update_credential(&id, update)?
        .ok_or_else(|| AppError::NotFound("credential not found".to_string()))?;

    // A reconfigured credential needs re-authorization; drop any cached token
    if resets_status {
        state.broker.invalidate(&id);
    }

    info!(credential = %id, resets_status, "Credential updated");
    Ok(Json(credential.into()))
}

/// DELETE /api/credentials/:id
async fn delete_credential(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<StatusCode, AppError> {
    verify_admin(&headers, state.admin_token.as_deref())?;

    if !state.db.delete_credential(&id)? {
        return Err(AppError::NotFound("credential not found".to_string()));
    }
    state.broker.invalidate(&id);

    info!(credential = %id, "Credential deleted");
    Ok(StatusCode::NO_CONTENT)
}

//! HTTP surface: admin credential/subscription management, the OAuth
//! redirect endpoints, the provider-facing webhook endpoint, and internal
//! token vending.

mod credentials;
mod oauth;
mod subscriptions;
mod tokens;
mod webhook;

pub use credentials::create_credential_router;
pub use oauth::create_oauth_router;
pub use subscriptions::create_subscription_router;
pub use tokens::create_token_router;
pub use webhook::create_webhook_router;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::Serialize;
use std::sync::Arc;

use crate::auth::TokenError;
use crate::broker::TokenBroker;
use crate::crypto::SecretCipher;
use crate::error::Error;
use crate::oauth::FlowEngine;
use crate::store::Database;
use crate::subscription::SubscriptionManager;
use crate::webhook::Ingestor;

/// Shared application state
pub struct ApiState {
    pub db: Arc<Database>,
    pub cipher: Arc<SecretCipher>,
    pub broker: Arc<TokenBroker>,
    pub flow: Arc<FlowEngine>,
    pub subscriptions: Arc<SubscriptionManager>,
    pub ingestor: Arc<Ingestor>,
    pub admin_token: Option<String>,
    pub service_secret: Option<String>,
}

/// Error response
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

/// Application error types shared by all routers
enum AppError {
    BadRequest(String),
    Unauthorized(String),
    NotFound(String),
    Conflict(String),
    ServerError(String),
    BadGateway(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            AppError::ServerError(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
            AppError::BadGateway(msg) => (StatusCode::BAD_GATEWAY, msg),
        };

        let body = Json(ErrorResponse {
            error: error_message,
        });

        (status, body).into_response()
    }
}

impl From<Error> for AppError {
    fn from(e: Error) -> Self {
        match e {
            Error::NotFound(entity) => AppError::NotFound(format!("{} not found", entity)),
            Error::DuplicateCredential(msg) => AppError::Conflict(msg),
            Error::DuplicateEvent(key) => {
                AppError::Conflict(format!("event already recorded: {}", key))
            }
            Error::InvalidState => {
                AppError::BadRequest("invalid or expired OAuth state".to_string())
            }
            Error::InvalidToken(msg) => AppError::Unauthorized(msg),
            Error::Provider { status, detail } => {
                AppError::BadGateway(format!("provider returned {}: {}", status, detail))
            }
            Error::CredentialNotConnected => {
                AppError::Conflict("credential is not connected".to_string())
            }
            Error::NoRefreshToken => AppError::Conflict(
                "no refresh token stored; re-authorization required".to_string(),
            ),
            Error::Cipher(_) | Error::RetryExhausted(_) | Error::Storage(_) => {
                AppError::ServerError(e.to_string())
            }
            Error::ProviderTransport(e) => {
                AppError::BadGateway(format!("provider unreachable: {}", e))
            }
        }
    }
}

impl From<TokenError> for AppError {
    fn from(e: TokenError) -> Self {
        AppError::Unauthorized(e.to_string())
    }
}

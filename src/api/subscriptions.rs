//! Admin subscription management.

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::Json,
    routing::{get, post},
    Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::{ApiState, AppError};
use crate::auth::verify_admin;
use crate::provider::ProviderKind;
use crate::store::{Subscription, SubscriptionStatus};
use crate::subscription::CreateSubscription;

const DEFAULT_RESOURCE_PATH: &str = "me/mailFolders('inbox')/messages";
const DEFAULT_TTL_HOURS: i64 = 72;

#[derive(Serialize)]
pub struct SubscriptionResponse {
    pub id: String,
    pub credential_id: String,
    pub provider: ProviderKind,
    pub external_subscription_id: String,
    pub resource_path: String,
    pub notification_url: String,
    pub change_types: Vec<String>,
    pub status: String,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub last_notification_at: Option<DateTime<Utc>>,
}

impl From<Subscription> for SubscriptionResponse {
    fn from(s: Subscription) -> Self {
        Self {
            id: s.id,
            credential_id: s.credential_id,
            provider: s.provider,
            external_subscription_id: s.external_subscription_id,
            resource_path: s.resource_path,
            notification_url: s.notification_url,
            change_types: s.change_types,
            status: s.status.as_str().to_string(),
            expires_at: s.expires_at,
            created_at: s.created_at,
            last_notification_at: s.last_notification_at,
        }
    }
}

#[derive(Deserialize)]
struct CreateSubscriptionRequest {
    credential_id: String,
    notification_url: String,
    resource_path: Option<String>,
    change_types: Option<Vec<String>>,
    ttl_hours: Option<i64>,
}

#[derive(Deserialize)]
struct RenewRequest {
    ttl_hours: Option<i64>,
}

#[derive(Deserialize)]
struct ListQuery {
    credential_id: String,
    status: Option<String>,
}

/// Create subscription management router
pub fn create_subscription_router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route(
            "/api/subscriptions",
            get(list_subscriptions).post(create_subscription),
        )
        .route(
            "/api/subscriptions/:id",
            axum::routing::delete(delete_subscription),
        )
        .route("/api/subscriptions/:id/renew", post(renew_subscription))
        .with_state(state)
}

/// POST /api/subscriptions
async fn create_subscription(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
    Json(req): Json<CreateSubscriptionRequest>,
) -> Result<(StatusCode, Json<SubscriptionResponse>), AppError> {
    verify_admin(&headers, state.admin_token.as_deref())?;

    let subscription = state
        .subscriptions
        .create(CreateSubscription {
            credential_id: req.credential_id,
            resource_path: req
                .resource_path
                .unwrap_or_else(|| DEFAULT_RESOURCE_PATH.to_string()),
            change_types: req
                .change_types
                .unwrap_or_else(|| vec!["created".to_string()]),
            notification_url: req.notification_url,
            ttl_hours: req.ttl_hours.unwrap_or(DEFAULT_TTL_HOURS),
        })
        .await?;

    Ok((StatusCode::CREATED, Json(subscription.into())))
}

/// GET /api/subscriptions?credential_id=...&status=...
async fn list_subscriptions(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<SubscriptionResponse>>, AppError> {
    verify_admin(&headers, state.admin_token.as_deref())?;

    let status = match query.status.as_deref() {
        None => None,
        Some(raw) => Some(SubscriptionStatus::parse(raw).ok_or_else(|| {
            AppError::BadRequest(format!("unknown subscription status: {}", raw))
        })?),
    };

    let subscriptions = state.subscriptions.list(&query.credential_id, status)?;
    Ok(Json(subscriptions.into_iter().map(Into::into).collect()))
}

/// POST /api/subscriptions/:id/renew
async fn renew_subscription(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(req): Json<RenewRequest>,
) -> Result<Json<SubscriptionResponse>, AppError> {
    verify_admin(&headers, state.admin_token.as_deref())?;

    let subscription = state
        .subscriptions
        .renew(&id, req.ttl_hours.unwrap_or(DEFAULT_TTL_HOURS))
        .await?;
    Ok(Json(subscription.into()))
}

/// DELETE /api/subscriptions/:id
async fn delete_subscription(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<StatusCode, AppError> {
    verify_admin(&headers, state.admin_token.as_deref())?;

    state.subscriptions.delete(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

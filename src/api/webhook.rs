//! Provider-facing webhook endpoint.
//!
//! One POST path handles both provider request shapes:
//! - validation handshake: `?validationToken=...` is echoed back verbatim
//!   as `text/plain` with 200, no body inspection
//! - notification batch: recorded by the ingestor, acknowledged with 202
//!
//! The notification path never returns an error status. The provider
//! retries aggressively on anything but success and will eventually disable
//! the subscription, so ingestion failures are logged and the batch is
//! acknowledged anyway.

use axum::{
    body::Bytes,
    extract::{Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::post,
    Router,
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::ApiState;

#[derive(Deserialize)]
struct ValidationQuery {
    #[serde(rename = "validationToken")]
    validation_token: Option<String>,
}

/// Create webhook router
pub fn create_webhook_router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/webhooks/notifications", post(receive_notifications))
        .with_state(state)
}

/// POST /webhooks/notifications
async fn receive_notifications(
    State(state): State<Arc<ApiState>>,
    Query(query): Query<ValidationQuery>,
    body: Bytes,
) -> Response {
    if let Some(token) = query.validation_token {
        debug!("Webhook validation handshake");
        return (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain")],
            token,
        )
            .into_response();
    }

    // A malformed body is still acknowledged; there is nothing to retry
    let payload: serde_json::Value = match serde_json::from_slice(&body) {
        Ok(payload) => payload,
        Err(e) => {
            warn!(error = %e, "Webhook body is not valid JSON");
            json!({})
        }
    };

    let summary = state.ingestor.ingest(&payload);
    if summary.total > 0 {
        info!(
            stored = summary.stored,
            duplicates = summary.duplicates,
            total = summary.total,
            "Webhook batch ingested"
        );
    }

    (
        StatusCode::ACCEPTED,
        Json(json!({
            "status": "accepted",
            "stored": summary.stored,
            "duplicates": summary.duplicates,
            "total": summary.total,
        })),
    )
        .into_response()
}

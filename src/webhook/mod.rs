//! Webhook notification ingestion.
//!
//! The ingestor turns a provider notification batch into durable `pending`
//! event rows and nothing else. It never fails the caller: the provider
//! treats any non-success response as a delivery failure and retries
//! aggressively, so internal errors are logged and swallowed and the HTTP
//! layer always acknowledges. The idempotency-key UNIQUE constraint is the
//! only duplicate guard, which makes concurrent redeliveries safe.

use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::store::{Database, NewEvent};

/// Per-batch outcome, reported back in the acknowledgment body.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct IngestSummary {
    pub stored: usize,
    pub duplicates: usize,
    pub total: usize,
}

pub struct Ingestor {
    db: Arc<Database>,
}

impl Ingestor {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Record every notification in a batch body (`{ "value": [...] }`).
    ///
    /// Unknown subscriptions are skipped silently (deleted locally but not
    /// yet upstream), duplicates are counted, and per-notification failures
    /// never abort the rest of the batch.
    pub fn ingest(&self, body: &Value) -> IngestSummary {
        let notifications = body
            .get("value")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        let mut summary = IngestSummary {
            total: notifications.len(),
            ..Default::default()
        };

        for notification in &notifications {
            self.ingest_one(notification, &mut summary);
        }

        summary
    }

    fn ingest_one(&self, notification: &Value, summary: &mut IngestSummary) {
        let Some(external_subscription_id) =
            notification.get("subscriptionId").and_then(Value::as_str)
        else {
            warn!("Notification without subscriptionId dropped");
            return;
        };
        let Some(resource_id) = notification.pointer("/resourceData/id").and_then(Value::as_str)
        else {
            warn!(
                subscription = external_subscription_id,
                "Notification without resourceData.id dropped"
            );
            return;
        };
        let change_type = notification
            .get("changeType")
            .and_then(Value::as_str)
            .unwrap_or("updated");

        let subscription = match self.db.find_subscription_by_external_id(external_subscription_id)
        {
            Ok(Some(subscription)) => subscription,
            Ok(None) => {
                // Deleted locally but the provider hasn't caught up yet
                debug!(
                    subscription = external_subscription_id,
                    "Notification for unknown subscription skipped"
                );
                return;
            }
            Err(e) => {
                warn!(
                    subscription = external_subscription_id,
                    error = %e,
                    "Subscription lookup failed during ingestion"
                );
                return;
            }
        };

        let idempotency_key = format!(
            "{}:{}:{}",
            subscription.credential_id, external_subscription_id, resource_id
        );

        match self.db.insert_event(NewEvent {
            credential_id: subscription.credential_id.clone(),
            subscription_id: subscription.id.clone(),
            provider: subscription.provider,
            change_type: change_type.to_string(),
            idempotency_key,
            external_resource_id: resource_id.to_string(),
            raw_payload: notification.clone(),
        }) {
            Ok(_) => summary.stored += 1,
            Err(e) if e.is_duplicate() => summary.duplicates += 1,
            Err(e) => {
                warn!(
                    subscription = external_subscription_id,
                    resource = resource_id,
                    error = %e,
                    "Failed to record notification"
                );
                return;
            }
        }

        if let Err(e) = self.db.touch_subscription(external_subscription_id) {
            warn!(
                subscription = external_subscription_id,
                error = %e,
                "Failed to bump last-notification timestamp"
            );
        }
    }
}

//! Background event processor.
//!
//! A poll loop drains `pending` webhook events: claim a batch, enrich each
//! event into a normalized message record (or synthesize one for deletions,
//! where the resource is already gone), and mark it `completed` or park it
//! for retry. Claims are atomic at the storage layer, so multiple processor
//! instances can run against the same database.

use chrono::Utc;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::broker::TokenBroker;
use crate::error::{Error, Result};
use crate::oauth::http_client;
use crate::provider::ProviderKind;
use crate::store::{Database, EventStatus, WebhookEvent};

/// Outcome counts for one poll cycle.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CycleStats {
    pub processed: usize,
    pub failed: usize,
    pub expired_subscriptions: usize,
}

impl CycleStats {
    fn is_idle(&self) -> bool {
        self.processed == 0 && self.failed == 0 && self.expired_subscriptions == 0
    }
}

pub struct EventProcessor {
    db: Arc<Database>,
    broker: Arc<TokenBroker>,
    http: reqwest::Client,
    batch_size: usize,
    max_retries: u32,
}

impl EventProcessor {
    pub fn new(
        db: Arc<Database>,
        broker: Arc<TokenBroker>,
        batch_size: usize,
        max_retries: u32,
    ) -> Self {
        Self {
            db,
            broker,
            http: http_client(),
            batch_size,
            max_retries,
        }
    }

    /// One poll cycle: sweep expired subscriptions, then claim and process a
    /// batch of pending events.
    pub async fn run_cycle(&self) -> Result<CycleStats> {
        let mut stats = CycleStats {
            expired_subscriptions: self.db.mark_expired_subscriptions(Utc::now())?,
            ..Default::default()
        };

        let events = self.db.claim_pending_events(self.batch_size, self.max_retries)?;
        for event in events {
            match self.process(&event).await {
                Ok(normalized) => {
                    self.db.complete_event(&event.id, &normalized)?;
                    stats.processed += 1;
                }
                Err(e) => {
                    let detail = e.to_string();
                    let status = self.db.fail_event(&event.id, &detail, self.max_retries)?;
                    stats.failed += 1;
                    match status {
                        EventStatus::Failed => warn!(
                            event = %event.id,
                            retries = self.max_retries,
                            error = %detail,
                            "Event processing failed terminally"
                        ),
                        _ => debug!(event = %event.id, error = %detail, "Event parked for retry"),
                    }
                }
            }
        }

        Ok(stats)
    }

    async fn process(&self, event: &WebhookEvent) -> Result<Value> {
        // Deletions never hit the provider: the resource no longer exists
        if event.change_type == "deleted" {
            return Ok(json!({
                "event_type": "deleted",
                "message_id": event.external_resource_id,
                "deleted": true,
                "timestamp": Utc::now().to_rfc3339(),
            }));
        }

        let token = self
            .broker
            .access_token(&event.credential_id, Utc::now())
            .await?;

        let descriptor = event.provider.descriptor(None);
        let response = self
            .http
            .get(format!(
                "{}/me/messages/{}",
                descriptor.api_base_url, event.external_resource_id
            ))
            .bearer_auth(&token.access_token)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown error".to_string());
            return Err(Error::Provider {
                status: status.as_u16(),
                detail: format!("message fetch failed: {}", body),
            });
        }

        let message: Value = response.json().await?;
        Ok(normalize_message(
            event.provider,
            &event.change_type,
            &event.raw_payload,
            &message,
        ))
    }
}

/// Flatten a provider message into the stable downstream schema.
pub fn normalize_message(
    provider: ProviderKind,
    change_type: &str,
    raw_notification: &Value,
    message: &Value,
) -> Value {
    let str_field = |v: &Value, key: &str| {
        v.get(key)
            .and_then(Value::as_str)
            .map(str::to_string)
    };

    json!({
        "event_type": change_type,
        "provider": provider.as_str(),
        "message": {
            "id": str_field(message, "id"),
            "subject": str_field(message, "subject"),
            "from": {
                "name": message.pointer("/from/emailAddress/name").and_then(Value::as_str),
                "address": message.pointer("/from/emailAddress/address").and_then(Value::as_str),
            },
            "received_at": str_field(message, "receivedDateTime"),
            "body_preview": str_field(message, "bodyPreview"),
            "body_content": message.pointer("/body/content").and_then(Value::as_str),
            "body_type": message.pointer("/body/contentType").and_then(Value::as_str),
            "has_attachments": message.get("hasAttachments").and_then(Value::as_bool).unwrap_or(false),
            "is_read": message.get("isRead").and_then(Value::as_bool).unwrap_or(false),
            "importance": str_field(message, "importance"),
        },
        "raw_notification": raw_notification,
        "processed_at": Utc::now().to_rfc3339(),
    })
}

/// Poll loop; runs until the process exits.
pub async fn run_processor(processor: Arc<EventProcessor>, interval_seconds: u64) {
    let mut interval = tokio::time::interval(tokio::time::Duration::from_secs(interval_seconds));
    info!(interval_seconds, "Event processor started");

    loop {
        interval.tick().await;
        match processor.run_cycle().await {
            Ok(stats) if stats.is_idle() => {}
            Ok(stats) => info!(
                processed = stats.processed,
                failed = stats.failed,
                expired_subscriptions = stats.expired_subscriptions,
                "Event processor cycle complete"
            ),
            Err(e) => warn!(error = %e, "Event processor cycle failed"),
        }
    }
}

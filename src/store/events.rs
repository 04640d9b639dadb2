//! Webhook event persistence and the processing state machine.
//!
//! The `idempotency_key` UNIQUE constraint is the only synchronization
//! between concurrent webhook deliveries: a duplicate insert surfaces as
//! [`Error::DuplicateEvent`] and is counted, never retried.
//!
//! Claiming is a single atomic `UPDATE ... RETURNING`: competing pollers
//! can never both move the same event out of `pending`.
//!
//! [`Error::DuplicateEvent`]: crate::error::Error::DuplicateEvent

use chrono::Utc;
use rusqlite::{params, Row};
use uuid::Uuid;

use super::{parse_opt_ts, parse_provider, parse_ts, to_ts, Database, EventStatus, WebhookEvent};
use crate::error::{Error, Result};
use crate::provider::ProviderKind;

pub struct NewEvent {
    pub credential_id: String,
    pub subscription_id: String,
    pub provider: ProviderKind,
    pub change_type: String,
    pub idempotency_key: String,
    pub external_resource_id: String,
    pub raw_payload: serde_json::Value,
}

const EVENT_COLUMNS: &str = "id, credential_id, subscription_id, provider, change_type, \
     idempotency_key, external_resource_id, raw_payload, normalized_payload, status, \
     retry_count, error_message, received_at, processed_at";

fn row_to_event(row: &Row<'_>) -> rusqlite::Result<WebhookEvent> {
    let provider: String = row.get(3)?;
    let raw_payload: String = row.get(7)?;
    let normalized_payload: Option<String> = row.get(8)?;
    let status: String = row.get(9)?;
    let retry_count: i64 = row.get(10)?;
    let received_at: String = row.get(12)?;
    let processed_at: Option<String> = row.get(13)?;

    Ok(WebhookEvent {
        id: row.get(0)?,
        credential_id: row.get(1)?,
        subscription_id: row.get(2)?,
        provider: parse_provider(&provider)?,
        change_type: row.get(4)?,
        idempotency_key: row.get(5)?,
        external_resource_id: row.get(6)?,
        raw_payload: serde_json::from_str(&raw_payload).unwrap_or(serde_json::Value::Null),
        normalized_payload: normalized_payload
            .and_then(|s| serde_json::from_str(&s).ok()),
        status: EventStatus::parse(&status),
        retry_count: retry_count as u32,
        error_message: row.get(11)?,
        received_at: parse_ts(&received_at)?,
        processed_at: parse_opt_ts(processed_at)?,
    })
}

impl Database {
    /// Record a notification as a `pending` event. A second insert with the
    /// same idempotency key fails with `DuplicateEvent`.
    pub fn insert_event(&self, new: NewEvent) -> Result<WebhookEvent> {
        let id = Uuid::new_v4().to_string();
        let now = to_ts(Utc::now());

        let result = self.conn().execute(
            r#"
            INSERT INTO webhook_events (
                id, credential_id, subscription_id, provider, change_type,
                idempotency_key, external_resource_id, raw_payload, status,
                retry_count, received_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 'pending', 0, ?9)
            "#,
            params![
                id,
                new.credential_id,
                new.subscription_id,
                new.provider.as_str(),
                new.change_type,
                new.idempotency_key,
                new.external_resource_id,
                new.raw_payload.to_string(),
                now,
            ],
        );

        match result {
            Ok(_) => {}
            Err(rusqlite::Error::SqliteFailure(code, msg))
                if code.code == rusqlite::ErrorCode::ConstraintViolation
                    && msg
                        .as_deref()
                        .is_some_and(|m| m.contains("idempotency_key")) =>
            {
                return Err(Error::DuplicateEvent(new.idempotency_key));
            }
            Err(e) => return Err(e.into()),
        }

        Ok(self.get_event(&id)?.expect("event row inserted above"))
    }

    pub fn get_event(&self, id: &str) -> Result<Option<WebhookEvent>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM webhook_events WHERE id = ?1",
            EVENT_COLUMNS
        ))?;
        let mut rows = stmt.query_map(params![id], row_to_event)?;
        rows.next().transpose().map_err(Into::into)
    }

    /// Atomically claim up to `batch_size` retryable pending events, oldest
    /// first, moving them to `processing`. Each event is returned to exactly
    /// one caller even with concurrent pollers.
    pub fn claim_pending_events(
        &self,
        batch_size: usize,
        max_retries: u32,
    ) -> Result<Vec<WebhookEvent>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            r#"
            UPDATE webhook_events
            SET status = 'processing'
            WHERE id IN (
                SELECT id FROM webhook_events
                WHERE status = 'pending' AND retry_count < ?1
                ORDER BY received_at ASC, id ASC
                LIMIT ?2
            )
            RETURNING {}
            "#,
            EVENT_COLUMNS
        ))?;

        let rows = stmt
            .query_map(params![max_retries, batch_size as i64], row_to_event)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Store the normalized payload and mark the event `completed`.
    pub fn complete_event(&self, id: &str, normalized: &serde_json::Value) -> Result<()> {
        let now = to_ts(Utc::now());
        self.conn().execute(
            "UPDATE webhook_events \
             SET normalized_payload = ?1, status = 'completed', error_message = NULL, \
                 processed_at = ?2 \
             WHERE id = ?3",
            params![normalized.to_string(), now, id],
        )?;
        Ok(())
    }

    /// Record a failed processing attempt: increment the retry count, then
    /// either park the event back in `pending` or, when the ceiling is
    /// reached, mark it terminally `failed`. Returns the resulting status.
    pub fn fail_event(&self, id: &str, error: &str, max_retries: u32) -> Result<EventStatus> {
        // Error detail is truncated for storage, not for logs
        let detail: String = error.chars().take(500).collect();

        let conn = self.conn();
        let mut stmt = conn.prepare(
            r#"
            UPDATE webhook_events
            SET retry_count = retry_count + 1,
                error_message = ?1,
                status = CASE WHEN retry_count + 1 >= ?2 THEN 'failed' ELSE 'pending' END
            WHERE id = ?3
            RETURNING status
            "#,
        )?;

        let mut rows = stmt.query_map(params![detail, max_retries, id], |row| {
            let status: String = row.get(0)?;
            Ok(EventStatus::parse(&status))
        })?;

        rows.next()
            .transpose()?
            .ok_or(Error::NotFound("webhook event"))
    }
}

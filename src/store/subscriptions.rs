//! Subscription row persistence.

use chrono::{DateTime, Utc};
use rusqlite::{params, Row};
use uuid::Uuid;

use super::{
    parse_json_list, parse_opt_ts, parse_provider, parse_ts, to_json_list, to_ts, Database,
    Subscription, SubscriptionStatus,
};
use crate::error::Result;
use crate::provider::ProviderKind;

pub struct NewSubscription {
    pub credential_id: String,
    pub provider: ProviderKind,
    pub external_subscription_id: String,
    pub resource_path: String,
    pub notification_url: String,
    pub change_types: Vec<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

const SUBSCRIPTION_COLUMNS: &str = "id, credential_id, provider, external_subscription_id, \
     resource_path, notification_url, change_types, status, expires_at, created_at, \
     last_notification_at";

fn row_to_subscription(row: &Row<'_>) -> rusqlite::Result<Subscription> {
    let provider: String = row.get(2)?;
    let change_types: String = row.get(6)?;
    let status: String = row.get(7)?;
    let expires_at: Option<String> = row.get(8)?;
    let created_at: String = row.get(9)?;
    let last_notification_at: Option<String> = row.get(10)?;

    Ok(Subscription {
        id: row.get(0)?,
        credential_id: row.get(1)?,
        provider: parse_provider(&provider)?,
        external_subscription_id: row.get(3)?,
        resource_path: row.get(4)?,
        notification_url: row.get(5)?,
        change_types: parse_json_list(&change_types),
        status: SubscriptionStatus::parse(&status).unwrap_or(SubscriptionStatus::Error),
        expires_at: parse_opt_ts(expires_at)?,
        created_at: parse_ts(&created_at)?,
        last_notification_at: parse_opt_ts(last_notification_at)?,
    })
}

impl Database {
    pub fn insert_subscription(&self, new: NewSubscription) -> Result<Subscription> {
        let id = Uuid::new_v4().to_string();
        let now = to_ts(Utc::now());

        self.conn().execute(
            r#"
            INSERT INTO webhook_subscriptions (
                id, credential_id, provider, external_subscription_id, resource_path,
                notification_url, change_types, status, expires_at, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 'active', ?8, ?9, ?9)
            "#,
            params![
                id,
                new.credential_id,
                new.provider.as_str(),
                new.external_subscription_id,
                new.resource_path,
                new.notification_url,
                to_json_list(&new.change_types),
                new.expires_at.map(to_ts),
                now,
            ],
        )?;

        Ok(self
            .get_subscription(&id)?
            .expect("subscription row inserted above"))
    }

    pub fn get_subscription(&self, id: &str) -> Result<Option<Subscription>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM webhook_subscriptions WHERE id = ?1",
            SUBSCRIPTION_COLUMNS
        ))?;
        let mut rows = stmt.query_map(params![id], row_to_subscription)?;
        rows.next().transpose().map_err(Into::into)
    }

    /// Resolve a local subscription by the provider's subscription id.
    pub fn find_subscription_by_external_id(
        &self,
        external_subscription_id: &str,
    ) -> Result<Option<Subscription>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM webhook_subscriptions WHERE external_subscription_id = ?1",
            SUBSCRIPTION_COLUMNS
        ))?;
        let mut rows = stmt.query_map(params![external_subscription_id], row_to_subscription)?;
        rows.next().transpose().map_err(Into::into)
    }

    pub fn list_subscriptions(
        &self,
        credential_id: &str,
        status: Option<SubscriptionStatus>,
    ) -> Result<Vec<Subscription>> {
        let conn = self.conn();
        let rows = match status {
            Some(status) => {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {} FROM webhook_subscriptions \
                     WHERE credential_id = ?1 AND status = ?2 ORDER BY created_at DESC",
                    SUBSCRIPTION_COLUMNS
                ))?;
                let rows = stmt
                    .query_map(params![credential_id, status.as_str()], row_to_subscription)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                rows
            }
            None => {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {} FROM webhook_subscriptions \
                     WHERE credential_id = ?1 ORDER BY created_at DESC",
                    SUBSCRIPTION_COLUMNS
                ))?;
                let rows = stmt
                    .query_map(params![credential_id], row_to_subscription)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                rows
            }
        };
        Ok(rows)
    }

    /// Record a successful provider-side renewal.
    pub fn mark_subscription_renewed(
        &self,
        id: &str,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<Option<Subscription>> {
        let now = to_ts(Utc::now());
        let changed = self.conn().execute(
            "UPDATE webhook_subscriptions \
             SET expires_at = ?1, status = 'active', updated_at = ?2 WHERE id = ?3",
            params![expires_at.map(to_ts), now, id],
        )?;
        if changed == 0 {
            return Ok(None);
        }
        self.get_subscription(id)
    }

    pub fn delete_subscription(&self, id: &str) -> Result<bool> {
        let changed = self
            .conn()
            .execute("DELETE FROM webhook_subscriptions WHERE id = ?1", params![id])?;
        Ok(changed > 0)
    }

    /// Bump the last-notification timestamp; the only subscription mutation
    /// the ingestor performs.
    pub fn touch_subscription(&self, external_subscription_id: &str) -> Result<()> {
        let now = to_ts(Utc::now());
        self.conn().execute(
            "UPDATE webhook_subscriptions \
             SET last_notification_at = ?1, updated_at = ?1 \
             WHERE external_subscription_id = ?2",
            params![now, external_subscription_id],
        )?;
        Ok(())
    }

    /// Flip `active` rows whose expiry has passed to `expired`.
    pub fn mark_expired_subscriptions(&self, now: DateTime<Utc>) -> Result<usize> {
        let ts = to_ts(now);
        let changed = self.conn().execute(
            "UPDATE webhook_subscriptions SET status = 'expired', updated_at = ?1 \
             WHERE status = 'active' AND expires_at IS NOT NULL AND expires_at < ?1",
            params![ts],
        )?;
        Ok(changed)
    }
}

//! Push-subscription lifecycle against the provider.
//!
//! Each local subscription row mirrors a provider-side registration. The
//! provider is always the source of truth for the external id and expiry;
//! local rows are written only after the upstream call succeeds, and deletes
//! go upstream first so a failed upstream delete never strands a
//! provider-side subscription we no longer know about.

use chrono::{DateTime, Duration, SecondsFormat, Utc};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tracing::info;

use crate::broker::TokenBroker;
use crate::error::{Error, Result};
use crate::oauth::http_client;
use crate::provider::ProviderKind;
use crate::store::{Database, NewSubscription, Subscription, SubscriptionStatus};

/// Create-request parameters as accepted from the admin API.
pub struct CreateSubscription {
    pub credential_id: String,
    pub resource_path: String,
    pub change_types: Vec<String>,
    pub notification_url: String,
    pub ttl_hours: i64,
}

/// Provider response shape for subscription create/renew calls.
#[derive(Deserialize)]
struct ProviderSubscription {
    id: String,
    #[serde(rename = "expirationDateTime")]
    expiration_date_time: Option<String>,
}

pub struct SubscriptionManager {
    db: Arc<Database>,
    broker: Arc<TokenBroker>,
    http: reqwest::Client,
}

impl SubscriptionManager {
    pub fn new(db: Arc<Database>, broker: Arc<TokenBroker>) -> Self {
        Self {
            db,
            broker,
            http: http_client(),
        }
    }

    /// Register a subscription upstream, then persist the mirror row.
    pub async fn create(&self, req: CreateSubscription) -> Result<Subscription> {
        let token = self
            .broker
            .access_token(&req.credential_id, Utc::now())
            .await?;

        let descriptor = token.provider.descriptor(None);
        let requested_expiry =
            Utc::now() + Duration::hours(clamp_ttl(token.provider, req.ttl_hours));

        let body = json!({
            "changeType": req.change_types.join(","),
            "notificationUrl": req.notification_url,
            "resource": req.resource_path,
            "expirationDateTime": format_expiry(requested_expiry),
        });

        let response = self
            .http
            .post(format!("{}/subscriptions", descriptor.api_base_url))
            .bearer_auth(&token.access_token)
            .json(&body)
            .send()
            .await?;

        let upstream = read_subscription_response(response, "subscription create").await?;
        let expires_at =
            parse_expiry(upstream.expiration_date_time.as_deref()).unwrap_or(requested_expiry);

        let subscription = self.db.insert_subscription(NewSubscription {
            credential_id: req.credential_id,
            provider: token.provider,
            external_subscription_id: upstream.id,
            resource_path: req.resource_path,
            notification_url: req.notification_url,
            change_types: req.change_types,
            expires_at: Some(expires_at),
        })?;

        info!(
            subscription = %subscription.id,
            external = %subscription.external_subscription_id,
            credential = %subscription.credential_id,
            expires_at = %expires_at,
            "Subscription created"
        );
        Ok(subscription)
    }

    /// Extend the provider-side expiry, then update the local row.
    pub async fn renew(&self, subscription_id: &str, ttl_hours: i64) -> Result<Subscription> {
        let subscription = self
            .db
            .get_subscription(subscription_id)?
            .ok_or(Error::NotFound("subscription"))?;

        let token = self
            .broker
            .access_token(&subscription.credential_id, Utc::now())
            .await?;

        let descriptor = subscription.provider.descriptor(None);
        let requested_expiry =
            Utc::now() + Duration::hours(clamp_ttl(subscription.provider, ttl_hours));

        let response = self
            .http
            .patch(format!(
                "{}/subscriptions/{}",
                descriptor.api_base_url, subscription.external_subscription_id
            ))
            .bearer_auth(&token.access_token)
            .json(&json!({ "expirationDateTime": format_expiry(requested_expiry) }))
            .send()
            .await?;

        let upstream = read_subscription_response(response, "subscription renew").await?;
        let expires_at =
            parse_expiry(upstream.expiration_date_time.as_deref()).unwrap_or(requested_expiry);

        let renewed = self
            .db
            .mark_subscription_renewed(&subscription.id, Some(expires_at))?
            .ok_or(Error::NotFound("subscription"))?;

        info!(subscription = %renewed.id, expires_at = %expires_at, "Subscription renewed");
        Ok(renewed)
    }

    /// Delete upstream first; an upstream failure other than "already gone"
    /// aborts the local delete.
    pub async fn delete(&self, subscription_id: &str) -> Result<()> {
        let subscription = self
            .db
            .get_subscription(subscription_id)?
            .ok_or(Error::NotFound("subscription"))?;

        let token = self
            .broker
            .access_token(&subscription.credential_id, Utc::now())
            .await?;

        let descriptor = subscription.provider.descriptor(None);
        let response = self
            .http
            .delete(format!(
                "{}/subscriptions/{}",
                descriptor.api_base_url, subscription.external_subscription_id
            ))
            .bearer_auth(&token.access_token)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() && status.as_u16() != 404 {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown error".to_string());
            return Err(Error::Provider {
                status: status.as_u16(),
                detail: format!("subscription delete failed: {}", body),
            });
        }

        self.db.delete_subscription(&subscription.id)?;
        info!(subscription = %subscription.id, "Subscription deleted");
        Ok(())
    }

    pub fn list(
        &self,
        credential_id: &str,
        status: Option<SubscriptionStatus>,
    ) -> Result<Vec<Subscription>> {
        self.db.list_subscriptions(credential_id, status)
    }
}

/// Clamp a requested TTL into [1, provider maximum] hours.
fn clamp_ttl(provider: ProviderKind, ttl_hours: i64) -> i64 {
    ttl_hours.clamp(1, provider.descriptor(None).max_subscription_hours)
}

fn format_expiry(expires_at: DateTime<Utc>) -> String {
    expires_at.to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn parse_expiry(raw: Option<&str>) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw?)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

async fn read_subscription_response(
    response: reqwest::Response,
    operation: &'static str,
) -> Result<ProviderSubscription> {
    let status = response.status();
    if !status.is_success() {
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "unknown error".to_string());
        return Err(Error::Provider {
            status: status.as_u16(),
            detail: format!("{} failed: {}", operation, body),
        });
    }
    Ok(response.json().await?)
}

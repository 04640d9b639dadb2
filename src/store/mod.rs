//! SQLite persistence for credentials, token pairs, subscriptions and
//! webhook events.
//!
//! One database, one connection behind a `Mutex` (SQLite serialized mode is
//! the backing synchronization; rusqlite requires the mutex for `Send`).
//! Schema is created at open. Uniqueness constraints are load-bearing:
//! `credentials.name`, `credentials(provider, client_id)` and
//! `webhook_events.idempotency_key` are the sole guards against duplicates,
//! including under concurrent webhook deliveries.
//!
//! The store persists secrets as opaque ciphertext; encryption and
//! decryption happen in the callers that own the [`SecretCipher`].
//!
//! [`SecretCipher`]: crate::crypto::SecretCipher

use anyhow::{Context, Result as AnyResult};
use chrono::{DateTime, Utc};
use rusqlite::Connection;
use std::path::Path;
use std::sync::Mutex;

mod credentials;
mod events;
mod subscriptions;
mod tokens;

pub use credentials::{CredentialSelector, CredentialUpdate, NewCredential};
pub use events::NewEvent;
pub use subscriptions::NewSubscription;
pub use tokens::TokenPairRecord;

use crate::provider::ProviderKind;

/// Connection status of a credential.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CredentialStatus {
    Pending,
    Connected,
    Error,
}

impl CredentialStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CredentialStatus::Pending => "pending",
            CredentialStatus::Connected => "connected",
            CredentialStatus::Error => "error",
        }
    }

    fn parse(s: &str) -> Self {
        match s {
            "connected" => CredentialStatus::Connected,
            "error" => CredentialStatus::Error,
            _ => CredentialStatus::Pending,
        }
    }
}

/// Lifecycle status of a provider-side subscription mirror.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SubscriptionStatus {
    Active,
    Expired,
    Error,
}

impl SubscriptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionStatus::Active => "active",
            SubscriptionStatus::Expired => "expired",
            SubscriptionStatus::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(SubscriptionStatus::Active),
            "expired" => Some(SubscriptionStatus::Expired),
            "error" => Some(SubscriptionStatus::Error),
            _ => None,
        }
    }
}

/// Processing state of a recorded webhook event.
///
/// `pending → processing → completed | failed`, with `processing → pending`
/// on a transient failure below the retry ceiling. `completed` and `failed`
/// are terminal.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EventStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl EventStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventStatus::Pending => "pending",
            EventStatus::Processing => "processing",
            EventStatus::Completed => "completed",
            EventStatus::Failed => "failed",
        }
    }

    fn parse(s: &str) -> Self {
        match s {
            "processing" => EventStatus::Processing,
            "completed" => EventStatus::Completed,
            "failed" => EventStatus::Failed,
            _ => EventStatus::Pending,
        }
    }
}

/// A configured OAuth application plus its connection state.
#[derive(Clone, Debug)]
pub struct Credential {
    pub id: String,
    pub name: String,
    pub display_name: String,
    pub provider: ProviderKind,
    pub client_id: String,
    /// Ciphertext; decrypt with the process cipher before use.
    pub encrypted_client_secret: String,
    pub redirect_uri: String,
    pub tenant_id: Option<String>,
    pub authorization_url: String,
    pub token_url: String,
    pub scopes: Vec<String>,
    pub connected_email: Option<String>,
    pub external_account_id: Option<String>,
    pub connected_display_name: Option<String>,
    pub status: CredentialStatus,
    pub error_message: Option<String>,
    pub last_connected_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Access/refresh token pair owned 1:1 by a credential. Tokens are stored
/// encrypted.
#[derive(Clone, Debug)]
pub struct TokenPair {
    pub credential_id: String,
    pub encrypted_access_token: String,
    pub encrypted_refresh_token: Option<String>,
    pub scopes: Vec<String>,
    pub expires_at: DateTime<Utc>,
    pub last_refreshed_at: DateTime<Utc>,
}

/// Local mirror of a provider-side push subscription.
#[derive(Clone, Debug)]
pub struct Subscription {
    pub id: String,
    pub credential_id: String,
    pub provider: ProviderKind,
    pub external_subscription_id: String,
    pub resource_path: String,
    pub notification_url: String,
    pub change_types: Vec<String>,
    pub status: SubscriptionStatus,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub last_notification_at: Option<DateTime<Utc>>,
}

/// One durably recorded inbound change notification.
#[derive(Clone, Debug)]
pub struct WebhookEvent {
    pub id: String,
    pub credential_id: String,
    pub subscription_id: String,
    pub provider: ProviderKind,
    pub change_type: String,
    pub idempotency_key: String,
    pub external_resource_id: String,
    pub raw_payload: serde_json::Value,
    pub normalized_payload: Option<serde_json::Value>,
    pub status: EventStatus,
    pub retry_count: u32,
    pub error_message: Option<String>,
    pub received_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

/// Shared database handle.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open (or create) the database at `path` and ensure the schema exists.
    pub fn open<P: AsRef<Path>>(path: P) -> AnyResult<Self> {
        let conn = Connection::open(path).context("Failed to open database")?;
        Self::init(conn)
    }

    /// In-memory database for tests.
    pub fn open_in_memory() -> AnyResult<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory database")?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> AnyResult<Self> {
        conn.pragma_update(None, "foreign_keys", "ON")
            .context("Failed to enable foreign keys")?;

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS credentials (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL UNIQUE,
                display_name TEXT NOT NULL,
                provider TEXT NOT NULL,
                client_id TEXT NOT NULL,
                encrypted_client_secret TEXT NOT NULL,
                redirect_uri TEXT NOT NULL,
                tenant_id TEXT,
                authorization_url TEXT NOT NULL,
                token_url TEXT NOT NULL,
                scopes TEXT NOT NULL,
                connected_email TEXT,
                external_account_id TEXT,
                connected_display_name TEXT,
                status TEXT NOT NULL DEFAULT 'pending',
                error_message TEXT,
                last_connected_at TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                UNIQUE(provider, client_id)
            );

            CREATE TABLE IF NOT EXISTS credential_tokens (
                credential_id TEXT PRIMARY KEY
                    REFERENCES credentials(id) ON DELETE CASCADE,
                encrypted_access_token TEXT NOT NULL,
                encrypted_refresh_token TEXT,
                scopes TEXT NOT NULL,
                expires_at TEXT NOT NULL,
                last_refreshed_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS webhook_subscriptions (
                id TEXT PRIMARY KEY,
                credential_id TEXT NOT NULL
                    REFERENCES credentials(id) ON DELETE CASCADE,
                provider TEXT NOT NULL,
                external_subscription_id TEXT NOT NULL,
                resource_path TEXT NOT NULL,
                notification_url TEXT NOT NULL,
                change_types TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'active',
                expires_at TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                last_notification_at TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_subscriptions_external
                ON webhook_subscriptions(external_subscription_id);

            CREATE TABLE IF NOT EXISTS webhook_events (
                id TEXT PRIMARY KEY,
                credential_id TEXT NOT NULL,
                subscription_id TEXT NOT NULL,
                provider TEXT NOT NULL,
                change_type TEXT NOT NULL,
                idempotency_key TEXT NOT NULL UNIQUE,
                external_resource_id TEXT NOT NULL,
                raw_payload TEXT NOT NULL,
                normalized_payload TEXT,
                status TEXT NOT NULL DEFAULT 'pending',
                retry_count INTEGER NOT NULL DEFAULT 0,
                error_message TEXT,
                received_at TEXT NOT NULL,
                processed_at TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_events_status
                ON webhook_events(status, received_at);
            "#,
        )
        .context("Failed to create schema")?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub(crate) fn conn(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().expect("database mutex poisoned")
    }
}

/// RFC 3339 encoding used for all timestamp columns.
pub(crate) fn to_ts(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339()
}

pub(crate) fn parse_ts(s: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(
                0,
                rusqlite::types::Type::Text,
                Box::new(e),
            )
        })
}

pub(crate) fn parse_opt_ts(s: Option<String>) -> rusqlite::Result<Option<DateTime<Utc>>> {
    s.map(|s| parse_ts(&s)).transpose()
}

/// Scope/change-type lists are stored as JSON arrays in TEXT columns.
pub(crate) fn to_json_list(items: &[String]) -> String {
    serde_json::to_string(items).unwrap_or_else(|_| "[]".to_string())
}

pub(crate) fn parse_json_list(s: &str) -> Vec<String> {
    serde_json::from_str(s).unwrap_or_default()
}

pub(crate) fn parse_provider(s: &str) -> rusqlite::Result<ProviderKind> {
    ProviderKind::parse(s).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            0,
            rusqlite::types::Type::Text,
            format!("unknown provider tag: {}", s).into(),
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::credentials::NewCredential;

    #[test]
    fn test_rows_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mailbridge.db");

        let descriptor = ProviderKind::Ms365.descriptor(None);
        let id = {
            let db = Database::open(&path).unwrap();
            db.create_credential(NewCredential {
                name: "acme".to_string(),
                display_name: "Acme".to_string(),
                provider: ProviderKind::Ms365,
                client_id: "client-1".to_string(),
                encrypted_client_secret: "ciphertext".to_string(),
                redirect_uri: "https://app/cb".to_string(),
                tenant_id: None,
                authorization_url: descriptor.authorize_url,
                token_url: descriptor.token_url,
                scopes: descriptor.default_scopes,
            })
            .unwrap()
            .id
        };

        // Reopen runs schema creation again; existing rows are untouched
        let db = Database::open(&path).unwrap();
        let credential = db.get_credential(&id).unwrap().unwrap();
        assert_eq!(credential.name, "acme");
        assert_eq!(credential.status, CredentialStatus::Pending);
    }
}

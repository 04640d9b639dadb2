//! Token broker: vends live access tokens to internal services.
//!
//! Callers never see refresh tokens or client secrets. The broker keeps a
//! decrypted-access-token cache and refreshes through the provider when a
//! token is within the expiry margin, serializing refreshes per credential
//! so a burst of requests produces one provider round trip.

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::crypto::SecretCipher;
use crate::error::{Error, Result};
use crate::oauth::{http_client, refresh_tokens};
use crate::provider::ProviderKind;
use crate::store::{Credential, CredentialStatus, Database, TokenPair};

/// Refresh when less than this much lifetime remains.
const REFRESH_MARGIN_SECS: i64 = 300;

/// What the broker hands out. Bearer-only, no refresh material.
#[derive(Clone, Debug)]
pub struct VendedToken {
    pub credential_id: String,
    pub provider: ProviderKind,
    pub access_token: String,
    pub token_type: &'static str,
    pub expires_at: DateTime<Utc>,
}

#[derive(Clone)]
struct CachedToken {
    access_token: String,
    expires_at: DateTime<Utc>,
}

pub struct TokenBroker {
    db: Arc<Database>,
    cipher: Arc<SecretCipher>,
    http: reqwest::Client,
    cache: DashMap<String, CachedToken>,
    refresh_locks: DashMap<String, Arc<Mutex<()>>>,
    margin: Duration,
}

impl TokenBroker {
    pub fn new(db: Arc<Database>, cipher: Arc<SecretCipher>) -> Self {
        Self {
            db,
            cipher,
            http: http_client(),
            cache: DashMap::new(),
            refresh_locks: DashMap::new(),
            margin: Duration::seconds(REFRESH_MARGIN_SECS),
        }
    }

    /// Get a usable access token for a connected credential, refreshing if
    /// it expires within the margin. `now` is passed in so expiry decisions
    /// are testable and consistent across one request.
    pub async fn access_token(&self, credential_id: &str, now: DateTime<Utc>) -> Result<VendedToken> {
        let credential = self.connected_credential(credential_id)?;

        if let Some(cached) = self.fresh_cached(credential_id, now) {
            return Ok(vended(&credential, cached));
        }

        let lock = self.refresh_lock(credential_id);
        let _guard = lock.lock().await;

        // Another task may have refreshed while we waited on the lock
        if let Some(cached) = self.fresh_cached(credential_id, now) {
            return Ok(vended(&credential, cached));
        }

        let pair = self
            .db
            .get_token_pair(credential_id)?
            .ok_or(Error::CredentialNotConnected)?;

        if pair.expires_at - self.margin > now {
            let cached = CachedToken {
                access_token: self.cipher.decrypt(&pair.encrypted_access_token)?,
                expires_at: pair.expires_at,
            };
            self.cache.insert(credential_id.to_string(), cached.clone());
            return Ok(vended(&credential, cached));
        }

        self.refresh(&credential, &pair).await
    }

    /// Refresh unconditionally, bypassing cache and margin checks.
    pub async fn force_refresh(&self, credential_id: &str) -> Result<VendedToken> {
        let credential = self.connected_credential(credential_id)?;

        let lock = self.refresh_lock(credential_id);
        let _guard = lock.lock().await;

        let pair = self
            .db
            .get_token_pair(credential_id)?
            .ok_or(Error::CredentialNotConnected)?;

        self.refresh(&credential, &pair).await
    }

    /// Drop any cached token, e.g. after a credential update or delete.
    pub fn invalidate(&self, credential_id: &str) {
        self.cache.remove(credential_id);
    }

    fn connected_credential(&self, credential_id: &str) -> Result<Credential> {
        let credential = self
            .db
            .get_credential(credential_id)?
            .ok_or(Error::NotFound("credential"))?;
        if credential.status != CredentialStatus::Connected {
            return Err(Error::CredentialNotConnected);
        }
        Ok(credential)
    }

    fn fresh_cached(&self, credential_id: &str, now: DateTime<Utc>) -> Option<CachedToken> {
        let cached = self.cache.get(credential_id)?;
        if cached.expires_at - self.margin > now {
            Some(cached.clone())
        } else {
            None
        }
    }

    fn refresh_lock(&self, credential_id: &str) -> Arc<Mutex<()>> {
        self.refresh_locks
            .entry(credential_id.to_string())
            .or_default()
            .clone()
    }

    async fn refresh(&self, credential: &Credential, pair: &TokenPair) -> Result<VendedToken> {
        let refresh_token = pair
            .encrypted_refresh_token
            .as_deref()
            .ok_or(Error::NoRefreshToken)?;
        let refresh_token = self.cipher.decrypt(refresh_token)?;
        let client_secret = self.cipher.decrypt(&credential.encrypted_client_secret)?;

        let granted = match refresh_tokens(
            &self.http,
            &credential.token_url,
            &refresh_token,
            &credential.client_id,
            &client_secret,
        )
        .await
        {
            Ok(granted) => granted,
            Err(e) => {
                // A dead refresh token means the credential needs re-authorization;
                // make that visible on the credential itself.
                let detail = e.to_string();
                warn!(credential = %credential.id, error = %detail, "Token refresh failed");
                self.cache.remove(&credential.id);
                let _ = self.db.mark_credential_error(&credential.id, &detail);
                return Err(e);
            }
        };

        self.db.update_access_token(
            &credential.id,
            &self.cipher.encrypt(&granted.access_token)?,
            granted
                .refresh_token
                .as_deref()
                .map(|t| self.cipher.encrypt(t))
                .transpose()?
                .as_deref(),
            granted.expires_at,
        )?;

        let cached = CachedToken {
            access_token: granted.access_token,
            expires_at: granted.expires_at,
        };
        self.cache.insert(credential.id.clone(), cached.clone());

        info!(
            credential = %credential.id,
            expires_at = %granted.expires_at,
            rotated_refresh_token = granted.refresh_token.is_some(),
            "Access token refreshed"
        );

        Ok(vended(credential, cached))
    }
}

fn vended(credential: &Credential, cached: CachedToken) -> VendedToken {
    VendedToken {
        credential_id: credential.id.clone(),
        provider: credential.provider,
        access_token: cached.access_token,
        token_type: "Bearer",
        expires_at: cached.expires_at,
    }
}

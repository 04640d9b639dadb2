//! OAuth 2.0 authorization flow for mailbox credentials.
//!
//! Authorization code flow, driven from the admin UI:
//! 1. Admin picks a credential → `begin_authorization` returns the
//!    provider authorization URL (with a CSRF state token)
//! 2. Account owner authorizes on the provider's site
//! 3. Provider redirects back with `code` + `state`
//! 4. `complete_authorization` exchanges the code, resolves the account
//!    identity, persists the encrypted token pair and marks the credential
//!    `connected` — or `error` with the failure detail.

mod exchange;
mod state;

pub use exchange::{exchange_code, fetch_identity, http_client, refresh_tokens, GrantedTokens};
pub use state::{
    run_state_cleanup, MemoryStateStore, StateEntry, StateStore, DEFAULT_STATE_TTL_SECS,
};

use chrono::Utc;
use std::sync::Arc;
use tracing::{info, warn};

use crate::crypto::SecretCipher;
use crate::error::{Error, Result};
use crate::store::{Credential, Database, TokenPairRecord};

/// Orchestrates the authorization-code flow against the credential store.
pub struct FlowEngine {
    db: Arc<Database>,
    cipher: Arc<SecretCipher>,
    states: Arc<dyn StateStore>,
    http: reqwest::Client,
}

impl FlowEngine {
    pub fn new(db: Arc<Database>, cipher: Arc<SecretCipher>, states: Arc<dyn StateStore>) -> Self {
        Self {
            db,
            cipher,
            states,
            http: http_client(),
        }
    }

    /// Build the provider authorization URL for a credential, minting a
    /// state token bound to (credential, provider).
    pub fn begin_authorization(&self, credential_id: &str) -> Result<String> {
        let credential = self
            .db
            .get_credential(credential_id)?
            .ok_or(Error::NotFound("credential"))?;

        let state = self.states.put(StateEntry {
            credential_id: credential.id.clone(),
            provider: credential.provider,
            created_at: Utc::now(),
        });

        Ok(build_authorize_url(&credential, &state))
    }

    /// Validate and consume the state token, then run the exchange.
    ///
    /// Failures before state validation surface directly; failures after it
    /// also mark the credential `error` so the connection state never lies.
    pub async fn complete_authorization(&self, code: &str, state: &str) -> Result<Credential> {
        let entry = self.states.consume(state).ok_or(Error::InvalidState)?;

        let credential = self
            .db
            .get_credential(&entry.credential_id)?
            .ok_or(Error::NotFound("credential"))?;

        if credential.provider != entry.provider {
            warn!(
                credential = %credential.id,
                "OAuth state bound to a different provider"
            );
            return Err(Error::InvalidState);
        }

        match self.connect(&credential, code).await {
            Ok(connected) => Ok(connected),
            Err(e) => {
                let detail = e.to_string();
                warn!(credential = %credential.id, error = %detail, "OAuth completion failed");
                // Surface the original failure even if the bookkeeping write fails
                let _ = self.db.mark_credential_error(&credential.id, &detail);
                Err(e)
            }
        }
    }

    async fn connect(&self, credential: &Credential, code: &str) -> Result<Credential> {
        let client_secret = self.cipher.decrypt(&credential.encrypted_client_secret)?;

        let tokens = exchange_code(
            &self.http,
            &credential.token_url,
            code,
            &credential.redirect_uri,
            &credential.client_id,
            &client_secret,
        )
        .await?;

        let descriptor = credential.provider.descriptor(credential.tenant_id.as_deref());
        let identity = fetch_identity(
            &self.http,
            credential.provider,
            &descriptor.identity_url,
            &tokens.access_token,
        )
        .await?;

        let granted_scopes = if tokens.scopes.is_empty() {
            credential.scopes.clone()
        } else {
            tokens.scopes.clone()
        };

        self.db.upsert_token_pair(
            &credential.id,
            TokenPairRecord {
                encrypted_access_token: self.cipher.encrypt(&tokens.access_token)?,
                encrypted_refresh_token: tokens
                    .refresh_token
                    .as_deref()
                    .map(|t| self.cipher.encrypt(t))
                    .transpose()?,
                scopes: granted_scopes,
                expires_at: tokens.expires_at,
            },
        )?;

        self.db.mark_credential_connected(&credential.id, &identity)?;

        info!(
            credential = %credential.id,
            provider = %credential.provider.as_str(),
            email = identity.email.as_deref().unwrap_or("unknown"),
            has_refresh_token = tokens.refresh_token.is_some(),
            "OAuth flow completed"
        );

        self.db
            .get_credential(&credential.id)?
            .ok_or(Error::NotFound("credential"))
    }
}

/// Authorization URL: provider endpoint plus client id, redirect URI,
/// space-joined scopes, the state token, and per-provider extras.
fn build_authorize_url(credential: &Credential, state: &str) -> String {
    let descriptor = credential.provider.descriptor(credential.tenant_id.as_deref());
    let scopes = credential.scopes.join(" ");

    let mut url = format!(
        "{}?client_id={}&response_type=code&redirect_uri={}&scope={}&state={}&response_mode=query",
        credential.authorization_url,
        urlencoding::encode(&credential.client_id),
        urlencoding::encode(&credential.redirect_uri),
        urlencoding::encode(&scopes),
        urlencoding::encode(state),
    );

    for (key, value) in descriptor.extra_authorize_params {
        url.push('&');
        url.push_str(key);
        url.push('=');
        url.push_str(value);
    }

    url
}

//! Provider token-endpoint and identity-endpoint calls.

use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use std::collections::HashMap;

use crate::error::{Error, Result};
use crate::provider::{AccountIdentity, ProviderKind};

/// Bounded timeout for all provider HTTP calls.
const PROVIDER_TIMEOUT_SECS: u64 = 15;

/// Token pair as returned by a provider token endpoint, with the relative
/// `expires_in` already resolved to an absolute expiry.
#[derive(Clone, Debug)]
pub struct GrantedTokens {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub scopes: Vec<String>,
    pub expires_at: DateTime<Utc>,
}

/// Standard OAuth 2.0 token response
#[derive(Deserialize, Debug)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    scope: Option<String>,
}

impl TokenResponse {
    fn into_granted(self) -> GrantedTokens {
        let expires_at = Utc::now() + Duration::seconds(self.expires_in.unwrap_or(3600));
        let scopes = self
            .scope
            .map(|s| s.split_whitespace().map(str::to_string).collect())
            .unwrap_or_default();
        GrantedTokens {
            access_token: self.access_token,
            refresh_token: self.refresh_token,
            scopes,
            expires_at,
        }
    }
}

pub fn http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(PROVIDER_TIMEOUT_SECS))
        .build()
        .expect("failed to build HTTP client")
}

async fn post_token_form(
    client: &reqwest::Client,
    token_url: &str,
    form: &HashMap<&str, &str>,
    operation: &'static str,
) -> Result<GrantedTokens> {
    let response = client
        .post(token_url)
        .header("Accept", "application/json")
        .form(form)
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
            detail: format!("{} failed: {}", operation, body),
        });
    }

    let token_response: TokenResponse = response.json().await?;
    Ok(token_response.into_granted())
}

/// Exchange an authorization code for a token pair.
pub async fn exchange_code(
    client: &reqwest::Client,
    token_url: &str,
    code: &str,
    redirect_uri: &str,
    client_id: &str,
    client_secret: &str,
) -> Result<GrantedTokens> {
    let mut form = HashMap::new();
    form.insert("grant_type", "authorization_code");
    form.insert("code", code);
    form.insert("redirect_uri", redirect_uri);
    form.insert("client_id", client_id);
    form.insert("client_secret", client_secret);

    tracing::debug!(token_url = %token_url, "Exchanging authorization code");
    post_token_form(client, token_url, &form, "token exchange").await
}

/// Redeem a refresh token for a fresh access token.
pub async fn refresh_tokens(
    client: &reqwest::Client,
    token_url: &str,
    refresh_token: &str,
    client_id: &str,
    client_secret: &str,
) -> Result<GrantedTokens> {
    let mut form = HashMap::new();
    form.insert("grant_type", "refresh_token");
    form.insert("refresh_token", refresh_token);
    form.insert("client_id", client_id);
    form.insert("client_secret", client_secret);

    tracing::debug!(token_url = %token_url, "Refreshing access token");
    post_token_form(client, token_url, &form, "token refresh").await
}

/// Fetch the connected account's identity from the provider.
pub async fn fetch_identity(
    client: &reqwest::Client,
    provider: ProviderKind,
    identity_url: &str,
    access_token: &str,
) -> Result<AccountIdentity> {
    let response = client
        .get(identity_url)
        .bearer_auth(access_token)
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
            detail: format!("identity fetch failed: {}", body),
        });
    }

    let claims: serde_json::Value = response.json().await?;
    Ok(provider.extract_identity(&claims))
}

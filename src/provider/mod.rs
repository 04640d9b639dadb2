//! Provider capability table.
//!
//! Everything that differs between the two supported mailbox providers lives
//! here: default OAuth endpoints and scopes, extra authorization parameters,
//! the identity endpoint and its claim names, and subscription limits. The
//! OAuth flow, token broker and subscription manager stay provider-agnostic
//! by going through `Descriptor`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Closed set of supported providers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    Ms365,
    GoogleWorkspace,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Ms365 => "ms365",
            ProviderKind::GoogleWorkspace => "google_workspace",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ms365" => Some(ProviderKind::Ms365),
            "google_workspace" => Some(ProviderKind::GoogleWorkspace),
            _ => None,
        }
    }

    /// Capability descriptor for this provider. `tenant_id` scopes the MS365
    /// endpoints to a single Azure AD tenant; without it the multi-tenant
    /// `common` endpoints are used.
    pub fn descriptor(&self, tenant_id: Option<&str>) -> Descriptor {
        match self {
            ProviderKind::Ms365 => {
                let tenant = tenant_id.unwrap_or("common");
                Descriptor {
                    authorize_url: format!(
                        "https://login.microsoftonline.com/{}/oauth2/v2.0/authorize",
                        tenant
                    ),
                    token_url: format!(
                        "https://login.microsoftonline.com/{}/oauth2/v2.0/token",
                        tenant
                    ),
                    default_scopes: vec![
                        "offline_access".to_string(),
                        "https://graph.microsoft.com/Mail.Read".to_string(),
                        "https://graph.microsoft.com/Mail.Send".to_string(),
                        "https://graph.microsoft.com/User.Read".to_string(),
                    ],
                    extra_authorize_params: vec![("prompt", "select_account")],
                    identity_url: "https://graph.microsoft.com/v1.0/me".to_string(),
                    api_base_url: "https://graph.microsoft.com/v1.0".to_string(),
                    max_subscription_hours: 4230,
                }
            }
            ProviderKind::GoogleWorkspace => Descriptor {
                authorize_url: "https://accounts.google.com/o/oauth2/v2/auth".to_string(),
                token_url: "https://oauth2.googleapis.com/token".to_string(),
                default_scopes: vec![
                    "https://www.googleapis.com/auth/gmail.readonly".to_string(),
                    "https://www.googleapis.com/auth/gmail.send".to_string(),
                    "https://www.googleapis.com/auth/userinfo.email".to_string(),
                ],
                extra_authorize_params: vec![("access_type", "offline"), ("prompt", "consent")],
                identity_url: "https://www.googleapis.com/oauth2/v3/userinfo".to_string(),
                api_base_url: "https://gmail.googleapis.com/gmail/v1".to_string(),
                max_subscription_hours: 168,
            },
        }
    }
}

/// Per-provider capabilities, resolved once per call site.
#[derive(Clone, Debug)]
pub struct Descriptor {
    pub authorize_url: String,
    pub token_url: String,
    pub default_scopes: Vec<String>,
    /// Provider-specific query params appended to the authorization URL.
    pub extra_authorize_params: Vec<(&'static str, &'static str)>,
    /// Endpoint returning the connected account's identity claims.
    pub identity_url: String,
    /// Base URL for resource and subscription API calls.
    pub api_base_url: String,
    /// Provider ceiling on subscription lifetime; requested TTLs are clamped.
    pub max_subscription_hours: i64,
}

/// Connected account identity resolved from the provider's identity endpoint.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AccountIdentity {
    pub email: Option<String>,
    pub external_id: Option<String>,
    pub display_name: Option<String>,
}

impl ProviderKind {
    /// Map the provider's identity response onto our identity fields.
    ///
    /// MS365 exposes `userPrincipalName`/`mail`, `id`, `displayName`;
    /// Google exposes `email`, `sub`, `name`.
    pub fn extract_identity(&self, claims: &Value) -> AccountIdentity {
        let str_claim = |key: &str| claims.get(key).and_then(Value::as_str).map(str::to_string);

        match self {
            ProviderKind::Ms365 => AccountIdentity {
                email: str_claim("userPrincipalName").or_else(|| str_claim("mail")),
                external_id: str_claim("id"),
                display_name: str_claim("displayName"),
            },
            ProviderKind::GoogleWorkspace => AccountIdentity {
                email: str_claim("email"),
                external_id: str_claim("sub"),
                display_name: str_claim("name"),
            },
        }
    }
}

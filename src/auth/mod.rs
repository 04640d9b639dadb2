use axum::http::HeaderMap;

#[cfg(test)]
mod tests;

/// Extract bearer token from HTTP Authorization header
///
/// Expected format: "Authorization: Bearer <token>"
/// Returns the token string if present and valid.
pub fn extract_bearer_token(headers: &HeaderMap) -> Result<String, TokenError> {
    let auth_header = headers
        .get("authorization")
        .ok_or(TokenError::Missing)?
        .to_str()
        .map_err(|_| TokenError::InvalidFormat)?;

    parse_bearer_token(auth_header)
}

/// Check the admin bearer token for management endpoints.
///
/// When no admin token is configured, admin auth is disabled (single-operator
/// development deployments); configuring one makes it mandatory.
pub fn verify_admin(headers: &HeaderMap, configured: Option<&str>) -> Result<(), TokenError> {
    let Some(expected) = configured else {
        return Ok(());
    };
    let token = extract_bearer_token(headers)?;
    if token == expected {
        Ok(())
    } else {
        Err(TokenError::Rejected)
    }
}

/// Check the shared service secret on internal endpoints.
///
/// Expected in the "X-Service-Token" header. Unlike admin auth, internal
/// token vending is refused outright when no secret is configured: it hands
/// out live access tokens.
pub fn verify_service(headers: &HeaderMap, configured: Option<&str>) -> Result<(), TokenError> {
    let expected = configured.ok_or(TokenError::Rejected)?;

    let provided = headers
        .get("x-service-token")
        .ok_or(TokenError::Missing)?
        .to_str()
        .map_err(|_| TokenError::InvalidFormat)?;

    if provided == expected {
        Ok(())
    } else {
        Err(TokenError::Rejected)
    }
}

/// Parse bearer token from Authorization header value
fn parse_bearer_token(header_value: &str) -> Result<String, TokenError> {
    let parts: Vec<&str> = header_value.splitn(2, ' ').collect();

    if parts.len() != 2 {
        return Err(TokenError::InvalidFormat);
    }

    if parts[0].to_lowercase() != "bearer" {
        return Err(TokenError::InvalidFormat);
    }

    let token = parts[1].trim();
    if token.is_empty() {
        return Err(TokenError::Empty);
    }

    Ok(token.to_string())
}

/// Token extraction and verification errors
#[derive(Debug, PartialEq, Clone)]
pub enum TokenError {
    /// Authorization header or token field not present
    Missing,
    /// Invalid format (not "Bearer <token>" or non-string token)
    InvalidFormat,
    /// Token is empty string
    Empty,
    /// Token present but does not match the configured secret
    Rejected,
}

impl std::fmt::Display for TokenError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TokenError::Missing => write!(f, "Authorization token not provided"),
            TokenError::InvalidFormat => write!(f, "Invalid authorization token format"),
            TokenError::Empty => write!(f, "Authorization token is empty"),
            TokenError::Rejected => write!(f, "Authorization token rejected"),
        }
    }
}

impl std::error::Error for TokenError {}

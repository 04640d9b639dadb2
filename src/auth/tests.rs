use super::*;
use axum::http::HeaderMap;

#[cfg(test)]
mod extract_bearer_token_tests {
    use super::*;

    #[test]
    fn valid_bearer_token() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "authorization",
            "Bearer 550e8400-e29b-41d4-a716-446655440000"
                .parse()
                .unwrap(),
        );

        let result = extract_bearer_token(&headers);
        assert!(result.is_ok());
        assert_eq!(result.unwrap(), "550e8400-e29b-41d4-a716-446655440000");
    }

    #[test]
    fn valid_bearer_token_with_extra_whitespace() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "authorization",
            "Bearer   550e8400-e29b-41d4-a716-446655440000  "
                .parse()
                .unwrap(),
        );

        let result = extract_bearer_token(&headers);
        assert!(result.is_ok());
        assert_eq!(result.unwrap(), "550e8400-e29b-41d4-a716-446655440000");
    }

    #[test]
    fn case_insensitive_bearer() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "authorization",
            "bearer 550e8400-e29b-41d4-a716-446655440000"
                .parse()
                .unwrap(),
        );

        let result = extract_bearer_token(&headers);
        assert!(result.is_ok());
        assert_eq!(result.unwrap(), "550e8400-e29b-41d4-a716-446655440000");
    }

    #[test]
    fn missing_authorization_header() {
        let headers = HeaderMap::new();
        let result = extract_bearer_token(&headers);
        assert_eq!(result, Err(TokenError::Missing));
    }

    #[test]
    fn empty_authorization_header() {
        let mut headers = HeaderMap::new();
        headers.insert("authorization", "".parse().unwrap());

        let result = extract_bearer_token(&headers);
        assert_eq!(result, Err(TokenError::InvalidFormat));
    }

    #[test]
    fn missing_bearer_prefix() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "authorization",
            "550e8400-e29b-41d4-a716-446655440000".parse().unwrap(),
        );

        let result = extract_bearer_token(&headers);
        assert_eq!(result, Err(TokenError::InvalidFormat));
    }

    #[test]
    fn wrong_auth_scheme() {
        let mut headers = HeaderMap::new();
        headers.insert("authorization", "Basic dXNlcjpwYXNz".parse().unwrap());

        let result = extract_bearer_token(&headers);
        assert_eq!(result, Err(TokenError::InvalidFormat));
    }

    #[test]
    fn bearer_without_token() {
        let mut headers = HeaderMap::new();
        headers.insert("authorization", "Bearer".parse().unwrap());

        let result = extract_bearer_token(&headers);
        assert_eq!(result, Err(TokenError::InvalidFormat));
    }

    #[test]
    fn bearer_with_empty_token() {
        let mut headers = HeaderMap::new();
        headers.insert("authorization", "Bearer  ".parse().unwrap());

        let result = extract_bearer_token(&headers);
        assert_eq!(result, Err(TokenError::Empty));
    }
}

#[cfg(test)]
mod verify_admin_tests {
    use super::*;

    fn headers_with_bearer(token: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert("authorization", format!("Bearer {}", token).parse().unwrap());
        headers
    }

    #[test]
    fn matching_token_accepted() {
        let headers = headers_with_bearer("admin-secret");
        assert_eq!(verify_admin(&headers, Some("admin-secret")), Ok(()));
    }

    #[test]
    fn wrong_token_rejected() {
        let headers = headers_with_bearer("not-the-secret");
        assert_eq!(
            verify_admin(&headers, Some("admin-secret")),
            Err(TokenError::Rejected)
        );
    }

    #[test]
    fn missing_header_rejected() {
        let headers = HeaderMap::new();
        assert_eq!(
            verify_admin(&headers, Some("admin-secret")),
            Err(TokenError::Missing)
        );
    }

    #[test]
    fn unconfigured_admin_auth_is_open() {
        let headers = HeaderMap::new();
        assert_eq!(verify_admin(&headers, None), Ok(()));
    }
}

#[cfg(test)]
mod verify_service_tests {
    use super::*;

    #[test]
    fn matching_service_token_accepted() {
        let mut headers = HeaderMap::new();
        headers.insert("x-service-token", "svc-secret".parse().unwrap());
        assert_eq!(verify_service(&headers, Some("svc-secret")), Ok(()));
    }

    #[test]
    fn wrong_service_token_rejected() {
        let mut headers = HeaderMap::new();
        headers.insert("x-service-token", "guess".parse().unwrap());
        assert_eq!(
            verify_service(&headers, Some("svc-secret")),
            Err(TokenError::Rejected)
        );
    }

    #[test]
    fn missing_service_token_rejected() {
        let headers = HeaderMap::new();
        assert_eq!(
            verify_service(&headers, Some("svc-secret")),
            Err(TokenError::Missing)
        );
    }

    #[test]
    fn unconfigured_service_secret_fails_closed() {
        let mut headers = HeaderMap::new();
        headers.insert("x-service-token", "anything".parse().unwrap());
        assert_eq!(verify_service(&headers, None), Err(TokenError::Rejected));
    }
}

#[cfg(test)]
mod token_error_display_tests {
    use super::*;

    #[test]
    fn missing_error_message() {
        let error = TokenError::Missing;
        assert_eq!(error.to_string(), "Authorization token not provided");
    }

    #[test]
    fn invalid_format_error_message() {
        let error = TokenError::InvalidFormat;
        assert_eq!(error.to_string(), "Invalid authorization token format");
    }

    #[test]
    fn empty_error_message() {
        let error = TokenError::Empty;
        assert_eq!(error.to_string(), "Authorization token is empty");
    }

    #[test]
    fn rejected_error_message() {
        let error = TokenError::Rejected;
        assert_eq!(error.to_string(), "Authorization token rejected");
    }
}

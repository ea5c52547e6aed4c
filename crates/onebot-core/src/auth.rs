//! Bearer-token extraction shared by the HTTP and WS inbound handlers.
//!
//! Accepts a token either as an `Authorization: Bearer <token>` header or
//! (v11 only, for implementations that can't set headers) an
//! `access_token` query parameter.

/// Pulls a bearer token out of an `Authorization` header value.
///
/// Returns `None` if the header is absent, malformed, or uses a scheme
/// other than `Bearer`.
pub fn extract_bearer(header_value: Option<&str>) -> Option<&str> {
    let header_value = header_value?;
    let token = header_value.strip_prefix("Bearer ")?;
    let token = token.trim();
    if token.is_empty() {
        None
    } else {
        Some(token)
    }
}

/// Resolves the token presented by a request, preferring the
/// `Authorization` header over the `access_token` query parameter when
/// both are present.
pub fn resolve_token<'a>(
    header_value: Option<&'a str>,
    query_access_token: Option<&'a str>,
) -> Option<&'a str> {
    extract_bearer(header_value).or(query_access_token)
}

/// Checks a resolved token against the configured access token. A `None`
/// configured token means auth is disabled and any request (including one
/// with no token at all) is accepted.
pub fn check_access_token(configured: Option<&str>, presented: Option<&str>) -> bool {
    match configured {
        None => true,
        Some(expected) => presented == Some(expected),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_well_formed_bearer_header() {
        assert_eq!(extract_bearer(Some("Bearer abc123")), Some("abc123"));
    }

    #[test]
    fn rejects_other_schemes() {
        assert_eq!(extract_bearer(Some("Basic abc123")), None);
    }

    #[test]
    fn rejects_missing_header() {
        assert_eq!(extract_bearer(None), None);
    }

    #[test]
    fn query_param_used_only_as_fallback() {
        assert_eq!(
            resolve_token(Some("Bearer from-header"), Some("from-query")),
            Some("from-header")
        );
        assert_eq!(resolve_token(None, Some("from-query")), Some("from-query"));
    }

    #[test]
    fn no_configured_token_accepts_anything() {
        assert!(check_access_token(None, None));
        assert!(check_access_token(None, Some("whatever")));
    }

    #[test]
    fn configured_token_must_match_exactly() {
        assert!(check_access_token(Some("secret"), Some("secret")));
        assert!(!check_access_token(Some("secret"), Some("wrong")));
        assert!(!check_access_token(Some("secret"), None));
    }
}

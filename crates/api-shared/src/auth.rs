//! Bearer-token parsing shared by the API surface.
//!
//! Every OMR operation requires a caller credential; the transport carries it
//! as `Authorization: Bearer <token>`. This module only extracts the token —
//! resolving it to a principal is the core's job.

/// Errors produced while extracting a bearer token.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// No `Authorization` header was supplied
    #[error("error: missing credential")]
    Missing,
    /// The header was present but not a well-formed bearer token
    #[error("error: malformed credential")]
    Malformed,
}

/// Extracts the token from an `Authorization` header value.
///
/// Accepts `Bearer <token>` with a case-insensitive scheme. Returns the bare
/// token, or an error if the header is absent or malformed.
pub fn bearer_token(header: Option<&str>) -> Result<&str, AuthError> {
    let value = header.ok_or(AuthError::Missing)?;
    let mut parts = value.splitn(2, ' ');
    let scheme = parts.next().unwrap_or("");
    let token = parts.next().unwrap_or("").trim();
    if !scheme.eq_ignore_ascii_case("bearer") || token.is_empty() {
        return Err(AuthError::Malformed);
    }
    Ok(token)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bearer_token_extracts_token() {
        let token = bearer_token(Some("Bearer abc123")).expect("should extract token");
        assert_eq!(token, "abc123");
    }

    #[test]
    fn test_bearer_token_scheme_is_case_insensitive() {
        let token = bearer_token(Some("bearer abc123")).expect("should extract token");
        assert_eq!(token, "abc123");
    }

    #[test]
    fn test_bearer_token_rejects_missing_header() {
        let err = bearer_token(None).expect_err("missing header should fail");
        assert!(matches!(err, AuthError::Missing));
    }

    #[test]
    fn test_bearer_token_rejects_wrong_scheme() {
        let err = bearer_token(Some("Basic abc123")).expect_err("wrong scheme should fail");
        assert!(matches!(err, AuthError::Malformed));
    }

    #[test]
    fn test_bearer_token_rejects_empty_token() {
        let err = bearer_token(Some("Bearer   ")).expect_err("empty token should fail");
        assert!(matches!(err, AuthError::Malformed));
    }
}

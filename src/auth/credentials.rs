//! Credential extraction from the `Authorization` header.

use crate::config::BasicAuthConfig;
use crate::error::Rejection;
use axum::http::{header, HeaderMap};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Key for the comparison MACs below. It is not a secret; the MAC only gives
/// fixed-length inputs to a constant-time comparison.
const COMPARISON_KEY: &[u8] = b"social-gate/operator-credential";

/// Returns the token from a `Bearer <token>` header.
///
/// The header must split on single spaces into exactly two parts, the first being `Bearer`.
pub fn bearer_token(headers: &HeaderMap) -> Result<&str, Rejection> {
    let value = headers
        .get(header::AUTHORIZATION)
        .ok_or(Rejection::MissingCredential)?;
    let value = value.to_str().map_err(|_| Rejection::MalformedCredential)?;
    if value.is_empty() {
        return Err(Rejection::MissingCredential);
    }

    let parts: Vec<&str> = value.split(' ').collect();
    match parts.as_slice() {
        ["Bearer", token] if !token.is_empty() => Ok(token),
        _ => Err(Rejection::MalformedCredential),
    }
}

/// Decodes a `Basic <base64(user:pass)>` header. `None` if absent or malformed.
pub fn basic_credentials(headers: &HeaderMap) -> Option<(String, String)> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, encoded) = value.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("Basic") {
        return None;
    }

    let decoded = BASE64.decode(encoded.trim()).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (username, password) = decoded.split_once(':')?;
    Some((username.to_string(), password.to_string()))
}

/// The statically configured operator credential, held as MAC tags.
pub struct OperatorCredentials {
    username_tag: Vec<u8>,
    password_tag: Vec<u8>,
}

impl OperatorCredentials {
    pub fn new(config: &BasicAuthConfig) -> Self {
        Self {
            username_tag: comparison_tag(config.username.as_bytes()),
            password_tag: comparison_tag(config.password.as_bytes()),
        }
    }

    /// Compares both fields without short-circuiting on the first mismatch.
    pub fn matches(&self, username: &str, password: &str) -> bool {
        let username_ok = tag_matches(username.as_bytes(), &self.username_tag);
        let password_ok = tag_matches(password.as_bytes(), &self.password_tag);
        username_ok & password_ok
    }
}

fn comparison_tag(value: &[u8]) -> Vec<u8> {
    // HMAC accepts keys of any length, so this never yields an empty tag in practice.
    let Ok(mut mac) = HmacSha256::new_from_slice(COMPARISON_KEY) else {
        return Vec::new();
    };
    mac.update(value);
    mac.finalize().into_bytes().to_vec()
}

fn tag_matches(value: &[u8], tag: &[u8]) -> bool {
    let Ok(mut mac) = HmacSha256::new_from_slice(COMPARISON_KEY) else {
        return false;
    };
    mac.update(value);
    mac.verify_slice(tag).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_str(value).unwrap());
        headers
    }

    #[test]
    fn test_bearer_token_extracted() {
        assert_eq!(bearer_token(&headers("Bearer abc.def.ghi")), Ok("abc.def.ghi"));
    }

    #[test]
    fn test_missing_header_is_distinct() {
        assert_eq!(
            bearer_token(&HeaderMap::new()),
            Err(Rejection::MissingCredential)
        );
    }

    #[test]
    fn test_malformed_bearer_shapes() {
        for value in [
            "Bearer",
            "Bearer ",
            "bearer abc",
            "Token abc",
            "Bearer abc extra",
            "Bearer  abc",
            "Basic dXNlcjpwYXNz",
        ] {
            assert_eq!(
                bearer_token(&headers(value)),
                Err(Rejection::MalformedCredential),
                "{value:?} should be malformed"
            );
        }
    }

    #[test]
    fn test_basic_credentials_decoded() {
        let encoded = BASE64.encode("operator:s3cr:et");
        let parsed = basic_credentials(&headers(&format!("Basic {encoded}")));
        assert_eq!(
            parsed,
            Some(("operator".to_string(), "s3cr:et".to_string()))
        );
    }

    #[test]
    fn test_basic_credentials_rejects_garbage() {
        assert_eq!(basic_credentials(&HeaderMap::new()), None);
        assert_eq!(basic_credentials(&headers("Basic !!!")), None);
        assert_eq!(basic_credentials(&headers("Bearer abc")), None);
        let no_colon = BASE64.encode("operator");
        assert_eq!(basic_credentials(&headers(&format!("Basic {no_colon}"))), None);
    }

    #[test]
    fn test_operator_credentials_match() {
        let operator = OperatorCredentials::new(&BasicAuthConfig {
            username: "ops".to_string(),
            password: "hunter2".to_string(),
        });

        assert!(operator.matches("ops", "hunter2"));
        assert!(!operator.matches("ops", "hunter3"));
        assert!(!operator.matches("op", "hunter2"));
        assert!(!operator.matches("", ""));
    }
}

//! JWT Token Handler
//! Mission: Issue and verify HMAC-signed tokens bound to one issuer and audience

use crate::auth::models::Claims;
use crate::config::TokenConfig;
use crate::error::TokenError;
use crate::models::UserId;
use chrono::Utc;
use jsonwebtoken::{
    decode, encode, errors::ErrorKind, Algorithm, DecodingKey, EncodingKey, Header, Validation,
};
use serde::Deserialize;
use tracing::debug;

/// Issues and verifies signed, claim-bearing tokens.
pub trait TokenService: Send + Sync {
    fn issue(&self, claims: &Claims) -> Result<String, TokenError>;
    fn verify(&self, token: &str) -> Result<Claims, TokenError>;
}

/// HS256 implementation backed by `jsonwebtoken`.
pub struct JwtHandler {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
    config: TokenConfig,
}

#[derive(Deserialize)]
struct ExpiryOnly {
    exp: i64,
}

impl JwtHandler {
    pub fn new(config: TokenConfig) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        // Any HMAC variant is acceptable; asymmetric algorithms are not.
        validation.algorithms = vec![Algorithm::HS256, Algorithm::HS384, Algorithm::HS512];
        validation.set_issuer(&[config.issuer.as_str()]);
        validation.set_audience(&[config.audience.as_str()]);
        // `sub` is numeric, which jsonwebtoken's presence check does not accept;
        // deserializing `Claims` already requires it.
        validation.set_required_spec_claims(&["iss", "aud", "exp", "nbf"]);
        validation.validate_nbf = true;
        validation.leeway = 0;

        Self {
            encoding_key: EncodingKey::from_secret(config.secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(config.secret.as_bytes()),
            validation,
            config,
        }
    }

    /// Standard claims for `user_id`, valid from now until the configured expiry.
    pub fn claims_for(&self, user_id: UserId) -> Claims {
        Claims::issued_now(user_id, &self.config)
    }

    /// Reads `exp` without checking the signature. Only used to classify a failure.
    fn unverified_expiry(&self, token: &str) -> Option<i64> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.insecure_disable_signature_validation();
        validation.validate_exp = false;
        validation.validate_nbf = false;
        validation.validate_aud = false;
        validation.required_spec_claims.clear();

        decode::<ExpiryOnly>(token, &DecodingKey::from_secret(&[]), &validation)
            .ok()
            .map(|data| data.claims.exp)
    }
}

impl TokenService for JwtHandler {
    fn issue(&self, claims: &Claims) -> Result<String, TokenError> {
        debug!(sub = claims.sub, exp = claims.exp, "Issuing JWT");

        encode(&Header::new(Algorithm::HS256), claims, &self.encoding_key)
            .map_err(|e| TokenError::Serialization(e.to_string()))
    }

    fn verify(&self, token: &str) -> Result<Claims, TokenError> {
        match decode::<Claims>(token, &self.decoding_key, &self.validation) {
            Ok(decoded) => {
                debug!(sub = decoded.claims.sub, "Validated JWT");
                Ok(decoded.claims)
            }
            Err(e) => Err(match e.kind() {
                ErrorKind::ExpiredSignature => TokenError::ExpiredToken,
                // A lapsed token is reported as expired whatever its signature.
                ErrorKind::InvalidSignature => match self.unverified_expiry(token) {
                    Some(exp) if exp <= Utc::now().timestamp() => TokenError::ExpiredToken,
                    _ => TokenError::SignatureMismatch,
                },
                _ => TokenError::InvalidToken,
            }),
        }
    }
}

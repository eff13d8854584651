//! Authentication Models
//! Mission: Token claims and the token endpoint's request/response bodies

use crate::config::TokenConfig;
use crate::models::UserId;
use chrono::Utc;
use serde::{Deserialize, Serialize};

/// JWT Claims payload. Registered claim names only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    pub sub: UserId, // subject (user id)
    pub iss: String,
    pub aud: String,
    pub iat: i64,
    pub nbf: i64,
    pub exp: i64,
}

impl Claims {
    /// Claims for `sub`, valid from now until the configured expiry.
    pub fn issued_now(sub: UserId, config: &TokenConfig) -> Self {
        let now = Utc::now().timestamp();
        Self {
            sub,
            iss: config.issuer.clone(),
            aud: config.audience.clone(),
            iat: now,
            nbf: now,
            exp: now + config.expiry.as_secs() as i64,
        }
    }
}

/// Token request body
#[derive(Debug, Deserialize)]
pub struct CreateTokenRequest {
    pub email: String,
    pub password: String,
}

/// Token response
#[derive(Debug, Serialize)]
pub struct TokenResponse {
    pub token: String,
}

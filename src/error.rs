//! Error types for the stores, the identity cache, the token service,
//! and the per-request `Rejection` returned to callers.

use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::time::Duration;
use thiserror::Error;

/// Failures of the persistent store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("resource not found")]
    NotFound,
    #[error("store query timed out")]
    Timeout,
    #[error("store connection pool closed")]
    PoolClosed,
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("store task failed: {0}")]
    Task(String),
}

/// Failures of the identity cache. `Miss` is an expected outcome, not a fault.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache miss")]
    Miss,
    #[error("cache unavailable: {0}")]
    Unavailable(String),
    #[error("cache entry could not be (de)serialized: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Token issuance and verification failures.
#[derive(Debug, Error)]
pub enum TokenError {
    #[error("invalid token")]
    InvalidToken,
    #[error("token has expired")]
    ExpiredToken,
    #[error("token signature mismatch")]
    SignatureMismatch,
    #[error("failed to sign token: {0}")]
    Serialization(String),
}

/// Why a request was turned away. Every variant is terminal for the request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    /// No `Authorization` header on a bearer-protected route.
    MissingCredential,
    /// `Authorization` present but not `Bearer <token>`.
    MalformedCredential,
    /// Bad, expired or unverifiable token, or an unknown subject. Deliberately indistinguishable.
    Unauthorized,
    /// Operator credential mismatch; the response carries a Basic challenge.
    UnauthorizedBasic,
    /// Authenticated but not the owner and below the required role level.
    Forbidden { required_role: String },
    RateLimited { retry_after: Duration },
    /// A configured role is missing from the store. Operational, so it surfaces as a 500.
    NotFound,
    /// A resource addressed by the request does not exist.
    ResourceNotFound,
    BadRequest(String),
    Internal,
}

pub const BASIC_CHALLENGE: &str = r#"Basic realm="Restricted", charset="UTF-8""#;

impl Rejection {
    pub fn status(&self) -> StatusCode {
        match self {
            Rejection::MissingCredential
            | Rejection::MalformedCredential
            | Rejection::Unauthorized
            | Rejection::UnauthorizedBasic => StatusCode::UNAUTHORIZED,
            Rejection::Forbidden { .. } => StatusCode::FORBIDDEN,
            Rejection::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            Rejection::ResourceNotFound => StatusCode::NOT_FOUND,
            Rejection::BadRequest(_) => StatusCode::BAD_REQUEST,
            Rejection::NotFound | Rejection::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn message(&self) -> String {
        match self {
            Rejection::MissingCredential => "authorization header is required".to_string(),
            Rejection::MalformedCredential => "invalid authorization header format".to_string(),
            Rejection::Unauthorized | Rejection::UnauthorizedBasic => "unauthorized".to_string(),
            Rejection::Forbidden { required_role } => format!(
                "access is allowed only for the owner or users with the {} role",
                required_role
            ),
            Rejection::RateLimited { .. } => "rate limit exceeded".to_string(),
            Rejection::ResourceNotFound => "resource not found".to_string(),
            Rejection::BadRequest(msg) => msg.clone(),
            Rejection::NotFound | Rejection::Internal => {
                "the server encountered a problem".to_string()
            }
        }
    }

    /// Short tag used in log fields.
    pub fn reason(&self) -> &'static str {
        match self {
            Rejection::MissingCredential => "missing_credential",
            Rejection::MalformedCredential => "malformed_credential",
            Rejection::Unauthorized => "unauthorized",
            Rejection::UnauthorizedBasic => "unauthorized_basic",
            Rejection::Forbidden { .. } => "forbidden",
            Rejection::RateLimited { .. } => "rate_limited",
            Rejection::NotFound => "role_not_found",
            Rejection::ResourceNotFound => "resource_not_found",
            Rejection::BadRequest(_) => "bad_request",
            Rejection::Internal => "internal",
        }
    }
}

/// Whole seconds until retry, rounded up and never zero.
pub fn retry_after_secs(retry_after: Duration) -> u64 {
    let secs = retry_after.as_secs() + u64::from(retry_after.subsec_nanos() > 0);
    secs.max(1)
}

impl IntoResponse for Rejection {
    fn into_response(self) -> Response {
        let mut response = (self.status(), Json(json!({ "error": self.message() }))).into_response();

        match &self {
            Rejection::UnauthorizedBasic => {
                response.headers_mut().insert(
                    header::WWW_AUTHENTICATE,
                    HeaderValue::from_static(BASIC_CHALLENGE),
                );
            }
            Rejection::RateLimited { retry_after } => {
                response
                    .headers_mut()
                    .insert(header::RETRY_AFTER, HeaderValue::from(retry_after_secs(*retry_after)));
            }
            _ => {}
        }

        response
    }
}

//! Authentication Middleware
//! Mission: Run the auth pipeline per request and hand handlers a typed caller

use crate::api::AppState;
use crate::error::Rejection;
use crate::models::User;
use axum::{
    async_trait,
    extract::{FromRequestParts, Request, State},
    http::request::Parts,
    middleware::Next,
    response::Response,
};
use tracing::{error, warn};

/// The authenticated caller, attached by [`auth_middleware`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CurrentUser(pub User);

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for CurrentUser {
    type Rejection = Rejection;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts.extensions.get::<CurrentUser>().cloned().ok_or_else(|| {
            // A route using this extractor is missing its auth layer.
            error!(path = %parts.uri.path(), "CurrentUser requested without auth middleware");
            Rejection::Internal
        })
    }
}

/// Bearer auth: verifies the token, resolves the caller, and stores it in the
/// request extensions.
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, Rejection> {
    let user = state
        .pipeline
        .authenticate_bearer(req.headers())
        .await
        .map_err(|rejection| log_rejection(&req, rejection))?;

    req.extensions_mut().insert(CurrentUser(user));
    Ok(next.run(req).await)
}

/// Basic auth against the configured operator credential.
pub async fn basic_auth_middleware(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Result<Response, Rejection> {
    state
        .pipeline
        .authenticate_operator(req.headers())
        .map_err(|rejection| log_rejection(&req, rejection))?;

    Ok(next.run(req).await)
}

fn log_rejection(req: &Request, rejection: Rejection) -> Rejection {
    warn!(
        reason = rejection.reason(),
        method = %req.method(),
        path = %req.uri().path(),
        "Request rejected"
    );
    rejection
}

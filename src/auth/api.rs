//! Authentication API Endpoints
//! Mission: Exchange an email and password for a signed token

use crate::api::AppState;
use crate::auth::models::{Claims, CreateTokenRequest, TokenResponse};
use crate::error::{Rejection, StoreError};
use axum::{extract::State, http::StatusCode, Json};
use tracing::{error, info, warn};

/// `POST /v1/authentication/token`
///
/// Unknown email and wrong password are both `Unauthorized`.
pub async fn create_token(
    State(state): State<AppState>,
    Json(payload): Json<CreateTokenRequest>,
) -> Result<(StatusCode, Json<TokenResponse>), Rejection> {
    let credentials = match state.users.get_credentials_by_email(&payload.email).await {
        Ok(credentials) => credentials,
        Err(StoreError::NotFound) => {
            warn!("Token requested for unknown email");
            return Err(Rejection::Unauthorized);
        }
        Err(e) => {
            error!(error = %e, "Failed to load credentials");
            return Err(Rejection::Internal);
        }
    };

    // bcrypt is CPU-bound.
    let password = payload.password;
    let hash = credentials.password_hash;
    let valid = tokio::task::spawn_blocking(move || bcrypt::verify(password, &hash))
        .await
        .map_err(|e| {
            error!(error = %e, "Password check task failed");
            Rejection::Internal
        })?
        .unwrap_or(false);

    if !valid {
        warn!(user_id = credentials.user.id, "Failed token request");
        return Err(Rejection::Unauthorized);
    }

    let claims = Claims::issued_now(credentials.user.id, &state.token_config);
    let token = state.pipeline.tokens().issue(&claims).map_err(|e| {
        error!(error = %e, "Failed to issue token");
        Rejection::Internal
    })?;

    info!(user_id = credentials.user.id, exp = claims.exp, "Token issued");
    Ok((StatusCode::CREATED, Json(TokenResponse { token })))
}

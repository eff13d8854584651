//! HTTP surface: shared state, the `/v1` route table, and its handlers.

pub mod posts;
pub mod users;

use crate::auth::{api as auth_api, auth_middleware, basic_auth_middleware, AuthPipeline};
use crate::config::TokenConfig;
use crate::error::{Rejection, StoreError};
use crate::middleware::{rate_limit_middleware, request_logging};
use crate::models::Envelope;
use crate::store::{PostStore, UserStore};
use axum::{
    extract::State,
    middleware,
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tower_http::{cors::CorsLayer, timeout::TimeoutLayer, trace::TraceLayer};
use tracing::error;

pub const MODERATOR_ROLE: &str = "moderator";
pub const ADMIN_ROLE: &str = "admin";

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<AuthPipeline>,
    pub users: Arc<dyn UserStore>,
    pub posts: Arc<dyn PostStore>,
    pub token_config: TokenConfig,
    pub env: String,
}

/// Build the `/v1` router.
///
/// Every route is rate limited first. Operator routes then require Basic
/// auth, user routes a bearer token.
pub fn router(state: AppState, request_timeout: Duration) -> Router {
    let operator_routes = Router::new()
        .route("/v1/health", get(health_check))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            basic_auth_middleware,
        ));

    let protected_routes = Router::new()
        .route("/v1/users/me", get(users::current_user))
        .route("/v1/users/:id", get(users::get_user))
        .route(
            "/v1/posts/:id",
            get(posts::get_post)
                .patch(posts::update_post)
                .delete(posts::delete_post),
        )
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ));

    let public_routes =
        Router::new().route("/v1/authentication/token", post(auth_api::create_token));

    Router::new()
        .merge(operator_routes)
        .merge(protected_routes)
        .merge(public_routes)
        .layer(middleware::from_fn_with_state(
            state.clone(),
            rate_limit_middleware,
        ))
        .layer(middleware::from_fn(request_logging))
        .layer(TimeoutLayer::new(request_timeout))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub env: String,
    pub version: &'static str,
}

/// Health check endpoint
async fn health_check(State(state): State<AppState>) -> Json<Envelope<HealthResponse>> {
    Json(Envelope::new(HealthResponse {
        status: "ok",
        env: state.env.clone(),
        version: env!("CARGO_PKG_VERSION"),
    }))
}

/// Path ids are positive integers.
pub(crate) fn parse_id(raw: &str) -> Result<i64, Rejection> {
    match raw.parse::<i64>() {
        Ok(id) if id > 0 => Ok(id),
        _ => Err(Rejection::BadRequest(format!("invalid id: {}", raw))),
    }
}

/// Maps a failed lookup of an addressed resource.
pub(crate) fn resource_error(e: StoreError) -> Rejection {
    match e {
        StoreError::NotFound => Rejection::ResourceNotFound,
        other => {
            error!(error = %other, "Store request failed");
            Rejection::Internal
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_id() {
        assert_eq!(parse_id("42"), Ok(42));
        assert!(matches!(parse_id("abc"), Err(Rejection::BadRequest(_))));
        assert!(matches!(parse_id("0"), Err(Rejection::BadRequest(_))));
        assert!(matches!(parse_id("-3"), Err(Rejection::BadRequest(_))));
    }

    #[test]
    fn test_resource_error_mapping() {
        assert_eq!(resource_error(StoreError::NotFound), Rejection::ResourceNotFound);
        assert_eq!(resource_error(StoreError::Timeout), Rejection::Internal);
    }
}

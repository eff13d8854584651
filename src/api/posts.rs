use super::{parse_id, resource_error, AppState, ADMIN_ROLE, MODERATOR_ROLE};
use crate::auth::{CurrentUser, Guard};
use crate::error::Rejection;
use crate::models::{Envelope, Post};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use serde::Deserialize;
use tracing::info;

const MAX_TITLE_LEN: usize = 100;
const MAX_CONTENT_LEN: usize = 10_000;

/// Partial update; absent fields are left unchanged.
#[derive(Debug, Deserialize)]
pub struct UpdatePostPayload {
    pub title: Option<String>,
    pub content: Option<String>,
}

impl UpdatePostPayload {
    fn validate(&self) -> Result<(), Rejection> {
        if let Some(title) = &self.title {
            if title.is_empty() || title.chars().count() > MAX_TITLE_LEN {
                return Err(Rejection::BadRequest(format!(
                    "title must be between 1 and {} characters",
                    MAX_TITLE_LEN
                )));
            }
        }
        if let Some(content) = &self.content {
            if content.is_empty() || content.chars().count() > MAX_CONTENT_LEN {
                return Err(Rejection::BadRequest(format!(
                    "content must be between 1 and {} characters",
                    MAX_CONTENT_LEN
                )));
            }
        }
        Ok(())
    }
}

async fn load_post(state: &AppState, raw_id: &str) -> Result<Post, Rejection> {
    let id = parse_id(raw_id)?;
    state.posts.get_post(id).await.map_err(resource_error)
}

/// `GET /v1/posts/:id`
pub async fn get_post(
    State(state): State<AppState>,
    Path(raw_id): Path<String>,
) -> Result<Json<Envelope<Post>>, Rejection> {
    let post = load_post(&state, &raw_id).await?;
    Ok(Json(Envelope::new(post)))
}

/// `PATCH /v1/posts/:id`, for the owner or a moderator.
pub async fn update_post(
    State(state): State<AppState>,
    CurrentUser(caller): CurrentUser,
    Path(raw_id): Path<String>,
    Json(payload): Json<UpdatePostPayload>,
) -> Result<Json<Envelope<Post>>, Rejection> {
    payload.validate()?;
    let mut post = load_post(&state, &raw_id).await?;

    state
        .pipeline
        .enforce(
            &caller,
            Guard::OwnershipOrRole {
                owner_id: post.user_id,
                required_role: MODERATOR_ROLE,
            },
        )
        .await?;

    if let Some(title) = payload.title {
        post.title = title;
    }
    if let Some(content) = payload.content {
        post.content = content;
    }
    post.updated_at = Utc::now();

    let updated = state.posts.update_post(&post).await.map_err(resource_error)?;
    info!(post_id = updated.id, user_id = caller.id, version = updated.version, "Post updated");
    Ok(Json(Envelope::new(updated)))
}

/// `DELETE /v1/posts/:id`, for the owner or an admin.
pub async fn delete_post(
    State(state): State<AppState>,
    CurrentUser(caller): CurrentUser,
    Path(raw_id): Path<String>,
) -> Result<StatusCode, Rejection> {
    let post = load_post(&state, &raw_id).await?;

    state
        .pipeline
        .enforce(
            &caller,
            Guard::OwnershipOrRole {
                owner_id: post.user_id,
                required_role: ADMIN_ROLE,
            },
        )
        .await?;

    state.posts.delete_post(post.id).await.map_err(resource_error)?;
    info!(post_id = post.id, user_id = caller.id, "Post deleted");
    Ok(StatusCode::NO_CONTENT)
}

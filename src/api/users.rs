use super::{parse_id, resource_error, AppState, MODERATOR_ROLE};
use crate::auth::{CurrentUser, Guard};
use crate::error::Rejection;
use crate::models::{Envelope, User};
use axum::{
    extract::{Path, State},
    Json,
};

/// `GET /v1/users/me`
pub async fn current_user(CurrentUser(caller): CurrentUser) -> Json<Envelope<User>> {
    Json(Envelope::new(caller))
}

/// `GET /v1/users/:id`, for the user themself or a moderator.
///
/// The guard runs before the lookup, so a caller without the role cannot
/// discover which ids exist.
pub async fn get_user(
    State(state): State<AppState>,
    CurrentUser(caller): CurrentUser,
    Path(raw_id): Path<String>,
) -> Result<Json<Envelope<User>>, Rejection> {
    let id = parse_id(&raw_id)?;

    state
        .pipeline
        .enforce(
            &caller,
            Guard::SelfOrRole {
                target_id: id,
                required_role: MODERATOR_ROLE,
            },
        )
        .await?;

    if id == caller.id {
        return Ok(Json(Envelope::new(caller)));
    }

    let user = state.users.get_by_id(id).await.map_err(resource_error)?;
    Ok(Json(Envelope::new(user)))
}

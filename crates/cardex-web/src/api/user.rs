use axum::extract::State;
use axum::Json;

use crate::auth::middleware::AuthUser;
use crate::dto::{ProfileResponse, SessionDto, UserDto};
use crate::error::AppError;
use crate::state::AppState;

pub async fn profile(
    AuthUser(claims): AuthUser,
    State(state): State<AppState>,
) -> Result<Json<ProfileResponse>, AppError> {
    let user = state
        .users
        .find_by_id(claims.subject_id())
        .ok_or_else(|| AppError::NotFound("User not found".to_string()))?;

    Ok(Json(ProfileResponse {
        session: SessionDto {
            user_id: claims.subject_id().to_string(),
            email: claims.email().to_string(),
            user_type: claims.account_tier().to_string(),
            expires_at: claims.expires_at(),
        },
        user: UserDto::from(&user),
    }))
}

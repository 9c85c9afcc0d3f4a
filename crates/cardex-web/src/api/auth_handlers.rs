use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;

use crate::auth::password;
use crate::auth::users::{normalize_email, UserRecord};
use crate::dto::*;
use crate::error::AppError;
use crate::state::AppState;

/// Unwraps a JSON body. Oversized bodies and a wrong content type keep their
/// 413 and 415 statuses; every other rejection is a 400.
fn body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, AppError> {
    payload
        .map(|Json(value)| value)
        .map_err(|rejection| match rejection.status() {
            StatusCode::PAYLOAD_TOO_LARGE => AppError::PayloadTooLarge,
            StatusCode::UNSUPPORTED_MEDIA_TYPE => AppError::UnsupportedMediaType,
            _ => AppError::BadRequest("Invalid request body".to_string()),
        })
}

fn issue_for(state: &AppState, user: &UserRecord) -> Result<Json<AuthResponse>, AppError> {
    let (token, claims) = state.codec().issue(&user.identity(), state.clock.now())?;
    Ok(Json(AuthResponse {
        token,
        expires_at: claims.expires_at(),
        user: UserDto::from(user),
    }))
}

pub async fn register(
    State(state): State<AppState>,
    payload: Result<Json<RegisterRequest>, JsonRejection>,
) -> Result<Json<AuthResponse>, AppError> {
    let req = body(payload)?;
    let email = normalize_email(&req.email);
    if email.is_empty() || req.password.is_empty() {
        return Err(AppError::BadRequest(
            "Email and password are required".to_string(),
        ));
    }

    if state.users.contains(&email) {
        return Err(AppError::Conflict("User already exists".to_string()));
    }

    let password = req.password;
    let password_hash = tokio::task::spawn_blocking(move || password::hash_password(&password))
        .await
        .map_err(|e| AppError::Internal(e.to_string()))??;

    let user = UserRecord::new(
        email,
        password_hash,
        req.first_name,
        req.last_name,
        state.clock.now(),
    );
    // A concurrent registration may have won while we were hashing.
    state.users.insert(user.clone())?;

    tracing::info!("User registered: {} ({})", user.email, user.id);
    issue_for(&state, &user)
}

pub async fn login(
    State(state): State<AppState>,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> Result<Json<AuthResponse>, AppError> {
    let req = body(payload)?;
    let email = normalize_email(&req.email);

    let user = state.users.find(&email);
    let hash = user.as_ref().map(|u| u.password_hash.clone());
    let password = req.password;
    let verdict = tokio::task::spawn_blocking(move || {
        let hash = hash.as_deref().unwrap_or_else(|| password::dummy_hash());
        password::verify_password(hash, &password)
    })
    .await
    .map_err(|e| AppError::Internal(e.to_string()))?;

    let user = match (user, verdict) {
        (Some(user), Ok(true)) => user,
        (Some(_), Err(e)) => return Err(e.into()),
        _ => {
            tracing::warn!("Failed login attempt for user: {email}");
            return Err(AppError::Auth("Invalid credentials".to_string()));
        }
    };

    let user = state
        .users
        .record_login(&email, state.clock.now())
        .unwrap_or(user);

    tracing::info!("User logged in: {}", user.email);
    issue_for(&state, &user)
}

/// Logout is advisory: tokens cannot be revoked, so the client simply
/// discards its copy.
pub async fn logout() -> Json<MessageResponse> {
    Json(MessageResponse {
        success: true,
        message: "Logged out successfully".to_string(),
    })
}

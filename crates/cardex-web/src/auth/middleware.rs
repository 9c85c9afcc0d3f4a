use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use cardex_core::Claims;

use crate::error::AppError;

/// The verified identity of the caller.
///
/// Only available on routes behind the protected gate, which inserts the
/// [`Claims`] it recovered into the request extensions.
pub struct AuthUser(pub Claims);

impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<Claims>()
            .cloned()
            .map(AuthUser)
            .ok_or_else(|| AppError::Auth("Authentication required".to_string()))
    }
}

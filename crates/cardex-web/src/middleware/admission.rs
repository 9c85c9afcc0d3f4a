use std::net::SocketAddr;

use axum::extract::{ConnectInfo, Request, State};
use axum::http::header::AUTHORIZATION;
use axum::http::HeaderMap;
use axum::middleware::Next;
use axum::response::Response;
use cardex_core::{client_key, RequestMeta, RouteAccess};
use tracing::Span;

use crate::error::AppError;
use crate::state::AppState;

/// Rate limiting only.
pub async fn public_gate(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    admit(&state, request, next, RouteAccess::Public).await
}

/// Rate limiting, then bearer-token verification. Verified claims are
/// inserted into the request extensions for [`crate::auth::middleware::AuthUser`].
pub async fn protected_gate(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    admit(&state, request, next, RouteAccess::Protected).await
}

async fn admit(
    state: &AppState,
    mut request: Request,
    next: Next,
    access: RouteAccess,
) -> Result<Response, AppError> {
    let admission = state.gate.admit(&request_meta(&request), access)?;

    if let Some(claims) = admission.claims {
        request.extensions_mut().insert(claims);
    }

    Ok(next.run(request).await)
}

/// The parts of `request` the gate looks at.
pub fn request_meta<B>(request: &axum::http::Request<B>) -> RequestMeta<'_> {
    let headers = request.headers();
    RequestMeta {
        forwarded_for: header_str(headers, "x-forwarded-for"),
        real_ip: header_str(headers, "x-real-ip"),
        peer: request
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|info| info.0),
        authorization: header_str(headers, AUTHORIZATION.as_str()),
    }
}

/// Per-request trace span, tagged with the same client key the rate limiter uses.
pub fn request_span(request: &Request) -> Span {
    let client = client_key(&request_meta(request));
    tracing::info_span!(
        "request",
        method = %request.method(),
        uri = %request.uri(),
        client = %client,
    )
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

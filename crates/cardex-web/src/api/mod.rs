mod auth_handlers;
mod user;

use axum::extract::State;
use axum::middleware::from_fn_with_state;
use axum::routing::{get, post};
use axum::Json;
use axum::Router;
use cardex_core::unix_seconds;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

use crate::dto::HealthResponse;
use crate::middleware::admission::{protected_gate, public_gate, request_span};
use crate::middleware::cors::cors_layer;
use crate::middleware::security_headers::security_headers;
use crate::state::AppState;

pub fn auth_router() -> Router<AppState> {
    Router::new()
        .route("/auth/register", post(auth_handlers::register))
        .route("/auth/login", post(auth_handlers::login))
        .route("/auth/logout", post(auth_handlers::logout))
}

pub fn protected_router() -> Router<AppState> {
    Router::new().route("/user/profile", get(user::profile))
}

/// The full application: `/health` ungated, `/api/*` behind the public gate
/// and `/api/protected/*` behind the protected gate. Both gates share one
/// rate limiter, so a client's budget covers every API route.
pub fn app(state: AppState) -> Router {
    let hsts = state.config.tls_enabled();
    let cors = cors_layer(&state.config.cors);

    let public = auth_router().route_layer(from_fn_with_state(state.clone(), public_gate));
    let protected =
        protected_router().route_layer(from_fn_with_state(state.clone(), protected_gate));

    Router::new()
        .route("/health", get(health))
        .nest("/api", public.nest("/protected", protected))
        .layer(from_fn_with_state(hsts, security_headers))
        .layer(RequestBodyLimitLayer::new(1024 * 1024))
        .layer(cors)
        .layer(TraceLayer::new_for_http().make_span_with(request_span))
        .with_state(state)
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        timestamp: unix_seconds(state.clock.now()),
        version: env!("CARGO_PKG_VERSION"),
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use axum::body::Body;
    use axum::http::{HeaderMap, Request, StatusCode};
    use cardex_core::ManualClock;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use super::*;
    use crate::config::ServerConfig;

    const T0: u64 = 1_700_000_000;

    fn test_app(capacity: u32) -> (Router, Arc<ManualClock>) {
        let mut config = ServerConfig::default();
        config.auth.jwt_secret = "router-test-secret-0123456789abcdef".to_string();
        config.rate_limit.requests = capacity;
        let clock = Arc::new(ManualClock::at_unix(T0));
        let state = AppState::new(config, clock.clone()).unwrap();
        (app(state), clock)
    }

    async fn send(app: &Router, request: Request<Body>) -> (StatusCode, HeaderMap, Value) {
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, headers, body)
    }

    fn post_json(uri: &str, ip: &str, body: Value) -> Request<Body> {
        Request::post(uri)
            .header("content-type", "application/json")
            .header("x-forwarded-for", ip)
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn get_with(uri: &str, ip: &str, authorization: Option<&str>) -> Request<Body> {
        let mut builder = Request::get(uri).header("x-forwarded-for", ip);
        if let Some(value) = authorization {
            builder = builder.header("authorization", value);
        }
        builder.body(Body::empty()).unwrap()
    }

    fn registration(email: &str, password: &str) -> Value {
        json!({
            "email": email,
            "password": password,
            "firstName": "Misty",
            "lastName": "Waterflower",
        })
    }

    #[tokio::test]
    async fn health_is_ungated_and_has_security_headers() {
        let (app, _) = test_app(1);
        for _ in 0..3 {
            let (status, headers, body) = send(&app, get_with("/health", "1.1.1.1", None)).await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(body["status"], "healthy");
            assert_eq!(body["timestamp"], T0 as i64);
            assert_eq!(headers["x-frame-options"], "DENY");
            assert_eq!(headers["x-content-type-options"], "nosniff");
            assert!(headers.get("strict-transport-security").is_none());
        }
    }

    #[tokio::test]
    async fn register_login_then_profile() {
        let (app, _) = test_app(100);
        let ip = "203.0.113.5";

        let (status, _, body) = send(
            &app,
            post_json(
                "/api/auth/register",
                ip,
                registration(" Misty@Example.com", "starmie-42"),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["user"]["email"], "misty@example.com");
        assert_eq!(body["user"]["user_type"], "free");
        assert_eq!(body["expires_at"], (T0 + 86_400) as i64);
        assert!(body["user"].get("password_hash").is_none());

        let (status, _, body) = send(
            &app,
            post_json(
                "/api/auth/login",
                ip,
                json!({ "email": "misty@example.com", "password": "starmie-42" }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["user"]["last_login_at"], T0 as i64);
        let token = body["token"].as_str().unwrap().to_string();

        let bearer = format!("Bearer {token}");
        let (status, _, body) = send(
            &app,
            get_with("/api/protected/user/profile", ip, Some(&bearer)),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["session"]["email"], "misty@example.com");
        assert_eq!(body["session"]["user_type"], "free");
        assert_eq!(body["session"]["user_id"], body["user"]["id"]);
    }

    #[tokio::test]
    async fn duplicate_registration_conflicts() {
        let (app, _) = test_app(100);
        let req = || post_json("/api/auth/register", "10.0.0.1", registration("a@b.c", "pw"));

        let (status, _, _) = send(&app, req()).await;
        assert_eq!(status, StatusCode::OK);
        let (status, _, body) = send(&app, req()).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["code"], "conflict");
    }

    #[tokio::test]
    async fn malformed_and_incomplete_bodies_are_bad_requests() {
        let (app, _) = test_app(100);

        let request = Request::post("/api/auth/register")
            .header("content-type", "application/json")
            .body(Body::from("{not json"))
            .unwrap();
        let (status, _, body) = send(&app, request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "bad_request");

        let (status, _, _) = send(
            &app,
            post_json("/api/auth/register", "10.0.0.2", registration("  ", "pw")),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn oversized_or_untyped_bodies_keep_their_status() {
        let (app, _) = test_app(100);

        let request = Request::post("/api/auth/login")
            .header("x-forwarded-for", "10.0.0.6")
            .body(Body::from(
                json!({ "email": "a@b.c", "password": "x" }).to_string(),
            ))
            .unwrap();
        let (status, _, body) = send(&app, request).await;
        assert_eq!(status, StatusCode::UNSUPPORTED_MEDIA_TYPE);
        assert_eq!(body["code"], "unsupported_media_type");

        let oversized = format!(
            r#"{{"email":"a@b.c","password":"{}"}}"#,
            "x".repeat(1024 * 1024)
        );
        let request = Request::post("/api/auth/login")
            .header("content-type", "application/json")
            .header("x-forwarded-for", "10.0.0.6")
            .body(Body::from(oversized))
            .unwrap();
        let (status, _, body) = send(&app, request).await;
        assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(body["code"], "payload_too_large");
    }

    #[tokio::test]
    async fn wrong_password_and_unknown_user_are_unauthenticated() {
        let (app, _) = test_app(100);
        send(
            &app,
            post_json("/api/auth/register", "10.0.0.3", registration("b@b.c", "right")),
        )
        .await;

        for creds in [
            json!({ "email": "b@b.c", "password": "wrong" }),
            json!({ "email": "nobody@b.c", "password": "right" }),
        ] {
            let (status, _, body) =
                send(&app, post_json("/api/auth/login", "10.0.0.3", creds)).await;
            assert_eq!(status, StatusCode::UNAUTHORIZED);
            assert_eq!(body["error"], "Invalid credentials");
        }
    }

    #[tokio::test]
    async fn protected_route_rejects_missing_or_malformed_credentials() {
        let (app, _) = test_app(100);
        for auth in [None, Some("Token abc"), Some("Bearer "), Some("Bearer a.b.c")] {
            let (status, _, body) =
                send(&app, get_with("/api/protected/user/profile", "10.0.0.4", auth)).await;
            assert_eq!(status, StatusCode::UNAUTHORIZED, "auth {auth:?}");
            assert_eq!(body["code"], "unauthenticated");
        }
    }

    #[tokio::test]
    async fn expired_token_is_rejected() {
        let (app, clock) = test_app(100);
        let (_, _, body) = send(
            &app,
            post_json("/api/auth/register", "10.0.0.5", registration("c@b.c", "pw")),
        )
        .await;
        let bearer = format!("Bearer {}", body["token"].as_str().unwrap());

        clock.advance(Duration::from_secs(86_401));
        let (status, _, _) = send(
            &app,
            get_with("/api/protected/user/profile", "10.0.0.5", Some(&bearer)),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn rate_limit_returns_429_per_client() {
        let (app, _) = test_app(2);
        let logout = |ip: &str| post_json("/api/auth/logout", ip, json!({}));

        for _ in 0..2 {
            let (status, _, body) = send(&app, logout("198.51.100.1")).await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(body["success"], true);
        }
        let (status, headers, body) = send(&app, logout("198.51.100.1")).await;
        assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(body["code"], "rate_limited");
        assert_eq!(headers["x-frame-options"], "DENY");

        let (status, _, _) = send(&app, logout("198.51.100.2")).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn throttling_precedes_authentication() {
        let (app, _) = test_app(1);
        let req = || get_with("/api/protected/user/profile", "192.0.2.1", None);

        let (status, _, _) = send(&app, req()).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        let (status, _, body) = send(&app, req()).await;
        assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(body["code"], "rate_limited");
    }

    #[tokio::test]
    async fn budget_refills_after_window() {
        let (app, clock) = test_app(1);
        let logout = || post_json("/api/auth/logout", "192.0.2.9", json!({}));

        assert_eq!(send(&app, logout()).await.0, StatusCode::OK);
        assert_eq!(send(&app, logout()).await.0, StatusCode::TOO_MANY_REQUESTS);
        clock.advance(Duration::from_secs(60));
        assert_eq!(send(&app, logout()).await.0, StatusCode::OK);
    }
}

use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    async_trait,
    extract::{FromRequestParts, Request, State},
    http::{header, request::Parts, HeaderValue, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;

use crate::AppState;

pub mod handlers;

pub const ACTOR_HEADER: &str = "x-actor-id";

/// Build the Management API router.
/// All routes are relative; the caller mounts this under `/api/v1`.
pub fn api_router(state: Arc<AppState>) -> Router<Arc<AppState>> {
    Router::new()
        .route(
            "/approvals",
            get(handlers::list_approvals).post(handlers::create_approval),
        )
        .route("/approvals/:id", get(handlers::get_approval))
        .route("/approvals/:id/review", post(handlers::review_approval))
        .route("/approvals/:id/execute", post(handlers::execute_approval))
        .route("/audit", get(handlers::list_audit_logs))
        .layer(middleware::from_fn_with_state(state, admin_auth))
        .fallback(fallback_404)
}

/// The full service: health probes, metrics and the management API.
pub fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(|| async { "ok" }))
        .route("/readyz", get(readiness_check))
        .route("/metrics", get(metrics_handler))
        .nest("/api/v1", api_router(state.clone()))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn(request_id_middleware))
        .layer(middleware::from_fn(security_headers_middleware))
}

async fn fallback_404() -> StatusCode {
    StatusCode::NOT_FOUND
}

/// Identity of the caller, from `X-Actor-Id`. Empty when the header is absent;
/// the workflow refuses empty actors with `missing_actor`.
#[derive(Debug, Clone)]
pub struct Actor(pub String);

#[async_trait]
impl<S> FromRequestParts<S> for Actor
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let actor = parts
            .headers
            .get(ACTOR_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.trim().to_string())
            .unwrap_or_default();
        Ok(Actor(actor))
    }
}

/// Middleware: validates `X-Admin-Key` (or a bearer token) against the configured admin key.
async fn admin_auth(
    State(state): State<Arc<AppState>>,
    req: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let provided_key = req
        .headers()
        .get("x-admin-key")
        .and_then(|v| v.to_str().ok())
        .or_else(|| {
            req.headers()
                .get(header::AUTHORIZATION)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.strip_prefix("Bearer "))
                .map(|t| t.trim())
        });

    match provided_key {
        Some(k) if k == state.admin_key => Ok(next.run(req).await),
        Some(k) => {
            // Never log the expected key or the full provided key.
            let masked = match (k.get(..4), k.len().checked_sub(4).and_then(|i| k.get(i..))) {
                (Some(head), Some(tail)) if k.len() > 8 => format!("{}…{}", head, tail),
                _ => "****".to_string(),
            };
            tracing::warn!("admin API: invalid key (provided: '{}')", masked);
            Err(StatusCode::UNAUTHORIZED)
        }
        None => {
            tracing::warn!("admin API: missing X-Admin-Key header");
            Err(StatusCode::UNAUTHORIZED)
        }
    }
}

async fn readiness_check(State(state): State<Arc<AppState>>) -> Response {
    match state.service.ready().await {
        Ok(()) => "ok".into_response(),
        Err(e) => {
            tracing::warn!("readiness check failed: {}", e);
            (StatusCode::SERVICE_UNAVAILABLE, "not ready").into_response()
        }
    }
}

async fn metrics_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.service.metrics().render(),
    )
}

/// Middleware: injects a unique X-Request-Id into every response.
async fn request_id_middleware(req: Request, next: Next) -> Response {
    let req_id = uuid::Uuid::new_v4().to_string();
    let mut resp = next.run(req).await;
    if let Ok(val) = HeaderValue::from_str(&req_id) {
        resp.headers_mut().insert("x-request-id", val);
    }
    resp
}

/// Middleware: injects security headers into every response.
async fn security_headers_middleware(req: Request, next: Next) -> Response {
    let mut resp = next.run(req).await;
    let headers = resp.headers_mut();

    headers.insert("X-Content-Type-Options", HeaderValue::from_static("nosniff"));
    headers.insert("X-Frame-Options", HeaderValue::from_static("DENY"));
    // Executed rotations carry a freshly generated secret.
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    headers.insert("Referrer-Policy", HeaderValue::from_static("no-referrer"));
    headers.remove(header::SERVER);

    resp
}

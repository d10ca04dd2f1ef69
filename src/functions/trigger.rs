use crate::config::EngageConfig;
use crate::functions::engagement::{AppState, execute_job};
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;

pub const ENGAGEMENT_ENDPOINT: &str = "/api/cron/event-guest-engagement";
pub const HEALTH_ENDPOINT: &str = "/healthz";
const CRON_SECRET_HEADER: &str = "x-cron-secret";

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route(
            ENGAGEMENT_ENDPOINT,
            get(handle_engagement).post(handle_engagement),
        )
        .route(HEALTH_ENDPOINT, get(handle_health))
        .with_state(state)
}

async fn handle_health() -> Response {
    (StatusCode::OK, Json(json!({ "status": "ok" }))).into_response()
}

async fn handle_engagement(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if !authorize(&state.config, &headers) {
        tracing::warn!("trigger: rejected unauthorized engagement request");
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "error": "Unauthorized" })),
        )
            .into_response();
    }

    let response = execute_job(&state, "http").await;
    let status = if response.success {
        StatusCode::OK
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    };
    (status, Json(response)).into_response()
}

/// Accepts `Authorization: Bearer <secret>` or `x-cron-secret: <secret>`. Without a configured
/// secret nothing is accepted.
fn authorize(config: &EngageConfig, headers: &HeaderMap) -> bool {
    let Some(secret) = config.cron_secret.as_deref() else {
        return false;
    };

    let bearer = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim);
    let direct = headers
        .get(CRON_SECRET_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim);

    [bearer, direct]
        .into_iter()
        .flatten()
        .any(|candidate| secrets_match(candidate, secret))
}

fn secrets_match(candidate: &str, secret: &str) -> bool {
    let (a, b) = (candidate.as_bytes(), secret.as_bytes());
    a.len() == b.len() && a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

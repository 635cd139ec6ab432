//! API routes

pub mod admin;
pub mod auth;
pub mod clients;
pub mod cron;
pub mod dashboard;
pub mod jobs;
pub mod price_list;
pub mod price_matching;
pub mod projects;

use axum::extract::DefaultBodyLimit;
use axum::http::header::ALLOW;
use axum::http::{HeaderValue, StatusCode};
use axum::middleware::map_response;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::error::ApiError;
use crate::state::SharedState;

pub type ApiResult<T = Response> = Result<T, ApiError>;

/// `{success: true, data}` body.
#[derive(Debug, Serialize)]
pub struct Envelope<T> {
    pub success: bool,
    pub data: T,
}

pub fn ok<T: Serialize>(data: T) -> Response {
    with_status(StatusCode::OK, data)
}

pub fn created<T: Serialize>(data: T) -> Response {
    with_status(StatusCode::CREATED, data)
}

fn with_status<T: Serialize>(status: StatusCode, data: T) -> Response {
    (status, Json(Envelope { success: true, data })).into_response()
}

/// `{success: true, message}` body for actions with nothing to return.
pub fn message(text: &str) -> Response {
    Json(serde_json::json!({ "success": true, "message": text })).into_response()
}

/// Row offset of a 1-based page, saturating instead of overflowing.
pub fn page_offset(page: u64, limit: u64) -> u64 {
    page.saturating_sub(1)
        .saturating_mul(limit)
        .min(i64::MAX as u64)
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

async fn not_found() -> ApiError {
    ApiError::not_found("Not found")
}

/// Gives axum's bodiless 405 responses the error envelope.
async fn envelope_method_not_allowed(response: Response) -> Response {
    if response.status() != StatusCode::METHOD_NOT_ALLOWED {
        return response;
    }
    let allow = response.headers().get(ALLOW).cloned();
    let mut replaced = ApiError::method_not_allowed().into_response();
    if let Some(allow) = allow {
        replaced.headers_mut().insert(ALLOW, allow);
    }
    replaced
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if origins.is_empty() {
        return layer.allow_origin(Any);
    }
    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|o| match HeaderValue::from_str(o) {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(origin = %o, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    layer.allow_origin(allowed)
}

/// Build the axum router (separated for testing).
pub fn router(state: SharedState) -> Router {
    let api = Router::new()
        .nest("/auth", auth::routes())
        .nest("/price-list", price_list::routes())
        .nest("/price-matching", price_matching::routes())
        .nest("/jobs", jobs::routes())
        .nest("/projects", projects::routes())
        .nest("/clients", clients::routes())
        .nest("/dashboard", dashboard::routes())
        .nest("/admin", admin::routes())
        .nest("/cron", cron::routes());

    Router::new()
        .route("/health", get(health_check))
        .nest("/api", api)
        .fallback(not_found)
        .layer(map_response(envelope_method_not_allowed))
        .layer(DefaultBodyLimit::max(state.max_upload_bytes))
        .layer(cors_layer(&state.cors_origins))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

use crate::monitor::{TickPhase, TickReport};
use crate::state::AppState;
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use chrono::Utc;
use serde::Serialize;

pub fn build_http_app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .with_state(state)
}

#[derive(Serialize)]
struct HealthResponse {
    /// `starting` before the first tick, then `ok`, `degraded` or `failing`.
    status: &'static str,
    version: String,
    uptime_secs: i64,
    phase: TickPhase,
    last_tick: Option<TickReport>,
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let last_tick = state.last_report.read().await.clone();
    let status = match &last_tick {
        None => "starting",
        Some(report) if !report.succeeded() => "failing",
        Some(report) if report.is_degraded() => "degraded",
        Some(_) => "ok",
    };
    let phase = *state.phase.borrow();
    Json(HealthResponse {
        status,
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_secs: (Utc::now() - state.start_time).num_seconds(),
        phase,
        last_tick,
    })
}

async fn metrics(State(state): State<AppState>) -> Response {
    match state.exporter.render() {
        Ok(body) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        Err(e) => {
            tracing::error!(error = %e, "Failed to render metrics");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

//! `/metrics` (Prometheus text) and `/health` (JSON) HTTP listener.

use crate::error::{AppError, AppResult};
use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde::Serialize;
use std::{net::SocketAddr, sync::Arc};

type GatherFn = Arc<dyn Fn() -> AppResult<String> + Send + Sync>;
type HealthFn = Arc<dyn Fn() -> HealthReport + Send + Sync>;

#[derive(Clone)]
struct AppState {
    gather: GatherFn,
    health: HealthFn,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OverallStatus {
    Healthy,
    Warning,
    Critical,
    Unhealthy,
}

impl OverallStatus {
    fn http_status(self) -> StatusCode {
        match self {
            OverallStatus::Healthy | OverallStatus::Warning => StatusCode::OK,
            OverallStatus::Critical | OverallStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: OverallStatus,
    pub connections: std::collections::HashMap<String, bool>,
    pub workers: std::collections::HashMap<String, bool>,
}

pub async fn run_http_server<G, H>(bind_addr: &str, port: u16, gather: G, health: H) -> AppResult<()>
where
    G: Fn() -> AppResult<String> + Send + Sync + 'static,
    H: Fn() -> HealthReport + Send + Sync + 'static,
{
    let addr: SocketAddr = format!("{bind_addr}:{port}")
        .parse()
        .map_err(|e| AppError::InvalidConfig(format!("Invalid bind/port: {e}")))?;

    let state = AppState {
        gather: Arc::new(gather),
        health: Arc::new(health),
    };

    let app = Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/health", get(health_handler))
        .with_state(state);

    tracing::info!(%addr, "metrics/health server starting (axum)");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| AppError::Internal(format!("Failed to bind metrics server: {e}")))?;

    axum::serve(listener, app)
        .await
        .map_err(|e| AppError::Internal(format!("Metrics server error: {e}")))?;

    Ok(())
}

async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    match (state.gather)() {
        Ok(text) => {
            let mut headers = HeaderMap::new();
            headers.insert(
                axum::http::header::CONTENT_TYPE,
                "text/plain; version=0.0.4; charset=utf-8".parse().unwrap(),
            );
            (StatusCode::OK, headers, text).into_response()
        }
        Err(e) => {
            tracing::error!(error = %e, "failed to gather metrics");
            (StatusCode::INTERNAL_SERVER_ERROR, "gather metrics failed\n").into_response()
        }
    }
}

async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let report = (state.health)();
    (report.status.http_status(), Json(report))
}

use std::time::Duration;

use axum::{extract::Extension, http::StatusCode, Json};
use serde::Serialize;

use crate::domains::workflow::store::PoolMetrics;
use crate::server::app::AppState;

const DATABASE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Serialize)]
pub struct HealthResponse {
    status: String,
    database: DatabaseHealth,
    #[serde(skip_serializing_if = "Option::is_none")]
    connection_pool: Option<PoolMetrics>,
}

#[derive(Serialize)]
pub struct DatabaseHealth {
    status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

/// Health check endpoint
///
/// Checks:
/// - Store connectivity and responsiveness
/// - Connection pool utilization (when the store has a pool)
///
/// Returns 200 OK if all systems are healthy, 503 Service Unavailable otherwise.
pub async fn health_handler(
    Extension(state): Extension<AppState>,
) -> (StatusCode, Json<HealthResponse>) {
    let db_health = match tokio::time::timeout(DATABASE_TIMEOUT, state.store.ping()).await {
        Ok(Ok(())) => DatabaseHealth {
            status: "ok".to_string(),
            error: None,
        },
        Ok(Err(e)) => DatabaseHealth {
            status: "error".to_string(),
            error: Some(format!("Query failed: {}", e)),
        },
        Err(_) => DatabaseHealth {
            status: "error".to_string(),
            error: Some("Query timeout (>5s)".to_string()),
        },
    };

    let is_healthy = db_health.status == "ok";

    let (status_code, overall_status) = if is_healthy {
        (StatusCode::OK, "healthy")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "unhealthy")
    };

    (
        status_code,
        Json(HealthResponse {
            status: overall_status.to_string(),
            database: db_health,
            connection_pool: state.store.pool_metrics(),
        }),
    )
}

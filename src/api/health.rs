/// Health check endpoints
///
/// - Liveness: `/healthz`, plain text, never touches storage
/// - Readiness: `/health/ready`, checks the database and reports the
///   current identity status
use crate::{context::AppContext, db, db::models::InstanceStatus};
use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Json},
    routing::get,
    Router,
};
use serde::{Deserialize, Serialize};
use std::time::Instant;

/// Readiness response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthStatus {
    /// "ready" or "unavailable"
    pub status: String,

    pub version: String,

    /// Individual component checks
    pub checks: Vec<ComponentHealth>,
}

/// Health of one component
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub name: String,

    /// "healthy", "degraded", or "unhealthy"
    pub status: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_time_ms: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

/// Build health check routes
pub fn routes() -> Router<AppContext> {
    Router::new()
        .route("/healthz", get(liveness_probe))
        .route("/health/ready", get(readiness_probe))
}

/// Liveness probe
pub async fn liveness_probe() -> impl IntoResponse {
    ([(header::CONTENT_TYPE, "text/plain")], "ok")
}

/// Readiness probe
///
/// 503 only when the database is unreachable. A degraded or locked
/// identity is reported but the process is still ready.
pub async fn readiness_probe(State(ctx): State<AppContext>) -> (StatusCode, Json<HealthStatus>) {
    let database = check_database(&ctx).await;
    let identity = check_identity(&ctx);
    let ready = database.status == "healthy";

    let health = HealthStatus {
        status: if ready { "ready" } else { "unavailable" }.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        checks: vec![database, identity],
    };

    let status_code = if ready {
        StatusCode::OK
    } else {
        tracing::warn!("readiness_probe_failed: database check failed");
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status_code, Json(health))
}

async fn check_database(ctx: &AppContext) -> ComponentHealth {
    let start = Instant::now();

    match db::test_connection(&ctx.db).await {
        Ok(()) => ComponentHealth {
            name: "database".to_string(),
            status: "healthy".to_string(),
            response_time_ms: Some(start.elapsed().as_millis() as u64),
            error: None,
            details: Some(serde_json::json!({
                "type": "sqlite",
                "pool_size": ctx.db.size(),
                "idle_connections": ctx.db.num_idle(),
            })),
        },
        Err(e) => ComponentHealth {
            name: "database".to_string(),
            status: "unhealthy".to_string(),
            response_time_ms: Some(start.elapsed().as_millis() as u64),
            error: Some(e.to_string()),
            details: None,
        },
    }
}

fn check_identity(ctx: &AppContext) -> ComponentHealth {
    let snapshot = ctx.identity.snapshot();
    let status = match snapshot.status {
        InstanceStatus::Ok => "healthy",
        InstanceStatus::Degraded => "degraded",
        InstanceStatus::Locked => "unhealthy",
    };

    ComponentHealth {
        name: "identity".to_string(),
        status: status.to_string(),
        response_time_ms: None,
        error: snapshot.reason.clone(),
        details: Some(serde_json::json!({
            "instance_status": snapshot.status,
            "last_check": snapshot.checked_at,
        })),
    }
}

/// HTTP server setup and routing
use crate::{
    context::AppContext,
    error::{MonaliasError, MonaliasResult},
};
use axum::{
    http::{header, Method, StatusCode},
    response::Json,
    Router,
};
use serde_json::json;
use std::net::SocketAddr;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::info;

/// Build the public router: resolve, well-known and liveness
pub fn build_public_router(ctx: AppContext) -> Router {
    // Wallets call resolve from browsers too
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE])
        .expose_headers([
            header::HeaderName::from_static(crate::protocol::KEY_ID_HEADER),
            header::HeaderName::from_static(crate::protocol::SIGNATURE_HEADER),
            header::RETRY_AFTER,
        ]);

    Router::new()
        .merge(crate::api::public_routes(ctx.clone()))
        .with_state(ctx)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .fallback(not_found)
}

/// Build the admin router (basic auth is enforced per handler)
pub fn build_admin_router(ctx: AppContext) -> Router {
    Router::new()
        .merge(crate::api::admin_routes())
        .with_state(ctx)
        .layer(TraceLayer::new_for_http())
        .fallback(not_found)
}

/// 404 handler
async fn not_found() -> (StatusCode, Json<serde_json::Value>) {
    (StatusCode::NOT_FOUND, Json(json!({ "error": "not_found" })))
}

/// Start the public and admin listeners and run until shutdown
pub async fn serve(ctx: AppContext) -> MonaliasResult<()> {
    let public_addr = ctx.config.service.public_bind.clone();
    let admin_addr = ctx.config.service.admin_bind.clone();

    let public_listener = bind(&public_addr).await?;
    let admin_listener = bind(&admin_addr).await?;

    info!("Monalias listening on {} (public) and {} (admin)", public_addr, admin_addr);
    info!("   Domain: {}", ctx.config.service.domain);
    info!("   Homeserver: {}", ctx.config.service.public_base_url);

    let public = axum::serve(
        public_listener,
        build_public_router(ctx.clone()).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal());

    let admin = axum::serve(
        admin_listener,
        build_admin_router(ctx).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal());

    let (public_result, admin_result) = tokio::join!(public, admin);
    public_result.map_err(|e| MonaliasError::Internal(format!("Public server error: {}", e)))?;
    admin_result.map_err(|e| MonaliasError::Internal(format!("Admin server error: {}", e)))?;

    info!("Monalias stopped");
    Ok(())
}

async fn bind(addr: &str) -> MonaliasResult<tokio::net::TcpListener> {
    tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| MonaliasError::Internal(format!("Failed to bind to {}: {}", addr, e)))
}

/// Resolves on Ctrl-C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}

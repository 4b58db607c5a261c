pub mod routes;

use crate::config::ServerConfig;
use crate::media::MediaService;
use anyhow::{Context, Result};
use axum::http::HeaderValue;
use routes::AppState;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

fn build_cors_layer(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);

    if origins.is_empty() {
        return layer.allow_origin(Any);
    }

    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin.trim()) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!("Ignoring invalid CORS origin: {}", origin);
                None
            }
        })
        .collect();

    layer.allow_origin(AllowOrigin::list(allowed))
}

pub async fn run(server: &ServerConfig, media: MediaService) -> Result<()> {
    if let Err(e) = media.test_setup().await {
        warn!("Media tooling check failed: {}", e);
    }

    let app = routes::router(AppState::new(media))
        .layer(build_cors_layer(&server.cors_origins))
        .layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(&server.bind)
        .await
        .with_context(|| format!("Failed to bind {}", server.bind))?;

    info!("VideoVault API listening on http://{}", server.bind);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server error")?;

    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

//! Relay web server
//!
//! One route does the work: `/stream` upgrades to a WebSocket and runs a
//! relay session. Everything else is served from the public directory.

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use axum::Router;
use axum::routing::get;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::info;
use undertow_core::config::UndertowConfig;
use undertow_core::session::SessionContext;
use undertow_core::tools::MediaTools;

use crate::handlers::stream_handler;

/// Errors starting or running the listener.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("Server error: {0}")]
    Serve(#[source] std::io::Error),
}

/// State shared by every connection.
#[derive(Debug, Clone)]
pub struct AppState {
    pub session: SessionContext,
    /// Inbound frames buffered per connection before the reader waits
    pub inbound_buffer: usize,
}

impl AppState {
    pub fn new(config: UndertowConfig, tools: Arc<dyn MediaTools>) -> Self {
        let inbound_buffer = config.server.inbound_buffer.max(1);
        Self {
            session: SessionContext {
                tools,
                config: Arc::new(config),
            },
            inbound_buffer,
        }
    }
}

/// Builds the application router.
pub fn build_router(state: AppState, public_dir: &Path) -> Router {
    Router::new()
        .route("/stream", get(stream_handler))
        .fallback_service(ServeDir::new(public_dir))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serves until the listener fails.
///
/// # Errors
///
/// - `ServerError::Bind` - Address unavailable
/// - `ServerError::Serve` - Listener failed while running
pub async fn run_server(
    config: UndertowConfig,
    tools: Arc<dyn MediaTools>,
) -> Result<(), ServerError> {
    let addr = config.server.bind_addr;
    let public_dir = config.server.public_dir.clone();
    let app = build_router(AppState::new(config, tools), &public_dir);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|source| ServerError::Bind { addr, source })?;

    info!(
        "Undertow relay listening on http://{} (serving {})",
        addr,
        public_dir.display()
    );
    axum::serve(listener, app).await.map_err(ServerError::Serve)
}

#[cfg(test)]
mod tests {
    use super::*;
    use undertow_core::tools::FfmpegTools;

    fn state(buffer: usize) -> AppState {
        let mut config = UndertowConfig::for_testing();
        config.server.inbound_buffer = buffer;
        let tools = FfmpegTools::new(&config.tools, &config.probe);
        AppState::new(config, Arc::new(tools))
    }

    #[test]
    fn test_inbound_buffer_never_zero() {
        assert_eq!(state(0).inbound_buffer, 1);
        assert_eq!(state(16).inbound_buffer, 16);
    }

    #[tokio::test]
    async fn test_bind_failure_reported() {
        let occupied = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let mut config = UndertowConfig::for_testing();
        config.server.bind_addr = occupied.local_addr().unwrap();
        config.server.public_dir = tempfile::tempdir().unwrap().path().to_path_buf();
        let tools = FfmpegTools::new(&config.tools, &config.probe);

        let result = run_server(config, Arc::new(tools)).await;
        assert!(matches!(result, Err(ServerError::Bind { .. })));
    }
}

//! HTTP server.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use forklift_config::ServerConfig;
use tokio::net::TcpListener;
use tracing::info;

use crate::http::routes::create_router;
use crate::state::AppState;

/// Serves the queue API.
pub struct ApiServer {
    config: ServerConfig,
    state: Arc<AppState>,
}

impl ApiServer {
    pub fn new(config: ServerConfig, state: Arc<AppState>) -> Self {
        Self { config, state }
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.config.host, self.config.port)
    }

    /// Serve until `shutdown` resolves, then finish in-flight requests.
    pub async fn run<F>(&self, shutdown: F) -> Result<(), Box<dyn std::error::Error>>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let app = create_router(self.state.clone());

        let addr: SocketAddr = self.addr().parse()?;
        let listener = TcpListener::bind(addr).await?;

        info!("Forklift API listening on {}", addr);
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await?;

        Ok(())
    }
}

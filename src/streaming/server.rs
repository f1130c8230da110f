use crate::{
    config::StreamConfig,
    error::{HomecamError, Result, StreamError},
    pipeline::PipelineCoordinator,
    session::{Broadcaster, SessionRegistry},
};
use axum::{routing::get, Router};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::handlers::{health_handler, live_handler, viewer_page_handler};
use super::stats::{StreamStats, StreamStatsSnapshot};

/// Shared state for the Axum server
#[derive(Clone)]
pub struct ServerState {
    pub(crate) registry: Arc<SessionRegistry>,
    pub(crate) broadcaster: Arc<Broadcaster>,
    pub(crate) pipeline: Option<PipelineCoordinator>,
    pub(crate) stats: Arc<StreamStats>,
    pub(crate) shutdown: CancellationToken,
    pub(crate) send_backlog: usize,
    pub(crate) max_backlog_drops: u32,
}

/// Live view server: each WebSocket viewer receives one binary message per
/// broadcast frame
pub struct StreamServer {
    pub(crate) config: StreamConfig,
    pub(crate) broadcaster: Arc<Broadcaster>,
    pub(crate) pipeline: Option<PipelineCoordinator>,
    pub(crate) stats: Arc<StreamStats>,
    pub(crate) shutdown: CancellationToken,
}

impl StreamServer {
    pub fn new(
        config: StreamConfig,
        broadcaster: Arc<Broadcaster>,
        pipeline: Option<PipelineCoordinator>,
    ) -> Self {
        Self {
            config,
            broadcaster,
            pipeline,
            stats: Arc::new(StreamStats::default()),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        self.broadcaster.registry()
    }

    pub fn stats(&self) -> StreamStatsSnapshot {
        self.stats.snapshot()
    }

    /// Token cancelled by `shutdown`; viewer connections hold child tokens
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn router(&self) -> Router {
        let state = ServerState {
            registry: Arc::clone(self.registry()),
            broadcaster: Arc::clone(&self.broadcaster),
            pipeline: self.pipeline.clone(),
            stats: Arc::clone(&self.stats),
            shutdown: self.shutdown.clone(),
            send_backlog: self.config.send_backlog,
            max_backlog_drops: self.config.max_backlog_drops,
        };

        Router::new()
            .route("/", get(viewer_page_handler))
            .route("/live", get(live_handler))
            .route("/health", get(health_handler))
            .layer(tower_http::trace::TraceLayer::new_for_http())
            .with_state(state)
    }

    /// Bind the configured address
    pub async fn bind(&self) -> Result<TcpListener> {
        let addr = format!("{}:{}", self.config.ip, self.config.port);

        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| StreamError::BindFailed {
                address: addr.clone(),
                source: e,
            })?;

        info!("Stream server listening on {}", addr);
        Ok(listener)
    }

    /// Serve on `listener` until `shutdown` is called
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        let app = self.router();
        let token = self.shutdown.clone();

        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(async move { token.cancelled().await })
        .await
        .map_err(|e| StreamError::StartupFailed {
            details: format!("Server error: {}", e),
        })?;

        info!("Stream server stopped");
        Ok(())
    }

    /// Bind and serve
    pub async fn start(&self) -> Result<()> {
        let listener = self.bind().await?;
        self.serve(listener).await
    }

    /// Stop accepting connections and close every viewer
    pub fn shutdown(&self) {
        self.shutdown.cancel();
        self.registry().sweep();
    }
}

/// Stream server builder for configuration
pub struct StreamServerBuilder {
    config: Option<StreamConfig>,
    broadcaster: Option<Arc<Broadcaster>>,
    pipeline: Option<PipelineCoordinator>,
}

impl StreamServerBuilder {
    pub fn new() -> Self {
        Self {
            config: None,
            broadcaster: None,
            pipeline: None,
        }
    }

    pub fn config(mut self, config: StreamConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn broadcaster(mut self, broadcaster: Arc<Broadcaster>) -> Self {
        self.broadcaster = Some(broadcaster);
        self
    }

    /// Pipeline reported by the health endpoint
    pub fn pipeline(mut self, pipeline: PipelineCoordinator) -> Self {
        self.pipeline = Some(pipeline);
        self
    }

    pub fn build(self) -> Result<StreamServer> {
        let config = self.config.ok_or_else(|| {
            HomecamError::Stream(StreamError::StartupFailed {
                details: "Stream configuration is required".to_string(),
            })
        })?;

        let broadcaster = self.broadcaster.ok_or_else(|| {
            HomecamError::Stream(StreamError::StartupFailed {
                details: "Broadcaster is required".to_string(),
            })
        })?;

        Ok(StreamServer::new(config, broadcaster, self.pipeline))
    }
}

impl Default for StreamServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

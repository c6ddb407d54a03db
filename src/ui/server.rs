//! HTTP/WebSocket server: index page, log stream and status

use axum::{
    extract::State,
    response::{Html, IntoResponse},
    routing::get,
    Json, Router,
};
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::config::UiConfig;
use crate::constants::LOG_ENDPOINT;
use crate::relay::{BroadcastStats, ConnectionRegistry};
use crate::shutdown::ShutdownSignal;
use crate::ui::{page, websocket};

/// Shared application state
pub struct AppState {
    pub registry: Arc<ConnectionRegistry>,
    pub stats: Arc<BroadcastStats>,
    pub queue_capacity: usize,
    pub index_page: String,
}

/// Body of `GET /api/status`
#[derive(Debug, Clone, Serialize)]
pub struct RelayStatus {
    pub consumers: usize,
    pub ingest_running: bool,
    pub datagrams_received: u64,
    pub bytes_received: u64,
    pub deliveries_queued: u64,
    pub deliveries_dropped: u64,
}

/// Web server for the log viewer
pub struct WebServer {
    config: UiConfig,
    state: Arc<AppState>,
}

impl WebServer {
    /// Create a new web server; the page is rendered once up front
    pub fn new(
        config: UiConfig,
        registry: Arc<ConnectionRegistry>,
        stats: Arc<BroadcastStats>,
        queue_capacity: usize,
    ) -> crate::Result<Self> {
        if queue_capacity == 0 {
            return Err(crate::Error::Config("queue_capacity must be at least 1".into()));
        }
        let index_page = page::render_index(config.socket_addr()?)?;
        Ok(Self {
            config,
            state: Arc::new(AppState {
                registry,
                stats,
                queue_capacity,
                index_page,
            }),
        })
    }

    /// Get shared state
    pub fn state(&self) -> Arc<AppState> {
        self.state.clone()
    }

    /// Build the router
    pub fn build_router(&self) -> Router {
        let router = Router::new()
            .route("/", get(index))
            .route(LOG_ENDPOINT, get(websocket::log_handler))
            .route("/api/status", get(status))
            .route("/health", get(|| async { "OK" }))
            .layer(TraceLayer::new_for_http());

        let router = if self.config.enable_cors {
            let cors = CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any);
            router.layer(cors)
        } else {
            router
        };

        router.with_state(self.state.clone())
    }

    /// Bind the configured address
    pub async fn bind(&self) -> anyhow::Result<TcpListener> {
        let addr: SocketAddr = self.config.socket_addr()?;
        Ok(TcpListener::bind(addr).await?)
    }

    /// Serve on an already bound listener until shutdown is signalled
    pub async fn serve(self, listener: TcpListener, mut shutdown: ShutdownSignal) -> anyhow::Result<()> {
        let router = self.build_router();

        tracing::info!("Web server listening on http://{}", listener.local_addr()?);

        axum::serve(listener, router)
            .with_graceful_shutdown(async move { shutdown.wait().await })
            .await?;

        tracing::info!("Web server stopped");
        Ok(())
    }

    /// Start the web server in the background
    pub fn start_background(
        self,
        listener: TcpListener,
        shutdown: ShutdownSignal,
    ) -> tokio::task::JoinHandle<anyhow::Result<()>> {
        tokio::spawn(async move { self.serve(listener, shutdown).await })
    }
}

async fn index(State(state): State<Arc<AppState>>) -> Html<String> {
    Html(state.index_page.clone())
}

async fn status(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let stats = state.stats.snapshot();
    Json(RelayStatus {
        consumers: state.registry.len(),
        ingest_running: stats.ingest_running,
        datagrams_received: stats.datagrams_received,
        bytes_received: stats.bytes_received,
        deliveries_queued: stats.deliveries_queued,
        deliveries_dropped: stats.deliveries_dropped,
    })
}

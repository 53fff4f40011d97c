pub(crate) mod auth;
mod handlers;
mod router;
mod socket;

use anyhow::Result;
use async_trait::async_trait;
use axum::{
    Json,
    extract::State,
    http::StatusCode,
    response::sse::{Event, Sse},
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_stream::Stream;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;
use tracing::info;

use crate::core::error::PipelineError;
use crate::core::lifecycle::LifecycleComponent;
use crate::core::orchestrator::Orchestrator;

pub struct ApiServerConfig {
    pub orchestrator: Arc<Orchestrator>,
    pub client_secret: Option<String>,
    pub allowed_origins: Vec<String>,
    pub log_tx: broadcast::Sender<String>,
    pub host: String,
    pub port: u16,
}

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) orchestrator: Arc<Orchestrator>,
    pub(crate) client_secret: Option<String>,
    pub(crate) allowed_origins: Vec<String>,
    pub(crate) log_tx: broadcast::Sender<String>,
}

pub struct ApiServer {
    state: AppState,
    host: String,
    port: u16,
    local_addr: Option<SocketAddr>,
    server: Option<JoinHandle<()>>,
}

impl ApiServer {
    pub fn new(config: ApiServerConfig) -> Self {
        Self {
            state: AppState {
                orchestrator: config.orchestrator,
                client_secret: config.client_secret,
                allowed_origins: config.allowed_origins,
                log_tx: config.log_tx,
            },
            host: config.host,
            port: config.port,
            local_addr: None,
            server: None,
        }
    }

    /// Address actually bound, known once the server has started.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }
}

impl IntoResponse for PipelineError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (
            status,
            Json(json!({ "error": self.public_message(), "code": self.code() })),
        )
            .into_response()
    }
}

// --- SSE Logs (used by router) ---

async fn sse_logs_endpoint(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let receiver = state.log_tx.subscribe();
    let stream = BroadcastStream::new(receiver).map(|msg| match msg {
        Ok(log) => Ok(Event::default().data(log)),
        Err(_) => Ok(Event::default().data("Log stream lagged")),
    });

    Sse::new(stream)
}

#[async_trait]
impl LifecycleComponent for ApiServer {
    async fn on_init(&mut self) -> Result<()> {
        info!("API Server initializing...");
        if self.state.client_secret.as_deref().unwrap_or_default().is_empty() {
            tracing::warn!("No client secret configured; stateless endpoints will reject every request");
        }
        Ok(())
    }

    async fn on_start(&mut self) -> Result<()> {
        let addr = format!("{}:{}", self.host, self.port);
        let listener = tokio::net::TcpListener::bind(&addr).await?;
        let local_addr = listener.local_addr()?;
        self.local_addr = Some(local_addr);

        let app = router::build_router(self.state.clone());
        self.server = Some(tokio::spawn(async move {
            info!("API Server running at http://{}", local_addr);
            if let Err(e) = axum::serve(listener, app).await {
                tracing::error!("API Server crashed: {}", e);
            }
        }));
        Ok(())
    }

    async fn on_shutdown(&mut self) -> Result<()> {
        info!("API Server shutting down...");
        if let Some(server) = self.server.take() {
            server.abort();
        }
        Ok(())
    }
}

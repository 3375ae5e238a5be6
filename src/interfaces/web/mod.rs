mod handlers;
mod router;

use anyhow::{Context, Result};
use async_trait::async_trait;
use axum::{
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_stream::Stream;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::core::jobs::{JobDispatcher, ResultReader};
use crate::core::lifecycle::LifecycleComponent;
use crate::core::llm::SharedBackend;
use crate::interfaces::slack::WebhookBridge;

const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) dispatcher: JobDispatcher,
    pub(crate) reader: ResultReader,
    pub(crate) backend: SharedBackend,
    pub(crate) slack: Option<WebhookBridge>,
    pub(crate) log_tx: tokio::sync::broadcast::Sender<String>,
    pub(crate) api_port: u16,
}

pub struct ApiServerConfig {
    pub dispatcher: JobDispatcher,
    pub reader: ResultReader,
    pub backend: SharedBackend,
    pub slack: Option<WebhookBridge>,
    pub log_tx: tokio::sync::broadcast::Sender<String>,
    pub api_host: String,
    pub api_port: u16,
}

pub struct ApiServer {
    state: AppState,
    api_host: String,
    api_port: u16,
    shutdown: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl ApiServer {
    pub fn new(config: ApiServerConfig) -> Self {
        Self {
            state: AppState {
                dispatcher: config.dispatcher,
                reader: config.reader,
                backend: config.backend,
                slack: config.slack,
                log_tx: config.log_tx,
                api_port: config.api_port,
            },
            api_host: config.api_host,
            api_port: config.api_port,
            shutdown: CancellationToken::new(),
            handle: None,
        }
    }
}

// --- SSE Logs (used by router) ---

async fn sse_logs_endpoint(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let receiver = state.log_tx.subscribe();
    let stream = BroadcastStream::new(receiver).map(|msg| {
        match msg {
            Ok(log) => Ok(Event::default().data(log.trim_end())),
            Err(_) => Ok(Event::default().data("Log stream lagged")),
        }
    });

    Sse::new(stream).keep_alive(KeepAlive::default())
}

// --- Lifecycle Implementations ---

#[async_trait]
impl LifecycleComponent for ApiServer {
    async fn on_init(&mut self) -> Result<()> {
        info!("API Server Interface initializing...");
        if self.state.slack.is_none() {
            warn!("No SLACK_BOT_TOKEN set. Slack webhook route disabled.");
        }
        Ok(())
    }

    async fn on_start(&mut self) -> Result<()> {
        let addr = format!("{}:{}", self.api_host, self.api_port);
        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .with_context(|| format!("Failed to bind API server to {}", addr))?;
        let local: SocketAddr = listener.local_addr().context("API listener has no address")?;

        let app = router::build_api_router(self.state.clone());
        let shutdown = self.shutdown.clone();
        info!("API Server running at http://{local}");

        self.handle = Some(tokio::spawn(async move {
            let serve = axum::serve(listener, app)
                .with_graceful_shutdown(async move { shutdown.cancelled().await });
            if let Err(e) = serve.await {
                tracing::error!("API Server crashed: {}", e);
            }
        }));
        Ok(())
    }

    async fn on_shutdown(&mut self) -> Result<()> {
        info!("API Server Interface shutting down...");
        self.shutdown.cancel();
        if let Some(mut handle) = self.handle.take() {
            // Open SSE streams keep connections alive; do not wait on them forever.
            if tokio::time::timeout(SHUTDOWN_GRACE, &mut handle).await.is_err() {
                warn!("API Server did not drain within {:?}, aborting", SHUTDOWN_GRACE);
                handle.abort();
            }
        }
        Ok(())
    }
}

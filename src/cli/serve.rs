use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::sync::{Mutex, mpsc};
use tracing::info;

use super::parse_api_server_flags;
use crate::core::config::{RelayConfig, StoreSettings};
use crate::core::jobs::{ActiveJobs, JobDispatcher, JobExecutor, ResultReader, WorkerPool};
use crate::core::lifecycle::LifecycleManager;
use crate::core::llm::{OpenAiBackend, SharedBackend};
use crate::core::store::{
    JobRecords, MemoryResultStore, RedisResultStore, SharedStore, StopFlag,
};
use crate::core::terminal::{ROCKET, print_link, print_status};
use crate::interfaces::slack::{SlackClient, WebhookBridge};
use crate::interfaces::web::{ApiServer, ApiServerConfig};
use crate::logging::init_tracing;

/// Opens the configured store and pings it so a bad address fails at startup.
pub(crate) async fn open_store(settings: &StoreSettings) -> Result<SharedStore> {
    let store: SharedStore = match settings {
        StoreSettings::Memory => Arc::new(MemoryResultStore::new()),
        StoreSettings::Redis(cfg) => Arc::new(RedisResultStore::connect(cfg).await?),
    };
    store
        .ping()
        .await
        .with_context(|| format!("Result store {} is not reachable", store.describe()))?;
    Ok(store)
}

pub async fn run_server(args: &[String], flags_start: usize) -> Result<()> {
    let log_tx = init_tracing();

    let mut config = RelayConfig::from_env().context("Invalid configuration")?;
    let (api_host, api_port) =
        parse_api_server_flags(args, flags_start, config.api_host.clone(), config.api_port);
    config.api_host = api_host;
    config.api_port = api_port;
    config.log_summary();

    let store = open_store(&config.store).await?;
    let backend: SharedBackend = Arc::new(OpenAiBackend::new(config.backend.clone())?);

    let records = JobRecords::new(store.clone(), config.result_ttl);
    let stop_flag = StopFlag::new(store);
    let active = ActiveJobs::new();
    let (queue_tx, queue_rx) = mpsc::channel(config.queue_capacity);

    let dispatcher = JobDispatcher::new(queue_tx, active.clone(), records.clone(), stop_flag.clone());
    let reader = ResultReader::new(records.clone(), active.clone());
    let executor = Arc::new(JobExecutor::new(
        backend.clone(),
        records,
        stop_flag,
        active,
        config.executor.clone(),
    ));
    let pool = WorkerPool::new(executor, queue_rx, config.worker_concurrency);

    let slack = match &config.slack {
        Some(settings) => {
            let client = SlackClient::new(&settings.api_base, &settings.bot_token)?;
            Some(WebhookBridge::new(
                settings,
                Arc::new(client),
                dispatcher.clone(),
                reader.clone(),
            ))
        }
        None => None,
    };

    let api = ApiServer::new(ApiServerConfig {
        dispatcher,
        reader,
        backend,
        slack,
        log_tx,
        api_host: config.api_host.clone(),
        api_port: config.api_port,
    });

    // Workers first so the API never accepts jobs nobody will drain.
    let mut lifecycle = LifecycleManager::new();
    lifecycle.attach(Arc::new(Mutex::new(pool)));
    lifecycle.attach(Arc::new(Mutex::new(api)));
    lifecycle.start().await?;

    println!("{}chat-relay is up", ROCKET);
    print_status("Workers", &config.worker_concurrency.to_string());
    print_link(
        "API",
        &format!("http://{}:{}", config.api_host, config.api_port),
    );

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    info!("Shutdown requested");
    lifecycle.shutdown().await
}

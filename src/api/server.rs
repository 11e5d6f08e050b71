use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::{Router, routing::get, routing::post};
use tokio::net::TcpListener;
use tokio::sync::RwLock;
use tower_http::decompression::RequestDecompressionLayer;
use tracing::{info, warn};

use super::services::{cancel_job, get_job, health, retry_job, submit_upload};
use super::state::AppState;
use crate::config::{Config, StorageProvider};
use crate::credits::CreditLedger;
use crate::llm::LlmManager;
use crate::orchestrator::Orchestrator;
use crate::pipeline::privacy::PrivacyAgent;
use crate::pipeline::{WorkerDeps, spawn_sweeper, spawn_workers};
use crate::queue::{JobBroker, JobQueue};
use crate::storage::ObjectStoreGateway;
use crate::store::MetadataStore;
use crate::webhook::{HttpTransport, WebhookEmitter};

type AnyError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Multipart overhead on top of the raw file limit
const BODY_LIMIT_SLACK: usize = 1024 * 1024;

pub fn build_router(state: AppState) -> Router {
    let body_limit = state.config.pipeline.max_file_size.as_u64() as usize + BODY_LIMIT_SLACK;

    Router::new()
        .route("/upload/submit", post(submit_upload))
        .route("/jobs/{job_id}", get(get_job))
        .route("/jobs/{job_id}/retry", post(retry_job))
        .route("/jobs/{job_id}/cancel", post(cancel_job))
        .route("/health", get(health))
        .with_state(state)
        // transparently handle gzip-compressed JSON submits
        .layer(RequestDecompressionLayer::new())
        .layer(DefaultBodyLimit::max(body_limit))
}

/// Boot the full service: metadata store, queue + broker, worker pool,
/// sweeper, and the HTTP API, all in one process.
pub async fn run(config: Config) -> Result<(), AnyError> {
    let config = Arc::new(config);

    info!(path = %config.server.metadata_path().display(), "Opening metadata store");
    let store = MetadataStore::open(config.server.metadata_path())?;
    let credits = CreditLedger::new(store.clone());

    let storage = match config.storage.provider {
        StorageProvider::Memory => ObjectStoreGateway::in_memory(),
        StorageProvider::Local => ObjectStoreGateway::local(&config.storage.root)?,
    };

    info!(path = %config.server.queue_path().display(), "Opening job queue");
    let queue = Arc::new(RwLock::new(JobQueue::open(
        config.server.queue_path(),
        config.queue.visibility_timeout.as_duration(),
        config.queue.max_attempts,
    )?));

    let (broker, receivers) =
        JobBroker::new(queue.clone(), config.queue.workers, config.queue.channel_size);
    let broker = Arc::new(broker);

    let metrics = Arc::new(crate::observability::Metrics::new());

    let llm = Arc::new(LlmManager::from_config(&config.llm, metrics.clone())?);
    if llm.provider_count() == 0 {
        return Err("no LLM provider configured; set [llm.primary] and PRIMARY_LLM_KEY".into());
    }

    let privacy = match (&config.privacy.encryption_key, &config.privacy.hash_salt) {
        (Some(key), Some(salt)) => Some(Arc::new(PrivacyAgent::new(key, salt)?)),
        _ => {
            warn!("ENCRYPTION_KEY not set; PII will be masked but not encrypted");
            None
        }
    };

    if config.webhook.url.is_some() && config.webhook.secret.is_none() {
        warn!("WEBHOOK_URL set without WEBHOOK_SECRET; deliveries will be unsigned");
    }
    let transport = Arc::new(HttpTransport::new(config.webhook.timeout.as_duration())?);
    let webhooks = WebhookEmitter::new(
        transport,
        config.webhook.url.clone(),
        config.webhook.secret.clone(),
        config.webhook.max_attempts,
        store.clone(),
        metrics.clone(),
    );

    let deps = WorkerDeps {
        config: config.clone(),
        store: store.clone(),
        credits: credits.clone(),
        storage: storage.clone(),
        llm,
        webhooks: webhooks.clone(),
        queue: queue.clone(),
        privacy,
        metrics: metrics.clone(),
    };
    let _workers = spawn_workers(deps, receivers);
    let _sweeper = spawn_sweeper(
        broker.clone(),
        store.clone(),
        webhooks,
        config.queue.visibility_timeout.as_duration() / 2,
    );
    info!(workers = config.queue.workers, "Worker pool started");

    let orchestrator = Arc::new(Orchestrator::new(
        config.clone(),
        store.clone(),
        credits,
        storage,
        broker.clone(),
        metrics.clone(),
    ));

    let state = AppState::new(config.clone(), store, orchestrator, broker, metrics);
    let app = build_router(state);

    let address: SocketAddr = config.server.bind_addr;
    let listener = TcpListener::bind(address).await?;
    info!(%address, "TalentBox API listening");

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        let mut sigterm =
            signal(SignalKind::terminate()).expect("failed to install signal handler");
        sigterm.recv().await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}

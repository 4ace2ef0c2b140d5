//! Application startup and lifecycle management.

use crate::config::SettlementConfig;
use crate::extraction::{FsDocumentSource, VisaNetTextExtractor};
use crate::handlers::{get_settlement, trigger_settlement};
use crate::matching::{BoundaryProximitySearch, MatchEngine};
use crate::models::SettlementTrigger;
use crate::orchestrator::ReconciliationOrchestrator;
use crate::reports::{FacPortalClient, FacPortalConfig, ReportArchive, RetryingReportGenerator};
use crate::services::{
    get_metrics, init_metrics, Database, LogNotifier, MailNotifier, Notifier, SettlementStore,
};
use crate::workers::{SettlementQueue, SettlementWorker};
use axum::{
    extract::State,
    http::StatusCode,
    middleware,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use service_core::error::AppError;
use service_core::middleware::metrics::metrics_middleware;
use service_core::middleware::tracing::request_id_middleware;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn SettlementStore>,
    pub queue: SettlementQueue,
    /// Present when backed by Postgres; health checks ping it.
    pub db: Option<Arc<Database>>,
}

/// Health check endpoint for Docker/K8s liveness probes.
async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let db_status = match &state.db {
        Some(db) => db.health_check().await,
        None => Ok(()),
    };

    match db_status {
        Ok(_) => {
            tracing::debug!("Health check passed");
            (
                StatusCode::OK,
                Json(json!({
                    "status": "ok",
                    "service": "settlement-service",
                    "version": env!("CARGO_PKG_VERSION"),
                    "queue_available": state.queue.available()
                })),
            )
        }
        Err(e) => {
            tracing::warn!(error = %e, "Health check failed - database unavailable");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({
                    "status": "unhealthy",
                    "service": "settlement-service",
                    "error": e.to_string()
                })),
            )
        }
    }
}

/// Readiness check endpoint for K8s readiness probes.
async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    let Some(db) = &state.db else {
        return StatusCode::OK;
    };
    match db.health_check().await {
        Ok(_) => StatusCode::OK,
        Err(e) => {
            tracing::warn!(error = %e, "Readiness check failed");
            StatusCode::SERVICE_UNAVAILABLE
        }
    }
}

/// Metrics endpoint for Prometheus scraping.
async fn metrics_handler() -> impl IntoResponse {
    let metrics = get_metrics();
    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        metrics,
    )
}

/// HTTP routes over the given state.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .route("/metrics", get(metrics_handler))
        .route("/settlements/trigger", post(trigger_settlement))
        .route("/settlements/:date", get(get_settlement))
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn(metrics_middleware))
        .layer(middleware::from_fn(request_id_middleware))
        .with_state(state)
}

/// Wire the reconciliation flow from configuration.
pub fn build_orchestrator(
    config: &SettlementConfig,
    store: Arc<dyn SettlementStore>,
) -> Result<ReconciliationOrchestrator, AppError> {
    let extractor = VisaNetTextExtractor::new(
        FsDocumentSource::new(&config.visanet.document_dir),
        &config.visanet.report_id,
        &config.visanet.currency,
    )
    .map_err(|e| AppError::ConfigError(anyhow::anyhow!("VisaNet extractor: {}", e)))?;

    let portal = FacPortalClient::new(FacPortalConfig {
        base_url: config.fac.base_url.clone(),
        username: config.fac.username.clone(),
        password: config.fac.password.clone(),
        merchant_name: config.fac.merchant_name.clone(),
        currency_code: config.fac.currency_code.clone(),
        request_timeout: config.fac.request_timeout,
    });
    let generator = RetryingReportGenerator::with_fixed_backoff(
        Arc::new(portal),
        ReportArchive::new(&config.fac.report_dir),
        config.fac.max_attempts,
        config.fac.retry_backoff,
    );

    let engine = MatchEngine::new(
        config.search.anchor_weekday,
        config.search.max_iterations,
        Arc::new(BoundaryProximitySearch::new(
            config.search.max_pool,
            config.search.max_nodes,
        )),
    );

    let notifier: Arc<dyn Notifier> = if config.smtp.enabled {
        Arc::new(
            MailNotifier::new(config.smtp.clone(), config.notify.clone())
                .map_err(|e| AppError::EmailError(e.to_string()))?,
        )
    } else {
        tracing::info!("SMTP disabled - notifications will be logged only");
        Arc::new(LogNotifier::new())
    };

    Ok(ReconciliationOrchestrator::new(
        Arc::new(extractor),
        Arc::new(generator),
        store,
        notifier,
        engine,
    ))
}

/// Application container for managing server lifecycle.
pub struct Application {
    port: u16,
    listener: TcpListener,
    state: AppState,
    worker: SettlementWorker,
    receiver: mpsc::Receiver<SettlementTrigger>,
    shutdown: CancellationToken,
}

impl Application {
    /// Build the application with the given configuration.
    pub async fn build(config: SettlementConfig) -> Result<Self, AppError> {
        Self::build_internal(config, true).await
    }

    /// Build the application without running migrations.
    /// Use this in tests when migrations are already applied by the test harness.
    pub async fn build_without_migrations(config: SettlementConfig) -> Result<Self, AppError> {
        Self::build_internal(config, false).await
    }

    async fn build_internal(config: SettlementConfig, run_migrations: bool) -> Result<Self, AppError> {
        init_metrics();

        let db = Database::new(
            &config.database.url,
            config.database.max_connections,
            config.database.min_connections,
        )
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "Failed to connect to PostgreSQL");
            e
        })?;

        if run_migrations {
            db.run_migrations().await.map_err(|e| {
                tracing::error!(error = %e, "Failed to run migrations");
                e
            })?;
        }

        let db = Arc::new(db);
        let store: Arc<dyn SettlementStore> = db.clone();
        let orchestrator = Arc::new(build_orchestrator(&config, store.clone())?);

        let shutdown = CancellationToken::new();
        let (queue, receiver) = SettlementQueue::new(config.worker.queue_size);
        let worker = SettlementWorker::new(orchestrator, config.worker.concurrency, shutdown.clone());

        let state = AppState {
            store,
            queue,
            db: Some(db),
        };

        let addr = SocketAddr::from(([0, 0, 0, 0], config.common.port));
        let listener = TcpListener::bind(addr).await.map_err(|e| {
            tracing::error!(error = %e, addr = %addr, "Failed to bind HTTP listener");
            AppError::from(e)
        })?;
        let port = listener.local_addr()?.port();

        tracing::info!(port = port, "Settlement service listener bound");

        Ok(Self {
            port,
            listener,
            state,
            worker,
            receiver,
            shutdown,
        })
    }

    /// Get the port the server is listening on.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Cancelling this token stops the server and drains the worker.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Run the application until the shutdown token is cancelled.
    pub async fn run_until_stopped(self) -> std::io::Result<()> {
        let worker = tokio::spawn(self.worker.run(self.receiver));
        let app = router(self.state);

        tracing::info!(
            service = "settlement-service",
            version = env!("CARGO_PKG_VERSION"),
            port = self.port,
            "Service ready to accept connections"
        );

        let shutdown = self.shutdown.clone();
        let served = axum::serve(self.listener, app)
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await;

        self.shutdown.cancel();
        if let Err(e) = worker.await {
            tracing::error!(error = %e, "Settlement worker task failed");
        }

        served.map_err(|e| {
            tracing::error!(error = %e, "HTTP server error");
            std::io::Error::other(format!("HTTP server error: {}", e))
        })
    }
}

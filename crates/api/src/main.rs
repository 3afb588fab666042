mod error;
mod health;
mod middleware;
mod routes;
mod state;

use axum::{
    middleware::{from_fn, from_fn_with_state},
    routing::get,
    Router,
};
use tower_http::trace::TraceLayer;
use state::AppState;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use watchdog_core::{config::Config, jobs::JobHandler};
use watchdog_pipeline::{
    outbox::OutboxDispatcher,
    workers::{
        build_workers, AggregationHandler, AlertHandler, AnomalyHandler, ExtractionHandler,
        PipelineRouter, RetentionHandler,
    },
    RetentionScheduler,
};

#[tokio::main]
async fn main() {
    // Configuration failures are fatal before anything listens
    let config = match Config::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Fatal configuration error: {}", e);
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config.app.log_level.clone())),
        )
        .init();

    if let Err(e) = run(config).await {
        error!(error = %e, "Server terminated with error");
        std::process::exit(1);
    }
}

async fn run(config: Config) -> anyhow::Result<()> {
    let state = AppState::build(config.clone()).await?;

    if let Some(org) = state.organizations.get().await? {
        info!(organization = %org.name, "Serving organization");
    } else {
        info!("No organization configured yet");
    }

    // Background workers, one pool per queue
    let handlers: Vec<Arc<dyn JobHandler>> = vec![
        Arc::new(ExtractionHandler {
            storage: Arc::clone(&state.storage),
            ingestion: Arc::clone(&state.ingestion),
            documents: watchdog_pipeline::DocumentRepository::new(state.db.clone()),
            pdf: watchdog_connectors::PdfConnector::new(),
        }),
        Arc::new(AnomalyHandler {
            service: Arc::clone(&state.anomaly_detection),
        }),
        Arc::new(AggregationHandler {
            service: Arc::clone(&state.aggregation),
        }),
        Arc::new(AlertHandler {
            service: Arc::clone(&state.alert_dispatch),
        }),
        Arc::new(RetentionHandler {
            runner: Arc::clone(&state.retention_runner),
        }),
    ];

    let queues = state.queues.clone();
    let mut workers = build_workers(
        move |name| match name {
            "extraction" => queues.extraction.clone(),
            "anomaly" => queues.anomaly.clone(),
            "aggregation" => queues.aggregation.clone(),
            "alerts" => queues.alerts.clone(),
            _ => queues.retention.clone(),
        },
        handlers,
    );
    for worker in &mut workers {
        worker.start();
    }

    // Outbox dispatcher (advisory-locked single poller)
    let router = Arc::new(PipelineRouter {
        anomaly_queue: state.queues.anomaly.clone(),
        aggregation_queue: state.queues.aggregation.clone(),
        alerts_queue: state.queues.alerts.clone(),
        alert_service: Arc::clone(&state.alert_dispatch),
    });
    let mut dispatcher = OutboxDispatcher::new(state.db.clone(), state.outbox.clone(), router);
    dispatcher.start();

    // Retention schedule
    let scheduler = RetentionScheduler::new(
        &config.retention.schedule,
        Arc::clone(&state.retention_runner),
    )?;
    scheduler.start();

    // HTTP surface: health, auth, uploads; the request-context and CSRF
    // contracts wrap everything
    let app = Router::new()
        .route("/health", get(health::health))
        .merge(routes::router())
        .layer(from_fn_with_state(state.clone(), routes::csrf_middleware))
        .layer(from_fn(middleware::request_context_middleware))
        .layer(from_fn_with_state(
            state.clone(),
            middleware::security_headers_middleware,
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(state.clone());

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    info!(addr = %addr, environment = %config.app.environment, "cost-watchdog listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}

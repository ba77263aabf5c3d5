//! Camtower - Multi-Camera Streaming and Detection Server
//!
//! Main entry point for the camtower application.

use camtower::{
    analytics_sink::{AnalyticsStore, AnalyticsWriter, HttpAnalyticsStore, NullAnalyticsStore},
    cadence::CadencePolicy,
    detection_aggregator::DetectionAggregator,
    detector::HttpDetector,
    fanout_hub::FanoutHub,
    frame_source::HttpFrameSourceProvider,
    state::{AppConfig, AppState},
    stream_supervisor::StreamSupervisor,
    web_api,
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Pending analytics writes before enqueue starts dropping
const ANALYTICS_QUEUE_CAPACITY: usize = 256;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "camtower=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting camtower v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config = AppConfig::default();
    tracing::info!(
        detector_url = %config.detector_url,
        confidence_threshold = config.confidence_threshold,
        detection_interval = config.detection_interval,
        history_cap = config.history_cap,
        "Configuration loaded"
    );

    // Initialize components
    let store: Arc<dyn AnalyticsStore> = match &config.analytics_url {
        Some(url) => {
            tracing::info!(analytics_url = %url, "Analytics collector configured");
            Arc::new(HttpAnalyticsStore::new(url.clone()))
        }
        None => {
            tracing::info!("No analytics collector configured, persistence disabled");
            Arc::new(NullAnalyticsStore)
        }
    };
    let writer = AnalyticsWriter::spawn(store, ANALYTICS_QUEUE_CAPACITY);

    let aggregator = Arc::new(DetectionAggregator::new(config.history_cap, Some(writer)));
    let hub = Arc::new(FanoutHub::new());
    let detector = Arc::new(HttpDetector::new(config.detector_url.clone()));
    let sources = Arc::new(HttpFrameSourceProvider::new());

    let cadence_policy = CadencePolicy {
        detection_interval: config.detection_interval,
        ..CadencePolicy::default()
    };

    let supervisor = Arc::new(StreamSupervisor::new(
        sources,
        detector.clone(),
        aggregator.clone(),
        hub.clone(),
        cadence_policy,
        config.confidence_threshold,
    ));

    let state = AppState {
        config: config.clone(),
        supervisor: supervisor.clone(),
        aggregator,
        hub,
        detector,
    };

    // Build router
    let app = web_api::create_router(state)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http());

    // Start server
    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(addr = %addr, "Server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Drain camera loops before exit
    supervisor.shutdown().await;
    tracing::info!("Shutdown complete");

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to install shutdown handler");
        return;
    }
    tracing::info!("Shutdown signal received");
}

use metrics_exporter_prometheus::PrometheusBuilder;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use doc_pipeline::app_state::AppState;
use doc_pipeline::config::AppConfig;
use doc_pipeline::pipeline::{Collaborators, Pipeline};
use doc_pipeline::routes;
use doc_pipeline::services::{
    llm::OpenRouterClient, ocr::TesseractEngine, rasterizer::PdftoppmRasterizer,
};

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    // Load configuration from environment
    let config = AppConfig::from_env().expect("Failed to load configuration from environment");

    tracing::info!("Initializing doc-pipeline server");

    // Initialize Prometheus metrics recorder
    let prometheus_handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus metrics recorder");
    let prometheus_handle = Arc::new(prometheus_handle);
    routes::metrics::describe_pipeline_metrics();

    // Tesseract is required for every OCR request; warn early rather than per page
    let tesseract = TesseractEngine::new(&config.tesseract_cmd);
    match tesseract.check_installation().await {
        Ok(version) => tracing::info!(version = %version, "Tesseract available"),
        Err(err) => tracing::warn!(error = %err, "Tesseract check failed, OCR requests will fail"),
    }

    if config.openrouter_api_key.is_none() {
        tracing::warn!("OPENROUTER_API_KEY not set, summary requests will fail");
    }

    let collaborators = Collaborators {
        ocr: Arc::new(tesseract),
        summarizer: Arc::new(OpenRouterClient::new(
            config.openrouter_api_key.clone(),
            &config.openrouter_model,
        )),
        rasterizer: Arc::new(PdftoppmRasterizer::new(
            &config.pdftoppm_cmd,
            config.rasterize_dpi,
        )),
    };

    let pipeline_config = config.pipeline();
    tracing::info!(
        pool_workers = pipeline_config.pool_workers,
        pool_capacity = pipeline_config.pool_capacity,
        queue_workers = pipeline_config.queue_workers,
        queue_capacity = pipeline_config.queue_capacity,
        max_concurrent_jobs = pipeline_config.max_concurrent_jobs,
        "Starting processing pipeline"
    );
    let state = AppState::new(Pipeline::new(&pipeline_config, collaborators));
    let pipeline = state.pipeline.clone();

    let app = routes::router(state, prometheus_handle, config.max_upload_bytes);

    tracing::info!("Starting doc-pipeline on {}", config.bind_addr);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .expect("Failed to bind to address");

    tracing::info!("Server listening on {}", config.bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Server error");

    pipeline.shutdown();
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}

use anyhow::{Context, Result};
use facegate_core::analyzer::OnnxAnalyzer;
use facegate_core::service::FaceService;
use facegate_core::store::SqliteStore;
use tracing_subscriber::EnvFilter;

mod config;
mod engine;
mod error;
mod http;
mod payload;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("facegated starting");

    let config = config::Config::load().context("failed to load configuration")?;
    let settings = &config.settings;

    let store = SqliteStore::open(&settings.db_path, settings.store_options())
        .with_context(|| format!("failed to open store at {}", settings.db_path.display()))?;

    let analyzer = OnnxAnalyzer::load(
        &settings.detector_model_path(),
        &settings.recognizer_model_path(),
    )
    .context("failed to load face models")?;

    let service = FaceService::new(store, analyzer, settings.service_config());
    let engine = engine::spawn_engine(service)?;

    let app = http::router(http::AppState {
        engine,
        request_timeout: config.request_timeout,
        max_body_bytes: config.max_body_bytes,
    });

    let listener = tokio::net::TcpListener::bind(config.bind)
        .await
        .with_context(|| format!("failed to bind {}", config.bind))?;
    tracing::info!(
        bind = %config.bind,
        db = %settings.db_path.display(),
        metric = %settings.matching.metric,
        threshold = settings.matching.threshold,
        "facegated ready"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    tracing::info!("facegated shutting down");
    Ok(())
}

use anyhow::Result;
use moodlens_store::SqliteHistoryStore;
use moodlensd::{build_router, spawn_engine, AppState, Config, HistoryDispatcher};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::from_env();
    tracing::info!(bind = %config.bind_addr, models = %config.model_dir.display(), "moodlensd starting");

    let pipeline = Arc::new(config.build_pipeline()?);
    if let Some(reason) = pipeline.unavailable_reason() {
        tracing::warn!(reason, "serving without models; detection requests will return 503");
    }

    let engine = spawn_engine(
        Arc::clone(&pipeline),
        config.engine_workers,
        config.engine_queue,
        config.inference_timeout,
    )?;

    // History is optional; detection keeps working without it.
    let dispatcher = match SqliteHistoryStore::open(&config.db_path).await {
        Ok(store) => HistoryDispatcher::new(Arc::new(store)),
        Err(e) => {
            tracing::warn!(path = %config.db_path.display(), error = %e, "history store unavailable");
            HistoryDispatcher::disabled()
        }
    };

    let state = Arc::new(AppState::new(engine, dispatcher, &pipeline));
    let app = build_router(state, config.max_body_bytes);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    tracing::info!(addr = %listener.local_addr()?, "moodlensd ready");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    tracing::info!("moodlensd shutting down");
    Ok(())
}

use anyhow::{Context, Result};
use faceroll_core::OnnxEmbedder;
use faceroll_hw::Camera;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

mod capture;
mod config;
mod engine;
mod http;
mod preview;
mod store;
mod trainer;

#[cfg(test)]
mod testing;

use capture::CaptureController;
use http::AppState;
use store::ProfileStore;
use trainer::Trainer;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let config = config::Config::from_env();
    tracing::info!(?config, "facerolld starting");

    let camera = Camera::open(&config.camera_device, config.frame_width, config.frame_height)
        .with_context(|| format!("failed to open camera {}", config.camera_device))?;
    tracing::info!(
        device = %camera.device_path,
        fourcc = ?camera.fourcc,
        width = camera.width,
        height = camera.height,
        "camera ready"
    );
    let engine = engine::spawn_engine(Box::new(camera), config.warmup_frames)?;

    let embedder = OnnxEmbedder::from_model_dir(&config.model_dir, config.embedding_dim)
        .with_context(|| {
            format!("failed to load face models from {}", config.model_dir.display())
        })?;
    tracing::info!(dir = %config.model_dir.display(), "face models loaded");

    let store = ProfileStore::open(&config.db_path)
        .await
        .with_context(|| format!("failed to open profile store {}", config.db_path.display()))?;

    std::fs::create_dir_all(&config.dataset_dir).with_context(|| {
        format!("failed to create dataset directory {}", config.dataset_dir.display())
    })?;

    let state = Arc::new(AppState {
        store,
        capture: CaptureController::new(
            engine.clone(),
            config.dataset_dir.clone(),
            config.capture_interval,
            config.jpeg_quality,
        ),
        trainer: Trainer::new(
            Box::new(embedder),
            config.dataset_dir.clone(),
            config.encodings_path.clone(),
        ),
        engine,
        jpeg_quality: config.jpeg_quality,
    });

    let listener = tokio::net::TcpListener::bind(config.listen_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.listen_addr))?;
    tracing::info!(addr = %config.listen_addr, "facerolld ready");

    axum::serve(listener, http::router(state.clone()))
        .with_graceful_shutdown(shutdown(state))
        .await?;

    tracing::info!("facerolld stopped");
    Ok(())
}

/// Wait for Ctrl-C, then stop capture and close the camera so open
/// preview streams end and the server can drain.
async fn shutdown(state: Arc<AppState>) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
    }
    tracing::info!("facerolld shutting down");

    if let Some(subject) = state.capture.current_subject().await {
        tracing::info!(user_id = %subject.id, "stopping active capture");
    }
    state.capture.stop().await;
    if let Err(e) = state.engine.release().await {
        tracing::warn!(error = %e, "failed to release camera");
    }
}

use anyhow::{Context, Result};
use attendd::{api, spawn_engine, AppState, CameraBackend, Config};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::from_env()?;
    tracing::info!(
        bind = %config.bind,
        data_dir = %config.data_dir.display(),
        camera = %config.camera_device,
        threshold = config.match_threshold,
        "attendd starting"
    );

    let backend = CameraBackend::load(
        &config.camera_device,
        &config.scrfd_model_path(),
        &config.arcface_model_path(),
        config.detection_confidence,
    )
    .context("failed to load face models")?;
    let engine = spawn_engine(backend, config.capture_settings())?;

    let state = AppState::open(&config, engine).context("failed to load data files")?;
    {
        let users = state.users.read().await;
        let attendance = state.attendance.lock().await;
        tracing::info!(
            users = users.store().len(),
            attendance = attendance.len(),
            "data loaded"
        );
        if users.store().is_empty() {
            tracing::warn!("no users registered yet; run `attend register`");
        }
    }

    let listener = tokio::net::TcpListener::bind(config.bind)
        .await
        .with_context(|| format!("failed to bind {}", config.bind))?;
    tracing::info!(addr = %config.bind, "attendd ready");

    axum::serve(listener, api::router(state))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("attendd shutting down");
        })
        .await?;

    Ok(())
}

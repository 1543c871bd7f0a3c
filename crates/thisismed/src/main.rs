use anyhow::{Context, Result};
use std::sync::Arc;
use thisisme_core::{FsArtifactStore, LabelTable, Recognizer, ScrfdDetector};
use tracing_subscriber::EnvFilter;

mod audit;
mod config;
mod routes;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let config = config::Config::from_env()?;
    tracing::info!(
        bind = %config.bind_addr,
        model_dir = %config.model_dir.display(),
        policy = %config.policy,
        "thisismed starting"
    );

    // Fail fast: labels, detector and preloaded artifacts must all be available.
    let labels = LabelTable::load(&config.labels_path)?;
    let detector = ScrfdDetector::load(&config.detector_model)?;
    let store = FsArtifactStore::new(&config.model_dir);
    let recognizer = Arc::new(Recognizer::new(
        Arc::new(detector),
        Arc::new(store),
        labels,
        config.policy,
    ));

    for &n in &config.preload_components {
        let recognizer = Arc::clone(&recognizer);
        tokio::task::spawn_blocking(move || recognizer.preload(n))
            .await?
            .with_context(|| format!("preloading artifacts for n_components={n}"))?;
    }

    let audit = if config.audit_enabled {
        Some(audit::spawn_audit_writer(&config.db_path, config.archive_dir.clone())?)
    } else {
        tracing::info!("audit log disabled via THISISME_AUDIT_ENABLED=0");
        None
    };

    let app = routes::router(routes::AppState { recognizer, audit }, config.max_upload_bytes);
    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("binding {}", config.bind_addr))?;
    tracing::info!(addr = %listener.local_addr()?, "thisismed ready");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    tracing::info!("thisismed shutting down");
    Ok(())
}

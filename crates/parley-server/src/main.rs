mod config;

use std::sync::Arc;

use tracing::info;

use parley_api::{AppStateInner, BlobStore, router};
use parley_db::Database;
use parley_gateway::Authenticator;

use crate::config::ServerConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "parley=debug,tower_http=debug".into()),
        )
        .init();

    let config = ServerConfig::from_env()?;

    // Init database and blob storage
    let db = Arc::new(Database::open(&config.db_path)?);
    let blobs = BlobStore::new(config.upload_dir.clone(), config.public_url.clone()).await?;

    let state = AppStateInner::new(
        db,
        Authenticator::new(&config.jwt_secret),
        blobs,
        config.max_upload_bytes,
    );
    let app = router(state);

    let addr = config.addr()?;
    info!("Parley server listening on {}", addr);
    info!("Attachments served from {}/files", config.public_url);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Parley server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => info!("Received Ctrl+C, shutting down..."),
            _ = sigterm.recv() => info!("Received SIGTERM, shutting down..."),
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
        info!("Received Ctrl+C, shutting down...");
    }
}

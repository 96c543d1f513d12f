use std::sync::Arc;

use anyhow::Context;
use flowvault::blocks::BlockLibrary;
use flowvault::config::AppConfig;
use flowvault::http::{AppState, router};
use flowvault::vault::SchemaVault;
use tower_http::services::ServeDir;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .compact()
        .init();

    let config = AppConfig::from_env()?;
    let vault = SchemaVault::new(&config.store_path);
    let blocks = match &config.block_manifest {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read block manifest {}", path.display()))?;
            BlockLibrary::from_manifest(&raw)?
        }
        None => BlockLibrary::builtin(),
    };

    info!("Schema store at {}", vault.path().display());
    info!("Serving {} block templates", blocks.templates().len());

    let state = Arc::new(AppState::new(vault, blocks));
    let app = router(state).fallback_service(ServeDir::new(&config.ui_dir));

    info!("Listening on {}", config.listen_addr);
    let listener = tokio::net::TcpListener::bind(config.listen_addr)
        .await
        .context("Failed to bind listen address")?;
    axum::serve(listener, app).await.context("Server error")?;
    Ok(())
}

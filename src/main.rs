use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod config;
mod db;
mod error;
mod models;
mod routes;
mod service;
mod views;

use config::Config;
use db::TodoStore;
use service::SqliteTodoService;
use views::HomePage;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,tower_http=debug")),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;

    let store = TodoStore::open(&config.database_path)
        .context("failed to initialize storage")?
        .with_timeout(config.query_timeout);
    let service = Arc::new(SqliteTodoService::new(store.clone()));
    let app = routes::router(service, HomePage::new(config.site_title.clone()));

    let listener = tokio::net::TcpListener::bind(config.listen_addr)
        .await
        .with_context(|| format!("binding {}", config.listen_addr))?;
    info!("todoserve running on http://{}", config.listen_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    store.close()?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!("listening for shutdown signal: {err}");
        std::future::pending::<()>().await;
    }
    info!("shutting down");
}

use std::sync::Arc;

use anyhow::Context;
use safe_route::config::Config;
use safe_route::{AppState, app};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("safe_route=info,tower_http=info")),
        )
        .init();

    let config = Config::from_env()?;

    // Routing data must be present before the listener opens.
    let state = tokio::task::spawn_blocking(move || AppState::from_config(&config).map(|s| (s, config)))
        .await
        .context("loading routing data")??;
    let (state, config) = state;

    let addr = format!("{}:{}", config.bind_addr, config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    tracing::info!(%addr, "route service listening");

    axum::serve(listener, app(Arc::new(state))).await?;
    Ok(())
}

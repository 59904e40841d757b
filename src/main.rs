mod client;
mod config;
mod fetch;
mod http;
mod influx;
mod labels;
mod state;

use crate::config::Config;
use anyhow::Result;
use tokio_util::sync::CancellationToken;

fn init_tracing() -> Result<()> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,trailcam_bridge=info".into());
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .try_init()
        .map_err(|err| anyhow::anyhow!(err.to_string()))?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env()?;
    init_tracing()?;

    let http_client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(20))
        .build()?;
    let state = state::AppState::new(config.clone(), http_client);

    // Credential validation happens here; a bad login aborts startup.
    for entry_cfg in &config.entries {
        state::setup_entry(&state, entry_cfg).await?;
    }

    let cancel = CancellationToken::new();
    let mut scheduled = 0usize;
    for entry in state.entries() {
        if entry.camera_id.is_empty() {
            continue;
        }
        fetch::FetchScheduler::new(state.clone(), entry).start(cancel.clone());
        scheduled += 1;
    }
    if scheduled == 0 {
        tracing::info!("no cameras configured for auto-fetch; serving on-demand fetches only");
    }

    let app = http::router(state.clone());
    let listener = tokio::net::TcpListener::bind(&config.http_bind).await?;
    tracing::info!(bind = %config.http_bind, "trailcam-bridge HTTP listening");
    let http_handle = tokio::spawn(async move {
        axum::serve(listener, app).await.ok();
    });

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutdown signal received");
        }
        _ = http_handle => {}
    }

    cancel.cancel();
    Ok(())
}

use std::{net::SocketAddr, sync::Arc};

use anyhow::Context;
use tokio::net::TcpListener;
use tracing::info;

use server::{app, config::ServerConfig, controller::SpeechController, AppState};
use tts_core::OpenAiSpeechClient;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let _ = dotenv::dotenv();

    async_main().await
}

async fn async_main() -> anyhow::Result<()> {
    info!("Starting speech streaming server...");

    let config = ServerConfig::from_env();
    let gateway = config
        .gateway_config()
        .context("OPENAI_API_KEY must be set in the environment")?;
    info!(
        "Speech provider: {} (model {}, format {})",
        gateway.base_url,
        gateway.model,
        gateway.response_format.as_str()
    );
    let synthesizer = Arc::new(
        OpenAiSpeechClient::new(gateway).context("Failed to build speech provider client")?,
    );

    let state = AppState::new(config.clone(), synthesizer);
    let controller = state.controller.clone();

    let addr: SocketAddr = format!("0.0.0.0:{}", config.port).parse()?;
    let listener = TcpListener::bind(addr).await.map_err(|e| {
        anyhow::anyhow!("Failed to bind {addr}: {e}. Try a different PORT.")
    })?;

    info!("Server listening on http://{addr} (WebSocket at /ws)");
    axum::serve(listener, app(state))
        .with_graceful_shutdown(shutdown_signal(controller))
        .await?;

    Ok(())
}

async fn shutdown_signal(controller: SpeechController) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {e}");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
    controller.shutdown().await;
}

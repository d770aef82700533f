use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use trading_agent_runner::chat::{ModelConfig, OpenAiChatModel};
use trading_agent_runner::graph::TradingGraph;

use crate::router::{build_router, AppState};

#[derive(Debug, Parser)]
#[command(name = "trading-agent", about = "Streaming gateway for the trading analysis agent")]
pub struct Cli {
    /// Address to bind the HTTP listener to.
    #[arg(long, default_value = "0.0.0.0")]
    host: String,

    /// Port to bind the HTTP listener to.
    #[arg(long, default_value_t = 8002)]
    port: u16,

    /// Base URL of the Azure OpenAI resource.
    #[arg(long, env = "AZURE_OPENAI_ENDPOINT")]
    model_endpoint: String,

    /// API key for the Azure OpenAI resource.
    #[arg(long, env = "AZURE_OPENAI_API_KEY", hide_env_values = true)]
    model_api_key: String,

    /// Chat deployment to run completions against.
    #[arg(long, default_value = "gpt-4o-testing")]
    model_deployment: String,

    /// Azure OpenAI API version.
    #[arg(long, default_value = "2025-01-01-preview")]
    model_api_version: String,

    /// Seconds of stream silence before a heartbeat frame is sent.
    #[arg(long, default_value_t = 25)]
    heartbeat_secs: u64,
}

pub async fn run() -> Result<(), Box<dyn Error + Send + Sync>> {
    let cli = Cli::parse();
    init_tracing();

    let model = OpenAiChatModel::new(ModelConfig {
        endpoint: cli.model_endpoint,
        api_key: cli.model_api_key,
        deployment: cli.model_deployment,
        api_version: cli.model_api_version,
    })?;
    let runner = Arc::new(TradingGraph::new(Arc::new(model)));
    let state =
        AppState::new(runner).with_heartbeat(Duration::from_secs(cli.heartbeat_secs));

    let app = build_router(state)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http());

    let addr = format!("{}:{}", cli.host, cli.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(addr = %addr, "trading-agent listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for shutdown signal");
    }
}

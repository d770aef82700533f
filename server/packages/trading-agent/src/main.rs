#[tokio::main]
async fn main() {
    if let Err(err) = trading_agent::cli::run().await {
        tracing::error!(error = %err, "trading-agent failed");
        std::process::exit(1);
    }
}

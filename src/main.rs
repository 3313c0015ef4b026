use clap::Parser;
use roomcast_server::ServerConfig;

/// Room-based WebSocket message relay.
#[derive(Parser)]
#[command(name = "roomcast", version)]
struct Cli {
    /// Host to bind.
    #[arg(long, default_value = "0.0.0.0")]
    host: String,

    /// Port to listen on.
    #[arg(long, env = "PORT", default_value_t = 9010)]
    port: u16,
}

#[tokio::main]
async fn main() {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let config = ServerConfig {
        host: cli.host,
        port: cli.port,
        ..ServerConfig::default()
    };

    let handle = roomcast_server::start(config)
        .await
        .expect("Failed to start server");

    tracing::info!(port = handle.port, "Roomcast relay ready");

    // Runs until externally terminated.
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to listen for ctrl+c");

    tracing::info!("Shutting down");
}

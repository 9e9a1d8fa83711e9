//! Echo server binary

use chatty_echo::{EchoServer, ServerConfig};
use clap::Parser;

/// WebSocket echo server; repeats each message back on a schedule
#[derive(Parser, Debug)]
#[command(name = "chatty-echo-server", version, about)]
struct Args {
    /// Port to listen on
    #[arg(short, long)]
    port: u16,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let args = Args::parse();

    let config = ServerConfig::new(format!("0.0.0.0:{}", args.port));
    let mut server = EchoServer::with_config(config);

    server.start().await?;

    tokio::signal::ctrl_c().await?;

    tracing::info!("shutting down");
    server.stop().await?;

    Ok(())
}

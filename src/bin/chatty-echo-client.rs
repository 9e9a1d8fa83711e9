//! Interactive echo client binary
//!
//! Connects to a running echo server, then reads commands line by line:
//! `--msg <words...> [--times <n>] [--delay <ms>]` sends a request,
//! `--quit` closes the connection and exits. Replies are logged as they
//! arrive by the client's reader task.

use chatty_echo::{parse_command, ClientCommand, EchoClient};
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};

/// Interactive client for the WebSocket echo server
#[derive(Parser, Debug)]
#[command(name = "chatty-echo-client", version, about)]
struct Args {
    /// Port to connect to on localhost
    #[arg(short, long)]
    port: u16,
}

fn print_help() {
    println!("==============================");
    println!("Echo server message:");
    println!("  --msg <words...>   text to echo (default: empty)");
    println!("  --times <n>        repeat count (default: 1)");
    println!("  --delay <ms>       delay between echoes (default: 0)");
    println!("  --quit             close the connection and exit");
    println!("==============================");
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

    let url = format!("ws://127.0.0.1:{}/echo", args.port);
    let mut client = EchoClient::new(url);
    client.connect().await?;
    client.await_handshake().await;

    print_help();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        match parse_command(&line) {
            Ok(ClientCommand::Quit) => break,
            Ok(ClientCommand::Send(request)) => {
                tracing::info!(">> {}", request);
                if let Err(e) = client.send(&request).await {
                    tracing::warn!("{}", e);
                }
            }
            // A bad line is reported and skipped; the session stays up
            Err(e) => tracing::warn!("{}", e),
        }
    }

    tracing::warn!("Closing client");
    client.close().await?;

    Ok(())
}

//! eventnet demo driver.
//!
//! `serve` runs an unframed echo server on the engine; `send` connects to one,
//! sends each message and prints what comes back.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use bytes::Bytes;
use clap::{Parser, Subcommand};

use eventnet::config::{load_config, Config};
use eventnet::lifecycle::Shutdown;
use eventnet::net::{Engine, Event};
use eventnet::observability::{logging, metrics};

#[derive(Parser)]
#[command(name = "eventnet")]
#[command(about = "Event-driven TCP engine demo", long_about = None)]
struct Cli {
    /// Path to a TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run an echo server
    Serve {
        #[arg(short, long, default_value = "127.0.0.1:7000")]
        listen: String,
    },
    /// Send messages to a server and print the replies
    Send {
        #[arg(short, long, default_value = "127.0.0.1:7000")]
        connect: String,

        /// How long to wait for each reply, in milliseconds.
        #[arg(long, default_value_t = 2000)]
        timeout_ms: u64,

        messages: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => load_config(path)?,
        None => Config::default(),
    };
    logging::init_logging(&config.observability)?;

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let engine: Engine = Engine::with_config(config.engine.clone());

    match cli.command {
        Commands::Serve { listen } => serve(&engine, &listen).await?,
        Commands::Send {
            connect,
            timeout_ms,
            messages,
        } => send(&engine, &connect, Duration::from_millis(timeout_ms), messages).await?,
    }

    tracing::info!("Shutdown complete");
    Ok(())
}

async fn serve(engine: &Engine, address: &str) -> Result<(), Box<dyn std::error::Error>> {
    let listener = engine.listen(address, None).await?;
    tracing::info!(address = %listener.local_addr(), "Echo server listening");

    let shutdown = Shutdown::on_signal();

    loop {
        let event = tokio::select! {
            event = engine.poll_event(Duration::from_millis(500)) => event?,
            _ = shutdown.wait() => break,
        };

        match event {
            Event::NewConnection(conn) => {
                tracing::info!(connection_id = %conn.id(), remote_addr = %conn.remote_addr(), "Client connected");
            }
            Event::NewConnectionData(conn, data) => {
                if let Err(e) = engine.send_data(&conn, data).await {
                    tracing::warn!(connection_id = %conn.id(), error = %e, "Echo failed");
                }
            }
            Event::ConnectionClosed(conn) => {
                tracing::info!(connection_id = %conn.id(), "Client disconnected");
            }
            Event::ConnectionError(conn, e) => {
                tracing::warn!(connection_id = %conn.id(), error = %e, "Client connection failed");
            }
            Event::ProtoError(conn, e) => {
                tracing::warn!(connection_id = %conn.id(), error = %e, "Protocol error");
            }
            Event::Timeout => {}
        }
    }

    engine.destroy()?;
    Ok(())
}

async fn send(
    engine: &Engine,
    address: &str,
    timeout: Duration,
    messages: Vec<String>,
) -> Result<(), Box<dyn std::error::Error>> {
    let conn = engine.connect(address, None).await?;

    for message in messages {
        engine.send_data(&conn, Bytes::from(message.clone())).await?;

        let mut echoed = Vec::with_capacity(message.len());
        let deadline = Instant::now() + timeout;
        while echoed.len() < message.len() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                tracing::warn!(expected = message.len(), received = echoed.len(), "Timed out waiting for reply");
                break;
            }
            match engine.poll_event(remaining).await? {
                Event::NewConnectionData(_, data) => {
                    if let Some(bytes) = data.as_raw() {
                        echoed.extend_from_slice(bytes);
                    }
                }
                Event::ConnectionClosed(_) | Event::ConnectionError(..) => {
                    tracing::warn!("Server went away");
                    engine.destroy()?;
                    return Ok(());
                }
                _ => {}
            }
        }
        println!("{}", String::from_utf8_lossy(&echoed));
    }

    engine.close_conn(&conn);
    engine.destroy()?;
    Ok(())
}

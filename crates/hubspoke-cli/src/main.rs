use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Context;
use bytes::Bytes;
use clap::{Parser, Subcommand};
use hubspoke::{dial, HubConfig, HubId, JoinDecision, Listener, Manager, RemoteConfig};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::info;

#[derive(Parser)]
#[command(name = "hubspoke", about = "Serve a hub over TCP or join one")]
struct Cli {
    /// Keepalive interval in ms (default: $HUBSPOKE_KEEPALIVE_MS or 1000).
    #[arg(long)]
    keepalive_ms: Option<u64>,

    /// Largest accepted frame payload in bytes (default: $HUBSPOKE_MAX_FRAME_SIZE or 16 MB).
    #[arg(long)]
    max_frame_size: Option<usize>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create a hub and serve it. Each stdin line is published to every
    /// spoke and kept in the backlog for later joiners.
    Serve {
        /// Address to listen on.
        #[arg(long, default_value = "127.0.0.1:7480")]
        listen: SocketAddr,
    },

    /// Join a served hub. Messages go to stdout, stdin lines go back as
    /// feedback.
    Dial {
        /// Server address.
        #[arg(long)]
        connect: String,
        /// Hub id (32 hex digits), as printed by `serve`.
        #[arg(long)]
        hub: HubId,
        /// Join parameter passed to the hub.
        #[arg(long)]
        param: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn,hubspoke=info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let mut config = RemoteConfig::new();
    if let Some(ms) = cli.keepalive_ms {
        config = config.keepalive_interval(Duration::from_millis(ms));
    }
    if let Some(bytes) = cli.max_frame_size {
        config = config.max_frame_size(bytes);
    }

    match cli.command {
        Command::Serve { listen } => serve(listen, config).await,
        Command::Dial {
            connect,
            hub,
            param,
        } => join(&connect, hub, param, config).await,
    }
}

async fn serve(listen: SocketAddr, config: RemoteConfig) -> anyhow::Result<()> {
    let manager = Manager::spawn();
    let backlog: Arc<Mutex<Vec<Bytes>>> = Arc::default();

    let replay = backlog.clone();
    let hub = manager.new_hub(
        HubConfig::new()
            .on_join(move |spoke, param| {
                info!(%spoke, param = %String::from_utf8_lossy(param), "spoke joined");
                let backlog = replay.lock().unwrap_or_else(|e| e.into_inner());
                JoinDecision::accept(backlog.clone())
            })
            .on_leave(|spoke| info!(%spoke, "spoke left"))
            .on_feedback(|spoke, data| {
                info!(%spoke, data = %String::from_utf8_lossy(&data), "feedback");
            }),
    );

    let listener = Listener::bind(listen, manager.handle(), config)
        .await
        .with_context(|| format!("failed to listen on {listen}"))?;
    eprintln!("hubspoke v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("Listening on {}", listener.local_addr());
    eprintln!("Hub ID: {}", hub.id());
    eprintln!();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            line = lines.next_line() => {
                let Some(line) = line.context("failed to read stdin")? else {
                    // Keep serving what was published so far.
                    tokio::signal::ctrl_c().await?;
                    break;
                };
                let message = Bytes::from(line);
                let _window = hub.lock_window().await;
                backlog
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .push(message.clone());
                hub.send(message);
            }
        }
    }

    listener.close().await;
    hub.stop();
    manager.shutdown().await?;
    Ok(())
}

async fn join(
    connect: &str,
    hub: HubId,
    param: Option<String>,
    config: RemoteConfig,
) -> anyhow::Result<()> {
    let spoke = dial(connect, hub, param.map(Bytes::from), &config)
        .await
        .with_context(|| format!("failed to join hub {hub} at {connect}"))?;
    eprintln!("Joined as {}", spoke.id());

    let mut stdout = tokio::io::stdout();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                spoke.leave();
                break;
            }
            message = spoke.receive() => {
                let Some(message) = message else {
                    eprintln!("Hub closed the connection");
                    break;
                };
                stdout.write_all(&message).await?;
                stdout.write_all(b"\n").await?;
                stdout.flush().await?;
            }
            line = lines.next_line(), if stdin_open => {
                match line.context("failed to read stdin")? {
                    Some(line) => spoke.feedback(line),
                    None => stdin_open = false,
                }
            }
        }
    }
    Ok(())
}

use std::io::Write;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use launchpad_agents::{InProcessTransport, Transport};
use launchpad_models::{Envelope, LaunchpadConfig};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "launchpad", about = "Autonomous token launch and liquidity agents")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config/launchpad.toml")]
    config: String,

    /// Pretty-print outbound envelopes
    #[arg(long)]
    pretty: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // stdout carries envelopes, so logs go to stderr (respects RUST_LOG)
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let config_str = std::fs::read_to_string(&cli.config)
        .with_context(|| format!("Failed to read config: {}", cli.config))?;
    let config: LaunchpadConfig =
        toml::from_str(&config_str).with_context(|| "Failed to parse config")?;

    let cancel = CancellationToken::new();
    let (launchpad, outbox) = launchpad::spawn_agents(&config, cancel.clone())
        .await
        .context("Failed to start agents")?;

    let output = tokio::spawn(write_outbox(outbox, cli.pretty, cancel.clone()));
    let input = tokio::spawn(read_inbox(launchpad.transport.clone()));

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;
    info!("Shutting down");

    input.abort();
    launchpad.shutdown().await;
    output.await.context("Output task failed")??;
    Ok(())
}

/// Feed JSON-lines envelopes from stdin into the transport until EOF.
async fn read_inbox(transport: Arc<InProcessTransport>) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await.context("Failed to read stdin")? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let envelope: Envelope = match serde_json::from_str(line) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(error = %e, "Skipping malformed envelope");
                continue;
            }
        };
        if let Err(e) = transport.send(envelope).await {
            warn!(error = %e, "Failed to deliver envelope");
        }
    }
    info!("Input closed, agents keep running until ctrl-c");
    Ok(())
}

/// Print every envelope addressed outside the process as one JSON line.
async fn write_outbox(
    mut outbox: mpsc::Receiver<Envelope>,
    pretty: bool,
    cancel: CancellationToken,
) -> Result<()> {
    loop {
        let envelope = tokio::select! {
            _ = cancel.cancelled() => break,
            envelope = outbox.recv() => match envelope {
                Some(envelope) => envelope,
                None => break,
            },
        };
        let output = if pretty {
            serde_json::to_string_pretty(&envelope)?
        } else {
            serde_json::to_string(&envelope)?
        };
        let mut stdout = std::io::stdout().lock();
        writeln!(stdout, "{output}")?;
        stdout.flush()?;
    }
    Ok(())
}

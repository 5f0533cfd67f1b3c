//! DLP Node Binary
//!
//! Reads JSON transactions from stdin, one per line, and writes one JSON
//! receipt per line to stdout.

use dlp_node::{Config, DlpApp};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logs go to stderr, receipts own stdout
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env())
        .init();

    info!("Starting DLP node");

    let config = if let Ok(config_path) = std::env::var("DLP_NODE_CONFIG") {
        info!("Loading config from: {}", config_path);
        Config::from_file(&config_path)?
    } else {
        info!("Loading config from environment variables");
        Config::from_env()?
    };

    info!(
        "Node ID: {}, epoch size: {}, start block: {}",
        config.node_id, config.engine.epoch_size, config.engine.start_block
    );

    let app = DlpApp::new(&config)?;
    info!("State digest: {}", app.state_digest()?);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else {
                    info!("Input closed");
                    break;
                };
                if line.trim().is_empty() {
                    continue;
                }

                let receipt = app.deliver_bytes(line.as_bytes());
                let mut out = serde_json::to_vec(&receipt)?;
                out.push(b'\n');
                stdout.write_all(&out).await?;
                stdout.flush().await?;
            }
            result = signal::ctrl_c() => {
                match result {
                    Ok(()) => info!("Received shutdown signal"),
                    Err(err) => error!("Unable to listen for shutdown signal: {}", err),
                }
                break;
            }
        }
    }

    info!("Shutting down DLP node...");
    if let Some(path) = app.save_snapshot()? {
        info!("Final snapshot: {:?}", path);
    }
    info!("State digest: {}", app.state_digest()?);

    info!("DLP node stopped");
    Ok(())
}

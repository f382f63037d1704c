//! Keeper Watch CLI - feeds transaction events through the upkeep monitor

mod rpc;

use anyhow::Context;
use clap::Parser;
use keeper_monitor::{MonitorConfig, TransactionEvent, UpkeepMonitor};
use rpc::RpcSource;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "keeper-watch")]
#[command(about = "Keeper Watch - call-cadence monitoring for keeper upkeeps")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand)]
enum Commands {
    /// Process newline-delimited JSON transaction events, printing findings
    Run {
        /// Configuration file path
        #[arg(short, long, default_value = "config/keeper-watch.json")]
        config: PathBuf,
        /// Event file; stdin when omitted
        #[arg(short, long)]
        events: Option<PathBuf>,
        /// JSON-RPC endpoint
        #[arg(long, env = "KEEPER_RPC_URL")]
        rpc_url: String,
        /// Do not seed the clock from the head block
        #[arg(long)]
        no_bootstrap: bool,
    },
    /// Check configuration validity
    Check {
        /// Configuration file path
        #[arg(short, long, default_value = "config/keeper-watch.json")]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Run {
            config,
            events,
            rpc_url,
            no_bootstrap,
        } => run(&config, events.as_deref(), rpc_url, no_bootstrap).await,
        Commands::Check { config } => {
            let config = load_config(&config)?;
            println!(
                "config OK: registry {}, {} upkeep(s), periods {}/{}/{}s",
                config.registry,
                config.upkeep_ids.len(),
                config.short_period,
                config.medium_period,
                config.huge_period
            );
            Ok(())
        }
    }
}

fn load_config(path: &Path) -> anyhow::Result<MonitorConfig> {
    MonitorConfig::from_json_file(path).with_context(|| format!("loading config {}", path.display()))
}

async fn run(config: &Path, events: Option<&Path>, rpc_url: String, no_bootstrap: bool) -> anyhow::Result<()> {
    let config = load_config(config)?;
    let source = Arc::new(RpcSource::connect(&rpc_url, config.registry).context("building rpc source")?);
    let monitor = UpkeepMonitor::new(config, source)?;

    if !no_bootstrap {
        monitor
            .initialize()
            .await
            .context("reading head block for bootstrap")?;
    }

    let reader: Box<dyn AsyncBufRead + Unpin + Send> = match events {
        Some(path) => {
            let file = tokio::fs::File::open(path)
                .await
                .with_context(|| format!("opening events {}", path.display()))?;
            Box::new(BufReader::new(file))
        }
        None => Box::new(BufReader::new(tokio::io::stdin())),
    };

    let mut lines = reader.lines();
    let mut stdout = tokio::io::stdout();
    let mut line_no = 0u64;

    while let Some(line) = lines.next_line().await.context("reading events")? {
        line_no += 1;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let tx: TransactionEvent = match serde_json::from_str(line) {
            Ok(tx) => tx,
            Err(e) => {
                warn!(line = line_no, error = %e, "skipping unparsable event");
                continue;
            }
        };

        match monitor.handle_transaction(&tx).await {
            Ok(findings) => {
                for finding in findings {
                    let mut out = serde_json::to_string(&finding)?;
                    out.push('\n');
                    stdout.write_all(out.as_bytes()).await?;
                }
                stdout.flush().await?;
            }
            Err(e) => {
                error!(line = line_no, tx = %tx.hash, block = tx.block_number, error = %e, "transaction failed");
            }
        }
    }

    let status = monitor.status();
    info!(
        transactions = status.transactions,
        emitted = status.findings_emitted,
        suppressed = status.findings_suppressed,
        tracked_pairs = status.tracked_pairs,
        cache_entries = status.cache.entries,
        cache_hits = status.cache.hits,
        cache_misses = status.cache.misses,
        cache_evictions = status.cache.evictions,
        "run complete"
    );

    Ok(())
}

//! batch-sender - Exactly-Once Batch Transfers
//!
//! ```text
//! ┌──────────┐    ┌────────────┐    ┌──────────┐    ┌──────────┐
//! │  Input   │───▶│ Dispatcher │───▶│  Ledger  │    │  Store   │
//! │ (NDJSON) │    │  (slots)   │◀──▶│  (RPC)   │    │  (JSON)  │
//! └──────────┘    └─────┬──────┘    └──────────┘    └────▲─────┘
//!                       └────────────────────────────────┘
//! ```
//!
//! Every file is streamed into one dispatcher; the run ends with a drain, a summary
//! and the source account's remaining balance for each asset seen.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use dotenv::dotenv;
use tokio::fs::File;
use tokio::io::BufReader;
use tracing::{error, info, warn};

use batch_sender::config::AppConfig;
use batch_sender::input::RequestReader;
use batch_sender::logging::init_logging;
use batch_sender::shutdown::ShutdownSignal;
use batch_sender::transfer::{Dispatcher, LedgerClient, RpcLedgerClient, TransferError};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Request files, one JSON transfer per line
    #[arg(required = true)]
    files: Vec<PathBuf>,

    /// Config environment, loads config/<env>.yaml
    #[arg(short, long, default_value = "dev")]
    env: String,

    /// Explicit config file, overrides --env
    #[arg(long)]
    config: Option<PathBuf>,

    /// Parallel transfers
    #[arg(short = 'c', long)]
    concurrency: Option<usize>,

    /// Status store file
    #[arg(short = 's', long)]
    store: Option<PathBuf>,

    /// Ledger gateway JSON-RPC URL
    #[arg(short = 'r', long, env = "LEDGER_RPC_URL")]
    rpc: Option<String>,

    /// Account every transfer is paid from
    #[arg(long, env = "SOURCE_ACCOUNT")]
    source: Option<String>,

    /// Re-poll stored transfers, never submit new ones
    #[arg(long)]
    verify: bool,

    /// Resubmit stored transfers whose execution failed
    #[arg(long)]
    retry_error: bool,

    /// Log level, e.g. "debug" (RUST_LOG still wins)
    #[arg(long)]
    log_level: Option<String>,
}

impl Cli {
    fn load_config(&self) -> Result<AppConfig> {
        if let Some(path) = &self.config {
            return AppConfig::from_file(path);
        }

        let path = PathBuf::from(format!("config/{}.yaml", self.env));
        if path.exists() {
            AppConfig::from_file(&path)
        } else {
            Ok(AppConfig::default())
        }
    }

    fn apply_overrides(&self, config: &mut AppConfig) {
        let dispatcher = &mut config.dispatcher;
        if let Some(concurrency) = self.concurrency {
            dispatcher.concurrency = concurrency;
        }
        if let Some(store) = &self.store {
            dispatcher.store_path = store.clone();
        }
        if let Some(source) = &self.source {
            dispatcher.source_account = source.clone();
        }
        dispatcher.verify_confirm |= self.verify;
        dispatcher.retry_error |= self.retry_error;

        if let Some(rpc) = &self.rpc {
            config.ledger.rpc_url = rpc.clone();
        }
        if let Some(level) = &self.log_level {
            config.log_level = level.clone();
        }
    }
}

/// Why a file stopped feeding the dispatcher early
enum Halt {
    Breaker(TransferError),
    Cancelled,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // a missing .env is fine: flags and config still apply
    dotenv().ok();

    let cli = Cli::parse();
    let mut config = cli.load_config()?;
    cli.apply_overrides(&mut config);

    let _guard = init_logging(&config);
    info!(
        version = env!("CARGO_PKG_VERSION"),
        git_hash = env!("GIT_HASH"),
        env = %cli.env,
        "batch-sender starting"
    );

    let ledger: Arc<dyn LedgerClient> = Arc::new(RpcLedgerClient::new(config.ledger.clone())?);
    let shutdown = Arc::new(ShutdownSignal::new());
    let dispatcher = Arc::new(
        Dispatcher::open(config.dispatcher.clone(), ledger, shutdown.clone())
            .context("Failed to start dispatcher (check --source and the store path)")?,
    );

    tokio::spawn({
        let shutdown = shutdown.clone();
        async move { shutdown.listen_for_signals().await }
    });

    let mut assets = BTreeSet::new();
    let mut halt = None;
    let mut unreadable = 0usize;

    for path in &cli.files {
        match feed_file(&dispatcher, path, &mut assets).await {
            Ok(None) => {}
            Ok(Some(stop)) => {
                halt = Some(stop);
                break;
            }
            Err(e) => {
                error!(file = %path.display(), error = ?e, "Input file failed");
                unreadable += 1;
            }
        }
    }

    info!("Input exhausted, waiting for in-flight transfers");
    let report = dispatcher.wait().await;
    report.log_summary();

    info!(records = dispatcher.store().len().await, "Status store size");
    log_balances(&dispatcher, &assets).await;

    // the breaker can also trip on the last admitted tasks
    if dispatcher.budget().is_exhausted() {
        let reason = match halt {
            Some(Halt::Breaker(e)) => e.to_string(),
            _ => format!(
                "Too many transfer errors ({}/{})",
                dispatcher.budget().failures(),
                dispatcher.budget().threshold()
            ),
        };
        error!(reason = %reason, "Batch halted by error budget");
        return Ok(ExitCode::FAILURE);
    }
    if matches!(halt, Some(Halt::Cancelled)) || shutdown.is_shutdown_requested() {
        warn!("Batch interrupted, re-run to pick up where it stopped");
        return Ok(ExitCode::from(130));
    }
    if unreadable > 0 {
        return Ok(ExitCode::FAILURE);
    }

    info!("batch-sender finished");
    Ok(ExitCode::SUCCESS)
}

/// Stream one file into the dispatcher. `Ok(Some(_))` means admission has stopped.
async fn feed_file(
    dispatcher: &Arc<Dispatcher>,
    path: &Path,
    assets: &mut BTreeSet<String>,
) -> Result<Option<Halt>> {
    let file = File::open(path)
        .await
        .with_context(|| format!("Failed to open {}", path.display()))?;
    let mut reader = RequestReader::new(BufReader::new(file));
    info!(file = %path.display(), "Reading transfer requests");

    while let Some(next) = reader.next_request().await {
        let request = match next {
            Ok(request) => request,
            Err(e) if e.is_recoverable() => {
                warn!(file = %path.display(), error = %e, "Skipping malformed request");
                continue;
            }
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to read {}", path.display()));
            }
        };

        assets.insert(request.asset.clone());
        match dispatcher.add_transfer(request).await {
            Ok(_) => {}
            Err(e @ TransferError::TooManyErrors { .. }) => return Ok(Some(Halt::Breaker(e))),
            Err(TransferError::Cancelled) => return Ok(Some(Halt::Cancelled)),
            Err(e) => return Err(e.into()),
        }
    }

    info!(file = %path.display(), lines = reader.line(), "Input file done");
    Ok(None)
}

async fn log_balances(dispatcher: &Dispatcher, assets: &BTreeSet<String>) {
    let source = dispatcher.config().source_account.as_str();
    if source.is_empty() {
        return;
    }
    for asset in assets {
        match dispatcher.ledger().balance(asset, source).await {
            Ok(amount) => info!(asset = %asset, account = source, amount = amount, "Remaining balance"),
            Err(e) => warn!(asset = %asset, error = %e, "Balance query failed"),
        }
    }
}

//! Position Engine - Main Entry Point
//!
//! Runs the execution RPC service in paper or live mode, or manages the
//! account and instrument registry stored in SQLite.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use position_engine::cache::{InMemoryTickerCache, TickerCache};
use position_engine::config::{Config, TradingMode};
use position_engine::exchange::{
    AdapterFactory, BinanceAdapterFactory, BookTickerStream, PaperExchange, Venue,
};
use position_engine::notify::{self, Notifier};
use position_engine::persistence::{SqliteStore, Store};
use position_engine::registry::{RegistryFile, RegistryHandle};
use position_engine::server::{self, ExecutionService};
use std::sync::Arc;
use tracing::{info, warn, Level};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::EnvFilter;

/// Position Engine CLI
#[derive(Parser)]
#[command(name = "position-engine")]
#[command(version, about = "Position-targeting order execution for futures strategies")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the RPC service (default)
    Serve {
        /// Override the configured bind address
        #[arg(short, long)]
        bind: Option<String>,
    },

    /// Inspect or edit the account/instrument registry
    Registry {
        #[command(subcommand)]
        action: RegistryCommand,
    },
}

#[derive(Subcommand)]
enum RegistryCommand {
    /// Print the stored accounts and instruments
    List,

    /// Load accounts and instruments from a JSON file into the store
    Import {
        /// Path to the JSON registry file
        file: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments
    let cli = Cli::parse();

    init_logging()?;

    let config = Config::load()?;
    config.validate()?;

    match cli.command.unwrap_or(Commands::Serve { bind: None }) {
        Commands::Serve { bind } => run_service(config, bind).await,
        Commands::Registry { action } => match action {
            RegistryCommand::List => list_registry(&config),
            RegistryCommand::Import { file } => import_registry(&config, &file),
        },
    }
}

async fn run_service(config: Config, bind: Option<String>) -> Result<()> {
    info!(
        "Position Engine v{} starting",
        env!("CARGO_PKG_VERSION")
    );
    log_config(&config);

    let store = Arc::new(SqliteStore::new(&config.persistence.db_path)?);
    let registry = store.load_registry()?;
    if registry.account_count() == 0 || registry.instrument_count() == 0 {
        warn!("Registry is empty, load one with `registry import <file>`");
    }

    let cache = Arc::new(InMemoryTickerCache::new());

    let factory: Arc<dyn AdapterFactory> = match config.mode {
        TradingMode::Paper => {
            info!("PAPER TRADING MODE - orders fill against the simulated ledger");
            Arc::new(PaperExchange::new(
                cache.clone(),
                config.paper.initial_balance,
                config.paper.fee_rate,
                config.execution.default_leverage,
            ))
        }
        TradingMode::Live => {
            warn!("LIVE TRADING MODE - real orders will be sent");
            Arc::new(BinanceAdapterFactory::new(config.binance.testnet))
        }
    };

    // Paper instruments are priced from the live Binance feed too.
    let mut symbols = registry.symbols_for(Venue::Binance);
    symbols.extend(registry.symbols_for(Venue::Paper));
    symbols.sort();
    symbols.dedup();

    let feed = if symbols.is_empty() {
        warn!("No instruments registered, book ticker feed not started");
        None
    } else {
        info!(count = symbols.len(), "Starting book ticker feed");
        let cache: Arc<dyn TickerCache> = cache.clone();
        Some(BookTickerStream::new(config.binance.testnet, symbols).spawn(cache))
    };

    let notifier: Arc<dyn Notifier> = Arc::from(notify::from_config(&config.notifier)?);
    info!(notifier = notifier.name(), "Trade summaries enabled");

    let service = ExecutionService::new(
        Arc::new(RegistryHandle::new(registry)),
        factory,
        cache,
        config.execution.clone(),
        config.server.max_concurrent_calls,
    )
    .with_store(store)
    .with_notifier(notifier);

    let addr = bind.unwrap_or_else(|| config.server.bind_addr.clone());
    let result = server::serve(&addr, Arc::new(service)).await;

    if let Some(feed) = feed {
        feed.abort();
    }
    info!("Position Engine stopped");
    result
}

fn list_registry(config: &Config) -> Result<()> {
    let store = SqliteStore::new(&config.persistence.db_path)?;
    let registry = store.load_registry()?;

    println!("Accounts ({}):", registry.account_count());
    let mut accounts: Vec<_> = registry.accounts().collect();
    accounts.sort_by(|a, b| a.id.cmp(&b.id));
    for account in accounts {
        println!("  {:<20} {}", account.id, account.venue);
    }

    println!("Instruments ({}):", registry.instrument_count());
    let mut instruments: Vec<_> = registry.instruments().collect();
    instruments.sort_by(|a, b| a.id.cmp(&b.id));
    for i in instruments {
        println!(
            "  {:<20} {:<8} {:<14} cv={} lot={} lev={}",
            i.id,
            i.venue.short_code(),
            i.symbol,
            i.contract_value,
            i.lot_size,
            i.leverage
                .map(|l| format!("{}x", l))
                .unwrap_or_else(|| "default".to_string())
        );
    }
    Ok(())
}

fn import_registry(config: &Config, path: &str) -> Result<()> {
    let file = RegistryFile::from_path(path)?;
    file.validate()
        .with_context(|| format!("Registry file {} is invalid", path))?;

    let store = SqliteStore::new(&config.persistence.db_path)?;
    for account in &file.accounts {
        store.upsert_account(account)?;
    }
    for instrument in &file.instruments {
        store.upsert_instrument(instrument)?;
    }

    info!(
        accounts = file.accounts.len(),
        instruments = file.instruments.len(),
        "Registry imported, send ReloadRegistry to a running service to apply"
    );
    Ok(())
}

/// Initialize logging to stdout and an hourly rolling file.
fn init_logging() -> Result<()> {
    use tracing_subscriber::fmt::writer::MakeWriterExt;

    std::fs::create_dir_all("logs")?;

    let file_appender = tracing_appender::rolling::hourly("logs", "position-engine.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    // Keep the writer guard alive for the whole process
    Box::leak(Box::new(guard));

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("position_engine=debug".parse()?)
                .add_directive(Level::INFO.into()),
        )
        .with_writer(std::io::stdout.and(file_writer))
        .with_target(true)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(true)
        .init();

    Ok(())
}

/// Log configuration on startup.
fn log_config(config: &Config) {
    let exec = &config.execution;
    info!("Configuration:");
    info!("   Mode: {:?}", config.mode);
    info!("   Bind: {}", config.server.bind_addr);
    info!("   Worker pool: {} calls", config.server.max_concurrent_calls);
    info!("   Trading budget: {}s", exec.max_trading_duration_secs);
    info!("   Slippage limit: {}, cooldown {}s", exec.max_slippage, exec.cooldown_secs);
    info!("   Diff epsilon: {}, leg tolerance {}", exec.diff_epsilon_ratio, exec.leg_tolerance);
    info!("   Basis staleness: {}s", exec.basis_staleness_secs);
    info!("   Default leverage: {}x", exec.default_leverage);
    info!("   Testnet: {}", config.binance.testnet);
    info!("   Database: {}", config.persistence.db_path);
}

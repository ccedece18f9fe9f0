mod config;

use std::sync::Arc;

use anyhow::bail;
use chrono::{NaiveDate, Utc};
use clap::{Parser, Subcommand};
use finsync_core::events::{SyncEventSink, TracingEventSink};
use finsync_core::sync::DataTypeFilter;
use finsync_core::{RunMode, RunPlan, SyncOrchestrator};
use finsync_market_data::{
    AlphaVantageProvider, DiscoverySource, FinnhubProvider, ProviderClient, RateLimiter,
    SourceFallbackResolver,
};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use config::CliConfig;

#[derive(Parser)]
#[command(name = "finsync", version, about = "Incremental market data synchronization")]
struct Cli {
    /// SQLite database file (overrides FINSYNC_DB_PATH)
    #[arg(long, global = true)]
    db: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Ask discovery sources for new symbols and admit the valid ones
    Discover,
    /// Validate symbols still pending admission
    Validate,
    /// Fetch stale data for active symbols
    Sync {
        /// all, prices, dividends, or a comma-separated list of data types
        #[arg(long, default_value = "all")]
        data_types: DataTypeFilter,
        /// Ignore cursors and staleness windows
        #[arg(long)]
        full_refresh: bool,
    },
    /// Re-check excluded symbols and re-admit the ones that have data again
    ReclassifyExclusions,
    /// Scheduled daily run; extra phases follow the calendar
    Run {
        /// Schedule date (defaults to today, UTC)
        #[arg(long)]
        date: Option<NaiveDate>,
        #[arg(long)]
        full_refresh: bool,
    },
    /// Inspect or edit the exclusion list
    #[command(subcommand)]
    Exclusions(ExclusionCommands),
}

#[derive(Subcommand)]
enum ExclusionCommands {
    /// Print every excluded symbol
    List,
    /// Drop a symbol's exclusion and re-admit it
    Remove { symbol: String },
}

pub fn init_tracing() {
    let log_format = std::env::var("FINSYNC_LOG_FORMAT").unwrap_or_else(|_| "text".to_string());
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);

    if log_format.eq_ignore_ascii_case("json") {
        registry
            .with(fmt::layer().json().with_current_span(false))
            .init();
    } else {
        registry
            .with(fmt::layer().with_target(true).with_line_number(true))
            .init();
    }
}

struct Providers {
    clients: Vec<Arc<dyn ProviderClient>>,
    sources: Vec<Arc<dyn DiscoverySource>>,
}

fn build_providers(config: &CliConfig) -> Providers {
    let mut providers = Providers {
        clients: Vec::new(),
        sources: Vec::new(),
    };

    if let Some(key) = &config.alpha_vantage_api_key {
        let provider = Arc::new(AlphaVantageProvider::new(key.clone()));
        providers.clients.push(provider.clone());
        providers.sources.push(provider);
    }
    if let Some(key) = &config.finnhub_api_key {
        let provider = Arc::new(FinnhubProvider::new(key.clone()));
        providers.clients.push(provider.clone());
        providers.sources.push(provider);
    }

    providers
}

fn build_orchestrator(config: &CliConfig, providers: Providers) -> anyhow::Result<SyncOrchestrator> {
    tracing::info!("Database path in use: {}", config.db_path);
    let stores = finsync_storage_sqlite::open_stores(&config.db_path)?;

    let mut resolver = SourceFallbackResolver::new(providers.clients, Arc::new(RateLimiter::new()))
        .with_attempt_timeout(config.attempt_timeout);
    for (data_type, order) in &config.priorities {
        resolver = resolver.with_priority(*data_type, order.clone());
    }

    let events: Arc<dyn SyncEventSink> = Arc::new(TracingEventSink);
    Ok(SyncOrchestrator::new(
        Arc::new(resolver),
        providers.sources,
        stores,
        config.policy.clone(),
        events,
    ))
}

async fn run_plan(orchestrator: &SyncOrchestrator, plan: RunPlan) -> anyhow::Result<()> {
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, finishing in-flight writes");
            trigger.cancel();
        }
    });

    let report = orchestrator.run(&plan, &cancel).await?;
    if report.cancelled || report.timed_out {
        bail!(
            "run {} stopped early after {} symbols",
            plan.mode,
            report.symbols_processed
        );
    }
    Ok(())
}

async fn exclusions(orchestrator: &SyncOrchestrator, command: ExclusionCommands) -> anyhow::Result<()> {
    let tracker = orchestrator.exclusion_tracker();
    match command {
        ExclusionCommands::List => {
            let records = tracker.list()?;
            if records.is_empty() {
                println!("No excluded symbols");
            }
            for record in records {
                println!(
                    "{:<12} {:<24} {:<6} attempts={} excluded_at={}",
                    record.symbol,
                    record.reason.to_string(),
                    if record.auto_excluded { "auto" } else { "manual" },
                    record.validation_attempts,
                    record.excluded_at.to_rfc3339(),
                );
            }
        }
        ExclusionCommands::Remove { symbol } => {
            let symbol = symbol.trim().to_ascii_uppercase();
            if !tracker.remove(&symbol).await? {
                bail!("{} is not excluded", symbol);
            }
            tracker.readmit(&symbol).await?;
            println!("Removed exclusion for {}", symbol);
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    dotenvy::dotenv().ok();
    init_tracing();
    let mut config = CliConfig::from_env()?;
    if let Some(db) = cli.db {
        config.db_path = db;
    }

    let providers = build_providers(&config);
    let has_providers = !providers.clients.is_empty();
    let orchestrator = build_orchestrator(&config, providers)?;

    let (mode, date, full_refresh) = match cli.command {
        Commands::Exclusions(command) => return exclusions(&orchestrator, command).await,
        Commands::Discover => (RunMode::Discover, None, false),
        Commands::Validate => (RunMode::Validate, None, false),
        Commands::ReclassifyExclusions => (RunMode::ReclassifyExclusions, None, false),
        Commands::Sync {
            data_types,
            full_refresh,
        } => (RunMode::Sync(data_types), None, full_refresh),
        Commands::Run { date, full_refresh } => (RunMode::Scheduled, date, full_refresh),
    };

    if !has_providers {
        bail!("no market data provider configured: set ALPHA_VANTAGE_API_KEY or FINNHUB_API_KEY");
    }

    let date = date.unwrap_or_else(|| Utc::now().date_naive());
    let plan = RunPlan::for_date(date, mode, &orchestrator.policy().schedule)
        .with_full_refresh(full_refresh);
    run_plan(&orchestrator, plan).await
}

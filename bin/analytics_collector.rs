//! # Analytics Collector
//!
//! Scheduled entry point for the pool analytics pipeline.
//!
//! ## Overview
//!
//! - `run` (default): one tiered collection pass followed by analytics
//!   recomputation; `--loop` repeats every `scheduler.interval_seconds`
//! - `backfill`: backfill a single pool to a target day count
//! - `discover`: refresh the pool listing and market statistics
//! - `position`: register a pool as an active position or watchlist entry
//!
//! ## Usage
//!
//! ```bash
//! cargo run --bin analytics_collector
//! cargo run --bin analytics_collector -- run --loop
//! cargo run --bin analytics_collector -- backfill --pool 0x88e6... --network ethereum --days 30
//! ```
//!
//! Exits non-zero only when the store cannot be reached.

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use pool_analytics_sdk::{
    analytics::AnalyticsEngine,
    backfill::{BackfillEngine, BackfillOutcome},
    database::{self, PriceSeriesStore},
    discovery::PoolDiscovery,
    orchestrator::TieredScheduler,
    providers::{DefiLlamaChartSource, DefiLlamaSource, GeckoTerminalSource, RateLimitedClient, RoutedOhlcvSource},
    rate_limiter,
    settings::Settings,
    types::{Pool, PoolRef, PositionType},
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::signal;
use tokio::time::Duration;

#[derive(Parser, Debug)]
#[command(name = "analytics_collector", about = "Pool analytics collection pipeline")]
struct Cli {
    /// Path to the configuration file
    #[arg(long, default_value = "Config.toml")]
    config: String,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run one scheduled collection pass
    Run {
        /// Override the UTC hour used for tier selection (0-23)
        #[arg(long, value_parser = clap::value_parser!(u32).range(0..24))]
        hour: Option<u32>,
        /// Keep running every scheduler.interval_seconds until Ctrl+C
        #[arg(long = "loop")]
        keep_running: bool,
    },
    /// Backfill one pool's price history
    Backfill {
        #[arg(long)]
        pool: String,
        #[arg(long)]
        network: String,
        /// Target history in days (defaults to backfill.target_days)
        #[arg(long)]
        days: Option<i64>,
    },
    /// Refresh the pool listing and market statistics
    Discover,
    /// Register a tracked pool
    Position {
        #[arg(long)]
        pool: String,
        #[arg(long)]
        network: String,
        /// active | watchlist
        #[arg(long, value_parser = parse_position_type)]
        kind: PositionType,
    },
}

fn parse_position_type(raw: &str) -> Result<PositionType, String> {
    raw.parse()
}

fn init_logging() {
    #[cfg(feature = "observability")]
    {
        tracing_subscriber::fmt().json().with_target(true).init();
    }
    #[cfg(not(feature = "observability"))]
    {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    }
}

struct Pipeline {
    store: PriceSeriesStore,
    backfill: Arc<BackfillEngine>,
    analytics: Arc<AnalyticsEngine>,
    discovery: Arc<PoolDiscovery>,
}

fn build_pipeline(store: PriceSeriesStore, settings: &Settings) -> Result<Pipeline> {
    let quota = rate_limiter::global_quota(settings.performance.global_qps_limit);
    let gecko = Arc::new(RateLimitedClient::from_config(
        "geckoterminal",
        &settings.providers.geckoterminal,
        quota.clone(),
    )?);
    let llama = Arc::new(RateLimitedClient::from_config(
        "defillama",
        &settings.providers.defillama,
        quota,
    )?);

    // Discovered pools are keyed by listing id and only have chart history
    let ohlcv = Arc::new(RoutedOhlcvSource::new(
        Arc::new(GeckoTerminalSource::new(gecko, settings.backfill.timeframe.clone())),
        Arc::new(DefiLlamaChartSource::new(llama.clone())),
    ));
    let listing = Arc::new(DefiLlamaSource::new(llama));

    Ok(Pipeline {
        backfill: Arc::new(BackfillEngine::new(store.clone(), ohlcv, settings)),
        analytics: Arc::new(AnalyticsEngine::new(store.clone(), settings)),
        discovery: Arc::new(PoolDiscovery::new(store.clone(), listing, settings.discovery.clone())),
        store,
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    init_logging();

    let cli = Cli::parse();
    let settings = Settings::from_file(&cli.config).context("failed to load settings")?;

    #[cfg(feature = "observability")]
    if settings.metrics.enabled {
        pool_analytics_sdk::metrics::install_exporter(settings.metrics.port)?;
        println!("📈 Prometheus exporter listening on :{}", settings.metrics.port);
    }

    let store = database::connect(&settings.database)
        .await
        .context("analytics store is unreachable")?;
    let pipeline = build_pipeline(store, &settings)?;

    match cli.command.unwrap_or(Command::Run {
        hour: None,
        keep_running: false,
    }) {
        Command::Run { hour, keep_running } => run(pipeline, settings, hour, keep_running).await,
        Command::Backfill { pool, network, days } => {
            let target = days.unwrap_or(settings.backfill.target_days);
            let pool = pipeline
                .store
                .get_pool(&pool)
                .await?
                .unwrap_or_else(|| Pool::new(pool.clone(), network.clone(), "unknown"));
            match pipeline.backfill.backfill(&pool, target).await {
                BackfillOutcome::Sufficient { days_covered } => {
                    println!("✅ {} already has {:.1} days of history", pool.pool_address, days_covered);
                }
                BackfillOutcome::Completed(s) => println!(
                    "✅ {}: {} points, {:.1} days covered, {} duplicates skipped",
                    pool.pool_address, s.data_points, s.days_covered, s.duplicates_skipped
                ),
                BackfillOutcome::Failed { reason, summary } => println!(
                    "❌ {}: {} ({} points written)",
                    pool.pool_address, reason, summary.data_points
                ),
            }
            let snapshot = pipeline.analytics.refresh(&pool.pool_address, Utc::now()).await?;
            println!(
                "📊 {}: recommendation={} fvr={:?} vol30d={:?}",
                snapshot.token_pair, snapshot.recommendation, snapshot.fvr, snapshot.volatility_30d
            );
            Ok(())
        }
        Command::Discover => {
            match pipeline.discovery.refresh(Utc::now()).await {
                Ok(s) => println!("🔍 {} listed, {} accepted, {} stored", s.listed, s.accepted, s.stored),
                Err(e) => eprintln!("⚠️ Discovery failed: {:#}", e),
            }
            Ok(())
        }
        Command::Position { pool, network, kind } => {
            pipeline
                .store
                .set_position(&PoolRef::new(pool.clone(), network), kind)
                .await?;
            println!("✅ {} registered as {}", pool, kind.as_str());
            Ok(())
        }
    }
}

async fn run(pipeline: Pipeline, settings: Settings, hour: Option<u32>, keep_running: bool) -> Result<()> {
    let interval = Duration::from_secs(settings.scheduler.interval_seconds.max(1));
    let scheduler = TieredScheduler::new(
        pipeline.store.clone(),
        pipeline.backfill.clone(),
        pipeline.analytics.clone(),
        settings,
    )
    .with_discovery(pipeline.discovery.clone());

    let stop = Arc::new(AtomicBool::new(false));
    {
        let stop = stop.clone();
        tokio::spawn(async move {
            if signal::ctrl_c().await.is_ok() {
                println!("\n🛑 Shutdown signal received, finishing current pool...");
                stop.store(true, Ordering::SeqCst);
            }
        });
    }

    loop {
        let now = Utc::now();
        let summary = match hour {
            Some(h) => scheduler.run_for_hour(now, h, &stop).await?,
            None => scheduler.run(now, &stop).await?,
        };
        println!(
            "📋 poolsProcessed={} poolsSucceeded={} duplicatesSkipped={}",
            summary.pools_processed, summary.pools_succeeded, summary.duplicates_skipped
        );

        if !keep_running || stop.load(Ordering::SeqCst) {
            break;
        }
        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = wait_for_stop(&stop) => break,
        }
    }
    Ok(())
}

async fn wait_for_stop(stop: &AtomicBool) {
    while !stop.load(Ordering::SeqCst) {
        tokio::time::sleep(Duration::from_millis(250)).await;
    }
}

//! # Tiered Scheduler
//!
//! The `TieredScheduler` drives one collection pass: it decides which tiers run
//! at the invocation hour, collects every selected pool sequentially and then
//! recomputes analytics for pools whose snapshot is missing or stale.
//!
//! ## Overview
//!
//! - **Tier 1** (active positions): every pass
//! - **Tier 2** (watchlist): when `hour % 6 == 0`
//! - **Tier 3** (top pools by TVL): at 06:00 UTC, excluding Tier 1/2 pools,
//!   optionally after a discovery refresh
//!
//! Pools are processed in tier order with an explicit delay between them.
//! A failing pool is counted and skipped; only an unreachable store aborts
//! the pass. Cancellation is checked between pools.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use pool_analytics_sdk::orchestrator::TieredScheduler;
//! use std::sync::atomic::AtomicBool;
//!
//! # async fn example(scheduler: TieredScheduler) -> anyhow::Result<()> {
//! let stop = AtomicBool::new(false);
//! let summary = scheduler.run(chrono::Utc::now(), &stop).await?;
//! println!("{} pools processed", summary.pools_processed);
//! # Ok(())
//! # }
//! ```

use crate::{
    analytics::AnalyticsEngine,
    backfill::{BackfillEngine, BackfillOutcome, BackfillSummary},
    database::PriceSeriesStore,
    discovery::PoolDiscovery,
    errors::{BackfillError, StorageError},
    metrics,
    pool_priority_classifier::{assign_tiers, tiers_for_hour, Tier, TierPlan},
    settings::Settings,
    types::{Pool, PoolRef, PositionType},
};
use anyhow::{Context, Result};
use chrono::{DateTime, Duration as ChronoDuration, Timelike, Utc};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, info_span, warn, Instrument};

/// Counters for one scheduler pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub pools_processed: usize,
    pub pools_succeeded: usize,
    pub pools_failed: usize,
    pub duplicates_skipped: usize,
    pub data_points: usize,
    pub analytics_updated: usize,
}

/// Coordinates tier selection, per-pool collection and analytics refresh.
///
/// The store is injected; the scheduler holds no global state and can be run
/// repeatedly (see `analytics_collector run --loop`).
pub struct TieredScheduler {
    store: PriceSeriesStore,
    backfill: Arc<BackfillEngine>,
    analytics: Arc<AnalyticsEngine>,
    discovery: Option<Arc<PoolDiscovery>>,
    settings: Settings,
}

impl TieredScheduler {
    pub fn new(
        store: PriceSeriesStore,
        backfill: Arc<BackfillEngine>,
        analytics: Arc<AnalyticsEngine>,
        settings: Settings,
    ) -> Self {
        Self {
            store,
            backfill,
            analytics,
            discovery: None,
            settings,
        }
    }

    /// Sets the discovery used to refresh the listing before a Tier 3 pass.
    ///
    /// Without it Tier 3 ranks whatever market statistics are already stored.
    pub fn with_discovery(mut self, discovery: Arc<PoolDiscovery>) -> Self {
        self.discovery = Some(discovery);
        self
    }

    /// Builds the tier plan for `hour` from the stored position lists and
    /// market statistics.
    pub async fn plan(&self, hour: u32) -> Result<TierPlan> {
        let tiers = tiers_for_hour(hour);
        let active = self
            .store
            .positions(PositionType::Active)
            .await
            .context("failed to load active positions")?;
        let watchlist = self
            .store
            .positions(PositionType::Watchlist)
            .await
            .context("failed to load watchlist")?;

        let top_tvl = if tiers.contains(&Tier::TopTvl) {
            let exclude: HashSet<String> = active
                .iter()
                .chain(watchlist.iter())
                .map(|p| p.pool_address.clone())
                .collect();
            self.store
                .top_pools_by_tvl(self.settings.scheduler.tier3_cap, &exclude)
                .await
                .context("failed to rank pools by TVL")?
        } else {
            Vec::new()
        };

        Ok(assign_tiers(
            hour,
            active,
            watchlist,
            top_tvl,
            self.settings.scheduler.tier3_cap,
        ))
    }

    /// Runs one pass using the UTC hour of `now` for tier selection.
    pub async fn run(&self, now: DateTime<Utc>, stop: &AtomicBool) -> Result<RunSummary> {
        self.run_for_hour(now, now.hour(), stop).await
    }

    /// Runs one pass with an explicit tier-selection hour.
    ///
    /// # Errors
    ///
    /// Returns an error only when the store is unreachable. Provider, quality
    /// and per-pool storage failures are counted in `pools_failed`.
    pub async fn run_for_hour(&self, now: DateTime<Utc>, hour: u32, stop: &AtomicBool) -> Result<RunSummary> {
        let started = Instant::now();
        self.store.ping().await.context("analytics store is unreachable")?;

        if hour == crate::pool_priority_classifier::TOP_TVL_HOUR && self.settings.scheduler.discover_before_tier3 {
            if let Some(discovery) = &self.discovery {
                if let Err(e) = discovery.refresh(now).await {
                    warn!("⚠️ Discovery refresh failed, ranking stored stats: {:#}", e);
                }
            }
        }

        let plan = self.plan(hour).await?;
        info!(
            "🚀 Collection pass (hour {:02}): {} active, {} watchlist, {} top-TVL pools",
            hour,
            plan.active.len(),
            plan.watchlist.len(),
            plan.top_tvl.len()
        );

        if plan.is_empty() {
            info!("💤 No pools scheduled for hour {:02}", hour);
        }

        let mut summary = RunSummary::default();
        let delay = Duration::from_millis(self.settings.backfill.inter_pool_delay_ms);

        for (index, (tier, pool_ref)) in plan.iter().enumerate() {
            if stop.load(Ordering::SeqCst) {
                warn!("🛑 Stop requested, {} pools left unprocessed", plan.len() - index);
                break;
            }
            if index > 0 && !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }

            let span = info_span!("pool", tier = tier.label(), pool = %pool_ref.pool_address);
            let (written, result) = self.collect_pool(pool_ref).instrument(span).await;

            summary.pools_processed += 1;
            summary.data_points += written.data_points;
            summary.duplicates_skipped += written.duplicates_skipped;
            match result {
                Ok(()) => summary.pools_succeeded += 1,
                Err(e) => {
                    summary.pools_failed += 1;
                    warn!("❌ [{}] {} failed: {}", tier, pool_ref.pool_address, e);
                    if matches!(e, BackfillError::Storage(StorageError::Database(_))) {
                        self.store
                            .ping()
                            .await
                            .context("analytics store became unreachable")?;
                    }
                }
            }
        }

        if !stop.load(Ordering::SeqCst) {
            let stale_before = now - ChronoDuration::hours(self.settings.scheduler.analytics_freshness_hours);
            let pending = self
                .store
                .pools_needing_analytics(stale_before)
                .await
                .context("failed to list pools needing analytics")?;
            summary.analytics_updated = self.analytics.recompute(&pending, now).await.updated;
        }

        info!(
            "✅ Pass complete in {:?}: processed={} succeeded={} failed={} points={} duplicates={} analytics={}",
            started.elapsed(),
            summary.pools_processed,
            summary.pools_succeeded,
            summary.pools_failed,
            summary.data_points,
            summary.duplicates_skipped,
            summary.analytics_updated
        );
        metrics::record_scheduler_run(started.elapsed());
        Ok(summary)
    }

    /// Latest page first, then backfill toward the target. Counts written
    /// before a failure are still returned.
    async fn collect_pool(&self, pool_ref: &PoolRef) -> (BackfillSummary, Result<(), BackfillError>) {
        let mut written = BackfillSummary::default();

        let pool = match self.resolve_pool(pool_ref).await {
            Ok(pool) => pool,
            Err(e) => return (written, Err(e.into())),
        };

        match self.backfill.collect_latest(&pool).await {
            Ok(latest) => written.absorb(&latest),
            Err(e) => return (written, Err(e)),
        }

        match self.backfill.backfill(&pool, self.backfill.target_days()).await {
            BackfillOutcome::Sufficient { .. } => (written, Ok(())),
            BackfillOutcome::Completed(summary) => {
                written.absorb(&summary);
                (written, Ok(()))
            }
            BackfillOutcome::Failed { reason, summary } => {
                written.absorb(&summary);
                (written, Err(reason))
            }
        }
    }

    /// Stored metadata for a tracked pool, or a bare identity for pools that
    /// were registered before discovery saw them.
    async fn resolve_pool(&self, pool_ref: &PoolRef) -> Result<Pool, StorageError> {
        Ok(self
            .store
            .get_pool(&pool_ref.pool_address)
            .await?
            .unwrap_or_else(|| Pool::new(pool_ref.pool_address.clone(), pool_ref.network.clone(), "unknown")))
    }
}

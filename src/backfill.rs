//! # Backfill Engine
//!
//! Paginated historical ingestion for a single pool up to a target number of
//! days, plus the incremental "latest page" collection the scheduler runs
//! every pass.
//!
//! Per pool the engine walks:
//!
//! 1. **CheckCoverage**: stored span already covers the target, no network.
//! 2. **SaveMetadata**: the pool row is upserted before any price write.
//! 3. **FetchPage**: one OHLCV page, retried with linear backoff
//!    (`retry_base_ms * attempt`) on retryable provider errors. Candles that
//!    have not closed yet are dropped so a partial bar is never stored.
//! 4. **Validate**: close prices go through the [`DataValidator`]. A failed
//!    check stops the pool and is not retried.
//! 5. **Persist**: candles become price points with their log return; every
//!    insert is its own statement and duplicates are only counted.
//! 6. **Summarize**: points written, days covered, duplicates skipped.
//!
//! Pages walk backwards from the oldest stored point until the target is
//! reached, a page is empty or adds nothing, or `max_pages` is hit.

use crate::analytics::volatility::log_return;
use crate::data_validator::{DataValidator, SampleKind};
use crate::database::PriceSeriesStore;
use crate::errors::{BackfillError, ProviderError};
use crate::metrics;
use crate::providers::OhlcvSource;
use crate::settings::{self, Settings};
use crate::types::{Candle, Pool, PoolRef, PriceDataPoint};
use chrono::{TimeZone, Utc};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_retry::RetryIf;
use tracing::{debug, info, info_span, warn, Instrument};

/// What one collection step wrote.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BackfillSummary {
    pub data_points: usize,
    pub days_covered: f64,
    pub duplicates_skipped: usize,
}

impl BackfillSummary {
    pub fn absorb(&mut self, other: &BackfillSummary) {
        self.data_points += other.data_points;
        self.duplicates_skipped += other.duplicates_skipped;
        self.days_covered = self.days_covered.max(other.days_covered);
    }
}

/// Result of backfilling one pool.
#[derive(Debug)]
pub enum BackfillOutcome {
    /// Stored history already spans the target; nothing was fetched.
    Sufficient { days_covered: f64 },
    Completed(BackfillSummary),
    /// Stopped early. Points written before the failure stay stored.
    Failed {
        reason: BackfillError,
        summary: BackfillSummary,
    },
}

impl BackfillOutcome {
    pub fn is_success(&self) -> bool {
        !matches!(self, BackfillOutcome::Failed { .. })
    }

    pub fn label(&self) -> &'static str {
        match self {
            BackfillOutcome::Sufficient { .. } => "sufficient",
            BackfillOutcome::Completed(_) => "completed",
            BackfillOutcome::Failed { .. } => "failed",
        }
    }

    pub fn summary(&self) -> Option<&BackfillSummary> {
        match self {
            BackfillOutcome::Sufficient { .. } => None,
            BackfillOutcome::Completed(summary) | BackfillOutcome::Failed { summary, .. } => Some(summary),
        }
    }
}

/// Counts for one persisted page.
#[derive(Debug, Default, Clone, Copy)]
struct PageWrite {
    inserted: usize,
    duplicates: usize,
}

pub struct BackfillEngine {
    store: PriceSeriesStore,
    source: Arc<dyn OhlcvSource>,
    validator: DataValidator,
    cfg: settings::Backfill,
}

impl BackfillEngine {
    pub fn new(store: PriceSeriesStore, source: Arc<dyn OhlcvSource>, settings: &Settings) -> Self {
        Self {
            store,
            source,
            validator: DataValidator::new(settings),
            cfg: settings.backfill.clone(),
        }
    }

    pub fn target_days(&self) -> i64 {
        self.cfg.target_days
    }

    /// Backfills `pool` until its stored history spans `target_days`.
    pub async fn backfill(&self, pool: &Pool, target_days: i64) -> BackfillOutcome {
        let span = info_span!("backfill", pool = %pool.pool_address, network = %pool.network);
        async move {
            let mut summary = BackfillSummary::default();
            let outcome = match self.run_backfill(pool, target_days as f64, &mut summary).await {
                Ok(None) => BackfillOutcome::Completed(summary),
                Ok(Some(days_covered)) => BackfillOutcome::Sufficient { days_covered },
                Err(reason) => BackfillOutcome::Failed { reason, summary },
            };

            match &outcome {
                BackfillOutcome::Sufficient { days_covered } => {
                    debug!("Coverage {:.1}d already meets target {}d", days_covered, target_days);
                }
                BackfillOutcome::Completed(s) => info!(
                    "✅ Backfill done: {} points, {:.1} days covered, {} duplicates",
                    s.data_points, s.days_covered, s.duplicates_skipped
                ),
                BackfillOutcome::Failed { reason, summary } => warn!(
                    "❌ Backfill failed after {} points: {}",
                    summary.data_points, reason
                ),
            }
            metrics::increment_backfill_outcome(outcome.label());
            outcome
        }
        .instrument(span)
        .await
    }

    /// Returns `Some(days)` when coverage was already sufficient.
    async fn run_backfill(
        &self,
        pool: &Pool,
        target_days: f64,
        summary: &mut BackfillSummary,
    ) -> Result<Option<f64>, BackfillError> {
        let coverage = self.store.coverage(&pool.pool_address).await?;
        if coverage.day_span >= target_days {
            return Ok(Some(coverage.day_span));
        }
        summary.days_covered = coverage.day_span;

        self.store.upsert_pool(pool).await?;

        let pool_ref = PoolRef::new(pool.pool_address.clone(), pool.network.clone());
        let mut before = coverage.oldest.map(|t| t.timestamp());

        for page in 1..=self.cfg.max_pages {
            let candles = self.fetch_closed(&pool_ref, before).await?;
            if candles.is_empty() {
                debug!("Page {} empty, history exhausted", page);
                break;
            }

            self.validate_page(&candles)?;
            let written = self.persist(pool, &candles).await?;
            summary.data_points += written.inserted;
            summary.duplicates_skipped += written.duplicates;

            let coverage = self.store.coverage(&pool.pool_address).await?;
            summary.days_covered = coverage.day_span;
            debug!(
                "Page {}: {} new, {} duplicates, {:.1}/{}d covered",
                page, written.inserted, written.duplicates, coverage.day_span, target_days
            );

            if coverage.day_span >= target_days || written.inserted == 0 {
                break;
            }
            before = coverage.oldest.map(|t| t.timestamp());
        }
        Ok(None)
    }

    /// Fetches the newest page and stores whatever is new.
    pub async fn collect_latest(&self, pool: &Pool) -> Result<BackfillSummary, BackfillError> {
        let span = info_span!("collect", pool = %pool.pool_address, network = %pool.network);
        async move {
            self.store.upsert_pool(pool).await?;
            let pool_ref = PoolRef::new(pool.pool_address.clone(), pool.network.clone());

            let candles = self.fetch_closed(&pool_ref, None).await?;
            let mut summary = BackfillSummary::default();
            if !candles.is_empty() {
                self.validate_page(&candles)?;
                let written = self.persist(pool, &candles).await?;
                summary.data_points = written.inserted;
                summary.duplicates_skipped = written.duplicates;
            }
            summary.days_covered = self.store.coverage(&pool.pool_address).await?.day_span;
            debug!(
                "Latest page: {} new, {} duplicates",
                summary.data_points, summary.duplicates_skipped
            );
            Ok(summary)
        }
        .instrument(span)
        .await
    }

    /// One page with any still-open candle removed.
    async fn fetch_closed(&self, pool: &PoolRef, before: Option<i64>) -> Result<Vec<Candle>, BackfillError> {
        let mut candles = self.fetch_with_retry(pool, before).await?;
        if let Some(seconds) = self.source.candle_seconds(pool) {
            let now = Utc::now().timestamp();
            let fetched = candles.len();
            candles.retain(|c| c.timestamp.saturating_add(seconds) <= now);
            if candles.len() < fetched {
                debug!("Dropped {} open candle(s)", fetched - candles.len());
            }
        }
        Ok(candles)
    }

    async fn fetch_with_retry(&self, pool: &PoolRef, before: Option<i64>) -> Result<Vec<Candle>, BackfillError> {
        let strategy = backoff_schedule(self.cfg.retry_base_ms, self.cfg.max_retries);
        let attempts = AtomicUsize::new(0);
        let limit = self.cfg.page_limit;
        let max_attempts = self.cfg.max_retries + 1;

        RetryIf::start(
            strategy,
            || {
                let attempt = attempts.fetch_add(1, Ordering::Relaxed) + 1;
                let source = &self.source;
                async move {
                    let result = source.fetch_page(pool, before, limit).await;
                    if let Err(e) = &result {
                        if e.is_retryable() && attempt < max_attempts {
                            warn!("⚠️ OHLCV fetch failed (attempt {}/{}): {}", attempt, max_attempts, e);
                        }
                    }
                    result
                }
            },
            |e: &ProviderError| e.is_retryable(),
        )
        .await
        .map_err(|source| BackfillError::Provider {
            attempts: attempts.load(Ordering::Relaxed),
            source,
        })
    }

    fn validate_page(&self, candles: &[Candle]) -> Result<(), BackfillError> {
        let closes: Vec<Option<f64>> = candles.iter().map(|c| Some(c.close)).collect();
        self.validator.validate(&closes, SampleKind::Prices).into_result()?;
        Ok(())
    }

    /// Writes ascending candles; the first candle's return is taken against
    /// the latest stored point before it.
    async fn persist(&self, pool: &Pool, candles: &[Candle]) -> Result<PageWrite, BackfillError> {
        let mut written = PageWrite::default();
        let Some(first) = candles.first() else {
            return Ok(written);
        };

        let mut previous_price = match Utc.timestamp_opt(first.timestamp, 0).single() {
            Some(first_ts) => self
                .store
                .previous_point(&pool.pool_address, first_ts)
                .await?
                .map(|p| p.price),
            None => None,
        };

        for candle in candles {
            if !(candle.close.is_finite() && candle.close > 0.0) {
                continue;
            }
            let Some(timestamp) = Utc.timestamp_opt(candle.timestamp, 0).single() else {
                continue;
            };

            let point = PriceDataPoint {
                timestamp,
                pool_address: pool.pool_address.clone(),
                network: pool.network.clone(),
                price: candle.close,
                volume_usd: if candle.volume.is_finite() && candle.volume > 0.0 {
                    candle.volume
                } else {
                    0.0
                },
                log_return: previous_price.and_then(|prev| log_return(prev, candle.close)),
            };

            if self.store.insert_price_point(&point).await?.is_duplicate() {
                written.duplicates += 1;
            } else {
                written.inserted += 1;
            }
            previous_price = Some(candle.close);
        }

        metrics::increment_price_points(written.inserted as u64, written.duplicates as u64);
        Ok(written)
    }
}

/// Linear backoff: `base`, `2 * base`, ... for each retry.
fn backoff_schedule(base_ms: u64, max_retries: usize) -> impl Iterator<Item = Duration> {
    (1..=max_retries as u64).map(move |n| Duration::from_millis(base_ms.saturating_mul(n)))
}

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use tracing::{debug, info, warn};

use super::fees::{classify, fee_to_volatility_ratio, il_risk_score, pool_fee_apr, position_fee_apr};
use super::impermanent_loss::{breakeven_fee_apr, expected_il_rate};
use super::volatility::{annualized_volatility, infer_frequency, rolling_volatility, MIN_RETURNS_FOR_ROLLING};
use crate::data_validator::{DataValidator, SampleKind};
use crate::database::PriceSeriesStore;
use crate::errors::StorageResult;
use crate::metrics;
use crate::settings::{self, Settings};
use crate::types::{MarketStats, Pool, PoolAnalyticsSnapshot, VolatilityWindow};

/// Outcome of one recomputation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecomputeSummary {
    pub updated: usize,
    pub failed: usize,
}

/// Turns stored series into analytics snapshots.
///
/// Never mutates price history. Anything that cannot be computed yields
/// `insufficient_data` rather than an error; only storage failures surface.
pub struct AnalyticsEngine {
    store: PriceSeriesStore,
    validator: DataValidator,
    cfg: settings::Analytics,
}

impl AnalyticsEngine {
    pub fn new(store: PriceSeriesStore, settings: &Settings) -> Self {
        Self {
            store,
            validator: DataValidator::new(settings),
            cfg: settings.analytics.clone(),
        }
    }

    /// Computes the snapshot for one pool without writing it.
    pub async fn compute_snapshot(&self, pool_address: &str, now: DateTime<Utc>) -> StorageResult<PoolAnalyticsSnapshot> {
        let series = self.store.query_series(pool_address, None, None).await?;
        let coverage = self.store.coverage(pool_address).await?;
        let market = self.store.market_stats(pool_address).await?;
        let pool = match self.store.get_pool(pool_address).await? {
            Some(pool) => pool,
            None => {
                let network = series.first().map(|p| p.network.clone()).unwrap_or_default();
                Pool::new(pool_address, network, "unknown")
            }
        };

        let insufficient = || PoolAnalyticsSnapshot::insufficient(&pool, market.as_ref(), coverage.count, now);

        if coverage.day_span < self.cfg.min_history_days as f64 {
            debug!(
                "{}: {:.1}d of history, need {}d",
                pool_address, coverage.day_span, self.cfg.min_history_days
            );
            return Ok(insufficient());
        }

        // The first stored point has no predecessor to return against
        let samples: Vec<Option<f64>> = series.iter().skip(1).map(|p| p.log_return).collect();
        let report = self.validator.validate(&samples, SampleKind::Returns);
        if !report.valid {
            debug!(
                "{}: returns rejected: {}",
                pool_address,
                report.error.as_deref().unwrap_or("invalid")
            );
            return Ok(insufficient());
        }
        let returns: Vec<f64> = samples.into_iter().flatten().filter(|r| r.is_finite()).collect();

        let timestamps: Vec<DateTime<Utc>> = series.iter().map(|p| p.timestamp).collect();
        let Some(frequency) = infer_frequency(&timestamps) else {
            return Ok(insufficient());
        };

        let rolling = rolling_volatility(&returns, frequency);
        let volatility_1d = rolling.get(&VolatilityWindow::OneDay).copied();
        let volatility_7d = rolling.get(&VolatilityWindow::SevenDays).copied();
        let volatility_30d = rolling.get(&VolatilityWindow::ThirtyDays).copied();
        let reference_volatility = volatility_30d.or(volatility_7d).or_else(|| {
            (returns.len() >= MIN_RETURNS_FOR_ROLLING)
                .then(|| annualized_volatility(&returns, frequency))
                .flatten()
        });

        let fee_apr_pool = fee_apr(&pool, market.as_ref());
        let fee_apr_position = position_fee_apr(fee_apr_pool, None, None);

        let fvr = reference_volatility.map(|vol| fee_to_volatility_ratio(fee_apr_position, Some(vol)));
        let expected_il = expected_il_rate(reference_volatility, self.cfg.concentration_multiplier);

        Ok(PoolAnalyticsSnapshot {
            pool_address: pool.pool_address.clone(),
            network: pool.network.clone(),
            token_pair: pool.token_pair.clone(),
            tvl_usd: market.as_ref().map(|m| m.tvl_usd),
            volume_24h: market.as_ref().and_then(|m| m.volume_24h),
            apy_base: market.as_ref().and_then(|m| m.apy_base),
            volatility_1d,
            volatility_7d,
            volatility_30d,
            fee_apr_pool,
            fee_apr_position,
            fvr,
            recommendation: classify(fvr),
            il_risk_score: il_risk_score(fvr),
            expected_il_rate: expected_il,
            breakeven_fee_apr: breakeven_fee_apr(expected_il),
            data_points_count: coverage.count,
            last_updated: now,
        })
    }

    /// Computes and stores the snapshot for one pool.
    pub async fn refresh(&self, pool_address: &str, now: DateTime<Utc>) -> StorageResult<PoolAnalyticsSnapshot> {
        let snapshot = self.compute_snapshot(pool_address, now).await?;
        self.store.upsert_analytics(&snapshot).await?;
        metrics::increment_analytics_snapshot(snapshot.recommendation.as_str());
        debug!(
            "📊 {} ({}): fvr={:?} vol30d={:?} → {}",
            snapshot.token_pair, pool_address, snapshot.fvr, snapshot.volatility_30d, snapshot.recommendation
        );
        Ok(snapshot)
    }

    /// Refreshes `pools` with bounded concurrency. Per-pool failures are
    /// logged and counted, never propagated.
    pub async fn recompute(&self, pools: &[String], now: DateTime<Utc>) -> RecomputeSummary {
        if pools.is_empty() {
            return RecomputeSummary::default();
        }
        let concurrency = self.cfg.max_concurrency.max(1);

        let results: Vec<(&String, StorageResult<PoolAnalyticsSnapshot>)> = stream::iter(pools.iter())
            .map(|address| async move { (address, self.refresh(address, now).await) })
            .buffer_unordered(concurrency)
            .collect()
            .await;

        let mut summary = RecomputeSummary::default();
        for (address, result) in results {
            match result {
                Ok(_) => summary.updated += 1,
                Err(e) => {
                    warn!("⚠️ Analytics recompute failed for {}: {}", address, e);
                    summary.failed += 1;
                }
            }
        }
        info!(
            "📊 Analytics recomputed: {} updated, {} failed",
            summary.updated, summary.failed
        );
        summary
    }
}

/// Pool fee APR from the fee tier and latest volume/TVL, falling back to the
/// listing's fee-only APY.
fn fee_apr(pool: &Pool, market: Option<&MarketStats>) -> f64 {
    let Some(market) = market else { return 0.0 };
    match (pool.fee_tier, market.volume_24h) {
        (Some(fee_tier), Some(volume)) if market.tvl_usd > 0.0 => {
            pool_fee_apr(Some(volume * fee_tier), Some(market.tvl_usd))
        }
        _ => market.apy_base.map(|apy| apy / 100.0).unwrap_or(0.0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analytics::volatility::log_return;
    use crate::types::{PriceDataPoint, Recommendation};
    use chrono::{Duration, TimeZone};

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    /// Hourly series alternating between 100 and 101.
    async fn seed_hourly(store: &PriceSeriesStore, pool: &str, hours: i64) {
        let mut previous: Option<f64> = None;
        for h in 0..hours {
            let price = if h % 2 == 0 { 100.0 } else { 101.0 };
            let point = PriceDataPoint {
                timestamp: start() + Duration::hours(h),
                pool_address: pool.to_string(),
                network: "ethereum".to_string(),
                price,
                volume_usd: 1_000.0,
                log_return: previous.and_then(|p| log_return(p, price)),
            };
            store.insert_price_point(&point).await.unwrap();
            previous = Some(price);
        }
    }

    fn market(tvl: f64, volume: Option<f64>, apy_base: Option<f64>) -> MarketStats {
        MarketStats {
            tvl_usd: tvl,
            volume_24h: volume,
            apy_base,
            updated_at: start(),
        }
    }

    #[tokio::test]
    async fn test_short_history_is_insufficient() {
        let store = PriceSeriesStore::in_memory().await.unwrap();
        store.upsert_pool(&Pool::new("0xpool", "ethereum", "WETH-USDC")).await.unwrap();
        seed_hourly(&store, "0xpool", 24 * 3).await;

        let engine = AnalyticsEngine::new(store, &Settings::default());
        let snapshot = engine.compute_snapshot("0xpool", start()).await.unwrap();
        assert_eq!(snapshot.recommendation, Recommendation::InsufficientData);
        assert_eq!(snapshot.data_points_count, 72);
        assert!(snapshot.fvr.is_none());
        assert!(snapshot.il_risk_score.is_none());
        assert_eq!(snapshot.fee_apr_pool, 0.0);
    }

    #[tokio::test]
    async fn test_snapshot_from_fee_tier_and_volume() {
        let store = PriceSeriesStore::in_memory().await.unwrap();
        let pool = Pool::new("0xpool", "ethereum", "WETH-USDC").with_fee_tier(0.003);
        store.upsert_pool(&pool).await.unwrap();
        store
            .upsert_market_stats("0xpool", &market(1_000_000.0, Some(1_000_000.0), Some(50.0)))
            .await
            .unwrap();
        seed_hourly(&store, "0xpool", 24 * 8 + 1).await;

        let engine = AnalyticsEngine::new(store, &Settings::default());
        let snapshot = engine.compute_snapshot("0xpool", start()).await.unwrap();

        // 192 returns: 1d and 7d windows exist, 30d does not
        assert!(snapshot.volatility_1d.is_some());
        assert!(snapshot.volatility_30d.is_none());
        let vol = snapshot.volatility_7d.unwrap();
        let r = (101.0f64 / 100.0).ln();
        let expected_vol = r * (168.0f64 / 167.0).sqrt() * 8_760f64.sqrt();
        assert!((vol - expected_vol).abs() < 1e-9);

        // 1M volume * 0.3% / 1M TVL * 365, apy_base ignored
        assert!((snapshot.fee_apr_pool - 1.095).abs() < 1e-12);
        assert_eq!(snapshot.fee_apr_position, snapshot.fee_apr_pool);

        let fvr = snapshot.fvr.unwrap();
        assert!((fvr - 1.095 / expected_vol).abs() < 1e-9);
        assert_eq!(snapshot.recommendation, classify(Some(fvr)));
        assert_eq!(snapshot.il_risk_score, il_risk_score(Some(fvr)));
        assert!((snapshot.expected_il_rate - expected_vol * expected_vol * 0.75).abs() < 1e-9);
        assert_eq!(snapshot.breakeven_fee_apr, snapshot.expected_il_rate);
        assert_eq!(snapshot.data_points_count, 193);
    }

    #[tokio::test]
    async fn test_fee_apr_falls_back_to_apy_base() {
        let store = PriceSeriesStore::in_memory().await.unwrap();
        store.upsert_pool(&Pool::new("0xpool", "ethereum", "WETH-USDC")).await.unwrap();
        store
            .upsert_market_stats("0xpool", &market(5_000_000.0, Some(2_000_000.0), Some(17.9)))
            .await
            .unwrap();
        seed_hourly(&store, "0xpool", 24 * 8 + 1).await;

        let engine = AnalyticsEngine::new(store, &Settings::default());
        let snapshot = engine.compute_snapshot("0xpool", start()).await.unwrap();
        assert!((snapshot.fee_apr_pool - 0.179).abs() < 1e-12);
        assert_eq!(snapshot.tvl_usd, Some(5_000_000.0));
        assert_eq!(snapshot.apy_base, Some(17.9));
    }

    #[tokio::test]
    async fn test_sparse_returns_are_insufficient() {
        let store = PriceSeriesStore::in_memory().await.unwrap();
        // Eight days of points with no stored returns at all
        for h in 0..(24 * 8 + 1) {
            let point = PriceDataPoint {
                timestamp: start() + Duration::hours(h),
                pool_address: "0xpool".to_string(),
                network: "ethereum".to_string(),
                price: 100.0,
                volume_usd: 0.0,
                log_return: None,
            };
            store.insert_price_point(&point).await.unwrap();
        }

        let engine = AnalyticsEngine::new(store, &Settings::default());
        let snapshot = engine.compute_snapshot("0xpool", start()).await.unwrap();
        assert_eq!(snapshot.recommendation, Recommendation::InsufficientData);
        assert_eq!(snapshot.network, "ethereum");
    }

    #[tokio::test]
    async fn test_recompute_writes_snapshots() {
        let store = PriceSeriesStore::in_memory().await.unwrap();
        for pool in ["0xa", "0xb", "0xc"] {
            store.upsert_pool(&Pool::new(pool, "ethereum", "WETH-USDC")).await.unwrap();
            seed_hourly(&store, pool, 24 * 8 + 1).await;
        }
        let now = start() + Duration::days(9);
        let pending = store.pools_needing_analytics(now - Duration::days(1)).await.unwrap();
        assert_eq!(pending.len(), 3);

        let engine = AnalyticsEngine::new(store.clone(), &Settings::default());
        let summary = engine.recompute(&pending, now).await;
        assert_eq!(summary, RecomputeSummary { updated: 3, failed: 0 });

        assert!(store.pools_needing_analytics(now - Duration::days(1)).await.unwrap().is_empty());
        let stored = store.load_analytics("0xb").await.unwrap().unwrap();
        assert_eq!(stored.last_updated, now);
        assert_eq!(stored.data_points_count, 193);
    }
}

//! Pool discovery from the upstream listing.
//!
//! Pulls the listing, keeps records above the TVL floor on allowed chains and
//! projects, and upserts the pool row plus its latest market statistics. The
//! statistics feed Tier 3 ranking and fee APR.

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use log::{debug, info, warn};

use crate::database::PriceSeriesStore;
use crate::providers::PoolListingSource;
use crate::settings::Discovery;
use crate::types::{MarketStats, Pool, PoolListing};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiscoverySummary {
    pub listed: usize,
    pub accepted: usize,
    pub stored: usize,
}

fn matches_any(value: &str, allowed: &[String]) -> bool {
    allowed.is_empty() || allowed.iter().any(|a| a.eq_ignore_ascii_case(value))
}

/// Filters the listing and ranks what is left by TVL, largest first.
pub fn select_listings(listings: Vec<PoolListing>, cfg: &Discovery) -> Vec<PoolListing> {
    let mut selected: Vec<PoolListing> = listings
        .into_iter()
        .filter(|l| l.tvl_usd.is_finite() && l.tvl_usd >= cfg.min_tvl_usd)
        .filter(|l| matches_any(&l.chain, &cfg.chains))
        .filter(|l| matches_any(&l.project, &cfg.projects))
        .filter(|l| !l.pool.trim().is_empty())
        .collect();

    selected.sort_by(|a, b| b.tvl_usd.total_cmp(&a.tvl_usd));
    selected.truncate(cfg.max_pools);
    selected
}

/// Maps a listing record onto the stored pool identity.
pub fn listing_to_pool(listing: &PoolListing) -> Pool {
    let pool = Pool::new(
        listing.pool.trim(),
        listing.chain.to_ascii_lowercase(),
        listing.symbol.clone(),
    )
    .with_protocol(listing.project.clone());
    match listing.fee_tier() {
        Some(fee_tier) => pool.with_fee_tier(fee_tier),
        None => pool,
    }
}

pub struct PoolDiscovery {
    store: PriceSeriesStore,
    source: Arc<dyn PoolListingSource>,
    cfg: Discovery,
}

impl PoolDiscovery {
    pub fn new(store: PriceSeriesStore, source: Arc<dyn PoolListingSource>, cfg: Discovery) -> Self {
        Self { store, source, cfg }
    }

    /// Refreshes pool rows and market statistics from the listing.
    pub async fn refresh(&self, now: DateTime<Utc>) -> Result<DiscoverySummary> {
        let listings = self
            .source
            .fetch_pools()
            .await
            .with_context(|| format!("failed to fetch pool listing from {}", self.source.name()))?;

        let listed = listings.len();
        let selected = select_listings(listings, &self.cfg);
        debug!(
            "Listing from {}: {} records, {} pass filters",
            self.source.name(),
            listed,
            selected.len()
        );

        let mut stored = 0;
        for listing in &selected {
            let pool = listing_to_pool(listing);
            let stats = MarketStats {
                tvl_usd: listing.tvl_usd,
                volume_24h: listing.volume_usd1d,
                apy_base: listing.apy_base,
                updated_at: now,
            };

            if let Err(e) = self.store.upsert_pool(&pool).await {
                warn!("⚠️ Failed to store pool {}: {}", pool.pool_address, e);
                continue;
            }
            if let Err(e) = self.store.upsert_market_stats(&pool.pool_address, &stats).await {
                warn!("⚠️ Failed to store market stats for {}: {}", pool.pool_address, e);
                continue;
            }
            stored += 1;
        }

        info!(
            "🔍 Discovery: {} listed, {} accepted, {} stored",
            listed,
            selected.len(),
            stored
        );
        Ok(DiscoverySummary {
            listed,
            accepted: selected.len(),
            stored,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ProviderError;
    use async_trait::async_trait;
    use std::collections::HashSet;

    fn listing(pool: &str, chain: &str, project: &str, tvl: f64) -> PoolListing {
        PoolListing {
            pool: pool.to_string(),
            symbol: "WETH-USDC".to_string(),
            project: project.to_string(),
            chain: chain.to_string(),
            tvl_usd: tvl,
            apy: Some(12.0),
            apy_base: Some(10.0),
            volume_usd1d: Some(5_000_000.0),
            pool_meta: Some("0.3%".to_string()),
        }
    }

    struct StaticListing(Vec<PoolListing>);

    #[async_trait]
    impl PoolListingSource for StaticListing {
        fn name(&self) -> &str {
            "static"
        }

        async fn fetch_pools(&self) -> Result<Vec<PoolListing>, ProviderError> {
            Ok(self.0.clone())
        }
    }

    #[test]
    fn test_select_filters_and_ranks() {
        let cfg = Discovery {
            min_tvl_usd: 1_000_000.0,
            chains: vec!["ethereum".to_string(), "Arbitrum".to_string()],
            projects: vec![],
            max_pools: 2,
        };
        let selected = select_listings(
            vec![
                listing("small", "Ethereum", "uniswap-v3", 10_000.0),
                listing("sol", "Solana", "orca", 90_000_000.0),
                listing("mid", "Arbitrum", "uniswap-v3", 5_000_000.0),
                listing("big", "Ethereum", "uniswap-v3", 50_000_000.0),
                listing("third", "Ethereum", "curve", 2_000_000.0),
            ],
            &cfg,
        );
        let pools: Vec<&str> = selected.iter().map(|l| l.pool.as_str()).collect();
        assert_eq!(pools, vec!["big", "mid"]);
    }

    #[test]
    fn test_listing_to_pool() {
        let pool = listing_to_pool(&listing("0xabc", "Ethereum", "uniswap-v3", 1.0));
        assert_eq!(pool.network, "ethereum");
        assert_eq!(pool.protocol.as_deref(), Some("uniswap-v3"));
        assert_eq!(pool.token0_symbol.as_deref(), Some("WETH"));
        assert!((pool.fee_tier.unwrap() - 0.003).abs() < 1e-15);
    }

    #[tokio::test]
    async fn test_refresh_stores_pools_and_stats() {
        let store = PriceSeriesStore::in_memory().await.unwrap();
        let source = Arc::new(StaticListing(vec![
            listing("0xa", "Ethereum", "uniswap-v3", 3_000_000.0),
            listing("0xb", "Ethereum", "uniswap-v3", 9_000_000.0),
            listing("0xc", "Ethereum", "uniswap-v3", 100.0),
        ]));
        let discovery = PoolDiscovery::new(store.clone(), source, Discovery::default());

        let summary = discovery.refresh(Utc::now()).await.unwrap();
        assert_eq!(summary, DiscoverySummary { listed: 3, accepted: 2, stored: 2 });

        let stats = store.market_stats("0xb").await.unwrap().unwrap();
        assert_eq!(stats.tvl_usd, 9_000_000.0);
        assert_eq!(stats.volume_24h, Some(5_000_000.0));
        assert!(store.market_stats("0xc").await.unwrap().is_none());

        let top = store.top_pools_by_tvl(10, &HashSet::new()).await.unwrap();
        let order: Vec<&str> = top.iter().map(|p| p.pool_address.as_str()).collect();
        assert_eq!(order, vec!["0xb", "0xa"]);
    }

    #[tokio::test]
    async fn test_stats_write_failure_skips_pool_not_refresh() {
        let store = PriceSeriesStore::in_memory().await.unwrap();
        sqlx::query("DROP TABLE pool_market_stats")
            .execute(store.db_pool())
            .await
            .unwrap();
        let source = Arc::new(StaticListing(vec![
            listing("0xa", "Ethereum", "uniswap-v3", 3_000_000.0),
            listing("0xb", "Ethereum", "uniswap-v3", 9_000_000.0),
        ]));
        let discovery = PoolDiscovery::new(store.clone(), source, Discovery::default());

        let summary = discovery.refresh(Utc::now()).await.unwrap();
        assert_eq!(summary, DiscoverySummary { listed: 2, accepted: 2, stored: 0 });
        assert!(store.get_pool("0xa").await.unwrap().is_some());
        assert!(store.get_pool("0xb").await.unwrap().is_some());
    }
}

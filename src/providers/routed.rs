//! Picks the history source for a pool from the shape of its id.
//!
//! Pools found by discovery are keyed by their DefiLlama listing id (a UUID)
//! and have no on-chain address, so the address-keyed OHLCV provider cannot
//! serve them. Those go to the listing provider's chart instead.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

use super::OhlcvSource;
use crate::errors::ProviderError;
use crate::types::{Candle, PoolRef};

/// True for `8-4-4-4-12` hex ids as used by the DefiLlama yields listing.
pub fn is_listing_pool_id(id: &str) -> bool {
    let groups: Vec<&str> = id.split('-').collect();
    groups.len() == 5
        && groups
            .iter()
            .zip([8, 4, 4, 4, 12])
            .all(|(group, len)| group.len() == len && group.chars().all(|c| c.is_ascii_hexdigit()))
}

pub struct RoutedOhlcvSource {
    addresses: Arc<dyn OhlcvSource>,
    listing_ids: Arc<dyn OhlcvSource>,
}

impl RoutedOhlcvSource {
    pub fn new(addresses: Arc<dyn OhlcvSource>, listing_ids: Arc<dyn OhlcvSource>) -> Self {
        Self { addresses, listing_ids }
    }

    fn route(&self, pool: &PoolRef) -> &dyn OhlcvSource {
        if is_listing_pool_id(&pool.pool_address) {
            self.listing_ids.as_ref()
        } else {
            self.addresses.as_ref()
        }
    }
}

#[async_trait]
impl OhlcvSource for RoutedOhlcvSource {
    fn name(&self) -> &str {
        "routed"
    }

    async fn fetch_page(
        &self,
        pool: &PoolRef,
        before: Option<i64>,
        limit: usize,
    ) -> Result<Vec<Candle>, ProviderError> {
        let source = self.route(pool);
        debug!("📡 {} history from {}", pool.pool_address, source.name());
        source.fetch_page(pool, before, limit).await
    }

    fn candle_seconds(&self, pool: &PoolRef) -> Option<i64> {
        self.route(pool).candle_seconds(pool)
    }
}

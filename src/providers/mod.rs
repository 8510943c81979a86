//! Upstream data providers.
//!
//! Collection code only depends on the two traits below. The concrete
//! implementations sit on top of [`RateLimitedClient`], and tests swap in
//! in-memory sources.

pub mod client;
pub mod defillama;
pub mod geckoterminal;
pub mod routed;

use async_trait::async_trait;

use crate::errors::ProviderError;
use crate::types::{Candle, PoolListing, PoolRef};

pub use client::RateLimitedClient;
pub use defillama::{DefiLlamaChartSource, DefiLlamaSource};
pub use geckoterminal::GeckoTerminalSource;
pub use routed::RoutedOhlcvSource;

/// Paginated OHLCV history for a pool.
#[async_trait]
pub trait OhlcvSource: Send + Sync {
    fn name(&self) -> &str;

    /// Returns up to `limit` candles strictly older than `before`
    /// (unix seconds), or the newest candles when `before` is `None`.
    /// Candles are sorted ascending by timestamp.
    async fn fetch_page(
        &self,
        pool: &PoolRef,
        before: Option<i64>,
        limit: usize,
    ) -> Result<Vec<Candle>, ProviderError>;

    /// Candle length in seconds for sources whose newest candle can still be
    /// open. Sources that return closed snapshots keep the default.
    fn candle_seconds(&self, _pool: &PoolRef) -> Option<i64> {
        None
    }
}

/// Listing of pools with their latest market statistics.
#[async_trait]
pub trait PoolListingSource: Send + Sync {
    fn name(&self) -> &str;

    async fn fetch_pools(&self) -> Result<Vec<PoolListing>, ProviderError>;
}

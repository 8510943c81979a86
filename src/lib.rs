//! # Pool Analytics SDK
//!
//! A Rust library for collecting liquidity pool price history under provider
//! rate limits and scoring pools for delta-neutral liquidity provision.
//!
//! ## Overview
//!
//! The SDK separates collection (discovery, rate-limited fetching, backfill,
//! persistence) from scoring (volatility, fee APR, Fee-to-Volatility Ratio,
//! impermanent-loss estimates). It focuses on:
//!
//! - **Discovery**: pool listing refresh with TVL/chain/project filters
//! - **Collection**: paginated OHLCV backfill with bounded retries
//! - **Persistence**: append-only, deduplicated SQLite time series
//! - **Analytics**: per-pool snapshots with a recommendation band
//!
//! ## Architecture
//!
//! ### Provider Layer
//! [`providers::RateLimitedClient`] wraps one upstream API behind a sliding
//! window budget. The GeckoTerminal and DefiLlama sources implement the
//! [`providers::OhlcvSource`] and [`providers::PoolListingSource`] traits.
//!
//! ### Storage Layer
//! [`database::PriceSeriesStore`] owns pool metadata, price points, market
//! statistics, tracked positions and analytics snapshots.
//!
//! ### Collection Layer
//! [`backfill::BackfillEngine`] walks history backwards page by page until the
//! target span is stored; [`orchestrator::TieredScheduler`] decides which
//! pools to collect at each hour.
//!
//! ### Analytics Layer
//! [`analytics::AnalyticsEngine`] reads stored series and writes one
//! snapshot per pool.

// Core Types
/// Common types and data structures
pub mod types;
/// Error types
pub mod errors;

// Provider Layer
/// Upstream providers and the rate-limited HTTP client
pub mod providers;
/// Sliding-window request budget
pub mod rate_limiter;

// Storage Layer
/// SQLite persistence
pub mod database;

// Collection Layer
/// Pool listing discovery
pub mod discovery;
/// Historical backfill and incremental collection
pub mod backfill;
/// Tier assignment per invocation hour
pub mod pool_priority_classifier;
/// Tiered collection scheduler
pub mod orchestrator;

// Analytics Layer
/// Data quality validation
pub mod data_validator;
/// Volatility, fee and impermanent-loss analytics
pub mod analytics;

// Infrastructure
/// Metrics and observability
pub mod metrics;
/// Configuration management
pub mod settings;

// Re-exports for convenience
pub use analytics::AnalyticsEngine;
pub use backfill::{BackfillEngine, BackfillOutcome};
pub use database::PriceSeriesStore;
pub use discovery::PoolDiscovery;
pub use orchestrator::{RunSummary, TieredScheduler};
pub use providers::RateLimitedClient;
pub use settings::Settings;

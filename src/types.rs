//! Common types shared across the collection and scoring pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Identity of a liquidity pool.
///
/// Created on first discovery (upstream listing or a tracked position). Once
/// stored, only `protocol` and the token symbols can be backfilled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pool {
    pub pool_address: String,
    pub network: String,
    pub protocol: Option<String>,
    pub token_pair: String,
    pub token0_symbol: Option<String>,
    pub token1_symbol: Option<String>,
    /// Fee rate as a fraction (0.003 for a 30 bps pool).
    pub fee_tier: Option<f64>,
}

impl Pool {
    pub fn new(pool_address: impl Into<String>, network: impl Into<String>, token_pair: impl Into<String>) -> Self {
        let token_pair = token_pair.into();
        let (token0_symbol, token1_symbol) = split_pair(&token_pair);
        Self {
            pool_address: pool_address.into(),
            network: network.into(),
            protocol: None,
            token_pair,
            token0_symbol,
            token1_symbol,
            fee_tier: None,
        }
    }

    pub fn with_protocol(mut self, protocol: impl Into<String>) -> Self {
        self.protocol = Some(protocol.into());
        self
    }

    pub fn with_fee_tier(mut self, fee_tier: f64) -> Self {
        self.fee_tier = Some(fee_tier);
        self
    }
}

/// Splits a display pair such as `WETH-USDC` or `SOL/USDC` into its symbols.
pub fn split_pair(token_pair: &str) -> (Option<String>, Option<String>) {
    let mut parts = token_pair
        .split(|c| c == '-' || c == '/')
        .map(str::trim)
        .filter(|s| !s.is_empty());
    match (parts.next(), parts.next(), parts.next()) {
        (Some(a), Some(b), None) => (Some(a.to_string()), Some(b.to_string())),
        _ => (None, None),
    }
}

/// One stored observation for a pool. Append-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceDataPoint {
    pub timestamp: DateTime<Utc>,
    pub pool_address: String,
    pub network: String,
    pub price: f64,
    pub volume_usd: f64,
    /// `ln(price_t / price_{t-1})` against the preceding stored point, if any.
    pub log_return: Option<f64>,
}

/// A single OHLCV candle as returned by the history provider.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub timestamp: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Candle {
    /// Parses the `[ts, open, high, low, close, volume]` wire shape.
    pub fn from_row(row: &[f64]) -> Option<Self> {
        if row.len() != 6 {
            return None;
        }
        Some(Self {
            timestamp: row[0] as i64,
            open: row[1],
            high: row[2],
            low: row[3],
            close: row[4],
            volume: row[5],
        })
    }
}

/// Recommendation band derived from the Fee-to-Volatility Ratio.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Recommendation {
    Attractive,
    Fair,
    Overpriced,
    InsufficientData,
}

impl Recommendation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Recommendation::Attractive => "attractive",
            Recommendation::Fair => "fair",
            Recommendation::Overpriced => "overpriced",
            Recommendation::InsufficientData => "insufficient_data",
        }
    }
}

impl fmt::Display for Recommendation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Recommendation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "attractive" => Ok(Recommendation::Attractive),
            "fair" => Ok(Recommendation::Fair),
            "overpriced" => Ok(Recommendation::Overpriced),
            "insufficient_data" => Ok(Recommendation::InsufficientData),
            other => Err(format!("unknown recommendation: {}", other)),
        }
    }
}

/// Latest computed metrics for a pool. One row per pool, overwritten on
/// every recomputation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolAnalyticsSnapshot {
    pub pool_address: String,
    pub network: String,
    pub token_pair: String,
    pub tvl_usd: Option<f64>,
    pub volume_24h: Option<f64>,
    pub apy_base: Option<f64>,
    pub volatility_1d: Option<f64>,
    pub volatility_7d: Option<f64>,
    pub volatility_30d: Option<f64>,
    pub fee_apr_pool: f64,
    pub fee_apr_position: f64,
    pub fvr: Option<f64>,
    pub recommendation: Recommendation,
    pub il_risk_score: Option<u8>,
    pub expected_il_rate: f64,
    pub breakeven_fee_apr: f64,
    pub data_points_count: i64,
    pub last_updated: DateTime<Utc>,
}

impl PoolAnalyticsSnapshot {
    /// Snapshot for a pool whose metrics are not yet computable.
    pub fn insufficient(pool: &Pool, market: Option<&MarketStats>, data_points_count: i64, now: DateTime<Utc>) -> Self {
        Self {
            pool_address: pool.pool_address.clone(),
            network: pool.network.clone(),
            token_pair: pool.token_pair.clone(),
            tvl_usd: market.map(|m| m.tvl_usd),
            volume_24h: market.and_then(|m| m.volume_24h),
            apy_base: market.and_then(|m| m.apy_base),
            volatility_1d: None,
            volatility_7d: None,
            volatility_30d: None,
            fee_apr_pool: 0.0,
            fee_apr_position: 0.0,
            fvr: None,
            recommendation: Recommendation::InsufficientData,
            il_risk_score: None,
            expected_il_rate: 0.0,
            breakeven_fee_apr: 0.0,
            data_points_count,
            last_updated: now,
        }
    }
}

/// Latest market statistics from the pool listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketStats {
    pub tvl_usd: f64,
    pub volume_24h: Option<f64>,
    /// Fee-only APY in percent, as reported by the listing.
    pub apy_base: Option<f64>,
    pub updated_at: DateTime<Utc>,
}

/// One upstream pool listing record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolListing {
    pub pool: String,
    pub symbol: String,
    pub project: String,
    pub chain: String,
    #[serde(default)]
    pub tvl_usd: f64,
    #[serde(default)]
    pub apy: Option<f64>,
    #[serde(default)]
    pub apy_base: Option<f64>,
    #[serde(default)]
    pub volume_usd1d: Option<f64>,
    /// Free-form pool annotation; concentrated liquidity pools put the fee
    /// tier here (e.g. `"0.05%"`).
    #[serde(default)]
    pub pool_meta: Option<String>,
}

impl PoolListing {
    /// Fee tier as a fraction, parsed from `pool_meta` when it is a percentage.
    pub fn fee_tier(&self) -> Option<f64> {
        let meta = self.pool_meta.as_deref()?.trim();
        let pct: f64 = meta.strip_suffix('%')?.trim().parse().ok()?;
        (pct > 0.0 && pct < 100.0).then(|| pct / 100.0)
    }
}

/// Membership of a pool in the tracked position list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PositionType {
    Active,
    Watchlist,
}

impl PositionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PositionType::Active => "active",
            PositionType::Watchlist => "watchlist",
        }
    }
}

impl FromStr for PositionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(PositionType::Active),
            "watchlist" => Ok(PositionType::Watchlist),
            other => Err(format!("unknown position type: {}", other)),
        }
    }
}

/// A `(pool_address, network)` pair as stored in `user_positions`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PoolRef {
    pub pool_address: String,
    pub network: String,
}

impl PoolRef {
    pub fn new(pool_address: impl Into<String>, network: impl Into<String>) -> Self {
        Self {
            pool_address: pool_address.into(),
            network: network.into(),
        }
    }
}

/// Observation frequency of a series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Frequency {
    #[serde(rename = "15min")]
    FifteenMin,
    #[serde(rename = "hourly")]
    Hourly,
    #[serde(rename = "daily")]
    Daily,
}

impl Frequency {
    pub fn observations_per_year(&self) -> f64 {
        match self {
            Frequency::FifteenMin => 35_040.0,
            Frequency::Hourly => 8_760.0,
            Frequency::Daily => 365.0,
        }
    }

    /// Window sizes (in observations) for the 1d, 7d and 30d volatility.
    /// A daily series has no 1d window.
    pub fn window_sizes(&self) -> [(VolatilityWindow, Option<usize>); 3] {
        match self {
            Frequency::FifteenMin => [
                (VolatilityWindow::OneDay, Some(96)),
                (VolatilityWindow::SevenDays, Some(672)),
                (VolatilityWindow::ThirtyDays, Some(2_880)),
            ],
            Frequency::Hourly => [
                (VolatilityWindow::OneDay, Some(24)),
                (VolatilityWindow::SevenDays, Some(168)),
                (VolatilityWindow::ThirtyDays, Some(720)),
            ],
            Frequency::Daily => [
                (VolatilityWindow::OneDay, None),
                (VolatilityWindow::SevenDays, Some(7)),
                (VolatilityWindow::ThirtyDays, Some(30)),
            ],
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Frequency::FifteenMin => "15min",
            Frequency::Hourly => "hourly",
            Frequency::Daily => "daily",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum VolatilityWindow {
    OneDay,
    SevenDays,
    ThirtyDays,
}

//! # Price Series Store
//!
//! SQLite persistence for pool metadata, append-only price history, market
//! statistics, tracked positions and the materialized analytics snapshot.
//!
//! All writes are idempotent: pools upsert, price points are unique on
//! `(pool_address, timestamp)` and snapshots use replace semantics. A
//! uniqueness violation on a price point is reported as
//! [`InsertOutcome::Duplicate`] and never surfaces as an error.

use crate::errors::{StorageError, StorageResult};
use crate::settings;
use crate::types::{
    MarketStats, Pool, PoolAnalyticsSnapshot, PoolRef, PositionType, PriceDataPoint, Recommendation,
};
use anyhow::{Context, Result};
use chrono::{DateTime, TimeZone, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Pool as SqlxPool, Row, Sqlite};
use std::collections::HashSet;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info, warn};

/// SQLite connection pool type alias.
pub type DbPool = SqlxPool<Sqlite>;

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS pools (
        pool_address TEXT PRIMARY KEY,
        network TEXT NOT NULL,
        token_pair TEXT NOT NULL,
        token0_symbol TEXT,
        token1_symbol TEXT,
        fee_tier REAL,
        protocol TEXT,
        created_at INTEGER NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS price_data (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        timestamp INTEGER NOT NULL,
        pool_address TEXT NOT NULL,
        network TEXT NOT NULL,
        price REAL NOT NULL,
        volume_usd REAL NOT NULL DEFAULT 0,
        log_return REAL,
        UNIQUE(pool_address, timestamp)
    )",
    "CREATE INDEX IF NOT EXISTS idx_price_data_pool_ts ON price_data(pool_address, timestamp)",
    "CREATE TABLE IF NOT EXISTS pool_analytics (
        pool_address TEXT PRIMARY KEY,
        network TEXT NOT NULL,
        token_pair TEXT NOT NULL,
        tvl_usd REAL,
        volume_24h REAL,
        apy_base REAL,
        volatility_1d REAL,
        volatility_7d REAL,
        volatility_30d REAL,
        fee_apr_pool REAL NOT NULL DEFAULT 0,
        fee_apr_position REAL NOT NULL DEFAULT 0,
        fvr REAL,
        il_risk_score INTEGER,
        expected_il_rate REAL NOT NULL DEFAULT 0,
        breakeven_fee_apr REAL NOT NULL DEFAULT 0,
        recommendation TEXT NOT NULL,
        data_points_count INTEGER NOT NULL DEFAULT 0,
        last_updated INTEGER NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS pool_market_stats (
        pool_address TEXT PRIMARY KEY,
        tvl_usd REAL NOT NULL,
        volume_24h REAL,
        apy_base REAL,
        updated_at INTEGER NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_market_stats_tvl ON pool_market_stats(tvl_usd DESC)",
    "CREATE TABLE IF NOT EXISTS user_positions (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        pool_address TEXT NOT NULL,
        network TEXT NOT NULL,
        position_type TEXT NOT NULL CHECK (position_type IN ('active', 'watchlist')),
        UNIQUE(pool_address, network)
    )",
];

/// Result of a single price point insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    Duplicate,
}

impl InsertOutcome {
    pub fn is_duplicate(&self) -> bool {
        matches!(self, InsertOutcome::Duplicate)
    }
}

/// Stored history span for a pool.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Coverage {
    pub count: i64,
    pub oldest: Option<DateTime<Utc>>,
    pub newest: Option<DateTime<Utc>>,
    /// Fractional days between the oldest and newest point.
    pub day_span: f64,
}

impl Coverage {
    pub fn empty() -> Self {
        Self {
            count: 0,
            oldest: None,
            newest: None,
            day_span: 0.0,
        }
    }
}

/// Handle to the analytics database. Cheap to clone.
#[derive(Debug, Clone)]
pub struct PriceSeriesStore {
    pool: DbPool,
}

/// Connects with bounded retries and initializes the schema.
pub async fn connect(cfg: &settings::Database) -> Result<PriceSeriesStore> {
    let options = SqliteConnectOptions::from_str(&cfg.url)
        .with_context(|| format!("invalid database url {}", cfg.url))?
        .create_if_missing(true)
        .busy_timeout(Duration::from_secs(5));

    let max_attempts = cfg.connect_attempts.max(1);
    let mut last_err: Option<anyhow::Error> = None;
    for attempt in 1..=max_attempts {
        match SqlitePoolOptions::new()
            .max_connections(cfg.max_connections)
            .acquire_timeout(Duration::from_secs(5))
            .connect_with(options.clone())
            .await
        {
            Ok(pool) => {
                info!("✅ Connected to analytics database (attempt {}/{})", attempt, max_attempts);
                let store = PriceSeriesStore::new(pool);
                match store.initialize().await {
                    Ok(()) => return Ok(store),
                    Err(e) => last_err = Some(e.into()),
                }
            }
            Err(e) => last_err = Some(e.into()),
        }
        if attempt < max_attempts {
            let delay_ms = (1u64 << attempt.min(6)) * 200;
            warn!(
                "DB connect/init attempt {}/{} failed. Retrying in {} ms...",
                attempt, max_attempts, delay_ms
            );
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
        }
    }
    Err(last_err.unwrap_or_else(|| anyhow::anyhow!("Unknown DB connection error")))
}

fn ts_to_datetime(ts: i64, table: &'static str) -> StorageResult<DateTime<Utc>> {
    Utc.timestamp_opt(ts, 0)
        .single()
        .ok_or_else(|| StorageError::Corrupt {
            table,
            message: format!("timestamp out of range: {}", ts),
        })
}

fn db_err(table: &'static str) -> impl Fn(sqlx::Error) -> StorageError {
    move |e| StorageError::classify(e, table)
}

impl PriceSeriesStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Single-connection in-memory store. Every connection to `sqlite::memory:`
    /// is a separate database, so the pool is pinned to one connection.
    pub async fn in_memory() -> StorageResult<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await
            .map_err(StorageError::Database)?;
        let store = Self::new(pool);
        store.initialize().await?;
        Ok(store)
    }

    pub fn db_pool(&self) -> &DbPool {
        &self.pool
    }

    pub async fn initialize(&self) -> StorageResult<()> {
        let mut tx = self.pool.begin().await.map_err(StorageError::Database)?;
        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(&mut *tx)
                .await
                .map_err(StorageError::Database)?;
        }
        tx.commit().await.map_err(StorageError::Database)?;
        debug!("Analytics schema ready");
        Ok(())
    }

    /// Fails fast when the database is unreachable.
    pub async fn ping(&self) -> StorageResult<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(StorageError::Database)?;
        Ok(())
    }

    // ==================== Pools ====================

    /// Inserts pool metadata. An existing pool is left untouched except that
    /// missing protocol/symbol/fee columns are filled in.
    pub async fn upsert_pool(&self, pool: &Pool) -> StorageResult<()> {
        let result = sqlx::query(
            "INSERT INTO pools (pool_address, network, token_pair, token0_symbol, token1_symbol, fee_tier, protocol, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT(pool_address) DO UPDATE SET
                protocol = COALESCE(pools.protocol, excluded.protocol),
                token0_symbol = COALESCE(pools.token0_symbol, excluded.token0_symbol),
                token1_symbol = COALESCE(pools.token1_symbol, excluded.token1_symbol),
                fee_tier = COALESCE(pools.fee_tier, excluded.fee_tier)",
        )
        .bind(&pool.pool_address)
        .bind(&pool.network)
        .bind(&pool.token_pair)
        .bind(&pool.token0_symbol)
        .bind(&pool.token1_symbol)
        .bind(pool.fee_tier)
        .bind(&pool.protocol)
        .bind(Utc::now().timestamp())
        .execute(&self.pool)
        .await;

        match result.map_err(db_err("pools")) {
            Err(e) if !e.is_conflict() => Err(e),
            _ => Ok(()),
        }
    }

    pub async fn get_pool(&self, pool_address: &str) -> StorageResult<Option<Pool>> {
        let row = sqlx::query(
            "SELECT pool_address, network, token_pair, token0_symbol, token1_symbol, fee_tier, protocol
             FROM pools WHERE pool_address = ?1",
        )
        .bind(pool_address)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err("pools"))?;

        row.map(|r| row_to_pool(&r)).transpose()
    }

    // ==================== Price data ====================

    pub async fn insert_price_point(&self, point: &PriceDataPoint) -> StorageResult<InsertOutcome> {
        let result = sqlx::query(
            "INSERT INTO price_data (timestamp, pool_address, network, price, volume_usd, log_return)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )
        .bind(point.timestamp.timestamp())
        .bind(&point.pool_address)
        .bind(&point.network)
        .bind(point.price)
        .bind(point.volume_usd)
        .bind(point.log_return)
        .execute(&self.pool)
        .await;

        match result.map_err(db_err("price_data")) {
            Ok(_) => Ok(InsertOutcome::Inserted),
            Err(e) if e.is_conflict() => {
                debug!(
                    pool = %point.pool_address,
                    ts = point.timestamp.timestamp(),
                    "duplicate price point skipped"
                );
                Ok(InsertOutcome::Duplicate)
            }
            Err(e) => Err(e),
        }
    }

    /// Points for a pool in ascending timestamp order.
    ///
    /// With `limit`, the most recent `limit` points are returned.
    pub async fn query_series(
        &self,
        pool_address: &str,
        since: Option<DateTime<Utc>>,
        limit: Option<i64>,
    ) -> StorageResult<Vec<PriceDataPoint>> {
        let rows = sqlx::query(
            "SELECT timestamp, pool_address, network, price, volume_usd, log_return FROM (
                SELECT timestamp, pool_address, network, price, volume_usd, log_return
                FROM price_data
                WHERE pool_address = ?1 AND (?2 IS NULL OR timestamp >= ?2)
                ORDER BY timestamp DESC
                LIMIT ?3
             ) ORDER BY timestamp ASC",
        )
        .bind(pool_address)
        .bind(since.map(|s| s.timestamp()))
        .bind(limit.unwrap_or(-1))
        .fetch_all(&self.pool)
        .await
        .map_err(db_err("price_data"))?;

        rows.iter().map(row_to_point).collect()
    }

    /// Latest stored point strictly before `before`.
    pub async fn previous_point(
        &self,
        pool_address: &str,
        before: DateTime<Utc>,
    ) -> StorageResult<Option<PriceDataPoint>> {
        let row = sqlx::query(
            "SELECT timestamp, pool_address, network, price, volume_usd, log_return
             FROM price_data
             WHERE pool_address = ?1 AND timestamp < ?2
             ORDER BY timestamp DESC
             LIMIT 1",
        )
        .bind(pool_address)
        .bind(before.timestamp())
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err("price_data"))?;

        row.as_ref().map(row_to_point).transpose()
    }

    pub async fn coverage(&self, pool_address: &str) -> StorageResult<Coverage> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS count, MIN(timestamp) AS oldest, MAX(timestamp) AS newest
             FROM price_data WHERE pool_address = ?1",
        )
        .bind(pool_address)
        .fetch_one(&self.pool)
        .await
        .map_err(db_err("price_data"))?;

        let count: i64 = row.try_get("count").map_err(db_err("price_data"))?;
        if count == 0 {
            return Ok(Coverage::empty());
        }
        let oldest: i64 = row.try_get("oldest").map_err(db_err("price_data"))?;
        let newest: i64 = row.try_get("newest").map_err(db_err("price_data"))?;

        Ok(Coverage {
            count,
            oldest: Some(ts_to_datetime(oldest, "price_data")?),
            newest: Some(ts_to_datetime(newest, "price_data")?),
            day_span: (newest - oldest) as f64 / 86_400.0,
        })
    }

    // ==================== Market stats ====================

    pub async fn upsert_market_stats(&self, pool_address: &str, stats: &MarketStats) -> StorageResult<()> {
        sqlx::query(
            "INSERT INTO pool_market_stats (pool_address, tvl_usd, volume_24h, apy_base, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(pool_address) DO UPDATE SET
                tvl_usd = excluded.tvl_usd,
                volume_24h = excluded.volume_24h,
                apy_base = excluded.apy_base,
                updated_at = excluded.updated_at",
        )
        .bind(pool_address)
        .bind(stats.tvl_usd)
        .bind(stats.volume_24h)
        .bind(stats.apy_base)
        .bind(stats.updated_at.timestamp())
        .execute(&self.pool)
        .await
        .map_err(db_err("pool_market_stats"))?;
        Ok(())
    }

    pub async fn market_stats(&self, pool_address: &str) -> StorageResult<Option<MarketStats>> {
        let row = sqlx::query(
            "SELECT tvl_usd, volume_24h, apy_base, updated_at FROM pool_market_stats WHERE pool_address = ?1",
        )
        .bind(pool_address)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err("pool_market_stats"))?;

        let Some(row) = row else { return Ok(None) };
        let table = "pool_market_stats";
        Ok(Some(MarketStats {
            tvl_usd: row.try_get("tvl_usd").map_err(db_err(table))?,
            volume_24h: row.try_get("volume_24h").map_err(db_err(table))?,
            apy_base: row.try_get("apy_base").map_err(db_err(table))?,
            updated_at: ts_to_datetime(row.try_get("updated_at").map_err(db_err(table))?, table)?,
        }))
    }

    /// Pools ranked by latest TVL, skipping `exclude`, at most `limit`.
    pub async fn top_pools_by_tvl(&self, limit: usize, exclude: &HashSet<String>) -> StorageResult<Vec<PoolRef>> {
        let fetch = (limit + exclude.len()) as i64;
        let rows = sqlx::query(
            "SELECT p.pool_address, p.network
             FROM pools p
             INNER JOIN pool_market_stats ms ON ms.pool_address = p.pool_address
             ORDER BY ms.tvl_usd DESC, p.pool_address ASC
             LIMIT ?1",
        )
        .bind(fetch)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err("pool_market_stats"))?;

        let mut pools = Vec::with_capacity(limit);
        for row in rows {
            let address: String = row.try_get("pool_address").map_err(db_err("pools"))?;
            if exclude.contains(&address) {
                continue;
            }
            let network: String = row.try_get("network").map_err(db_err("pools"))?;
            pools.push(PoolRef::new(address, network));
            if pools.len() >= limit {
                break;
            }
        }
        Ok(pools)
    }

    // ==================== Positions ====================

    pub async fn set_position(&self, pool: &PoolRef, position_type: PositionType) -> StorageResult<()> {
        sqlx::query(
            "INSERT INTO user_positions (pool_address, network, position_type) VALUES (?1, ?2, ?3)
             ON CONFLICT(pool_address, network) DO UPDATE SET position_type = excluded.position_type",
        )
        .bind(&pool.pool_address)
        .bind(&pool.network)
        .bind(position_type.as_str())
        .execute(&self.pool)
        .await
        .map_err(db_err("user_positions"))?;
        Ok(())
    }

    /// Tracked pools of one type in registration order.
    pub async fn positions(&self, position_type: PositionType) -> StorageResult<Vec<PoolRef>> {
        let rows = sqlx::query(
            "SELECT pool_address, network FROM user_positions WHERE position_type = ?1 ORDER BY id ASC",
        )
        .bind(position_type.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(db_err("user_positions"))?;

        rows.iter()
            .map(|row| {
                Ok(PoolRef::new(
                    row.try_get::<String, _>("pool_address").map_err(db_err("user_positions"))?,
                    row.try_get::<String, _>("network").map_err(db_err("user_positions"))?,
                ))
            })
            .collect()
    }

    // ==================== Analytics ====================

    pub async fn upsert_analytics(&self, snapshot: &PoolAnalyticsSnapshot) -> StorageResult<()> {
        sqlx::query(
            "INSERT INTO pool_analytics (
                pool_address, network, token_pair, tvl_usd, volume_24h, apy_base,
                volatility_1d, volatility_7d, volatility_30d, fee_apr_pool, fee_apr_position,
                fvr, il_risk_score, expected_il_rate, breakeven_fee_apr, recommendation,
                data_points_count, last_updated)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18)
             ON CONFLICT(pool_address) DO UPDATE SET
                network = excluded.network,
                token_pair = excluded.token_pair,
                tvl_usd = excluded.tvl_usd,
                volume_24h = excluded.volume_24h,
                apy_base = excluded.apy_base,
                volatility_1d = excluded.volatility_1d,
                volatility_7d = excluded.volatility_7d,
                volatility_30d = excluded.volatility_30d,
                fee_apr_pool = excluded.fee_apr_pool,
                fee_apr_position = excluded.fee_apr_position,
                fvr = excluded.fvr,
                il_risk_score = excluded.il_risk_score,
                expected_il_rate = excluded.expected_il_rate,
                breakeven_fee_apr = excluded.breakeven_fee_apr,
                recommendation = excluded.recommendation,
                data_points_count = excluded.data_points_count,
                last_updated = excluded.last_updated",
        )
        .bind(&snapshot.pool_address)
        .bind(&snapshot.network)
        .bind(&snapshot.token_pair)
        .bind(snapshot.tvl_usd)
        .bind(snapshot.volume_24h)
        .bind(snapshot.apy_base)
        .bind(snapshot.volatility_1d)
        .bind(snapshot.volatility_7d)
        .bind(snapshot.volatility_30d)
        .bind(snapshot.fee_apr_pool)
        .bind(snapshot.fee_apr_position)
        .bind(snapshot.fvr)
        .bind(snapshot.il_risk_score.map(i64::from))
        .bind(snapshot.expected_il_rate)
        .bind(snapshot.breakeven_fee_apr)
        .bind(snapshot.recommendation.as_str())
        .bind(snapshot.data_points_count)
        .bind(snapshot.last_updated.timestamp())
        .execute(&self.pool)
        .await
        .map_err(db_err("pool_analytics"))?;
        Ok(())
    }

    pub async fn load_analytics(&self, pool_address: &str) -> StorageResult<Option<PoolAnalyticsSnapshot>> {
        let row = sqlx::query("SELECT * FROM pool_analytics WHERE pool_address = ?1")
            .bind(pool_address)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err("pool_analytics"))?;

        row.as_ref().map(row_to_snapshot).transpose()
    }

    /// Pools with stored history whose snapshot is missing or older than `stale_before`.
    pub async fn pools_needing_analytics(&self, stale_before: DateTime<Utc>) -> StorageResult<Vec<String>> {
        let rows = sqlx::query(
            "SELECT pd.pool_address
             FROM (SELECT DISTINCT pool_address FROM price_data) pd
             LEFT JOIN pool_analytics pa ON pa.pool_address = pd.pool_address
             WHERE pa.pool_address IS NULL OR pa.last_updated < ?1
             ORDER BY pd.pool_address ASC",
        )
        .bind(stale_before.timestamp())
        .fetch_all(&self.pool)
        .await
        .map_err(db_err("pool_analytics"))?;

        rows.iter()
            .map(|row| row.try_get::<String, _>("pool_address").map_err(db_err("pool_analytics")))
            .collect()
    }
}

fn row_to_pool(row: &SqliteRow) -> StorageResult<Pool> {
    let table = "pools";
    Ok(Pool {
        pool_address: row.try_get("pool_address").map_err(db_err(table))?,
        network: row.try_get("network").map_err(db_err(table))?,
        protocol: row.try_get("protocol").map_err(db_err(table))?,
        token_pair: row.try_get("token_pair").map_err(db_err(table))?,
        token0_symbol: row.try_get("token0_symbol").map_err(db_err(table))?,
        token1_symbol: row.try_get("token1_symbol").map_err(db_err(table))?,
        fee_tier: row.try_get("fee_tier").map_err(db_err(table))?,
    })
}

fn row_to_point(row: &SqliteRow) -> StorageResult<PriceDataPoint> {
    let table = "price_data";
    Ok(PriceDataPoint {
        timestamp: ts_to_datetime(row.try_get("timestamp").map_err(db_err(table))?, table)?,
        pool_address: row.try_get("pool_address").map_err(db_err(table))?,
        network: row.try_get("network").map_err(db_err(table))?,
        price: row.try_get("price").map_err(db_err(table))?,
        volume_usd: row.try_get("volume_usd").map_err(db_err(table))?,
        log_return: row.try_get("log_return").map_err(db_err(table))?,
    })
}

fn row_to_snapshot(row: &SqliteRow) -> StorageResult<PoolAnalyticsSnapshot> {
    let table = "pool_analytics";
    let recommendation: String = row.try_get("recommendation").map_err(db_err(table))?;
    let recommendation = Recommendation::from_str(&recommendation)
        .map_err(|message| StorageError::Corrupt { table, message })?;
    let il_risk_score: Option<i64> = row.try_get("il_risk_score").map_err(db_err(table))?;

    Ok(PoolAnalyticsSnapshot {
        pool_address: row.try_get("pool_address").map_err(db_err(table))?,
        network: row.try_get("network").map_err(db_err(table))?,
        token_pair: row.try_get("token_pair").map_err(db_err(table))?,
        tvl_usd: row.try_get("tvl_usd").map_err(db_err(table))?,
        volume_24h: row.try_get("volume_24h").map_err(db_err(table))?,
        apy_base: row.try_get("apy_base").map_err(db_err(table))?,
        volatility_1d: row.try_get("volatility_1d").map_err(db_err(table))?,
        volatility_7d: row.try_get("volatility_7d").map_err(db_err(table))?,
        volatility_30d: row.try_get("volatility_30d").map_err(db_err(table))?,
        fee_apr_pool: row.try_get("fee_apr_pool").map_err(db_err(table))?,
        fee_apr_position: row.try_get("fee_apr_position").map_err(db_err(table))?,
        fvr: row.try_get("fvr").map_err(db_err(table))?,
        recommendation,
        il_risk_score: il_risk_score.map(|s| s.clamp(1, 10) as u8),
        expected_il_rate: row.try_get("expected_il_rate").map_err(db_err(table))?,
        breakeven_fee_apr: row.try_get("breakeven_fee_apr").map_err(db_err(table))?,
        data_points_count: row.try_get("data_points_count").map_err(db_err(table))?,
        last_updated: ts_to_datetime(row.try_get("last_updated").map_err(db_err(table))?, table)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn point(pool: &str, ts: i64, price: f64) -> PriceDataPoint {
        PriceDataPoint {
            timestamp: Utc.timestamp_opt(ts, 0).unwrap(),
            pool_address: pool.to_string(),
            network: "ethereum".to_string(),
            price,
            volume_usd: 10.0,
            log_return: None,
        }
    }

    #[tokio::test]
    async fn test_duplicate_insert_is_reported_not_raised() {
        let store = PriceSeriesStore::in_memory().await.unwrap();
        let p = point("0xpool", 1_700_000_000, 1.0);

        assert_eq!(store.insert_price_point(&p).await.unwrap(), InsertOutcome::Inserted);
        let second = store.insert_price_point(&p).await.unwrap();
        assert!(second.is_duplicate());

        let coverage = store.coverage("0xpool").await.unwrap();
        assert_eq!(coverage.count, 1);
    }

    #[tokio::test]
    async fn test_query_series_order_and_limit() {
        let store = PriceSeriesStore::in_memory().await.unwrap();
        for ts in [300, 100, 200, 400] {
            store.insert_price_point(&point("0xpool", ts, ts as f64)).await.unwrap();
        }

        let all = store.query_series("0xpool", None, None).await.unwrap();
        let stamps: Vec<i64> = all.iter().map(|p| p.timestamp.timestamp()).collect();
        assert_eq!(stamps, vec![100, 200, 300, 400]);

        let recent = store.query_series("0xpool", None, Some(2)).await.unwrap();
        let stamps: Vec<i64> = recent.iter().map(|p| p.timestamp.timestamp()).collect();
        assert_eq!(stamps, vec![300, 400]);

        let since = Utc.timestamp_opt(200, 0).unwrap();
        let tail = store.query_series("0xpool", Some(since), None).await.unwrap();
        assert_eq!(tail.len(), 3);
    }

    #[tokio::test]
    async fn test_coverage_day_span() {
        let store = PriceSeriesStore::in_memory().await.unwrap();
        assert_eq!(store.coverage("0xpool").await.unwrap(), Coverage::empty());

        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        for h in [0, 36] {
            let ts = (start + Duration::hours(h)).timestamp();
            store.insert_price_point(&point("0xpool", ts, 1.0)).await.unwrap();
        }
        let coverage = store.coverage("0xpool").await.unwrap();
        assert_eq!(coverage.count, 2);
        assert_eq!(coverage.oldest, Some(start));
        assert!((coverage.day_span - 1.5).abs() < 1e-12);
    }

    #[tokio::test]
    async fn test_upsert_pool_backfills_only_missing_fields() {
        let store = PriceSeriesStore::in_memory().await.unwrap();
        store.upsert_pool(&Pool::new("0xpool", "ethereum", "WETH-USDC")).await.unwrap();

        let updated = Pool::new("0xpool", "arbitrum", "OTHER-PAIR")
            .with_protocol("uniswap-v3")
            .with_fee_tier(0.0005);
        store.upsert_pool(&updated).await.unwrap();

        let stored = store.get_pool("0xpool").await.unwrap().unwrap();
        assert_eq!(stored.network, "ethereum");
        assert_eq!(stored.token_pair, "WETH-USDC");
        assert_eq!(stored.protocol.as_deref(), Some("uniswap-v3"));
        assert_eq!(stored.fee_tier, Some(0.0005));
        assert_eq!(stored.token0_symbol.as_deref(), Some("WETH"));
    }

    #[tokio::test]
    async fn test_positions_keep_registration_order() {
        let store = PriceSeriesStore::in_memory().await.unwrap();
        store.set_position(&PoolRef::new("0xb", "ethereum"), PositionType::Active).await.unwrap();
        store.set_position(&PoolRef::new("0xa", "ethereum"), PositionType::Active).await.unwrap();
        store.set_position(&PoolRef::new("0xc", "solana"), PositionType::Watchlist).await.unwrap();

        let active = store.positions(PositionType::Active).await.unwrap();
        assert_eq!(active, vec![PoolRef::new("0xb", "ethereum"), PoolRef::new("0xa", "ethereum")]);

        // Re-registering moves the pool to the other list
        store.set_position(&PoolRef::new("0xa", "ethereum"), PositionType::Watchlist).await.unwrap();
        assert_eq!(store.positions(PositionType::Active).await.unwrap().len(), 1);
        assert_eq!(store.positions(PositionType::Watchlist).await.unwrap().len(), 2);
    }
}

use async_trait::async_trait;
use chrono::DateTime;
use serde::Deserialize;
use std::sync::Arc;
use tracing::debug;

use super::{OhlcvSource, PoolListingSource, RateLimitedClient};
use crate::errors::ProviderError;
use crate::types::{Candle, PoolListing, PoolRef};

#[derive(Deserialize, Debug)]
struct YieldsResponse {
    #[serde(default)]
    status: Option<String>,
    data: Vec<serde_json::Value>,
}

/// DefiLlama yields listing (`GET /pools`).
pub struct DefiLlamaSource {
    client: Arc<RateLimitedClient>,
}

impl DefiLlamaSource {
    pub fn new(client: Arc<RateLimitedClient>) -> Self {
        Self { client }
    }
}

/// One daily point of `GET /chart/{pool}`.
#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct ChartPoint {
    timestamp: String,
    #[serde(default)]
    apy: Option<f64>,
    #[serde(default)]
    apy_base: Option<f64>,
}

/// DefiLlama yield history (`GET /chart/{pool}`) for pools known only by
/// their listing id. The APY is the price proxy; the chart carries no volume.
pub struct DefiLlamaChartSource {
    client: Arc<RateLimitedClient>,
}

impl DefiLlamaChartSource {
    pub fn new(client: Arc<RateLimitedClient>) -> Self {
        Self { client }
    }
}

fn decode_error(endpoint: &str, message: String) -> ProviderError {
    ProviderError::Decode {
        provider: "defillama".to_string(),
        endpoint: endpoint.to_string(),
        message,
    }
}

/// Unwraps `{status, data: [...]}`, rejecting any status but `success`.
fn unwrap_envelope(endpoint: &str, body: serde_json::Value) -> Result<Vec<serde_json::Value>, ProviderError> {
    let response: YieldsResponse =
        serde_json::from_value(body).map_err(|e| decode_error(endpoint, e.to_string()))?;

    match response.status.as_deref() {
        Some(status) if status != "success" => Err(decode_error(endpoint, format!("status {}", status))),
        _ => Ok(response.data),
    }
}

/// Decodes the `{status, data: [...]}` envelope.
///
/// Individual records that do not match the listing shape are skipped so one
/// malformed entry cannot hide the rest of the listing.
pub fn parse_listing(endpoint: &str, body: serde_json::Value) -> Result<Vec<PoolListing>, ProviderError> {
    let data = unwrap_envelope(endpoint, body)?;
    let total = data.len();
    let listings: Vec<PoolListing> = data
        .into_iter()
        .filter_map(|record| serde_json::from_value(record).ok())
        .collect();
    if listings.len() < total {
        debug!("Skipped {} malformed listing records", total - listings.len());
    }
    Ok(listings)
}

/// Parses chart points into ascending daily candles priced at the APY
/// (falling back to the base APY). A missing APY is kept as NaN so the
/// quality check sees it; points with an unreadable timestamp are dropped.
pub fn parse_chart(endpoint: &str, body: serde_json::Value) -> Result<Vec<Candle>, ProviderError> {
    let data = unwrap_envelope(endpoint, body)?;

    let mut candles: Vec<Candle> = data
        .into_iter()
        .filter_map(|record| serde_json::from_value::<ChartPoint>(record).ok())
        .filter_map(|point| {
            let timestamp = DateTime::parse_from_rfc3339(&point.timestamp).ok()?.timestamp();
            let price = point.apy.or(point.apy_base).unwrap_or(f64::NAN);
            Some(Candle {
                timestamp,
                open: price,
                high: price,
                low: price,
                close: price,
                volume: 0.0,
            })
        })
        .collect();

    candles.sort_by_key(|c| c.timestamp);
    candles.dedup_by_key(|c| c.timestamp);
    Ok(candles)
}

/// The newest `limit` candles strictly older than `before`.
pub fn select_page(candles: Vec<Candle>, before: Option<i64>, limit: usize) -> Vec<Candle> {
    let mut page: Vec<Candle> = match before {
        Some(before) => candles.into_iter().filter(|c| c.timestamp < before).collect(),
        None => candles,
    };
    let excess = page.len().saturating_sub(limit);
    page.drain(..excess);
    page
}

#[async_trait]
impl OhlcvSource for DefiLlamaChartSource {
    fn name(&self) -> &str {
        self.client.provider()
    }

    async fn fetch_page(
        &self,
        pool: &PoolRef,
        before: Option<i64>,
        limit: usize,
    ) -> Result<Vec<Candle>, ProviderError> {
        // The chart has no cursor; every page is cut from the full history
        let endpoint = format!("chart/{}", pool.pool_address);
        let body = self.client.request(&endpoint, &[]).await?;
        Ok(select_page(parse_chart(&endpoint, body)?, before, limit))
    }
}

#[async_trait]
impl PoolListingSource for DefiLlamaSource {
    fn name(&self) -> &str {
        self.client.provider()
    }

    async fn fetch_pools(&self) -> Result<Vec<PoolListing>, ProviderError> {
        let endpoint = "pools";
        let body = self.client.request(endpoint, &[]).await?;
        parse_listing(endpoint, body)
    }
}

use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;

use super::{OhlcvSource, RateLimitedClient};
use crate::errors::ProviderError;
use crate::types::{Candle, PoolRef};

#[derive(Deserialize, Debug)]
struct GeckoOhlcvResponse {
    data: GeckoOhlcvData,
}

#[derive(Deserialize, Debug)]
struct GeckoOhlcvData {
    attributes: GeckoOhlcvAttributes,
}

#[derive(Deserialize, Debug)]
struct GeckoOhlcvAttributes {
    ohlcv_list: Vec<Vec<Option<f64>>>, // [timestamp, open, high, low, close, volume]
}

/// GeckoTerminal pool OHLCV history.
pub struct GeckoTerminalSource {
    client: Arc<RateLimitedClient>,
    timeframe: String,
}

impl GeckoTerminalSource {
    pub fn new(client: Arc<RateLimitedClient>, timeframe: impl Into<String>) -> Self {
        Self {
            client,
            timeframe: timeframe.into(),
        }
    }
}

/// Seconds per candle for a GeckoTerminal timeframe.
pub fn timeframe_seconds(timeframe: &str) -> Option<i64> {
    match timeframe {
        "minute" => Some(60),
        "hour" => Some(3_600),
        "day" => Some(86_400),
        _ => None,
    }
}

/// Maps listing chain names to GeckoTerminal network ids.
pub fn network_id(network: &str) -> String {
    let lower = network.to_ascii_lowercase();
    match lower.as_str() {
        "ethereum" | "mainnet" => "eth".to_string(),
        "avalanche" => "avax".to_string(),
        "polygon" => "polygon_pos".to_string(),
        "binance" | "bnb" => "bsc".to_string(),
        _ => lower,
    }
}

/// Parses `data.attributes.ohlcv_list` into ascending candles.
///
/// Rows without a timestamp are dropped. Missing price or volume fields are
/// kept as NaN so the quality check sees them.
pub fn parse_ohlcv(endpoint: &str, body: serde_json::Value) -> Result<Vec<Candle>, ProviderError> {
    let response: GeckoOhlcvResponse = serde_json::from_value(body).map_err(|e| ProviderError::Decode {
        provider: "geckoterminal".to_string(),
        endpoint: endpoint.to_string(),
        message: e.to_string(),
    })?;

    let mut candles: Vec<Candle> = response
        .data
        .attributes
        .ohlcv_list
        .into_iter()
        .filter(|row| matches!(row.first(), Some(Some(_))))
        .filter_map(|row| {
            let dense: Vec<f64> = row.into_iter().map(|v| v.unwrap_or(f64::NAN)).collect();
            Candle::from_row(&dense)
        })
        .collect();

    candles.sort_by_key(|c| c.timestamp);
    candles.dedup_by_key(|c| c.timestamp);
    Ok(candles)
}

#[async_trait]
impl OhlcvSource for GeckoTerminalSource {
    fn name(&self) -> &str {
        self.client.provider()
    }

    async fn fetch_page(
        &self,
        pool: &PoolRef,
        before: Option<i64>,
        limit: usize,
    ) -> Result<Vec<Candle>, ProviderError> {
        let endpoint = format!(
            "networks/{}/pools/{}/ohlcv/{}",
            network_id(&pool.network),
            pool.pool_address,
            self.timeframe
        );
        let mut params = vec![
            ("limit", limit.to_string()),
            ("currency", "usd".to_string()),
        ];
        if let Some(before) = before {
            params.push(("before_timestamp", before.to_string()));
        }

        let body = self.client.request(&endpoint, &params).await?;
        let candles = parse_ohlcv(&endpoint, body)?;
        // before_timestamp is inclusive upstream
        Ok(match before {
            Some(before) => candles.into_iter().filter(|c| c.timestamp < before).collect(),
            None => candles,
        })
    }

    fn candle_seconds(&self, _pool: &PoolRef) -> Option<i64> {
        timeframe_seconds(&self.timeframe)
    }
}

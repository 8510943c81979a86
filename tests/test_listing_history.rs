//! Integration tests for pools discovered through the yields listing
//!
//! Tests cover:
//! - A listing-id pool flowing from discovery to a stored series
//! - History for listing ids coming from the listing provider's chart
//! - Analytics computed from the chart series
//!
//! Both providers are served by one local HTTP server that records every
//! requested path.

use chrono::{TimeZone, Utc};
use pool_analytics_sdk::{
    analytics::AnalyticsEngine,
    backfill::BackfillEngine,
    database::PriceSeriesStore,
    discovery::PoolDiscovery,
    orchestrator::TieredScheduler,
    providers::{DefiLlamaChartSource, DefiLlamaSource, GeckoTerminalSource, RateLimitedClient, RoutedOhlcvSource},
    rate_limiter::RateLimiter,
    settings::Settings,
    types::Recommendation,
};
use serde_json::json;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

const POOL_ID: &str = "747c1d2a-c668-4682-b9f9-296708a3dd90";
const DAY: i64 = 86_400;
const CHART_START: i64 = 1_704_067_200; // 2024-01-01T00:00:00Z

fn listing_body() -> String {
    json!({
        "status": "success",
        "data": [{
            "pool": POOL_ID,
            "chain": "Ethereum",
            "project": "uniswap-v3",
            "symbol": "WETH-USDC",
            "tvlUsd": 50_000_000.0,
            "apyBase": 12.0,
            "apy": 12.0,
            "volumeUsd1d": 30_000_000.0,
            "poolMeta": "0.05%"
        }]
    })
    .to_string()
}

fn chart_body() -> String {
    let data: Vec<serde_json::Value> = (0..40)
        .map(|i| {
            let ts = Utc.timestamp_opt(CHART_START + i * DAY, 0).unwrap();
            json!({
                "timestamp": ts.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string(),
                "tvlUsd": 50_000_000.0,
                "apy": 10.0 + (i % 5) as f64,
                "apyBase": 10.0
            })
        })
        .collect();
    json!({ "status": "success", "data": data }).to_string()
}

/// Serves the listing and the chart, 404 for anything else.
async fn serve_llama(paths: Arc<Mutex<Vec<String>>>) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let chart_path = format!("/chart/{}", POOL_ID);

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            let mut buf = vec![0u8; 8192];
            let n = socket.read(&mut buf).await.unwrap_or(0);
            let request = String::from_utf8_lossy(&buf[..n]).to_string();
            let path = request
                .split_whitespace()
                .nth(1)
                .unwrap_or("")
                .split('?')
                .next()
                .unwrap_or("")
                .to_string();
            paths.lock().unwrap().push(path.clone());

            let (status, body) = if path == "/pools" {
                (200, listing_body())
            } else if path == chart_path {
                (200, chart_body())
            } else {
                (404, "{}".to_string())
            };
            let reply = format!(
                "HTTP/1.1 {} X\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                status,
                body.len(),
                body
            );
            socket.write_all(reply.as_bytes()).await.ok();
            socket.shutdown().await.ok();
        }
    });
    format!("http://{}", addr)
}

fn client(provider: &str, base: &str) -> Arc<RateLimitedClient> {
    let limiter = Arc::new(RateLimiter::new(provider, 100, Duration::from_secs(1), Duration::ZERO));
    Arc::new(RateLimitedClient::new(provider, base, limiter, Duration::from_secs(5)).unwrap())
}

/// A pool known only by its listing id is collected from the chart and never
/// sent to the address-keyed OHLCV provider
#[tokio::test]
async fn test_discovered_listing_pool_gets_history() {
    let paths = Arc::new(Mutex::new(Vec::new()));
    let base = serve_llama(paths.clone()).await;

    let mut settings = Settings::default();
    settings.backfill.target_days = 30;
    settings.backfill.inter_pool_delay_ms = 0;
    settings.backfill.retry_base_ms = 1;

    let llama = client("defillama", &base);
    let gecko = client("geckoterminal", &format!("{}/api/v2", base));
    let ohlcv = Arc::new(RoutedOhlcvSource::new(
        Arc::new(GeckoTerminalSource::new(gecko, "day")),
        Arc::new(DefiLlamaChartSource::new(llama.clone())),
    ));

    let store = PriceSeriesStore::in_memory().await.unwrap();
    let backfill = Arc::new(BackfillEngine::new(store.clone(), ohlcv, &settings));
    let analytics = Arc::new(AnalyticsEngine::new(store.clone(), &settings));
    let discovery = Arc::new(PoolDiscovery::new(
        store.clone(),
        Arc::new(DefiLlamaSource::new(llama)),
        settings.discovery.clone(),
    ));
    let scheduler = TieredScheduler::new(store.clone(), backfill, analytics, settings).with_discovery(discovery);

    let now = Utc.with_ymd_and_hms(2024, 2, 15, 6, 0, 0).unwrap();
    let stop = AtomicBool::new(false);
    let summary = scheduler.run_for_hour(now, 6, &stop).await.unwrap();

    assert_eq!(summary.pools_processed, 1);
    assert_eq!(summary.pools_succeeded, 1);
    assert_eq!(summary.pools_failed, 0);
    assert_eq!(summary.data_points, 40);

    let coverage = store.coverage(POOL_ID).await.unwrap();
    assert_eq!(coverage.count, 40);
    assert!((coverage.day_span - 39.0).abs() < 1e-9);

    let series = store.query_series(POOL_ID, None, None).await.unwrap();
    assert_eq!(series[0].price, 10.0);
    assert_eq!(series[0].network, "ethereum");

    let snapshot = store.load_analytics(POOL_ID).await.unwrap().unwrap();
    assert_ne!(snapshot.recommendation, Recommendation::InsufficientData);
    assert!(snapshot.volatility_30d.is_some());

    let requested = paths.lock().unwrap().clone();
    assert!(requested.iter().any(|p| p == "/pools"));
    assert!(requested.iter().any(|p| p == &format!("/chart/{}", POOL_ID)));
    assert!(
        requested.iter().all(|p| !p.starts_with("/api/v2")),
        "listing id reached the OHLCV provider: {:?}",
        requested
    );
}

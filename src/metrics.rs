// src/metrics.rs

#[cfg(feature = "observability")]
pub use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram, Unit};

// NOTE: When observability feature is disabled, provide stub implementations
#[cfg(not(feature = "observability"))]
pub enum Unit {
    Count,
    Seconds,
}

#[cfg(not(feature = "observability"))]
#[macro_export]
macro_rules! counter {
    ($name:expr, $value:expr $(, $label:expr => $label_value:expr)* $(,)?) => {{
        let _ = &$value;
        $( let _ = (&$label, &$label_value); )*
    }};
}

#[cfg(not(feature = "observability"))]
#[macro_export]
macro_rules! gauge {
    ($name:expr, $value:expr $(, $label:expr => $label_value:expr)* $(,)?) => {{
        let _ = &$value;
        $( let _ = (&$label, &$label_value); )*
    }};
}

#[cfg(not(feature = "observability"))]
#[macro_export]
macro_rules! histogram {
    ($name:expr, $value:expr $(, $label:expr => $label_value:expr)* $(,)?) => {{
        let _ = &$value;
        $( let _ = (&$label, &$label_value); )*
    }};
}

#[cfg(not(feature = "observability"))]
#[macro_export]
macro_rules! describe_counter {
    ($name:expr, $unit:expr, $desc:expr) => {};
    ($name:expr, $desc:expr) => {};
}

#[cfg(not(feature = "observability"))]
#[macro_export]
macro_rules! describe_gauge {
    ($name:expr, $desc:expr) => {};
}

#[cfg(not(feature = "observability"))]
#[macro_export]
macro_rules! describe_histogram {
    ($name:expr, $unit:expr, $desc:expr) => {};
    ($name:expr, $desc:expr) => {};
}

#[cfg(not(feature = "observability"))]
use crate::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};

/// Initializes the descriptions for all the metrics in the application.
/// This should be called once at startup.
pub fn describe_metrics() {
    describe_counter!(
        "provider_requests_total",
        Unit::Count,
        "Requests issued to an upstream provider, labeled by provider."
    );
    describe_counter!(
        "provider_rate_limit_waits_total",
        Unit::Count,
        "Times a request had to wait for the provider's sliding window."
    );
    describe_counter!(
        "provider_errors_total",
        Unit::Count,
        "Provider failures labeled by provider and kind (status, timeout, network, decode)."
    );
    describe_counter!(
        "backfill_pools_total",
        Unit::Count,
        "Per-pool collection outcomes labeled by outcome (sufficient, completed, failed)."
    );
    describe_counter!(
        "price_points_inserted_total",
        Unit::Count,
        "Price points written to the store."
    );
    describe_counter!(
        "price_points_duplicate_total",
        Unit::Count,
        "Price points skipped because they were already stored."
    );
    describe_counter!(
        "analytics_snapshots_total",
        Unit::Count,
        "Analytics snapshots written, labeled by recommendation."
    );
    describe_histogram!(
        "scheduler_run_seconds",
        Unit::Seconds,
        "Wall-clock duration of a scheduler pass."
    );
    describe_gauge!(
        "scheduler_last_run_unix_seconds",
        "Timestamp of the last completed scheduler pass."
    );
}

/// Starts the Prometheus exporter on `0.0.0.0:port`.
#[cfg(feature = "observability")]
pub fn install_exporter(port: u16) -> anyhow::Result<()> {
    use metrics_exporter_prometheus::PrometheusBuilder;
    use std::net::SocketAddr;

    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| anyhow::anyhow!("failed to install Prometheus exporter: {}", e))?;
    describe_metrics();
    Ok(())
}

// --- Helper functions to update metrics ---

pub fn increment_provider_request(provider: &str) {
    counter!("provider_requests_total", 1, "provider" => provider.to_string());
}

pub fn increment_rate_limit_wait(provider: &str) {
    counter!("provider_rate_limit_waits_total", 1, "provider" => provider.to_string());
}

pub fn increment_provider_error(provider: &str, kind: &'static str) {
    counter!("provider_errors_total", 1, "provider" => provider.to_string(), "kind" => kind);
}

pub fn increment_backfill_outcome(outcome: &'static str) {
    counter!("backfill_pools_total", 1, "outcome" => outcome);
}

pub fn increment_price_points(inserted: u64, duplicates: u64) {
    counter!("price_points_inserted_total", inserted);
    counter!("price_points_duplicate_total", duplicates);
}

pub fn increment_analytics_snapshot(recommendation: &'static str) {
    counter!("analytics_snapshots_total", 1, "recommendation" => recommendation);
}

pub fn record_scheduler_run(duration: std::time::Duration) {
    histogram!("scheduler_run_seconds", duration.as_secs_f64());
    gauge!("scheduler_last_run_unix_seconds", chrono::Utc::now().timestamp() as f64);
}

//! Observability utilities for the price server.
//!
//! This crate provides:
//! - Prometheus metrics recording and export
//! - Refresh, cache and trigger metrics for the price catalog
//! - Axum middleware for automatic request metrics
//!
//! # Example
//!
//! ```rust,ignore
//! use observability::{init_metrics, metrics_handler, PricingMetrics};
//!
//! init_metrics();
//! PricingMetrics::record_cache_lookup("aws", true);
//!
//! let app = Router::new().route("/metrics", get(metrics_handler));
//! ```

pub mod middleware;
pub mod pricing;

pub use middleware::metrics_middleware;
pub use pricing::{PricingMetrics, RefreshTimer, TriggerOutcome};

pub use metrics::{counter, gauge, histogram};

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;
use tracing::{info, warn};

static METRICS_HANDLE: OnceCell<PrometheusHandle> = OnceCell::new();

/// Initialize the Prometheus metrics recorder.
///
/// Call once at startup. If another recorder is already installed the
/// failure is logged and `None` is returned; metrics then become no-ops.
pub fn init_metrics() -> Option<&'static PrometheusHandle> {
    if let Some(handle) = METRICS_HANDLE.get() {
        return Some(handle);
    }

    match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => {
            info!("Prometheus metrics recorder initialized");
            register_metric_descriptions();
            Some(METRICS_HANDLE.get_or_init(|| handle))
        }
        Err(e) => {
            warn!(error = %e, "Failed to install Prometheus recorder");
            None
        }
    }
}

/// Get the metrics handle (must call init_metrics first)
pub fn get_metrics_handle() -> Option<&'static PrometheusHandle> {
    METRICS_HANDLE.get()
}

/// Axum handler for /metrics endpoint
pub async fn metrics_handler() -> String {
    match get_metrics_handle() {
        Some(handle) => handle.render(),
        None => "# Metrics not initialized\n".to_string(),
    }
}

fn register_metric_descriptions() {
    use metrics::describe_counter;
    use metrics::describe_gauge;
    use metrics::describe_histogram;

    describe_counter!("http_requests_total", "Total number of HTTP requests");
    describe_histogram!(
        "http_request_duration_seconds",
        "HTTP request duration in seconds"
    );
    describe_counter!(
        "http_requests_errors_total",
        "Total number of HTTP request errors"
    );

    describe_counter!(
        "price_refresh_cycles_total",
        "Refresh cycles by provider, dimension and status"
    );
    describe_histogram!(
        "price_refresh_duration_seconds",
        "Refresh cycle duration in seconds"
    );
    describe_counter!(
        "price_refresh_unit_failures_total",
        "Refresh units (region or instance type) abandoned after an error"
    );
    describe_counter!(
        "price_cache_lookups_total",
        "Instance price lookups by provider and result"
    );
    describe_counter!(
        "price_lazy_triggers_total",
        "Lazy refresh trigger requests by outcome"
    );
    describe_gauge!("price_catalog_regions", "Regions held in the price catalog");
    describe_gauge!(
        "price_catalog_instance_types",
        "Instance type records held in the price catalog"
    );
}

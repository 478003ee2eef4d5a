//! Price catalog metrics: refresh cycles, cache lookups and lazy triggers.

use metrics::{counter, gauge, histogram};
use std::time::Instant;

/// What happened to a lazy refresh trigger request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerOutcome {
    Queued,
    Coalesced,
    Dropped,
}

impl TriggerOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerOutcome::Queued => "queued",
            TriggerOutcome::Coalesced => "coalesced",
            TriggerOutcome::Dropped => "dropped",
        }
    }
}

/// Pricing metrics recorder
pub struct PricingMetrics;

impl PricingMetrics {
    // =========================================================================
    // Refresh Metrics
    // =========================================================================

    /// Record the start of a refresh cycle for one pricing dimension
    pub fn record_refresh_started(provider: &str, dimension: &str) {
        counter!(
            "price_refresh_cycles_total",
            "provider" => provider.to_string(),
            "dimension" => dimension.to_string(),
            "status" => "started"
        )
        .increment(1);
    }

    /// Record a finished refresh cycle
    pub fn record_refresh_completed(
        provider: &str,
        dimension: &str,
        units: usize,
        duration_secs: f64,
    ) {
        counter!(
            "price_refresh_cycles_total",
            "provider" => provider.to_string(),
            "dimension" => dimension.to_string(),
            "status" => "completed"
        )
        .increment(1);

        histogram!(
            "price_refresh_duration_seconds",
            "provider" => provider.to_string(),
            "dimension" => dimension.to_string()
        )
        .record(duration_secs);

        tracing::info!(
            provider = provider,
            dimension = dimension,
            units = units,
            duration_secs = duration_secs,
            "Price refresh completed"
        );
    }

    /// Record a refresh unit (one region or one instance type) that was abandoned
    pub fn record_unit_failed(provider: &str, dimension: &str, region: &str, error: &str) {
        counter!(
            "price_refresh_unit_failures_total",
            "provider" => provider.to_string(),
            "dimension" => dimension.to_string()
        )
        .increment(1);

        tracing::warn!(
            provider = provider,
            dimension = dimension,
            region = region,
            error = error,
            "Refresh unit failed, skipping"
        );
    }

    // =========================================================================
    // Read Path Metrics
    // =========================================================================

    /// Record an instance price lookup against the catalog
    pub fn record_cache_lookup(provider: &str, hit: bool) {
        counter!(
            "price_cache_lookups_total",
            "provider" => provider.to_string(),
            "result" => if hit { "hit" } else { "miss" }
        )
        .increment(1);
    }

    /// Record what happened to a lazy trigger request
    pub fn record_trigger(provider: &str, outcome: TriggerOutcome) {
        counter!(
            "price_lazy_triggers_total",
            "provider" => provider.to_string(),
            "outcome" => outcome.as_str()
        )
        .increment(1);
    }

    // =========================================================================
    // Gauge Metrics (Current State)
    // =========================================================================

    /// Set the catalog size gauges for a provider
    pub fn set_catalog_size(provider: &str, regions: usize, instance_types: usize) {
        gauge!("price_catalog_regions", "provider" => provider.to_string()).set(regions as f64);
        gauge!("price_catalog_instance_types", "provider" => provider.to_string())
            .set(instance_types as f64);
    }
}

/// Timer guard for a refresh cycle.
///
/// Records a completed cycle when `finish()` is called or when dropped.
pub struct RefreshTimer {
    start: Instant,
    provider: String,
    dimension: String,
    units: usize,
    finished: bool,
}

impl RefreshTimer {
    /// Start timing a refresh cycle and count it as started
    pub fn start(provider: &str, dimension: &str) -> Self {
        PricingMetrics::record_refresh_started(provider, dimension);
        Self {
            start: Instant::now(),
            provider: provider.to_string(),
            dimension: dimension.to_string(),
            units: 0,
            finished: false,
        }
    }

    /// Number of units (regions, instance types) the cycle covers
    pub fn set_units(&mut self, units: usize) {
        self.units = units;
    }

    /// Stop the timer and record the cycle. Returns the duration in seconds.
    pub fn finish(&mut self) -> f64 {
        if self.finished {
            return 0.0;
        }
        self.finished = true;

        let duration_secs = self.start.elapsed().as_secs_f64();
        PricingMetrics::record_refresh_completed(
            &self.provider,
            &self.dimension,
            self.units,
            duration_secs,
        );
        duration_secs
    }
}

impl Drop for RefreshTimer {
    fn drop(&mut self) {
        if !self.finished {
            self.finish();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trigger_outcome_labels() {
        assert_eq!(TriggerOutcome::Queued.as_str(), "queued");
        assert_eq!(TriggerOutcome::Coalesced.as_str(), "coalesced");
        assert_eq!(TriggerOutcome::Dropped.as_str(), "dropped");
    }

    #[test]
    fn test_refresh_timer_finishes_once() {
        let mut timer = RefreshTimer::start("aws", "spot");
        timer.set_units(3);
        assert!(timer.finish() >= 0.0);
        assert_eq!(timer.finish(), 0.0);
    }
}

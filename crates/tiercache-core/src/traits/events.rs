//! Event sink for cache observability

use std::fmt::Display;
use std::time::Duration;

/// Cache operation for latency tracking
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheOp {
    Get,
    Set,
    Load,
    EarlyRefresh,
    Invalidate,
}

impl CacheOp {
    /// Get operation as string label
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheOp::Get => "get",
            CacheOp::Set => "set",
            CacheOp::Load => "load",
            CacheOp::EarlyRefresh => "early_refresh",
            CacheOp::Invalidate => "invalidate",
        }
    }
}

/// Trait for cache event notifications and metrics.
///
/// Implement this to integrate with your observability system. The manager
/// fires these on its hot paths, so implementations should be cheap.
pub trait CacheEvents<K>: Send + Sync + 'static {
    /// A lookup found the key in `layer`.
    fn on_hit(&self, key: &K, layer: &str);

    /// A lookup missed every layer.
    fn on_miss(&self, key: &K);

    /// A value was written into a faster layer after a hit in a slower one.
    fn on_promotion(&self, key: &K, layer: &str);

    /// A background refresh replaced a value nearing expiry.
    fn on_early_refresh(&self, key: &K);

    /// The loader failed terminally for a key.
    fn on_load_failure(&self, key: &K);

    /// Record operation latency.
    fn record_latency(&self, op: CacheOp, elapsed: Duration);
}

/// No-op event sink (default)
///
/// Zero overhead when observability is not needed.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopEvents;

impl<K> CacheEvents<K> for NoopEvents
where
    K: Send + Sync + 'static,
{
    #[inline]
    fn on_hit(&self, _key: &K, _layer: &str) {}

    #[inline]
    fn on_miss(&self, _key: &K) {}

    #[inline]
    fn on_promotion(&self, _key: &K, _layer: &str) {}

    #[inline]
    fn on_early_refresh(&self, _key: &K) {}

    #[inline]
    fn on_load_failure(&self, _key: &K) {}

    #[inline]
    fn record_latency(&self, _op: CacheOp, _elapsed: Duration) {}
}

/// Event sink that logs via `tracing`
#[derive(Debug, Clone, Default)]
pub struct TracingEvents {
    service_name: Option<String>,
}

impl TracingEvents {
    /// Create new tracing event sink
    pub fn new() -> Self {
        Self::default()
    }

    /// Create with service name prefix
    pub fn with_service_name(mut self, name: impl Into<String>) -> Self {
        self.service_name = Some(name.into());
        self
    }
}

impl<K> CacheEvents<K> for TracingEvents
where
    K: Display + Send + Sync + 'static,
{
    fn on_hit(&self, key: &K, layer: &str) {
        tracing::debug!(
            target: "tiercache",
            event = "hit",
            key = %key,
            layer = layer,
            service = ?self.service_name,
            "cache hit"
        );
    }

    fn on_miss(&self, key: &K) {
        tracing::debug!(
            target: "tiercache",
            event = "miss",
            key = %key,
            service = ?self.service_name,
            "cache miss"
        );
    }

    fn on_promotion(&self, key: &K, layer: &str) {
        tracing::debug!(
            target: "tiercache",
            event = "promotion",
            key = %key,
            layer = layer,
            service = ?self.service_name,
            "promoted to faster layer"
        );
    }

    fn on_early_refresh(&self, key: &K) {
        tracing::debug!(
            target: "tiercache",
            event = "early_refresh",
            key = %key,
            service = ?self.service_name,
            "early refresh completed"
        );
    }

    fn on_load_failure(&self, key: &K) {
        tracing::warn!(
            target: "tiercache",
            event = "load_failure",
            key = %key,
            service = ?self.service_name,
            "loader failed"
        );
    }

    fn record_latency(&self, op: CacheOp, elapsed: Duration) {
        tracing::trace!(
            target: "tiercache",
            event = "latency",
            operation = op.as_str(),
            duration_ms = elapsed.as_millis(),
            service = ?self.service_name,
            "operation latency"
        );
    }
}

/// Event sink that feeds the `metrics` facade.
///
/// Emits `cache_operations_total` (counter, labeled by operation and event)
/// and `cache_operation_latency_ms` (histogram, labeled by operation).
/// Enable with the `metrics` feature.
#[cfg(feature = "metrics")]
#[derive(Debug, Clone, Copy, Default)]
pub struct MetricsEvents;

#[cfg(feature = "metrics")]
impl<K> CacheEvents<K> for MetricsEvents
where
    K: Send + Sync + 'static,
{
    fn on_hit(&self, _key: &K, layer: &str) {
        metrics::counter!("cache_hits_total", "layer" => layer.to_string()).increment(1);
    }

    fn on_miss(&self, _key: &K) {
        metrics::counter!("cache_misses_total").increment(1);
    }

    fn on_promotion(&self, _key: &K, layer: &str) {
        metrics::counter!("cache_promotions_total", "layer" => layer.to_string()).increment(1);
    }

    fn on_early_refresh(&self, _key: &K) {
        metrics::counter!("cache_early_refreshes_total").increment(1);
    }

    fn on_load_failure(&self, _key: &K) {
        metrics::counter!("cache_load_failures_total").increment(1);
    }

    fn record_latency(&self, op: CacheOp, elapsed: Duration) {
        metrics::counter!("cache_operations_total", "op" => op.as_str()).increment(1);
        metrics::histogram!("cache_operation_latency_ms", "op" => op.as_str())
            .record(elapsed.as_secs_f64() * 1000.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_op_as_str() {
        assert_eq!(CacheOp::Get.as_str(), "get");
        assert_eq!(CacheOp::EarlyRefresh.as_str(), "early_refresh");
    }

    #[test]
    fn test_noop_events() {
        let events = NoopEvents;
        // Just verify these don't panic
        CacheEvents::<String>::on_hit(&events, &"key".to_string(), "memory");
        CacheEvents::<String>::on_miss(&events, &"key".to_string());
        CacheEvents::<String>::record_latency(&events, CacheOp::Get, Duration::from_millis(1));
    }
}

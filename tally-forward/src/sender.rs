use std::sync::Arc;

use tally_statsd::MetricsClient;

/// A downstream that accepts fully qualified gauges and counters.
///
/// Calls are fire-and-forget. Implementations must not block and must not fail the caller.
pub trait MetricSender {
    /// Sets a gauge to `value`.
    fn gauge(&self, name: &str, value: f64);

    /// Increments a counter by `value`.
    fn counter(&self, name: &str, value: f64);
}

impl<T: MetricSender + ?Sized> MetricSender for &T {
    fn gauge(&self, name: &str, value: f64) {
        (**self).gauge(name, value)
    }

    fn counter(&self, name: &str, value: f64) {
        (**self).counter(name, value)
    }
}

impl<T: MetricSender + ?Sized> MetricSender for Arc<T> {
    fn gauge(&self, name: &str, value: f64) {
        (**self).gauge(name, value)
    }

    fn counter(&self, name: &str, value: f64) {
        (**self).counter(name, value)
    }
}

impl MetricSender for MetricsClient {
    fn gauge(&self, name: &str, value: f64) {
        self.forward_gauge(name, value)
    }

    fn counter(&self, name: &str, value: f64) {
        self.forward_counter(name, value)
    }
}

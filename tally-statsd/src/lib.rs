//! A StatsD metric client built on cadence.
//!
//! The client serves two purposes:
//!
//!  - Forwarding canonical metrics, whose names are fully qualified by the caller. See
//!    [`MetricsClient::forward_gauge`] and [`MetricsClient::forward_counter`].
//!  - Internal measurements of Tally itself, recorded through the [`metric!`] macro and prefixed
//!    with the configured metrics prefix.
//!
//! ## Defining Metrics
//!
//! In order to record internal metrics, one needs to first define one of the metric traits on a
//! custom enum. The following types of metrics are available: `counter`, `timer`, `gauge`, and
//! `distribution`. For explanations on what that means see [Metric Types].
//!
//! The metric traits serve only to provide a type safe metric name. All metric types have exactly
//! the same form, they are different only to ensure that a metric can only be used for the type for
//! which it was defined, (e.g. a counter metric cannot be used as a timer metric).
//!
//! ## Initializing the Client
//!
//! Metrics can be used without initializing a statsd client. In that case, invoking `with_client`
//! or the [`metric!`] macro will become a noop. Only when configured, metrics will actually be
//! collected.
//!
//! To initialize the client, either use [`set_client`] to pass a custom client, or use
//! [`init`] to create a default client with known arguments:
//!
//! ```no_run
//! # use std::collections::BTreeMap;
//! # use tally_statsd::MetricsConfig;
//!
//! let client = tally_statsd::init(&MetricsConfig {
//!     prefix: "tally".to_owned(),
//!     host: "localhost:8125".to_owned(),
//!     buffer_size: None,
//!     default_tags: BTreeMap::new(),
//!     sample_rate: 1.0,
//! })
//! .unwrap();
//!
//! client.forward_gauge("samza.job.lag", 12.0);
//! ```
//!
//! ## Macro Usage
//!
//! The recommended way to record internal metrics is by using the [`metric!`] macro.
//!
//! ```
//! use tally_statsd::{metric, CounterMetric};
//!
//! struct MyCounter;
//!
//! impl CounterMetric for MyCounter {
//!     fn name(&self) -> &'static str {
//!         "counter"
//!     }
//! }
//!
//! metric!(counter(MyCounter) += 1);
//! ```
//!
//! [Metric Types]: https://github.com/statsd/statsd/blob/master/docs/metric_types.md
use std::collections::BTreeMap;
use std::fmt;
use std::io;
use std::net::{Ipv4Addr, UdpSocket};
use std::ops::Deref;
use std::panic::RefUnwindSafe;
use std::sync::Arc;

use cadence::{
    BufferedUdpMetricSink, Counted, Gauged, Metric, MetricBuilder, MetricSink, QueuingMetricSink,
    StatsdClient,
};
use parking_lot::RwLock;
use rand::Rng;
use rand::distr::StandardUniform;

/// Maximum number of metric events that can be queued before we start dropping them
const METRICS_MAX_QUEUE_SIZE: usize = 100_000;

#[derive(Debug, Clone, Copy)]
pub struct SampleRate(f64);

impl From<f64> for SampleRate {
    fn from(value: f64) -> Self {
        Self(value.clamp(0.0, 1.0))
    }
}

impl From<SampleRate> for f64 {
    fn from(value: SampleRate) -> Self {
        value.0
    }
}

/// An error returned by [`init`] and [`MetricsClient::from_config`].
#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    /// The local UDP socket could not be set up.
    #[error("failed to set up the statsd socket")]
    Io(#[from] io::Error),
    /// The upstream address could not be resolved.
    #[error("failed to create the statsd sink")]
    Sink(#[from] cadence::MetricError),
}

/// Client configuration used for initialization of [`MetricsClient`].
#[derive(Debug)]
pub struct MetricsConfig {
    /// Prefix which is prepended to all internal metric names.
    ///
    /// Forwarded metrics are not prefixed.
    pub prefix: String,
    /// Host of the metrics upstream.
    pub host: String,
    /// Size of the UDP buffer in bytes, `None` uses the cadence default.
    pub buffer_size: Option<usize>,
    /// Tags that are added to all metrics.
    pub default_tags: BTreeMap<String, String>,
    /// Default sample rate for metrics, between 0.0 (= 0%) and 1.0 (= 100%)
    pub sample_rate: f64,
}

/// A metric sink shared between the internal and the forwarding client.
#[derive(Clone)]
struct SharedSink(Arc<dyn MetricSink + Send + Sync + RefUnwindSafe>);

impl MetricSink for SharedSink {
    fn emit(&self, metric: &str) -> io::Result<usize> {
        self.0.emit(metric)
    }

    fn flush(&self) -> io::Result<()> {
        self.0.flush()
    }
}

impl fmt::Debug for SharedSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SharedSink")
    }
}

/// Client configuration object to store globally.
#[derive(Debug)]
pub struct MetricsClient {
    /// The raw statsd client for internal measurements.
    pub statsd_client: StatsdClient,
    /// Default tags to apply to every metric.
    pub default_tags: BTreeMap<String, String>,
    /// Global sample rate.
    pub default_sample_rate: SampleRate,
    /// Client without prefix for forwarded metrics.
    forward_client: StatsdClient,
    sink: SharedSink,
}

impl Deref for MetricsClient {
    type Target = StatsdClient;

    fn deref(&self) -> &StatsdClient {
        &self.statsd_client
    }
}

impl MetricsClient {
    /// Creates a client writing to the given cadence sink.
    pub fn from_sink<T>(
        prefix: &str,
        sink: T,
        default_tags: BTreeMap<String, String>,
        default_sample_rate: SampleRate,
    ) -> Self
    where
        T: MetricSink + Send + Sync + RefUnwindSafe + 'static,
    {
        let sink = SharedSink(Arc::new(sink));

        Self {
            statsd_client: StatsdClient::from_sink(prefix, sink.clone()),
            default_tags,
            default_sample_rate,
            forward_client: StatsdClient::from_sink("", sink.clone()),
            sink,
        }
    }

    /// Creates a client that reports to the statsd upstream over UDP.
    ///
    /// Metrics are queued and sent from a background thread, so sending never blocks.
    pub fn from_config(config: &MetricsConfig) -> Result<Self, MetricsError> {
        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))?;
        socket.set_nonblocking(true)?;

        let udp_sink = match config.buffer_size {
            Some(size) => BufferedUdpMetricSink::with_capacity(config.host.as_str(), socket, size)?,
            None => BufferedUdpMetricSink::from(config.host.as_str(), socket)?,
        };
        let queuing_sink = QueuingMetricSink::with_capacity(udp_sink, METRICS_MAX_QUEUE_SIZE);

        Ok(Self::from_sink(
            &config.prefix,
            queuing_sink,
            config.default_tags.clone(),
            config.sample_rate.into(),
        ))
    }

    /// Creates a client that captures all emitted lines, for tests.
    #[doc(hidden)]
    pub fn capturing() -> (crossbeam_channel::Receiver<Vec<u8>>, Self) {
        let (rx, sink) = cadence::SpyMetricSink::new();
        let client = Self::from_sink("", sink, BTreeMap::new(), 1.0.into());
        (rx, client)
    }

    /// Send a metric with the default tags defined on this `MetricsClient`.
    #[inline(always)]
    pub fn send_metric<'a, T>(&'a self, metric: MetricBuilder<'a, '_, T>)
    where
        T: Metric + From<String>,
    {
        self.send_metric_with_sample_rate(metric, None)
    }

    /// Send a metric with an explicit sample rate that overrides the global sample rate.
    #[doc(hidden)]
    #[inline(always)]
    pub fn send_metric_with_sample_rate<'a, T>(
        &'a self,
        mut metric: MetricBuilder<'a, '_, T>,
        sample_rate: Option<SampleRate>,
    ) where
        T: Metric + From<String>,
    {
        let effective_sample_rate = match sample_rate {
            Some(sample_rate) => sample_rate.0.min(self.default_sample_rate.0),
            None => self.default_sample_rate.0,
        };
        if !Self::should_send(effective_sample_rate) {
            return;
        }

        for (k, v) in &self.default_tags {
            metric = metric.with_tag(k, v);
        }

        if effective_sample_rate < 1.0 {
            metric = metric.with_sampling_rate(effective_sample_rate);
        }

        if let Err(error) = metric.try_send() {
            tally_log::error!(
                error = &error as &dyn std::error::Error,
                maximum_capacity = METRICS_MAX_QUEUE_SIZE,
                "error sending a metric",
            );
        }
    }

    /// Forwards a gauge under its fully qualified name.
    ///
    /// Forwarded metrics are never sampled and carry none of the default tags.
    pub fn forward_gauge(&self, name: &str, value: f64) {
        if !value.is_finite() {
            tally_log::debug!(name, value, "skipping non-finite gauge");
            return;
        }

        let result = self.forward_client.gauge_with_tags(name, value).try_send();
        if let Err(error) = result {
            Self::log_forward_error(&error);
        }
    }

    /// Forwards a counter increment under its fully qualified name.
    ///
    /// Fractional increments are written as raw lines, since cadence only models integer
    /// counters. Like gauges, forwarded counters are never sampled or tagged.
    pub fn forward_counter(&self, name: &str, value: f64) {
        if !value.is_finite() {
            tally_log::debug!(name, value, "skipping non-finite counter");
            return;
        }

        if let Some(count) = integral_count(value) {
            let result = self.forward_client.count_with_tags(name, count).try_send();
            if let Err(error) = result {
                Self::log_forward_error(&error);
            }
            return;
        }

        if let Err(error) = self.sink.emit(&format_counter_line(name, value)) {
            Self::log_forward_error(&error);
        }
    }

    fn log_forward_error(error: &(dyn std::error::Error + 'static)) {
        tally_log::error!(
            error,
            maximum_capacity = METRICS_MAX_QUEUE_SIZE,
            "error forwarding a metric",
        );
    }

    fn should_send(sample_rate: f64) -> bool {
        if sample_rate <= 0.0 {
            false
        } else if sample_rate >= 1.0 {
            true
        } else {
            // Using thread local RNG and uniform distribution here because Rng::gen_range is
            // "optimized for the case that only a single sample is made from the given range".
            let mut rng = rand::rng();
            let s: f64 = rng.sample(StandardUniform);
            s <= sample_rate
        }
    }
}

/// Returns the value as `i64` if it has no fractional part and fits.
fn integral_count(value: f64) -> Option<i64> {
    // `i64::MAX as f64` rounds up to 2^63, which is already out of range.
    let in_range = value >= i64::MIN as f64 && value < i64::MAX as f64;
    (value.fract() == 0.0 && in_range).then_some(value as i64)
}

/// Formats an untagged counter line in the same shape cadence uses: `name:value|c`.
fn format_counter_line(name: &str, value: f64) -> String {
    format!("{name}:{value}|c")
}

static METRICS_CLIENT: RwLock<Option<Arc<MetricsClient>>> = RwLock::new(None);

thread_local! {
    static CURRENT_CLIENT: std::cell::RefCell<Option<Arc<MetricsClient>>>  = METRICS_CLIENT.read().clone().into();
}

/// Internal prelude for the macro
#[doc(hidden)]
pub mod _pred {
    pub use cadence::prelude::*;
}

/// Set a new statsd client.
pub fn set_client(client: impl Into<Arc<MetricsClient>>) {
    *METRICS_CLIENT.write() = Some(client.into());
    CURRENT_CLIENT.with(|cell| cell.replace(METRICS_CLIENT.read().clone()));
}

/// Set a test client for the period of the called function (only affects the current thread).
pub fn with_capturing_test_client(f: impl FnOnce()) -> Vec<String> {
    with_capturing_test_client_sample_rate(1.0, f)
}

/// Set a test client with a custom global sample rate for the period of the called function.
#[doc(hidden)]
pub fn with_capturing_test_client_sample_rate(sample_rate: f64, f: impl FnOnce()) -> Vec<String> {
    let (rx, sink) = cadence::SpyMetricSink::new();
    let test_client = MetricsClient::from_sink("", sink, BTreeMap::new(), sample_rate.into());

    CURRENT_CLIENT.with(|cell| {
        let old_client = cell.replace(Some(Arc::new(test_client)));
        f();
        cell.replace(old_client);
    });

    rx.iter()
        .map(|x| String::from_utf8_lossy(&x).into_owned())
        .collect()
}

/// Tell the metrics system to report to statsd.
///
/// Returns the client, so that it can be handed explicitly to components forwarding metrics.
pub fn init(config: &MetricsConfig) -> Result<Arc<MetricsClient>, MetricsError> {
    let client = Arc::new(MetricsClient::from_config(config)?);
    tally_log::info!("reporting metrics to statsd at {}", config.host);

    let sample_rate = f64::from(client.default_sample_rate);
    tally_log::debug!(
        "metrics sample rate is set to {sample_rate}{}",
        if sample_rate == 0.0 {
            ", no metrics will be reported"
        } else {
            ""
        }
    );

    set_client(client.clone());
    Ok(client)
}

/// Invoke a callback with the current statsd client.
///
/// If statsd is not configured the callback is not invoked.  For the most part
/// the [`metric!`] macro should be used instead.
#[inline(always)]
pub fn with_client<F, R>(f: F) -> R
where
    F: FnOnce(&MetricsClient) -> R,
    R: Default,
{
    CURRENT_CLIENT.with(|client| {
        if let Some(client) = client.borrow().as_deref() {
            f(client)
        } else {
            R::default()
        }
    })
}

/// A metric for capturing timings.
///
/// Timings are a positive number of milliseconds between a start and end time.
///
/// ## Example
///
/// ```
/// use tally_statsd::{metric, TimerMetric};
///
/// struct TranslateDuration;
///
/// impl TimerMetric for TranslateDuration {
///     fn name(&self) -> &'static str {
///         "translate.duration"
///     }
/// }
///
/// # fn translate() {}
/// // measure time by explicitly setting a std::timer::Duration
/// # use std::time::Instant;
/// let start_time = Instant::now();
/// translate();
/// metric!(timer(TranslateDuration) = start_time.elapsed(), source = "druid");
///
/// // measure time implicitly by enclosing a code block in a metric
/// metric!(timer(TranslateDuration), {
///     translate();
/// });
/// ```
pub trait TimerMetric {
    /// Returns the timer metric name that will be sent to statsd.
    fn name(&self) -> &'static str;
}

/// A metric for capturing counters.
///
/// Counters are simple values incremented or decremented by a client. The rates at which these
/// events occur or average values will be determined by the server receiving them.
///
/// ## Example
///
/// ```
/// use tally_statsd::{metric, CounterMetric};
///
/// enum MyCounter {
///     Records,
///     Skipped,
/// }
///
/// impl CounterMetric for MyCounter {
///     fn name(&self) -> &'static str {
///         match self {
///             Self::Records => "records",
///             Self::Skipped => "skipped",
///         }
///     }
/// }
///
/// // add to the counter
/// metric!(counter(MyCounter::Records) += 1);
///
/// // add to the counter and provide tags
/// metric!(counter(MyCounter::Skipped) += 1, source = "samza");
///
/// // subtract from the counter
/// metric!(counter(MyCounter::Records) -= 1);
/// ```
pub trait CounterMetric {
    /// Returns the counter metric name that will be sent to statsd.
    fn name(&self) -> &'static str;
}

/// A metric for capturing distributions.
///
/// A distribution is often similar to timers. Distributions can be thought of as a
/// more general (not limited to timing things) form of timers.
///
/// ## Example
///
/// ```
/// use tally_statsd::{metric, DistributionMetric};
///
/// struct MessageAge;
///
/// impl DistributionMetric for MessageAge {
///     fn name(&self) -> &'static str {
///         "message_age"
///     }
/// }
///
/// metric!(distribution(MessageAge) = 1200u64, source = "samza");
/// ```
pub trait DistributionMetric {
    /// Returns the distribution metric name that will be sent to statsd.
    fn name(&self) -> &'static str;
}

/// A metric for capturing gauges.
///
/// Gauge values are an instantaneous measurement of a value determined by the client. They do not
/// change unless changed by the client.
///
/// ## Example
///
/// ```
/// use tally_statsd::{metric, GaugeMetric};
///
/// struct QueueSize;
///
/// impl GaugeMetric for QueueSize {
///     fn name(&self) -> &'static str {
///         "queue_size"
///     }
/// }
///
/// metric!(gauge(QueueSize) = 12u64);
/// ```
pub trait GaugeMetric {
    /// Returns the gauge metric name that will be sent to statsd.
    fn name(&self) -> &'static str;
}

/// Emits a metric.
///
/// See [crate-level documentation](self) for examples.
#[macro_export]
macro_rules! metric {
    // counter increment
    (counter($id:expr) += $value:expr $(, $($k:ident).* = $v:expr)* $(,)?) => {
        match $value {
            value if value != 0 => {
                $crate::with_client(|client| {
                    use $crate::_pred::*;
                    client.send_metric(
                        client.count_with_tags(&$crate::CounterMetric::name(&$id), value)
                        $(.with_tag(stringify!($($k).*), $v))*
                    )
                })
            },
            _ => {},
        };
    };

    // counter decrement
    (counter($id:expr) -= $value:expr $(, $($k:ident).* = $v:expr)* $(,)?) => {
        match $value {
            value if value != 0 => {
                $crate::with_client(|client| {
                    use $crate::_pred::*;
                    client.send_metric(
                        client.count_with_tags(&$crate::CounterMetric::name(&$id), -value)
                            $(.with_tag(stringify!($($k).*), $v))*
                    )
                })
            },
            _ => {},
        };
    };

    // gauge set
    (gauge($id:expr) = $value:expr $(, $($k:ident).* = $v:expr)* $(,)?) => {
        $crate::with_client(|client| {
            use $crate::_pred::*;
            client.send_metric(
                client.gauge_with_tags(&$crate::GaugeMetric::name(&$id), $value)
                    $(.with_tag(stringify!($($k).*), $v))*
            )
        })
    };

    // distribution
    (distribution($id:expr) = $value:expr $(, $($k:ident).* = $v:expr)* $(,)?) => {
        $crate::with_client(|client| {
            use $crate::_pred::*;
            client.send_metric(
                client.distribution_with_tags(&$crate::DistributionMetric::name(&$id), $value)
                    $(.with_tag(stringify!($($k).*), $v))*
            )
        })
    };

    // timer value
    (timer($id:expr) = $value:expr $(, $($k:ident).* = $v:expr)* $(,)?) => {
        $crate::with_client(|client| {
            use $crate::_pred::*;
            client.send_metric(
                // NOTE: cadence distribution support Duration out of the box and converts it to nanos,
                // but we want milliseconds.
                client.distribution_with_tags(&$crate::TimerMetric::name(&$id), $value.as_nanos() as f64 / 1e6)
                    $(.with_tag(stringify!($($k).*), $v))*
            )
        })
    };

    // timed block
    (timer($id:expr), $($($k:ident).* = $v:expr,)* $block:block) => {{
        let now = std::time::Instant::now();
        let rv = {$block};
        $crate::metric!(timer($id) = now.elapsed() $(, $($k).* = $v)*);
        rv
    }};
}

//! Forwarding of [`CanonicalMetricRecord`]s to a metrics backend.
//!
//! The [`ForwardingSink`] decides per record whether it is still fresh enough to forward. Fresh
//! records are sent through a [`MetricSender`] under the configured prefix, stale ones are
//! dropped. Either way, the decision is counted under `<prefix>.statsd_push.<source>`.
//!
//! [`CanonicalMetricRecord`]: tally_protocol::CanonicalMetricRecord
#![warn(missing_docs)]

mod config;
mod sender;
mod sink;
mod statsd;

pub use self::config::*;
pub use self::sender::*;
pub use self::sink::*;

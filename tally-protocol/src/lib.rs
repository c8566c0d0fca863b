//! Types shared by the Tally translators and the forwarding sink.
//!
//! Every producer feed is normalized into a [`CanonicalMetricRecord`]. Its name is built with a
//! [`MetricNameBuilder`], which guarantees that every dot-delimited segment consists only of
//! ASCII alphanumerics and underscores.
#![warn(missing_docs)]

mod name;
mod record;
mod time;

pub use self::name::*;
pub use self::record::*;
pub use self::time::*;

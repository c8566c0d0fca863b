//! Translation of producer payloads into [`CanonicalMetricRecord`]s.
//!
//! Two feeds are supported:
//!
//!  - [`SnapshotTranslator`] maps metrics snapshots of the stream-processing runtime. Only the
//!    Kafka consumer lag gauges are recognized, every other key is skipped.
//!  - [`EventTranslator`] maps metric and alert events of the distributed service. Events come
//!    in a modern layout with named fields and a legacy layout with positional `userN` fields.
//!    Both are reconciled into the modern shape before names are built.
//!
//! Translators are stateless. Translating the same payload twice yields identical records.
//!
//! [`CanonicalMetricRecord`]: tally_protocol::CanonicalMetricRecord
#![warn(missing_docs)]

mod error;
mod event;
mod snapshot;
mod statsd;

pub use self::error::*;
pub use self::event::*;
pub use self::snapshot::*;

//! Tally normalizes telemetry of two producers into canonical metric records and forwards them
//! to StatsD.
//!
//! The producers are:
//!
//!  - the stream-processing runtime, which periodically emits metrics snapshots,
//!  - the distributed service, which emits a feed of metric and alert events.
//!
//! A host wires one raw stream into a [`Pipeline`], which translates each message and hands
//! every resulting record to a [`ForwardingSink`](tally_forward::ForwardingSink). The pipeline
//! keeps no state across messages.
//!
//! # Crates
//!
//!  - [`tally_log`]: logging setup and re-exported `tracing` macros.
//!  - [`tally_statsd`]: the StatsD client, used for forwarding and for internal metrics.
//!  - [`tally_protocol`]: the canonical record and naming rules.
//!  - [`tally_translate`]: translators for snapshots and service events.
//!  - [`tally_forward`]: the forwarding sink with its drop policy.
//!  - [`tally_config`]: static configuration.
//!
//! # Example
//!
//! ```no_run
//! use tally_config::{Config, OverridableConfig};
//!
//! let mut config = Config::from_path("config").unwrap();
//! config.apply_override(OverridableConfig::from_env()).unwrap();
//!
//! tally::setup::init_logging(&config);
//! tally::setup::dump_spawn_infos(&config);
//!
//! let pipeline = tally::setup::init_pipeline(&config).unwrap();
//! # let payload = b"{}";
//! pipeline.process_snapshot(payload).ok();
//! ```
#![warn(missing_docs)]

mod pipeline;
pub mod setup;

pub use self::pipeline::*;

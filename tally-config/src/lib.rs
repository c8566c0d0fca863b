//! Configuration for Tally.
//!
//! The configuration is loaded from `config.yml` in a config folder, see [`Config::from_path`].
//! Individual values can be overridden from the environment with [`OverridableConfig`]:
//!
//! | variable              | value                                |
//! |-----------------------|--------------------------------------|
//! | `TALLY_STATSD`        | address of the StatsD server         |
//! | `TALLY_SINK_PREFIX`   | prefix of forwarded metric names     |
//! | `TALLY_DROP_SECS`     | age in seconds after which to drop   |
//! | `TALLY_DROP_OLD_MSGS` | `true` to drop stale records         |
#![warn(missing_docs)]

mod config;

pub use crate::config::*;

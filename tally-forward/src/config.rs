use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Static configuration of a [`ForwardingSink`](crate::ForwardingSink).
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct SinkConfig {
    /// Prepended to every forwarded name, separated by a dot. May be empty.
    pub prefix: String,
    /// Records older than this many seconds are stale.
    pub drop_secs: u64,
    /// Whether stale records are dropped. Otherwise, every record is forwarded.
    pub drop_old_msgs: bool,
}

impl SinkConfig {
    /// Returns the maximum age of forwarded records, or `None` if nothing is dropped.
    pub fn drop_window(&self) -> Option<Duration> {
        self.drop_old_msgs
            .then(|| Duration::from_secs(self.drop_secs))
    }

    /// Returns `name` under the configured prefix.
    pub fn prefixed(&self, name: &str) -> String {
        let prefix = self.prefix.trim_end_matches('.');
        if prefix.is_empty() {
            name.to_owned()
        } else {
            format!("{prefix}.{name}")
        }
    }
}

//! Initialization of the ambient stack from a [`Config`].
use std::sync::Arc;

use anyhow::{Context, Result};
use tally_config::Config;
use tally_statsd::{MetricsClient, MetricsConfig};

use crate::Pipeline;

/// Initialize the logging system.
pub fn init_logging(config: &Config) {
    tally_log::init(config.logging());
}

/// Print spawn infos to the log.
pub fn dump_spawn_infos(config: &Config) {
    if config.path().as_os_str().is_empty() {
        tally_log::info!("launching tally without config folder");
    } else {
        tally_log::info!(
            "launching tally from config folder {}",
            config.path().display()
        );
    }

    match config.statsd_addr() {
        Some(addr) => tally_log::info!("  statsd: {addr}"),
        None => tally_log::info!("  statsd: -"),
    };

    let sink = config.sink();
    if sink.prefix.is_empty() {
        tally_log::info!("  sink prefix: -");
    } else {
        tally_log::info!("  sink prefix: {}", sink.prefix);
    }
    match sink.drop_window() {
        Some(window) => tally_log::info!("  drop after: {}s", window.as_secs()),
        None => tally_log::info!("  drop after: never"),
    };
    tally_log::info!("  log level: {}", config.logging().level);
}

/// Initialize the metric system.
///
/// Returns `None` if no statsd server is configured. Internal metrics are then discarded.
pub fn init_metrics(config: &Config) -> Result<Option<Arc<MetricsClient>>> {
    let Some(host) = config.statsd_addr() else {
        return Ok(None);
    };

    let mut default_tags = config.metrics_default_tags().clone();
    if let Some(hostname_tag) = config.metrics_hostname_tag()
        && let Some(hostname) = hostname::get().ok().and_then(|s| s.into_string().ok())
    {
        default_tags.insert(hostname_tag.to_owned(), hostname);
    }

    let client = tally_statsd::init(&MetricsConfig {
        prefix: config.metrics_prefix().to_owned(),
        host: host.to_owned(),
        buffer_size: config.metrics_buffer_size(),
        default_tags,
        sample_rate: config.metrics_sample_rate(),
    })
    .with_context(|| format!("failed to set up metrics for statsd at {host}"))?;

    Ok(Some(client))
}

/// Initializes metrics and creates a pipeline forwarding to the configured statsd server.
pub fn init_pipeline(config: &Config) -> Result<Pipeline<Arc<MetricsClient>>> {
    let client = init_metrics(config)?
        .context("a statsd address is required to forward metrics, set `metrics.statsd`")?;

    Ok(Pipeline::new(client, config.sink().clone()))
}

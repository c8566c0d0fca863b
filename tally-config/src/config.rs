use std::collections::BTreeMap;
use std::env;
use std::error::Error;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tally_forward::SinkConfig;
use tally_log::LogConfig;

/// The name of the configuration file within the config folder.
const CONFIG_FILE_NAME: &str = "config.yml";

/// Defines the source of a config error
#[derive(Debug, Default)]
enum ConfigErrorSource {
    /// An error occurring independently.
    #[default]
    None,
    /// An error originating from a configuration file.
    File(PathBuf),
    /// An error originating in a field override (an env var).
    FieldOverride(String),
}

impl fmt::Display for ConfigErrorSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigErrorSource::None => Ok(()),
            ConfigErrorSource::File(file_name) => {
                write!(f, " (file {})", file_name.display())
            }
            ConfigErrorSource::FieldOverride(name) => write!(f, " (field {name})"),
        }
    }
}

/// Indicates config related errors.
#[derive(Debug, thiserror::Error)]
#[error("{kind}{origin}")]
pub struct ConfigError {
    origin: ConfigErrorSource,
    kind: ConfigErrorKind,
    #[source]
    source: Option<Box<dyn Error + Send + Sync + 'static>>,
}

impl ConfigError {
    #[inline]
    fn new(kind: ConfigErrorKind) -> Self {
        Self {
            origin: ConfigErrorSource::None,
            kind,
            source: None,
        }
    }

    #[inline]
    fn wrap<E>(source: E, kind: ConfigErrorKind) -> Self
    where
        E: Error + Send + Sync + 'static,
    {
        Self {
            origin: ConfigErrorSource::None,
            kind,
            source: Some(Box::new(source)),
        }
    }

    #[inline]
    fn for_field<E>(source: E, field: &'static str) -> Self
    where
        E: Error + Send + Sync + 'static,
    {
        Self::wrap(source, ConfigErrorKind::InvalidValue).field(field)
    }

    #[inline]
    fn file(mut self, p: impl AsRef<Path>) -> Self {
        self.origin = ConfigErrorSource::File(p.as_ref().to_path_buf());
        self
    }

    #[inline]
    fn field(mut self, name: &'static str) -> Self {
        self.origin = ConfigErrorSource::FieldOverride(name.to_owned());
        self
    }

    /// Returns the error kind of the error.
    pub fn kind(&self) -> ConfigErrorKind {
        self.kind
    }
}

/// Indicates config related errors.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, thiserror::Error)]
#[non_exhaustive]
pub enum ConfigErrorKind {
    /// Failed to open the file.
    #[error("could not open config file")]
    CouldNotOpenFile,
    /// Failed to serialize the configuration.
    #[error("could not write config file")]
    CouldNotWriteFile,
    /// Parsing YAML failed.
    #[error("could not parse yaml config file")]
    BadYaml,
    /// Parsing JSON failed.
    #[error("could not parse json config file")]
    BadJson,
    /// Invalid config value
    #[error("invalid config value")]
    InvalidValue,
}

/// Overrides of configuration values, usually read from the environment.
///
/// All values are raw strings and are only parsed when applied with [`Config::apply_override`].
#[derive(Debug, Default)]
pub struct OverridableConfig {
    /// The address of the StatsD server, `host:port`.
    pub statsd: Option<String>,
    /// The prefix of forwarded metric names.
    pub sink_prefix: Option<String>,
    /// The age in seconds after which records are stale.
    pub drop_secs: Option<String>,
    /// `"true"` to drop stale records, `"false"` otherwise.
    pub drop_old_msgs: Option<String>,
}

impl OverridableConfig {
    /// Reads overrides from the `TALLY_*` environment variables.
    pub fn from_env() -> Self {
        Self {
            statsd: env::var("TALLY_STATSD").ok(),
            sink_prefix: env::var("TALLY_SINK_PREFIX").ok(),
            drop_secs: env::var("TALLY_DROP_SECS").ok(),
            drop_old_msgs: env::var("TALLY_DROP_OLD_MSGS").ok(),
        }
    }
}

/// Controls internal reporting to statsd.
#[derive(Serialize, Deserialize, Debug)]
#[serde(default)]
struct Metrics {
    /// Hostname and port of the statsd server.
    ///
    /// Defaults to `None`.
    statsd: Option<String>,
    /// Common prefix that should be added to all internal metrics.
    ///
    /// Defaults to `"tally"`. Forwarded metrics use the prefix of the sink.
    prefix: String,
    /// Default tags to apply to all metrics.
    default_tags: BTreeMap<String, String>,
    /// Tag name to report the hostname to for each metric. Defaults to not sending such a tag.
    hostname_tag: Option<String>,
    /// Size of the UDP buffer in bytes. Defaults to the client's own default.
    buffer_size: Option<usize>,
    /// Global sample rate for all emitted metrics between `0.0` and `1.0`.
    ///
    /// For example, a value of `0.3` means that only 30% of the emitted metrics will be sent.
    /// Defaults to `1.0` (100%).
    sample_rate: f64,
}

impl Default for Metrics {
    fn default() -> Self {
        Metrics {
            statsd: None,
            prefix: "tally".into(),
            default_tags: BTreeMap::new(),
            hostname_tag: None,
            buffer_size: None,
            sample_rate: 1.0,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Default)]
#[serde(default)]
struct ConfigValues {
    logging: LogConfig,
    metrics: Metrics,
    sink: SinkConfig,
}

impl ConfigValues {
    fn load(base: &Path) -> Result<Self, ConfigError> {
        let path = base.join(CONFIG_FILE_NAME);

        let f = fs::File::open(&path)
            .map_err(|e| ConfigError::wrap(e, ConfigErrorKind::CouldNotOpenFile).file(&path))?;

        serde_yaml::from_reader(io::BufReader::new(f))
            .map_err(|e| ConfigError::wrap(e, ConfigErrorKind::BadYaml).file(&path))
    }
}

/// Config struct.
pub struct Config {
    values: ConfigValues,
    path: PathBuf,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("path", &self.path)
            .field("values", &self.values)
            .finish()
    }
}

impl Config {
    /// Loads a config from a given config folder.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
        let path = env::current_dir()
            .map(|x| x.join(path.as_ref()))
            .unwrap_or_else(|_| path.as_ref().to_path_buf());

        Ok(Config {
            values: ConfigValues::load(&path)?,
            path,
        })
    }

    /// Creates a config from a JSON value.
    ///
    /// This is mostly useful for tests.
    pub fn from_json_value(value: serde_json::Value) -> Result<Config, ConfigError> {
        Ok(Config {
            values: serde_json::from_value(value)
                .map_err(|err| ConfigError::wrap(err, ConfigErrorKind::BadJson))?,
            path: PathBuf::new(),
        })
    }

    /// Override configuration with values coming from other sources (e.g. env variables).
    pub fn apply_override(
        &mut self,
        overrides: OverridableConfig,
    ) -> Result<&mut Self, ConfigError> {
        if let Some(statsd) = overrides.statsd {
            self.values.metrics.statsd = Some(statsd);
        }

        let sink = &mut self.values.sink;

        if let Some(prefix) = overrides.sink_prefix {
            sink.prefix = prefix;
        }

        if let Some(drop_secs) = overrides.drop_secs {
            sink.drop_secs = drop_secs
                .trim()
                .parse()
                .map_err(|err| ConfigError::for_field(err, "drop_secs"))?;
        }

        if let Some(enabled) = overrides.drop_old_msgs {
            match enabled.to_lowercase().as_str() {
                "true" | "1" => sink.drop_old_msgs = true,
                "false" | "0" | "" => sink.drop_old_msgs = false,
                _ => {
                    return Err(
                        ConfigError::new(ConfigErrorKind::InvalidValue).field("drop_old_msgs")
                    );
                }
            }
        }

        Ok(self)
    }

    /// Serializes the current configuration to YAML.
    pub fn to_yaml_string(&self) -> Result<String, ConfigError> {
        serde_yaml::to_string(&self.values)
            .map_err(|err| ConfigError::wrap(err, ConfigErrorKind::CouldNotWriteFile))
    }

    /// Returns the path of the config folder.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns logging configuration.
    pub fn logging(&self) -> &LogConfig {
        &self.values.logging
    }

    /// Returns the address of the statsd server, if configured.
    pub fn statsd_addr(&self) -> Option<&str> {
        self.values.metrics.statsd.as_deref()
    }

    /// Return the prefix for internal statsd metrics.
    pub fn metrics_prefix(&self) -> &str {
        &self.values.metrics.prefix
    }

    /// Returns the default tags for statsd metrics.
    pub fn metrics_default_tags(&self) -> &BTreeMap<String, String> {
        &self.values.metrics.default_tags
    }

    /// Returns the name of the hostname tag that should be attached to each outgoing metric.
    pub fn metrics_hostname_tag(&self) -> Option<&str> {
        self.values.metrics.hostname_tag.as_deref()
    }

    /// Returns the UDP buffer size for statsd, if configured.
    pub fn metrics_buffer_size(&self) -> Option<usize> {
        self.values.metrics.buffer_size
    }

    /// Returns the global sample rate for all metrics.
    pub fn metrics_sample_rate(&self) -> f64 {
        self.values.metrics.sample_rate
    }

    /// Returns the configuration of the forwarding sink.
    pub fn sink(&self) -> &SinkConfig {
        &self.values.sink
    }
}

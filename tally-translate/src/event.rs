use chrono::DateTime;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tally_protocol::{
    CanonicalMetricRecord, MetricNameBuilder, MetricSource, MetricType, UnixMillis,
};
use tally_statsd::metric;

use crate::SchemaError;
use crate::statsd::TranslateCounters;

/// A metric or alert event of the distributed service.
///
/// The event is a flat JSON object. Dimensions are either given as named fields (`dataSource`,
/// `poolKind`, `poolName`) or, in the legacy layout, as positional `userN` fields.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
#[serde(transparent)]
pub struct RawServiceEvent {
    fields: Map<String, Value>,
}

impl RawServiceEvent {
    /// Parses an event from JSON. The payload must be an object.
    pub fn from_slice(payload: &[u8]) -> Result<Self, SchemaError> {
        Ok(serde_json::from_slice(payload)?)
    }

    fn required_str(&self, field: &'static str) -> Result<&str, SchemaError> {
        self.optional_str(field)?
            .ok_or(SchemaError::MissingField(field))
    }

    /// Returns a string field, treating null and empty strings as absent.
    fn optional_str(&self, field: &'static str) -> Result<Option<&str>, SchemaError> {
        match self.fields.get(field) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(s)) if s.is_empty() => Ok(None),
            Some(Value::String(s)) => Ok(Some(s.as_str())),
            Some(_) => Err(SchemaError::InvalidField {
                field,
                expected: "a string",
            }),
        }
    }

    fn required_number(&self, field: &'static str) -> Result<f64, SchemaError> {
        match self.fields.get(field) {
            None | Some(Value::Null) => Err(SchemaError::MissingField(field)),
            Some(value) => value.as_f64().ok_or(SchemaError::InvalidField {
                field,
                expected: "a number",
            }),
        }
    }

    fn timestamp(&self) -> Result<UnixMillis, SchemaError> {
        let raw = self.required_str("timestamp")?;
        let datetime =
            DateTime::parse_from_rfc3339(raw).map_err(|source| SchemaError::InvalidTimestamp {
                value: raw.to_owned(),
                source,
            })?;
        Ok(UnixMillis::from_datetime(&datetime))
    }
}

/// Fields shared by metric and alert events.
#[derive(Clone, Debug, PartialEq)]
pub struct EventOrigin<'a> {
    /// The emitting service, such as `druid/prod/broker`.
    pub service: &'a str,
    /// The emitting host, usually `name:port`.
    pub host: &'a str,
    /// Time of the event.
    pub timestamp: UnixMillis,
}

/// A service event classified by its `feed`.
#[derive(Clone, Debug, PartialEq)]
pub enum ServiceEvent<'a> {
    /// An event from the `alerts` feed.
    Alert {
        /// Service, host, and time of the alert.
        origin: EventOrigin<'a>,
        /// Severity of the alert, such as `component-failure`.
        severity: &'a str,
    },
    /// An event from the `metrics` feed.
    Metric {
        /// Service, host, and time of the metric.
        origin: EventOrigin<'a>,
        /// Slash-delimited metric path, such as `query/time`.
        path: &'a str,
        /// The metric value.
        value: f64,
    },
}

impl<'a> ServiceEvent<'a> {
    /// Classifies an event by its `feed` field and validates the fields required for its kind.
    pub fn classify(event: &'a RawServiceEvent) -> Result<Self, SchemaError> {
        let feed = event.required_str("feed")?;
        if feed != "alerts" && feed != "metrics" {
            return Err(SchemaError::UnknownFeed(feed.to_owned()));
        }

        let origin = EventOrigin {
            service: event.required_str("service")?,
            host: event.required_str("host")?,
            timestamp: event.timestamp()?,
        };

        Ok(if feed == "alerts" {
            Self::Alert {
                origin,
                severity: event.required_str("severity")?,
            }
        } else {
            Self::Metric {
                origin,
                path: event.required_str("metric")?,
                value: event.required_number("value")?,
            }
        })
    }
}

/// A dimension that is read from its named field, falling back to a positional legacy field.
#[derive(Clone, Copy, Debug)]
struct Dimension {
    named: &'static str,
    legacy: &'static str,
}

const DATA_SOURCE: Dimension = Dimension {
    named: "dataSource",
    legacy: "user2",
};

const POOL_KIND: Dimension = Dimension {
    named: "poolKind",
    legacy: "user1",
};

const POOL_NAME: Dimension = Dimension {
    named: "poolName",
    legacy: "user2",
};

impl Dimension {
    /// Returns the named field if present, otherwise the legacy field.
    fn resolve<'a>(&self, event: &'a RawServiceEvent) -> Result<Option<&'a str>, SchemaError> {
        match event.optional_str(self.named)? {
            Some(value) => Ok(Some(value)),
            None => event.optional_str(self.legacy),
        }
    }

    fn require<'a>(&self, event: &'a RawServiceEvent) -> Result<&'a str, SchemaError> {
        self.resolve(event)?
            .ok_or(SchemaError::MissingField(self.named))
    }
}

/// Groups of metric paths that share a naming rule and a legacy field mapping.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum MetricFamily {
    /// `jvm/pool/*`, named by pool kind and pool name.
    JvmPool,
    /// `ingest/*`, always scoped to a datasource.
    Ingest,
    /// Query, cache, persist, and event metrics, scoped to a datasource if one is given.
    DataSourceScoped,
    /// Metrics describing the node itself.
    Node,
}

/// Known path prefixes. Longer prefixes come first, the first match wins.
const FAMILIES: &[(&str, MetricFamily)] = &[
    ("jvm/pool", MetricFamily::JvmPool),
    ("persists", MetricFamily::DataSourceScoped),
    ("ingest", MetricFamily::Ingest),
    ("events", MetricFamily::DataSourceScoped),
    ("query", MetricFamily::DataSourceScoped),
    ("cache", MetricFamily::DataSourceScoped),
    ("exec", MetricFamily::Node),
    ("jvm", MetricFamily::Node),
    ("sys", MetricFamily::Node),
];

/// Strips `prefix` from `path` if it matches the whole path or a leading run of whole segments.
fn strip_path_prefix<'a>(path: &'a str, prefix: &str) -> Option<&'a str> {
    let rest = path.strip_prefix(prefix)?;
    if rest.is_empty() {
        Some(rest)
    } else {
        rest.strip_prefix('/')
    }
}

fn classify_path(path: &str) -> Option<(MetricFamily, &str)> {
    FAMILIES.iter().find_map(|&(prefix, family)| {
        strip_path_prefix(path, prefix).map(|rest| (family, rest))
    })
}

/// A metric event reconciled into the named-field shape of its family.
#[derive(Clone, Debug, PartialEq)]
enum MetricShape<'a> {
    JvmPool {
        leaf: &'a str,
        kind: &'a str,
        name: &'a str,
    },
    Ingest {
        data_source: &'a str,
        rest: &'a str,
    },
    DataSourceScoped {
        data_source: Option<&'a str>,
        path: &'a str,
    },
    Node {
        path: &'a str,
    },
}

impl<'a> MetricShape<'a> {
    /// Selects the family of `path` and pulls its dimensions from `event`.
    ///
    /// Returns `None` for paths that belong to no known family.
    fn reconcile(
        path: &'a str,
        event: &'a RawServiceEvent,
    ) -> Result<Option<Self>, SchemaError> {
        let Some((family, rest)) = classify_path(path) else {
            return Ok(None);
        };

        let shape = match family {
            MetricFamily::JvmPool if rest.is_empty() => return Ok(None),
            MetricFamily::JvmPool => Self::JvmPool {
                leaf: rest,
                kind: POOL_KIND.require(event)?,
                name: POOL_NAME.require(event)?,
            },
            MetricFamily::Ingest if rest.is_empty() => return Ok(None),
            MetricFamily::Ingest => Self::Ingest {
                data_source: DATA_SOURCE.require(event)?,
                rest,
            },
            MetricFamily::DataSourceScoped => Self::DataSourceScoped {
                data_source: DATA_SOURCE.resolve(event)?,
                path,
            },
            MetricFamily::Node => Self::Node { path },
        };

        Ok(Some(shape))
    }

    /// Appends the family-specific part of the name.
    fn append_name(&self, builder: MetricNameBuilder) -> MetricNameBuilder {
        match *self {
            Self::JvmPool { leaf, kind, name } => builder
                .literal("node")
                .literal("jvm")
                .literal("pool")
                .path(leaf, '/')
                .literal("kind")
                .segment(kind)
                .literal("name")
                .segment(name),
            Self::Ingest { data_source, rest } => builder
                .literal("datasource")
                .segment(data_source)
                .literal("ingest")
                .path(rest, '/'),
            Self::DataSourceScoped {
                data_source: Some(data_source),
                path,
            } => builder
                .literal("datasource")
                .segment(data_source)
                .path(path, '/'),
            Self::DataSourceScoped {
                data_source: None,
                path,
            }
            | Self::Node { path } => builder.literal("node").path(path, '/'),
        }
    }
}

fn origin_name(origin: &EventOrigin<'_>) -> MetricNameBuilder {
    MetricNameBuilder::new(MetricSource::Service.as_str())
        .segment(origin.service)
        .segment(origin.host)
}

fn map_alert(origin: &EventOrigin<'_>, severity: &str) -> CanonicalMetricRecord {
    let name = origin_name(origin)
        .literal("alerts")
        .segment(severity)
        .finish();

    CanonicalMetricRecord {
        source: MetricSource::Service,
        ty: MetricType::Counter,
        name,
        value: 1.0,
        timestamp: origin.timestamp,
    }
}

fn map_metric(
    origin: &EventOrigin<'_>,
    shape: &MetricShape<'_>,
    value: f64,
) -> CanonicalMetricRecord {
    let name = shape.append_name(origin_name(origin)).finish();

    CanonicalMetricRecord {
        source: MetricSource::Service,
        ty: MetricType::Counter,
        name,
        value,
        timestamp: origin.timestamp,
    }
}

fn translate_event(
    event: &RawServiceEvent,
) -> Result<Option<CanonicalMetricRecord>, SchemaError> {
    match ServiceEvent::classify(event)? {
        ServiceEvent::Alert { origin, severity } => Ok(Some(map_alert(&origin, severity))),
        ServiceEvent::Metric {
            origin,
            path,
            value,
        } => match MetricShape::reconcile(path, event)? {
            Some(shape) => Ok(Some(map_metric(&origin, &shape, value))),
            None => {
                tally_log::trace!(metric = path, "skipping unmapped service metric");
                Ok(None)
            }
        },
    }
}

/// Maps service metric and alert events into counter records.
#[derive(Clone, Copy, Debug, Default)]
pub struct EventTranslator;

impl EventTranslator {
    /// Creates a new translator.
    pub fn new() -> Self {
        Self
    }

    /// Translates an event into at most one record.
    ///
    /// Alerts always yield a record. Metrics whose path belongs to no known family yield `None`.
    pub fn translate(
        &self,
        event: &RawServiceEvent,
    ) -> Result<Option<CanonicalMetricRecord>, SchemaError> {
        let result = translate_event(event);

        let source = MetricSource::Service.as_str();
        match &result {
            Ok(Some(_)) => {
                metric!(counter(TranslateCounters::Record) += 1, source = source);
            }
            Ok(None) => {
                metric!(counter(TranslateCounters::Skipped) += 1, source = source);
            }
            Err(_) => {
                metric!(
                    counter(TranslateCounters::SchemaViolation) += 1,
                    source = source
                );
            }
        }

        result
    }
}

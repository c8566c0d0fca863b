use std::fmt;

use serde::{Deserialize, Serialize};

use crate::UnixMillis;

/// The system that produced a metric.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Deserialize, Serialize)]
pub enum MetricSource {
    /// Internal metrics snapshots of the stream-processing runtime (Samza).
    #[serde(rename = "samza", alias = "runtime")]
    Runtime,
    /// Metric and alert events of the distributed service (Druid).
    #[serde(rename = "druid", alias = "service")]
    Service,
}

impl MetricSource {
    /// Returns the name prefix of this source, which is also its serialized form.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Runtime => "samza",
            Self::Service => "druid",
        }
    }
}

impl fmt::Display for MetricSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The StatsD type a canonical record is forwarded as.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricType {
    /// An instantaneous value.
    Gauge,
    /// An increment.
    Counter,
}

impl MetricType {
    /// Returns the serialized name of the metric type.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Gauge => "gauge",
            Self::Counter => "counter",
        }
    }
}

impl fmt::Display for MetricType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A metric normalized from any producer feed.
///
/// The serialized form is `{"source", "type", "name", "value", "timestamp"}`, which is what
/// hosts use to ship records through an intermediate stream.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct CanonicalMetricRecord {
    /// The producing system.
    pub source: MetricSource,
    /// How the record is forwarded.
    #[serde(rename = "type")]
    pub ty: MetricType,
    /// Fully qualified, dot-delimited metric name without the sink prefix.
    pub name: String,
    /// The raw value.
    pub value: f64,
    /// The time the producer observed the value.
    pub timestamp: UnixMillis,
}

impl CanonicalMetricRecord {
    /// Parses a record from its JSON form.
    ///
    /// The timestamp may be either an integer or a numeric string.
    pub fn from_json(payload: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(payload)
    }

    /// Serializes the record into its JSON form.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use similar_asserts::assert_eq;

    use super::*;

    #[test]
    fn test_serialize_record() {
        let record = CanonicalMetricRecord {
            source: MetricSource::Runtime,
            ty: MetricType::Gauge,
            name: "samza.job.1.container.c0.kafka_consumer.stream.t.partition.4.lag".to_owned(),
            value: 0.0,
            timestamp: UnixMillis::from_millis(1433220776087),
        };

        insta::assert_json_snapshot!(record, @r###"
        {
          "source": "samza",
          "type": "gauge",
          "name": "samza.job.1.container.c0.kafka_consumer.stream.t.partition.4.lag",
          "value": 0.0,
          "timestamp": 1433220776087
        }
        "###);
    }

    #[test]
    fn test_string_timestamp_is_coerced() {
        let numeric = CanonicalMetricRecord::from_json(
            br#"{"source":"samza","type":"gauge","name":"a.b","value":0.2,"timestamp":1433220836231}"#,
        )
        .unwrap();
        let string = CanonicalMetricRecord::from_json(
            br#"{"source":"samza","type":"gauge","name":"a.b","value":0.2,"timestamp":"1433220836231"}"#,
        )
        .unwrap();

        assert_eq!(numeric, string);
    }

    #[test]
    fn test_source_aliases() {
        let record = CanonicalMetricRecord::from_json(
            br#"{"source":"service","type":"counter","name":"x","value":1,"timestamp":0}"#,
        )
        .unwrap();
        assert_eq!(record.source, MetricSource::Service);
        assert_eq!(record.source.to_string(), "druid");
    }

    #[test]
    fn test_unknown_type_is_rejected() {
        let result = CanonicalMetricRecord::from_json(
            br#"{"source":"samza","type":"timer","name":"x","value":1,"timestamp":0}"#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_unknown_source_is_rejected() {
        let result = CanonicalMetricRecord::from_json(
            br#"{"source":"test_src","type":"gauge","name":"x","value":1,"timestamp":0}"#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_roundtrip_through_json() {
        let record = CanonicalMetricRecord {
            source: MetricSource::Service,
            ty: MetricType::Counter,
            name: "druid.broker.host.alerts.warn".to_owned(),
            value: 1.0,
            timestamp: UnixMillis::from_millis(1460497926301),
        };

        let json = record.to_json().unwrap();
        assert_eq!(
            CanonicalMetricRecord::from_json(json.as_bytes()).unwrap(),
            record
        );
    }
}

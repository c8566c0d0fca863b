use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tally_protocol::{
    CanonicalMetricRecord, MetricNameBuilder, MetricSource, MetricType, UnixMillis,
};
use tally_statsd::metric;

use crate::SchemaError;
use crate::statsd::TranslateCounters;

/// Metric group of the runtime's Kafka consumer.
pub const KAFKA_CONSUMER_GROUP: &str = "org.apache.samza.system.kafka.KafkaSystemConsumerMetrics";

const HIGH_WATERMARK_SUFFIX: &str = "-messages-behind-high-watermark";

/// The job id of a snapshot header, which producers send either as string or as integer.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum JobId {
    /// A textual job id.
    String(String),
    /// A numeric job id.
    Integer(i64),
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::String(id) => f.write_str(id),
            Self::Integer(id) => id.fmt(f),
        }
    }
}

/// Identifies the job and container that emitted a snapshot.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct SnapshotHeader {
    /// Id of the job instance.
    pub job_id: Option<JobId>,
    /// Name of the job.
    pub job_name: Option<String>,
    /// Name of the container within the job.
    pub container_name: Option<String>,
    /// Time the snapshot was taken.
    pub time: Option<UnixMillis>,
    /// Additional header fields, such as `host` or `samza-version`.
    #[serde(flatten)]
    pub other: BTreeMap<String, Value>,
}

/// A metrics snapshot of the stream-processing runtime.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct RawSnapshotEvent {
    /// The snapshot header.
    #[serde(default)]
    pub header: Option<SnapshotHeader>,
    /// Metric values keyed by group name, then by metric key.
    #[serde(default)]
    pub metrics: BTreeMap<String, Value>,
}

impl RawSnapshotEvent {
    /// Parses a snapshot from JSON.
    pub fn from_slice(payload: &[u8]) -> Result<Self, SchemaError> {
        Ok(serde_json::from_slice(payload)?)
    }
}

/// Header fields required to build names.
struct ValidHeader<'a> {
    job_id: &'a JobId,
    job_name: &'a str,
    container_name: &'a str,
    time: UnixMillis,
}

impl<'a> ValidHeader<'a> {
    fn from_snapshot(snapshot: &'a RawSnapshotEvent) -> Result<Self, SchemaError> {
        let header = snapshot
            .header
            .as_ref()
            .ok_or(SchemaError::MissingField("header"))?;

        Ok(Self {
            job_id: header
                .job_id
                .as_ref()
                .ok_or(SchemaError::MissingField("job-id"))?,
            job_name: header
                .job_name
                .as_deref()
                .ok_or(SchemaError::MissingField("job-name"))?,
            container_name: header
                .container_name
                .as_deref()
                .ok_or(SchemaError::MissingField("container-name"))?,
            time: header.time.ok_or(SchemaError::MissingField("time"))?,
        })
    }
}

/// A Kafka consumer lag key: `<system>-<topic>-<partition>-messages-behind-high-watermark`.
///
/// The system is validated but not part of the metric name.
#[derive(Debug, PartialEq)]
struct ConsumerLagKey<'a> {
    topic: &'a str,
    partition: &'a str,
}

impl<'a> ConsumerLagKey<'a> {
    fn parse(key: &'a str) -> Option<Self> {
        let stream = key.strip_suffix(HIGH_WATERMARK_SUFFIX)?;

        let (stream, partition) = stream.rsplit_once('-')?;
        if partition.is_empty() || !partition.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }

        // The system never contains hyphens, the topic may.
        let (system, topic) = stream.split_once('-')?;
        if system.is_empty() || topic.is_empty() {
            return None;
        }

        Some(Self { topic, partition })
    }
}

/// Maps runtime metrics snapshots into gauge records.
#[derive(Clone, Copy, Debug, Default)]
pub struct SnapshotTranslator;

impl SnapshotTranslator {
    /// Creates a new translator.
    pub fn new() -> Self {
        Self
    }

    /// Translates a snapshot into one gauge per recognized metric key.
    ///
    /// Records are ordered by group name, then by metric key. Keys matching no known pattern are
    /// skipped. A missing header field or a non-numeric value of a recognized key fails the
    /// whole snapshot.
    pub fn translate(
        &self,
        snapshot: &RawSnapshotEvent,
    ) -> Result<Vec<CanonicalMetricRecord>, SchemaError> {
        let result = translate_snapshot(snapshot);

        let source = MetricSource::Runtime.as_str();
        match &result {
            Ok((records, skipped)) => {
                metric!(
                    counter(TranslateCounters::Record) += records.len() as i64,
                    source = source
                );
                metric!(
                    counter(TranslateCounters::Skipped) += *skipped as i64,
                    source = source
                );
            }
            Err(_) => {
                metric!(
                    counter(TranslateCounters::SchemaViolation) += 1,
                    source = source
                );
            }
        }

        result.map(|(records, _)| records)
    }
}

fn translate_snapshot(
    snapshot: &RawSnapshotEvent,
) -> Result<(Vec<CanonicalMetricRecord>, usize), SchemaError> {
    let header = ValidHeader::from_snapshot(snapshot)?;

    let mut records = Vec::new();
    let mut skipped = 0;

    for (group, values) in &snapshot.metrics {
        let values = match values {
            Value::Object(values) if group == KAFKA_CONSUMER_GROUP => values,
            Value::Object(values) => {
                skipped += values.len();
                continue;
            }
            _ => {
                tally_log::trace!(
                    group = group.as_str(),
                    "skipping snapshot group without metric keys"
                );
                continue;
            }
        };

        // `serde_json::Map` does not preserve order unless `preserve_order` is enabled. Sort
        // explicitly so output order does not depend on that feature.
        let mut keys: Vec<_> = values.iter().collect();
        keys.sort_unstable_by(|a, b| a.0.cmp(b.0));

        for (key, value) in keys {
            let Some(lag_key) = ConsumerLagKey::parse(key) else {
                tally_log::trace!(
                    group = group.as_str(),
                    key = key.as_str(),
                    "skipping unrecognized snapshot metric"
                );
                skipped += 1;
                continue;
            };

            let value = value
                .as_f64()
                .ok_or_else(|| SchemaError::NonNumericMetric(key.clone()))?;

            records.push(consumer_lag_record(&header, &lag_key, value));
        }
    }

    Ok((records, skipped))
}

fn consumer_lag_record(
    header: &ValidHeader<'_>,
    key: &ConsumerLagKey<'_>,
    value: f64,
) -> CanonicalMetricRecord {
    let name = MetricNameBuilder::new(MetricSource::Runtime.as_str())
        .segment(header.job_name)
        .segment(&header.job_id.to_string())
        .literal("container")
        .segment(header.container_name)
        .literal("kafka_consumer")
        .literal("stream")
        .segment(key.topic)
        .literal("partition")
        .segment(key.partition)
        .literal("messages_behind_high_watermark")
        .finish();

    CanonicalMetricRecord {
        source: MetricSource::Runtime,
        ty: MetricType::Gauge,
        name,
        value,
        timestamp: header.time,
    }
}

#[cfg(test)]
mod tests {
    use similar_asserts::assert_eq;

    use super::*;

    fn example_snapshot() -> RawSnapshotEvent {
        RawSnapshotEvent::from_slice(
            br#"{
                "header": {
                    "job-id": "1",
                    "samza-version": "0.9.0",
                    "job-name": "s2-call-parse",
                    "host": "thedude",
                    "reset-time": 1433220715640,
                    "container-name": "samza-container-0",
                    "source": "samza-container-0",
                    "time": 1433220776087,
                    "version": "0.0.1"
                },
                "metrics": {
                    "org.apache.samza.system.kafka.KafkaSystemConsumerMetrics": {
                        "kafka-svc.s2.call.raw.wnqcfqaytreaowaa4ovsxa-4-messages-behind-high-watermark": 0
                    }
                }
            }"#,
        )
        .unwrap()
    }

    #[test]
    fn test_consumer_lag() {
        tally_log::init_test!();

        let records = SnapshotTranslator::new()
            .translate(&example_snapshot())
            .unwrap();

        insta::assert_json_snapshot!(records, @r###"
        [
          {
            "source": "samza",
            "type": "gauge",
            "name": "samza.s2_call_parse.1.container.samza_container_0.kafka_consumer.stream.svc_s2_call_raw_wnqcfqaytreaowaa4ovsxa.partition.4.messages_behind_high_watermark",
            "value": 0.0,
            "timestamp": 1433220776087
          }
        ]
        "###);
    }

    #[test]
    fn test_translate_is_idempotent() {
        let snapshot = example_snapshot();
        let translator = SnapshotTranslator::new();
        assert_eq!(
            translator.translate(&snapshot).unwrap(),
            translator.translate(&snapshot).unwrap()
        );
    }

    #[test]
    fn test_numeric_job_id() {
        let snapshot = RawSnapshotEvent::from_slice(
            br#"{
                "header": {"job-id": 7, "job-name": "j", "container-name": "c", "time": 5},
                "metrics": {
                    "org.apache.samza.system.kafka.KafkaSystemConsumerMetrics": {
                        "kafka-topic-0-messages-behind-high-watermark": 12
                    }
                }
            }"#,
        )
        .unwrap();

        let records = SnapshotTranslator::new().translate(&snapshot).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(
            records[0].name,
            "samza.j.7.container.c.kafka_consumer.stream.topic.partition.0.messages_behind_high_watermark"
        );
        assert_eq!(records[0].value, 12.0);
        assert_eq!(records[0].timestamp, UnixMillis::from_millis(5));
    }

    #[test]
    fn test_unrecognized_keys_are_skipped() {
        let snapshot = RawSnapshotEvent::from_slice(
            br#"{
                "header": {"job-id": "1", "job-name": "j", "container-name": "c", "time": 5},
                "metrics": {
                    "org.apache.samza.container.SamzaContainerMetrics": {
                        "process-calls": 10
                    },
                    "org.apache.samza.system.kafka.KafkaSystemConsumerMetrics": {
                        "kafka-topic-4-bytes-read": 100,
                        "kafka-topic-x-messages-behind-high-watermark": 1,
                        "kafka-topic-1-messages-behind-high-watermark": 3,
                        "kafka-topic-0-messages-behind-high-watermark": 2
                    }
                }
            }"#,
        )
        .unwrap();

        let captures = tally_statsd::with_capturing_test_client(|| {
            let records = SnapshotTranslator::new().translate(&snapshot).unwrap();
            let values: Vec<_> = records.iter().map(|r| r.value).collect();
            // sorted by key, partition 0 first
            assert_eq!(values, [2.0, 3.0]);
        });

        assert_eq!(
            captures,
            [
                "translate.record:2|c|#source:samza",
                "translate.skipped:3|c|#source:samza"
            ]
        );
    }

    #[test]
    fn test_missing_header_field() {
        let snapshot = RawSnapshotEvent::from_slice(
            br#"{"header": {"job-id": "1", "job-name": "j", "time": 5}, "metrics": {}}"#,
        )
        .unwrap();

        let error = SnapshotTranslator::new().translate(&snapshot).unwrap_err();
        assert!(matches!(error, SchemaError::MissingField("container-name")));
    }

    #[test]
    fn test_missing_header() {
        let snapshot = RawSnapshotEvent::from_slice(br#"{"metrics": {}}"#).unwrap();

        let captures = tally_statsd::with_capturing_test_client(|| {
            let error = SnapshotTranslator::new().translate(&snapshot).unwrap_err();
            assert_eq!(error.field(), Some("header"));
        });
        assert_eq!(captures, ["translate.schema_violation:1|c|#source:samza"]);
    }

    #[test]
    fn test_malformed_header_field() {
        let result = RawSnapshotEvent::from_slice(
            br#"{"header": {"job-id": "1", "job-name": "j", "container-name": "c", "time": "noon"}}"#,
        );
        assert!(matches!(result, Err(SchemaError::InvalidJson(_))));
    }

    #[test]
    fn test_non_numeric_value() {
        let snapshot = RawSnapshotEvent::from_slice(
            br#"{
                "header": {"job-id": "1", "job-name": "j", "container-name": "c", "time": 5},
                "metrics": {
                    "org.apache.samza.system.kafka.KafkaSystemConsumerMetrics": {
                        "kafka-topic-0-messages-behind-high-watermark": "lots"
                    }
                }
            }"#,
        )
        .unwrap();

        let error = SnapshotTranslator::new().translate(&snapshot).unwrap_err();
        assert_eq!(
            error.to_string(),
            "metric `kafka-topic-0-messages-behind-high-watermark` has a non-numeric value"
        );
    }

    #[test]
    fn test_parse_consumer_lag_key() {
        assert_eq!(
            ConsumerLagKey::parse("kafka-svc-with-hyphens.v2-12-messages-behind-high-watermark"),
            Some(ConsumerLagKey {
                topic: "svc-with-hyphens.v2",
                partition: "12",
            })
        );
        assert_eq!(
            ConsumerLagKey::parse("kafka-12-messages-behind-high-watermark"),
            None
        );
        assert_eq!(
            ConsumerLagKey::parse("kafka-topic--messages-behind-high-watermark"),
            None
        );
    }
}

use std::fmt;

use tally_protocol::{CanonicalMetricRecord, MetricSource, MetricType, UnixMillis};
use tally_statsd::metric;

use crate::statsd::ForwardDistributions;
use crate::{MetricSender, SinkConfig};

/// The decision taken for a single record.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SinkOutcome {
    /// The value was forwarded.
    Sent,
    /// The record was older than the drop window and not forwarded.
    Dropped,
}

impl SinkOutcome {
    /// Returns the short name of the outcome, used as metric tag.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Sent => "sent",
            Self::Dropped => "dropped",
        }
    }

    /// Returns the name of the bookkeeping counter for this outcome.
    pub const fn counter_name(&self) -> &'static str {
        match self {
            Self::Sent => "messages_sent",
            Self::Dropped => "old_messages_dropped",
        }
    }
}

impl fmt::Display for SinkOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Forwards canonical records to a [`MetricSender`], dropping stale records.
///
/// For every record, exactly one bookkeeping counter is incremented:
/// `<prefix>.statsd_push.<source>.messages_sent` or
/// `<prefix>.statsd_push.<source>.old_messages_dropped`.
#[derive(Debug)]
pub struct ForwardingSink<C> {
    client: C,
    config: SinkConfig,
}

impl<C: MetricSender> ForwardingSink<C> {
    /// Creates a sink sending to `client`.
    pub fn new(client: C, config: SinkConfig) -> Self {
        Self { client, config }
    }

    /// Returns the static configuration of this sink.
    pub fn config(&self) -> &SinkConfig {
        &self.config
    }

    /// Returns the downstream client.
    pub fn client(&self) -> &C {
        &self.client
    }

    /// Handles a record, measuring its age against the current system time.
    pub fn handle(&self, record: &CanonicalMetricRecord) -> SinkOutcome {
        self.handle_at(record, UnixMillis::now())
    }

    /// Handles a record as if the current time was `now`.
    pub fn handle_at(&self, record: &CanonicalMetricRecord, now: UnixMillis) -> SinkOutcome {
        let age = record.timestamp.age_at(now);

        let outcome = match self.config.drop_window() {
            Some(window) if age > window => SinkOutcome::Dropped,
            _ => SinkOutcome::Sent,
        };

        metric!(
            distribution(ForwardDistributions::MessageAge) = age.as_millis() as u64,
            source = record.source.as_str(),
            outcome = outcome.as_str(),
        );

        match outcome {
            SinkOutcome::Sent => {
                let name = self.config.prefixed(&record.name);
                match record.ty {
                    MetricType::Gauge => self.client.gauge(&name, record.value),
                    MetricType::Counter => self.client.counter(&name, record.value),
                }
            }
            SinkOutcome::Dropped => {
                tally_log::debug!(
                    name = record.name.as_str(),
                    age_ms = age.as_millis() as u64,
                    "dropping stale record"
                );
            }
        }

        self.client
            .counter(&self.bookkeeping_name(record.source, outcome), 1.0);

        outcome
    }

    /// Decodes a record from its JSON form and handles it.
    ///
    /// The timestamp may be an integer or a numeric string.
    pub fn handle_payload(&self, payload: &[u8]) -> Result<SinkOutcome, serde_json::Error> {
        let record = CanonicalMetricRecord::from_json(payload)?;
        Ok(self.handle(&record))
    }

    fn bookkeeping_name(&self, source: MetricSource, outcome: SinkOutcome) -> String {
        self.config.prefixed(&format!(
            "statsd_push.{source}.{}",
            outcome.counter_name()
        ))
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use similar_asserts::assert_eq;

    use super::*;

    #[derive(Clone, Debug, PartialEq)]
    enum Call {
        Gauge(String, f64),
        Counter(String, f64),
    }

    #[derive(Debug, Default)]
    struct RecordingSender {
        calls: RefCell<Vec<Call>>,
    }

    impl RecordingSender {
        fn take(&self) -> Vec<Call> {
            self.calls.take()
        }
    }

    impl MetricSender for RecordingSender {
        fn gauge(&self, name: &str, value: f64) {
            self.calls
                .borrow_mut()
                .push(Call::Gauge(name.to_owned(), value));
        }

        fn counter(&self, name: &str, value: f64) {
            self.calls
                .borrow_mut()
                .push(Call::Counter(name.to_owned(), value));
        }
    }

    const MEAN_RATE: &str =
        "samza.s2_call_parse.1.TaskName_Partition_6.streams.default.dropped.meanRate";

    fn config(drop_old_msgs: bool) -> SinkConfig {
        SinkConfig {
            prefix: "fake.prefix".to_owned(),
            drop_secs: 0,
            drop_old_msgs,
        }
    }

    fn gauge_record(timestamp: i64) -> CanonicalMetricRecord {
        CanonicalMetricRecord {
            source: MetricSource::Runtime,
            ty: MetricType::Gauge,
            name: MEAN_RATE.to_owned(),
            value: 0.2,
            timestamp: UnixMillis::from_millis(timestamp),
        }
    }

    #[test]
    fn test_forward_gauge() {
        tally_log::init_test!();

        let sink = ForwardingSink::new(RecordingSender::default(), config(false));
        let outcome = sink.handle(&gauge_record(1433220836231));

        assert_eq!(outcome, SinkOutcome::Sent);
        assert_eq!(
            sink.client().take(),
            [
                Call::Gauge(format!("fake.prefix.{MEAN_RATE}"), 0.2),
                Call::Counter(
                    "fake.prefix.statsd_push.samza.messages_sent".to_owned(),
                    1.0
                ),
            ]
        );
    }

    #[test]
    fn test_forward_counter() {
        let sink = ForwardingSink::new(RecordingSender::default(), SinkConfig::default());
        let record = CanonicalMetricRecord {
            source: MetricSource::Service,
            ty: MetricType::Counter,
            name: "druid.broker.h.node.exec.backlog".to_owned(),
            value: 4.0,
            timestamp: UnixMillis::from_millis(0),
        };

        assert_eq!(sink.handle(&record), SinkOutcome::Sent);
        assert_eq!(
            sink.client().take(),
            [
                Call::Counter("druid.broker.h.node.exec.backlog".to_owned(), 4.0),
                Call::Counter("statsd_push.druid.messages_sent".to_owned(), 1.0),
            ]
        );
    }

    #[test]
    fn test_drop_old_message() {
        let sink = ForwardingSink::new(RecordingSender::default(), config(true));
        let outcome = sink.handle(&gauge_record(1433220836231));

        assert_eq!(outcome, SinkOutcome::Dropped);
        assert_eq!(
            sink.client().take(),
            [Call::Counter(
                "fake.prefix.statsd_push.samza.old_messages_dropped".to_owned(),
                1.0
            )]
        );
    }

    #[test]
    fn test_drop_law_boundary() {
        let sink = ForwardingSink::new(
            RecordingSender::default(),
            SinkConfig {
                drop_secs: 10,
                ..config(true)
            },
        );
        let record = gauge_record(100_000);

        // exactly at the window is still fresh
        let at_window = UnixMillis::from_millis(110_000);
        assert_eq!(sink.handle_at(&record, at_window), SinkOutcome::Sent);

        let past_window = UnixMillis::from_millis(110_001);
        assert_eq!(sink.handle_at(&record, past_window), SinkOutcome::Dropped);

        let calls = sink.client().take();
        assert_eq!(calls.len(), 3);
        assert_eq!(
            calls[2],
            Call::Counter(
                "fake.prefix.statsd_push.samza.old_messages_dropped".to_owned(),
                1.0
            )
        );
    }

    #[test]
    fn test_future_timestamp_is_fresh() {
        let sink = ForwardingSink::new(RecordingSender::default(), config(true));
        let record = gauge_record(2_000);

        let outcome = sink.handle_at(&record, UnixMillis::from_millis(1_000));
        assert_eq!(outcome, SinkOutcome::Sent);
    }

    #[test]
    fn test_no_drop_when_disabled() {
        let sink = ForwardingSink::new(RecordingSender::default(), config(false));
        let outcome = sink.handle_at(&gauge_record(0), UnixMillis::now());
        assert_eq!(outcome, SinkOutcome::Sent);
    }

    #[test]
    fn test_string_timestamp_payload() {
        let numeric = ForwardingSink::new(RecordingSender::default(), config(false));
        let string = ForwardingSink::new(RecordingSender::default(), config(false));

        let outcome = numeric
            .handle_payload(
                br#"{"type":"gauge","source":"samza","name":"a.meanRate","value":0.2,"timestamp":1433220836231}"#,
            )
            .unwrap();
        assert_eq!(outcome, SinkOutcome::Sent);

        let outcome = string
            .handle_payload(
                br#"{"type":"gauge","source":"samza","name":"a.meanRate","value":0.2,"timestamp":"1433220836231"}"#,
            )
            .unwrap();
        assert_eq!(outcome, SinkOutcome::Sent);

        assert_eq!(numeric.client().take(), string.client().take());
    }

    #[test]
    fn test_invalid_payload() {
        let sink = ForwardingSink::new(RecordingSender::default(), config(false));
        assert!(sink.handle_payload(b"{}").is_err());
        assert!(sink.client().take().is_empty());
    }

    #[test]
    fn test_unknown_source_payload() {
        let sink = ForwardingSink::new(RecordingSender::default(), config(false));
        let payload =
            br#"{"type":"gauge","source":"test_src","name":"a.meanRate","value":0.2,"timestamp":0}"#;

        assert!(sink.handle_payload(payload).is_err());
        assert!(sink.client().take().is_empty());
    }

    #[test]
    fn test_message_age_metric() {
        let sink = ForwardingSink::new(RecordingSender::default(), config(true));

        let captures = tally_statsd::with_capturing_test_client(|| {
            sink.handle_at(&gauge_record(1_000), UnixMillis::from_millis(3_500));
        });

        assert_eq!(
            captures,
            ["forward.message_age:2500|d|#source:samza,outcome:dropped"]
        );
    }

    #[test]
    fn test_shared_client() {
        let sender = RecordingSender::default();
        let first = ForwardingSink::new(&sender, SinkConfig::default());
        let second = ForwardingSink::new(&sender, config(false));

        first.handle_at(&gauge_record(0), UnixMillis::from_millis(0));
        second.handle_at(&gauge_record(0), UnixMillis::from_millis(0));

        assert_eq!(sender.take().len(), 4);
    }
}

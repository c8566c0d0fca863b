use tally_forward::{ForwardingSink, MetricSender, SinkConfig};
use tally_log::LogError;
use tally_protocol::CanonicalMetricRecord;
use tally_translate::{
    EventTranslator, RawServiceEvent, RawSnapshotEvent, SchemaError, SnapshotTranslator,
};

/// Translates raw producer payloads and forwards the resulting records.
///
/// Each call handles exactly one payload. Failures are returned to the caller and never retried.
#[derive(Debug)]
pub struct Pipeline<C> {
    snapshots: SnapshotTranslator,
    events: EventTranslator,
    sink: ForwardingSink<C>,
}

impl<C: MetricSender> Pipeline<C> {
    /// Creates a pipeline forwarding to `client`.
    pub fn new(client: C, config: SinkConfig) -> Self {
        Self::from_sink(ForwardingSink::new(client, config))
    }

    /// Creates a pipeline around an existing sink.
    pub fn from_sink(sink: ForwardingSink<C>) -> Self {
        Self {
            snapshots: SnapshotTranslator::new(),
            events: EventTranslator::new(),
            sink,
        }
    }

    /// Returns the sink records are forwarded to.
    pub fn sink(&self) -> &ForwardingSink<C> {
        &self.sink
    }

    /// Handles a metrics snapshot of the runtime.
    ///
    /// Returns the number of records handed to the sink, including dropped ones.
    pub fn process_snapshot(&self, payload: &[u8]) -> Result<usize, SchemaError> {
        let records = RawSnapshotEvent::from_slice(payload)
            .and_then(|snapshot| self.snapshots.translate(&snapshot))
            .inspect_err(|error| log_rejected("snapshot", error))?;

        Ok(self.forward(&records))
    }

    /// Handles a metric or alert event of the service.
    ///
    /// Returns the number of records handed to the sink, which is zero for skipped metrics.
    pub fn process_service_event(&self, payload: &[u8]) -> Result<usize, SchemaError> {
        let record = RawServiceEvent::from_slice(payload)
            .and_then(|event| self.events.translate(&event))
            .inspect_err(|error| log_rejected("service event", error))?;

        Ok(self.forward(record.as_slice()))
    }

    fn forward(&self, records: &[CanonicalMetricRecord]) -> usize {
        for record in records {
            self.sink.handle(record);
        }
        records.len()
    }
}

fn log_rejected(kind: &str, error: &SchemaError) {
    tally_log::debug!(
        field = error.field(),
        "rejected {kind}: {}",
        LogError(error)
    );
}

use tally_statsd::CounterMetric;

/// Counter metrics for the translators.
pub enum TranslateCounters {
    /// Incremented for every canonical record produced.
    ///
    /// Tagged by `source`.
    Record,

    /// Incremented for every metric that matches no known pattern and is skipped.
    ///
    /// Tagged by `source`.
    Skipped,

    /// Incremented for every payload rejected with a schema error.
    ///
    /// Tagged by `source`.
    SchemaViolation,
}

impl CounterMetric for TranslateCounters {
    fn name(&self) -> &'static str {
        match *self {
            Self::Record => "translate.record",
            Self::Skipped => "translate.skipped",
            Self::SchemaViolation => "translate.schema_violation",
        }
    }
}

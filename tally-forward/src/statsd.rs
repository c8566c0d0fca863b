use tally_statsd::DistributionMetric;

/// Distribution metrics for the forwarding sink.
pub enum ForwardDistributions {
    /// Age of every handled record in milliseconds, at the time it reaches the sink.
    ///
    /// Tagged by `source` and `outcome`.
    MessageAge,
}

impl DistributionMetric for ForwardDistributions {
    fn name(&self) -> &'static str {
        match *self {
            Self::MessageAge => "forward.message_age",
        }
    }
}

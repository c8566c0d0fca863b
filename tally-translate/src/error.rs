/// A payload that does not conform to the schema of its feed.
#[derive(Debug, thiserror::Error)]
pub enum SchemaError {
    /// The payload is not valid JSON or has the wrong overall shape.
    #[error("invalid json payload")]
    InvalidJson(#[from] serde_json::Error),

    /// A required field is absent or null.
    #[error("missing required field `{0}`")]
    MissingField(&'static str),

    /// A field is present but has the wrong type.
    #[error("field `{field}` is not {expected}")]
    InvalidField {
        /// Name of the offending field.
        field: &'static str,
        /// Description of the expected type.
        expected: &'static str,
    },

    /// The `feed` field names neither metrics nor alerts.
    #[error("unknown feed kind {0:?}")]
    UnknownFeed(String),

    /// The timestamp is not a valid RFC 3339 date time.
    #[error("invalid timestamp {value:?}")]
    InvalidTimestamp {
        /// The raw timestamp.
        value: String,
        /// The parse failure.
        #[source]
        source: chrono::ParseError,
    },

    /// A recognized snapshot metric does not carry a number.
    #[error("metric `{0}` has a non-numeric value")]
    NonNumericMetric(String),
}

impl SchemaError {
    /// Returns the name of the offending field, if the error is tied to one.
    pub fn field(&self) -> Option<&str> {
        match self {
            Self::MissingField(field) | Self::InvalidField { field, .. } => Some(*field),
            Self::UnknownFeed(_) => Some("feed"),
            Self::InvalidTimestamp { .. } => Some("timestamp"),
            Self::NonNumericMetric(key) => Some(key.as_str()),
            Self::InvalidJson(_) => None,
        }
    }
}

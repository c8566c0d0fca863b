use std::borrow::Cow;

/// Replaces every character that is not an ASCII alphanumeric or underscore with `_`.
///
/// An empty input yields a single `_`, so that the resulting segment is never empty.
///
/// # Example
///
/// ```
/// use tally_protocol::sanitize_segment;
///
/// assert_eq!(sanitize_segment("a.foo.com:8103"), "a_foo_com_8103");
/// assert_eq!(sanitize_segment("pageviews"), "pageviews");
/// ```
pub fn sanitize_segment(raw: &str) -> Cow<'_, str> {
    if raw.is_empty() {
        return Cow::Borrowed("_");
    }

    if raw.bytes().all(is_name_byte) {
        return Cow::Borrowed(raw);
    }

    raw.chars()
        .map(|c| if c.is_ascii() && is_name_byte(c as u8) { c } else { '_' })
        .collect::<String>()
        .into()
}

fn is_name_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

/// Returns `true` if the name consists of non-empty segments that only contain ASCII
/// alphanumerics and underscores.
pub fn is_valid_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .split('.')
            .all(|segment| !segment.is_empty() && segment.bytes().all(is_name_byte))
}

/// Builds dot-delimited metric names.
///
/// Values from producer payloads go through [`segment`](Self::segment) or
/// [`path`](Self::path), which sanitize them. Fixed parts of a naming pattern are appended with
/// [`literal`](Self::literal).
///
/// # Example
///
/// ```
/// use tally_protocol::MetricNameBuilder;
///
/// let name = MetricNameBuilder::new("druid")
///     .segment("druid/sit/broker")
///     .literal("node")
///     .path("query/cache/delta", '/')
///     .finish();
///
/// assert_eq!(name, "druid.druid_sit_broker.node.query.cache.delta");
/// ```
#[derive(Clone, Debug)]
pub struct MetricNameBuilder {
    name: String,
}

impl MetricNameBuilder {
    /// Starts a name with the given literal root.
    pub fn new(root: &str) -> Self {
        Self {
            name: root.to_owned(),
        }
    }

    /// Appends a sanitized segment.
    pub fn segment(mut self, raw: &str) -> Self {
        self.push(&sanitize_segment(raw));
        self
    }

    /// Appends a fixed segment, which must already be a valid name part.
    pub fn literal(mut self, literal: &str) -> Self {
        debug_assert!(is_valid_name(literal), "invalid literal {literal:?}");
        self.push(literal);
        self
    }

    /// Splits `raw` at `separator` and appends every non-empty part as a sanitized segment.
    pub fn path(mut self, raw: &str, separator: char) -> Self {
        for part in raw.split(separator).filter(|part| !part.is_empty()) {
            self.push(&sanitize_segment(part));
        }
        self
    }

    /// Returns the finished name.
    pub fn finish(self) -> String {
        self.name
    }

    fn push(&mut self, segment: &str) {
        if !self.name.is_empty() {
            self.name.push('.');
        }
        self.name.push_str(segment);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_replaces_unsafe_characters() {
        assert_eq!(sanitize_segment("druid/sit/middleManager"), "druid_sit_middleManager");
        assert_eq!(sanitize_segment("Compressed Class Space"), "Compressed_Class_Space");
        assert_eq!(sanitize_segment("component-failure"), "component_failure");
        assert_eq!(sanitize_segment("s2.call"), "s2_call");
    }

    #[test]
    fn test_sanitize_non_ascii() {
        assert_eq!(sanitize_segment("größe"), "gr__e");
    }

    #[test]
    fn test_sanitize_borrows_clean_input() {
        assert!(matches!(sanitize_segment("clean_1"), Cow::Borrowed(_)));
        assert_eq!(sanitize_segment(""), "_");
    }

    #[test]
    fn test_builder_skips_empty_path_parts() {
        let name = MetricNameBuilder::new("samza")
            .literal("stream")
            .path("/a//b/", '/')
            .finish();
        assert_eq!(name, "samza.stream.a.b");
    }

    #[test]
    fn test_builder_with_empty_root() {
        let name = MetricNameBuilder::new("").segment("x y").finish();
        assert_eq!(name, "x_y");
    }

    #[test]
    fn test_is_valid_name() {
        assert!(is_valid_name("samza.job_1.container"));
        assert!(!is_valid_name("samza..job"));
        assert!(!is_valid_name("samza.job-1"));
        assert!(!is_valid_name(""));
    }
}

use std::fmt;
use std::time::{Duration, SystemTime};

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize, de};

/// A unix timestamp with millisecond precision (milliseconds since 1970-01-01 00:00 UTC).
///
/// Serializes as an integer. Deserializes from an integer or from a string containing an integer,
/// since some producers ship epoch milliseconds as strings.
#[derive(Clone, Copy, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct UnixMillis(i64);

impl UnixMillis {
    /// Creates a timestamp from the given number of milliseconds.
    pub const fn from_millis(millis: i64) -> Self {
        Self(millis)
    }

    /// Creates a timestamp from the given system time.
    pub fn from_system(time: SystemTime) -> Self {
        let millis = time
            .duration_since(SystemTime::UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis();

        Self(i64::try_from(millis).unwrap_or(i64::MAX))
    }

    /// Creates a timestamp from a date time, truncating to milliseconds.
    pub fn from_datetime<Tz: TimeZone>(datetime: &DateTime<Tz>) -> Self {
        Self(datetime.timestamp_millis())
    }

    /// Returns the current timestamp.
    #[inline]
    pub fn now() -> Self {
        Self::from_system(SystemTime::now())
    }

    /// Returns the number of milliseconds since the UNIX epoch start.
    pub const fn as_millis(self) -> i64 {
        self.0
    }

    /// Converts into a UTC date time, if representable.
    pub fn as_datetime(self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp_millis(self.0)
    }

    /// Returns the time elapsed between this timestamp and `now`.
    ///
    /// Timestamps after `now` have an age of zero.
    pub fn age_at(self, now: Self) -> Duration {
        let millis = now.0.saturating_sub(self.0).max(0);
        Duration::from_millis(millis.unsigned_abs())
    }
}

impl fmt::Debug for UnixMillis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UnixMillis({})", self.0)
    }
}

impl fmt::Display for UnixMillis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// An error returned from parsing [`UnixMillis`].
#[derive(Clone, Copy, Debug, PartialEq, thiserror::Error)]
#[error("invalid unix timestamp in milliseconds")]
pub struct ParseUnixMillisError(());

impl std::str::FromStr for UnixMillis {
    type Err = ParseUnixMillisError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let millis = s.trim().parse().or(Err(ParseUnixMillisError(())))?;
        Ok(Self(millis))
    }
}

impl Serialize for UnixMillis {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_i64(self.0)
    }
}

struct UnixMillisVisitor;

impl de::Visitor<'_> for UnixMillisVisitor {
    type Value = UnixMillis;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter.write_str("epoch milliseconds as integer or numeric string")
    }

    fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E>
    where
        E: de::Error,
    {
        Ok(UnixMillis(v))
    }

    fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E>
    where
        E: de::Error,
    {
        i64::try_from(v)
            .map(UnixMillis)
            .map_err(|_| E::invalid_value(de::Unexpected::Unsigned(v), &self))
    }

    fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
    where
        E: de::Error,
    {
        v.parse()
            .map_err(|_| E::invalid_value(de::Unexpected::Str(v), &self))
    }
}

impl<'de> Deserialize<'de> for UnixMillis {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        deserializer.deserialize_any(UnixMillisVisitor)
    }
}

#[cfg(test)]
mod tests {
    use chrono::FixedOffset;

    use super::*;

    #[test]
    fn test_deserialize_integer_and_string() {
        let from_int: UnixMillis = serde_json::from_str("1433220836231").unwrap();
        let from_str: UnixMillis = serde_json::from_str(r#""1433220836231""#).unwrap();
        assert_eq!(from_int, from_str);
        assert_eq!(from_int.as_millis(), 1433220836231);
    }

    #[test]
    fn test_deserialize_rejects_garbage() {
        let result = serde_json::from_str::<UnixMillis>(r#""yesterday""#);
        assert!(result.is_err());

        let result = serde_json::from_str::<UnixMillis>("1.5");
        assert!(result.is_err());
    }

    #[test]
    fn test_serialize_as_integer() {
        let json = serde_json::to_string(&UnixMillis::from_millis(1433220776087)).unwrap();
        assert_eq!(json, "1433220776087");
    }

    #[test]
    fn test_from_datetime_honours_offset() {
        let utc = DateTime::parse_from_rfc3339("2016-04-12T21:52:06.301Z").unwrap();
        let offset = DateTime::parse_from_rfc3339("2016-04-12T23:52:06.301+02:00").unwrap();
        assert_eq!(
            UnixMillis::from_datetime(&utc),
            UnixMillis::from_datetime(&offset)
        );
        assert_eq!(UnixMillis::from_datetime(&utc).as_millis(), 1460497926301);

        let fixed: DateTime<FixedOffset> = utc;
        assert_eq!(
            UnixMillis::from_datetime(&fixed).as_datetime(),
            Some(utc.with_timezone(&Utc))
        );
    }

    #[test]
    fn test_age_at() {
        let then = UnixMillis::from_millis(1_000);
        assert_eq!(
            then.age_at(UnixMillis::from_millis(3_500)),
            Duration::from_millis(2_500)
        );
        // future timestamps are never negative
        assert_eq!(then.age_at(UnixMillis::from_millis(0)), Duration::ZERO);
    }

    #[test]
    fn test_debug_and_display() {
        let ts = UnixMillis::from_millis(42);
        assert_eq!(format!("{ts:?}"), "UnixMillis(42)");
        assert_eq!(ts.to_string(), "42");
        assert_eq!(" 42".parse::<UnixMillis>(), Ok(ts));
    }
}

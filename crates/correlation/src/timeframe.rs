use crate::Error;
use chrono::{DateTime, Utc};

/// Timeframe is an ordered interval where `start <= end`.
/// A zero-length interval is valid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct Timeframe {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

impl Timeframe {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self, Error> {
        if end < start {
            return Err(Error::InvalidRange { start, end });
        }
        Ok(Self { start, end })
    }

    /// Parse RFC 3339 `start` and `end` timestamps into a Timeframe.
    /// Each side is parsed independently, and a failure identifies which side failed.
    pub fn parse(start: &str, end: &str) -> Result<Self, Error> {
        let start = DateTime::parse_from_rfc3339(start.trim())
            .map_err(|source| Error::InvalidStart {
                value: start.to_string(),
                source,
            })?
            .with_timezone(&Utc);

        let end = DateTime::parse_from_rfc3339(end.trim())
            .map_err(|source| Error::InvalidEnd {
                value: end.to_string(),
                source,
            })?
            .with_timezone(&Utc);

        Self::new(start, end)
    }

    pub fn start(&self) -> DateTime<Utc> {
        self.start
    }

    pub fn end(&self) -> DateTime<Utc> {
        self.end
    }
}

#[cfg(test)]
mod test {
    use super::Timeframe;
    use crate::Error;
    use chrono::{TimeZone, Utc};

    #[test]
    fn test_parse_round_trips() {
        let tf = Timeframe::parse("2024-03-01T10:00:00Z", "2024-03-01T10:05:30.250Z").unwrap();

        assert_eq!(tf.start(), Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap());
        assert_eq!(
            tf.end(),
            Utc.with_ymd_and_hms(2024, 3, 1, 10, 5, 30).unwrap()
                + chrono::Duration::milliseconds(250)
        );

        // Offsets are normalized to UTC.
        let tf = Timeframe::parse("2024-03-01T12:00:00+02:00", "2024-03-01T10:00:00Z").unwrap();
        assert_eq!(tf.start(), tf.end());
    }

    #[test]
    fn test_zero_length_is_valid() {
        let tf = Timeframe::parse("2024-03-01T10:00:00Z", "2024-03-01T10:00:00Z").unwrap();
        assert_eq!(tf.start(), tf.end());
    }

    #[test]
    fn test_parse_errors_identify_the_side() {
        let err = Timeframe::parse("yesterday", "2024-03-01T10:00:00Z").unwrap_err();
        assert!(matches!(err, Error::InvalidStart { ref value, .. } if value == "yesterday"));

        let err = Timeframe::parse("2024-03-01T10:00:00Z", "tomorrow").unwrap_err();
        assert!(matches!(err, Error::InvalidEnd { ref value, .. } if value == "tomorrow"));

        // Both invalid: the start is reported.
        let err = Timeframe::parse("", "").unwrap_err();
        assert!(matches!(err, Error::InvalidStart { .. }));
    }

    #[test]
    fn test_inverted_range_is_rejected() {
        let err = Timeframe::parse("2024-03-01T10:00:01Z", "2024-03-01T10:00:00Z").unwrap_err();
        assert!(matches!(err, Error::InvalidRange { .. }));
        insta::assert_snapshot!(err, @"timeframe end 2024-03-01 10:00:00 UTC is before start 2024-03-01 10:00:01 UTC");
    }
}

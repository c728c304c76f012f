//! Conversion of upstream timestamp strings into UTC epoch milliseconds.
//!
//! The aviation API reports times as offset-aware ISO 8601 strings, but any of
//! them may be missing or malformed. Parsing never panics and never invents a
//! value: the caller either gets the exact instant or an
//! [`UnparseableTimestamp`] carrying the rejected input.

use chrono::{DateTime, FixedOffset, NaiveDateTime};
use thiserror::Error;

/// Offset-aware layouts accepted in addition to RFC 3339, tried in order.
/// The upstream sometimes drops the seconds field.
const FALLBACK_FORMATS: &[&str] = &["%Y-%m-%dT%H:%M%:z", "%Y-%m-%dT%H:%M%z"];

/// Minutes precision with the `Z` designator, which `%z` does not accept.
const FALLBACK_UTC_FORMAT: &str = "%Y-%m-%dT%H:%MZ";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unparseable timestamp: {raw:?}")]
pub struct UnparseableTimestamp {
    pub raw: String,
}

/// Parses an offset-aware date-time string into UTC epoch milliseconds.
pub fn parse_utc_millis(raw: &str) -> Result<i64, UnparseableTimestamp> {
    let trimmed = raw.trim();

    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return Ok(dt.timestamp_millis());
    }

    FALLBACK_FORMATS
        .iter()
        .find_map(|fmt| DateTime::<FixedOffset>::parse_from_str(trimmed, fmt).ok())
        .map(|dt| dt.timestamp_millis())
        .or_else(|| {
            NaiveDateTime::parse_from_str(trimmed, FALLBACK_UTC_FORMAT)
                .ok()
                .map(|naive| naive.and_utc().timestamp_millis())
        })
        .ok_or_else(|| UnparseableTimestamp {
            raw: raw.to_string(),
        })
}

/// Normalizes an optional field. `None` in, `None` out; a present but
/// malformed value is logged and also becomes `None`, leaving the decision of
/// whether that disqualifies a record to the caller.
pub fn normalize(raw: Option<&str>) -> Option<i64> {
    let raw = raw?;
    match parse_utc_millis(raw) {
        Ok(millis) => Some(millis),
        Err(e) => {
            tracing::debug!("{e}");
            None
        }
    }
}

/// Picks the best candidate for an "actual" time: the reported actual value,
/// else the estimate, else the schedule.
pub fn actual_or_fallback<'a>(
    actual: Option<&'a str>,
    estimated: Option<&'a str>,
    scheduled: Option<&'a str>,
) -> Option<&'a str> {
    actual.or(estimated).or(scheduled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    #[test]
    fn parses_explicit_utc_offset() {
        let expected = Utc
            .with_ymd_and_hms(2025, 4, 8, 6, 10, 0)
            .unwrap()
            .timestamp_millis();
        assert_eq!(parse_utc_millis("2025-04-08T06:10:00+00:00"), Ok(expected));
        assert_eq!(parse_utc_millis("2025-04-08T06:10:00Z"), Ok(expected));
    }

    #[test]
    fn converts_non_utc_offsets_to_the_same_instant() {
        let utc = parse_utc_millis("2025-04-08T06:10:00+00:00").unwrap();
        let ist = parse_utc_millis("2025-04-08T11:40:00+05:30").unwrap();
        assert_eq!(utc, ist);
    }

    #[test]
    fn accepts_minutes_precision() {
        let full = parse_utc_millis("2025-04-08T06:10:00+00:00").unwrap();
        assert_eq!(parse_utc_millis("2025-04-08T06:10+00:00"), Ok(full));
        assert_eq!(parse_utc_millis("2025-04-08T06:10Z"), Ok(full));
        assert_eq!(parse_utc_millis("2025-04-08T11:40+0530"), Ok(full));
    }

    #[test]
    fn rejects_garbage_without_panicking() {
        let err = parse_utc_millis("not-a-date").unwrap_err();
        assert_eq!(err.raw, "not-a-date");
        // A local time with no offset cannot be pinned to an instant.
        assert!(parse_utc_millis("2025-04-08T06:10:00").is_err());
        assert!(parse_utc_millis("").is_err());
    }

    #[test]
    fn normalize_maps_absent_and_invalid_to_none() {
        assert_eq!(normalize(None), None);
        assert_eq!(normalize(Some("garbage")), None);
        assert!(normalize(Some("2025-04-08T06:10:00+00:00")).is_some());
    }

    #[test]
    fn fallback_prefers_actual_then_estimated_then_scheduled() {
        assert_eq!(actual_or_fallback(Some("a"), Some("e"), Some("s")), Some("a"));
        assert_eq!(actual_or_fallback(None, Some("e"), Some("s")), Some("e"));
        assert_eq!(actual_or_fallback(None, None, Some("s")), Some("s"));
        assert_eq!(actual_or_fallback(None, None, None), None);
    }
}

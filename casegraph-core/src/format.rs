//! Timestamp parsing and formatting shared by readers and writers.

use crate::error::{Error, Result};
use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};

/// Naive layouts accepted after RFC 3339, all read as UTC.
///
/// The last one is the legacy graph-file layout where date and time are
/// concatenated so the timestamp stays a single whitespace-free token.
const NAIVE_LAYOUTS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d%H:%M:%S%.f",
];

/// Parse a timestamp in any accepted layout.
pub fn parse_timestamp(text: &str) -> Result<DateTime<Utc>> {
    let text = text.trim();

    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Ok(dt.with_timezone(&Utc));
    }

    NAIVE_LAYOUTS
        .iter()
        .find_map(|layout| NaiveDateTime::parse_from_str(text, layout).ok())
        .map(|naive| naive.and_utc())
        .ok_or_else(|| Error::InvalidTimestamp(text.to_string()))
}

/// Parse a timestamp as recorded wall-clock time.
///
/// A trailing `+HH:MM` or `-HH:MM` offset is dropped instead of applied, so
/// `2024-01-01 10:00:00+02:00` reads as 10:00 UTC. Event logs record the
/// local time at which work happened and cases are compared on that clock.
pub fn parse_wall_clock(text: &str) -> Result<DateTime<Utc>> {
    let text = text.trim();
    parse_timestamp(strip_offset(text)).map_err(|_| Error::InvalidTimestamp(text.to_string()))
}

fn strip_offset(text: &str) -> &str {
    let bytes = text.as_bytes();
    if bytes.len() < 6 {
        return text;
    }
    let tail = &bytes[bytes.len() - 6..];
    let is_offset = matches!(tail[0], b'+' | b'-')
        && tail[1].is_ascii_digit()
        && tail[2].is_ascii_digit()
        && tail[3] == b':'
        && tail[4].is_ascii_digit()
        && tail[5].is_ascii_digit();
    if is_offset {
        &text[..text.len() - 6]
    } else {
        text
    }
}

/// Format a timestamp for flat files and the database.
///
/// Output is stable for a given instant, which keeps derived tables
/// byte-identical across runs.
pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

/// Format an optional timestamp, empty when missing.
pub fn format_timestamp_opt(ts: Option<DateTime<Utc>>) -> String {
    ts.map(format_timestamp).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_parse_rfc3339() {
        let ts = parse_timestamp("2024-01-01T10:00:00+02:00").unwrap();
        assert_eq!(ts, Utc.with_ymd_and_hms(2024, 1, 1, 8, 0, 0).unwrap());
    }

    #[test]
    fn test_parse_naive_layouts() {
        let expected = Utc.with_ymd_and_hms(2011, 10, 1, 8, 11, 7).unwrap();
        assert_eq!(parse_timestamp("2011-10-01T08:11:07").unwrap(), expected);
        assert_eq!(parse_timestamp("2011-10-01 08:11:07").unwrap(), expected);
        assert_eq!(parse_timestamp("2011-10-0108:11:07").unwrap(), expected);
    }

    #[test]
    fn test_parse_fractional_seconds() {
        let ts = parse_timestamp("2011-10-01T08:11:07.250").unwrap();
        assert_eq!(ts.timestamp_subsec_millis(), 250);
    }

    #[test]
    fn test_wall_clock_drops_offset() {
        let expected = Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap();
        assert_eq!(parse_wall_clock("2024-01-01 10:00:00+02:00").unwrap(), expected);
        assert_eq!(parse_wall_clock("2024-01-01T10:00:00-05:30").unwrap(), expected);
        assert_eq!(parse_wall_clock(" 2024-01-01 10:00:00 ").unwrap(), expected);
        assert!(matches!(
            parse_wall_clock("10:00+02:00"),
            Err(Error::InvalidTimestamp(_))
        ));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(matches!(
            parse_timestamp("yesterday"),
            Err(Error::InvalidTimestamp(_))
        ));
    }

    #[test]
    fn test_format_is_stable() {
        let ts = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(format_timestamp(ts), "2024-01-01T00:00:00Z");
        assert_eq!(parse_timestamp(&format_timestamp(ts)).unwrap(), ts);
        assert_eq!(format_timestamp_opt(None), "");
    }
}

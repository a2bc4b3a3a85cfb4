//! Timestamp utilities
//!
//! Time codes count seconds from 1577862000 (2020-01-01T00:00:00 at UTC+09:00) and are used as
//! sortable filename prefixes for providers whose ids do not sort chronologically.

use chrono::{DateTime, Local, NaiveDateTime, TimeZone, Utc};

/// Unix timestamp subtracted from creation times to form a time code
pub const TIME_CODE_EPOCH: i64 = 1_577_862_000;

/// Seconds since [`TIME_CODE_EPOCH`], truncated
pub fn time_code(time: &DateTime<Utc>) -> i64 {
    time.timestamp() - TIME_CODE_EPOCH
}

/// Wall-clock date and time without zone: `YYYY-MM-DDTHH:MM:SS`
pub fn format_antz<Tz: TimeZone>(time: &DateTime<Tz>) -> String
where
    Tz::Offset: std::fmt::Display,
{
    time.format("%Y-%m-%dT%H:%M:%S").to_string()
}

/// Zone offset: `+HH:MM`
pub fn format_zone<Tz: TimeZone>(time: &DateTime<Tz>) -> String
where
    Tz::Offset: std::fmt::Display,
{
    time.format("%:z").to_string()
}

/// Wall-clock date and time with offset: `YYYY-MM-DDTHH:MM:SS+HH:MM`
pub fn format_iso<Tz: TimeZone>(time: &DateTime<Tz>) -> String
where
    Tz::Offset: std::fmt::Display,
{
    format!("{}{}", format_antz(time), format_zone(time))
}

/// Convert to the local zone for tag and filename output
pub fn to_local(time: &DateTime<Utc>) -> DateTime<Local> {
    time.with_timezone(&Local)
}

/// Milliseconds since the Unix epoch
pub fn from_millis(millis: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_millis_opt(millis).single()
}

/// Parse the date strings found in provider payloads and embedded tags
///
/// Accepts RFC 3339, EXIF (`YYYY:MM:DD HH:MM:SS[+HH:MM]`) and zone-less ISO forms.
/// Zone-less values are interpreted in the local zone.
pub fn parse_datetime(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in ["%Y:%m:%d %H:%M:%S%.f%:z", "%Y-%m-%dT%H:%M:%S%.f%:z", "%Y-%m-%d %H:%M:%S%.f%:z"] {
        if let Ok(dt) = DateTime::parse_from_str(value, fmt) {
            return Some(dt.with_timezone(&Utc));
        }
    }
    for fmt in ["%Y:%m:%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(value, fmt) {
            return Local
                .from_local_datetime(&naive)
                .earliest()
                .map(|dt| dt.with_timezone(&Utc));
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::FixedOffset;

    #[test]
    fn test_time_code_epoch_is_zero() {
        let epoch = Utc.timestamp_opt(TIME_CODE_EPOCH, 0).unwrap();
        assert_eq!(time_code(&epoch), 0);
    }

    #[test]
    fn test_time_code_counts_seconds_from_epoch() {
        let t = Utc.with_ymd_and_hms(2024, 6, 28, 12, 30, 45).unwrap();
        assert_eq!(time_code(&t), t.timestamp() - 1_577_862_000);
    }

    #[test]
    fn test_formats_use_given_offset() {
        let tz = FixedOffset::east_opt(9 * 3600).unwrap();
        let t = tz.with_ymd_and_hms(2023, 1, 2, 3, 4, 5).unwrap();
        assert_eq!(format_antz(&t), "2023-01-02T03:04:05");
        assert_eq!(format_zone(&t), "+09:00");
        assert_eq!(format_iso(&t), "2023-01-02T03:04:05+09:00");
    }

    #[test]
    fn test_negative_offset_format() {
        let tz = FixedOffset::west_opt(5 * 3600 + 30 * 60).unwrap();
        let t = tz.with_ymd_and_hms(2023, 1, 2, 3, 4, 5).unwrap();
        assert_eq!(format_zone(&t), "-05:30");
    }

    #[test]
    fn test_parse_rfc3339_and_exif_forms() {
        let expected = Utc.with_ymd_and_hms(2023, 5, 1, 3, 34, 56).unwrap();
        assert_eq!(parse_datetime("2023-05-01T03:34:56Z"), Some(expected));
        assert_eq!(parse_datetime("2023-05-01T12:34:56+09:00"), Some(expected));
        assert_eq!(parse_datetime("2023:05:01 12:34:56+09:00"), Some(expected));
        assert_eq!(parse_datetime("2023-05-01T03:34:56.000Z"), Some(expected));
    }

    #[test]
    fn test_parse_naive_is_local() {
        let parsed = parse_datetime("2023:05:01 12:34:56").unwrap();
        assert_eq!(format_antz(&to_local(&parsed)), "2023-05-01T12:34:56");
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert_eq!(parse_datetime(""), None);
        assert_eq!(parse_datetime("yesterday"), None);
    }

    #[test]
    fn test_from_millis() {
        let t = from_millis(1_729_550_416_180).unwrap();
        assert_eq!(t.timestamp(), 1_729_550_416);
    }
}

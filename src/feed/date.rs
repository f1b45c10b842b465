//! Publication date parsing for the date formats found in the wild.
//!
//! Feeds nominally use RFC 822 (RSS) or RFC 3339 (Atom) timestamps, but
//! publishers drift: two-digit years, missing seconds, missing weekday,
//! bare dates. [`parse_time`] tries a fixed list of layouts in order and
//! returns the first that matches.

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, Utc};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unable to parse time {0:?}")]
pub struct TimeParseError(pub String);

#[derive(Debug, Clone, Copy)]
enum Layout {
    /// `2006-01-02T15:04:05-07:00`, `2006-01-02T15:04:05Z`
    Rfc3339,
    /// ISO 8601 without an offset, read as UTC
    Naive(&'static str),
    /// Trailing zone abbreviation (`GMT`, `PST`) or numeric offset
    Zoned { weekday: bool, format: &'static str },
    /// Format carries its own `%z`
    Offset { weekday: bool, format: &'static str },
    /// Midnight UTC
    Date { weekday: bool, format: &'static str },
}

const LAYOUTS: &[Layout] = &[
    Layout::Rfc3339,
    Layout::Naive("%Y-%m-%dT%H:%M:%S%.f"),
    // RFC 822
    Layout::Zoned { weekday: false, format: "%d %b %y %H:%M" },
    Layout::Zoned { weekday: false, format: "%d %b %Y %H:%M" },
    Layout::Zoned { weekday: false, format: "%d %b %Y %H:%M:%S" },
    // RFC 1123
    Layout::Zoned { weekday: true, format: "%d %b %Y %H:%M:%S" },
    Layout::Offset { weekday: true, format: "%d %b %Y %H:%M:%S %z" },
    Layout::Date { weekday: true, format: "%d %b %Y" },
    Layout::Date { weekday: false, format: "%Y-%m-%d" },
];

/// Parse a feed timestamp into UTC.
///
/// # Errors
///
/// Returns [`TimeParseError`] carrying the input when no layout matches.
pub fn parse_time(text: &str) -> Result<DateTime<Utc>, TimeParseError> {
    let trimmed = text.trim();
    LAYOUTS
        .iter()
        .find_map(|layout| parse_layout(trimmed, *layout))
        .ok_or_else(|| TimeParseError(text.to_string()))
}

fn parse_layout(text: &str, layout: Layout) -> Option<DateTime<Utc>> {
    match layout {
        Layout::Rfc3339 => DateTime::parse_from_rfc3339(text)
            .ok()
            .map(|dt| dt.with_timezone(&Utc)),
        Layout::Naive(format) => NaiveDateTime::parse_from_str(text, format)
            .ok()
            .map(|dt| dt.and_utc()),
        Layout::Zoned { weekday, format } => {
            let text = if weekday { strip_weekday(text)? } else { text };
            let (rest, zone) = text.rsplit_once(char::is_whitespace)?;
            let offset = zone_offset(zone)?;
            NaiveDateTime::parse_from_str(rest.trim_end(), format)
                .ok()?
                .and_local_timezone(offset)
                .single()
                .map(|dt| dt.with_timezone(&Utc))
        }
        Layout::Offset { weekday, format } => {
            let text = if weekday { strip_weekday(text)? } else { text };
            DateTime::parse_from_str(text, format)
                .ok()
                .map(|dt| dt.with_timezone(&Utc))
        }
        Layout::Date { weekday, format } => {
            let text = if weekday { strip_weekday(text)? } else { text };
            NaiveDate::parse_from_str(text, format)
                .ok()?
                .and_hms_opt(0, 0, 0)
                .map(|dt| dt.and_utc())
        }
    }
}

const WEEKDAYS: [&str; 7] = ["mon", "tue", "wed", "thu", "fri", "sat", "sun"];

/// `"Fri, 03 Jan 2014"` -> `"03 Jan 2014"`. The weekday is not checked
/// against the date.
fn strip_weekday(text: &str) -> Option<&str> {
    let (day, rest) = text.split_once(',')?;
    let day = day.trim().to_ascii_lowercase();
    let known = WEEKDAYS
        .iter()
        .any(|short| day == *short || (day.starts_with(short) && day.ends_with("day")));
    known.then(|| rest.trim_start())
}

/// Resolve a zone abbreviation or `±hhmm` offset.
///
/// Unknown alphabetic abbreviations resolve to UTC.
fn zone_offset(zone: &str) -> Option<FixedOffset> {
    const HOUR: i32 = 3600;

    if let Some(sign) = zone.chars().next().filter(|c| *c == '+' || *c == '-') {
        let digits = &zone[1..];
        if digits.len() != 4 || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        let hours: i32 = digits[..2].parse().ok()?;
        let minutes: i32 = digits[2..].parse().ok()?;
        let secs = hours * HOUR + minutes * 60;
        return FixedOffset::east_opt(if sign == '-' { -secs } else { secs });
    }

    if zone.is_empty() || !zone.chars().all(|c| c.is_ascii_alphabetic()) {
        return None;
    }

    let hours = match zone.to_ascii_uppercase().as_str() {
        "EST" => -5,
        "EDT" => -4,
        "CST" => -6,
        "CDT" => -5,
        "MST" => -7,
        "MDT" => -6,
        "PST" => -8,
        "PDT" => -7,
        _ => 0,
    };
    FixedOffset::east_opt(hours * HOUR)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use proptest::prelude::*;

    fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, s).unwrap()
    }

    #[test]
    fn test_parse_time_layouts() {
        let cases = [
            ("2010-07-13T14:15:32-07:00", utc(2010, 7, 13, 21, 15, 32)),
            ("2010-07-13T14:15:32Z", utc(2010, 7, 13, 14, 15, 32)),
            ("2010-07-13T14:15:32", utc(2010, 7, 13, 14, 15, 32)),
            ("Fri, 03 Jan 2014 22:45:00 GMT", utc(2014, 1, 3, 22, 45, 0)),
            ("03 Jan 2014 22:45 GMT", utc(2014, 1, 3, 22, 45, 0)),
            ("03 Jan 14 22:45 GMT", utc(2014, 1, 3, 22, 45, 0)),
            ("03 Jan 2014 22:45:10 EST", utc(2014, 1, 4, 3, 45, 10)),
            ("Fri, 3 Jan 2014 16:35:05 -0800", utc(2014, 1, 4, 0, 35, 5)),
            ("Mon, 06 Jan 2014 10:00:00 PST", utc(2014, 1, 6, 18, 0, 0)),
            ("Sat, 04 Jan 2014", utc(2014, 1, 4, 0, 0, 0)),
            ("2011-05-19", utc(2011, 5, 19, 0, 0, 0)),
            ("  2011-05-19\n", utc(2011, 5, 19, 0, 0, 0)),
        ];

        for (input, expected) in cases {
            assert_eq!(parse_time(input), Ok(expected), "input: {input:?}");
        }
    }

    #[test]
    fn test_parse_time_rejects_garbage() {
        for input in ["not a date", "", "Someday, 03 Jan 2014", "2014-13-45", "03 Jan 2014 22:45 +08"] {
            assert_eq!(
                parse_time(input),
                Err(TimeParseError(input.to_string())),
                "input: {input:?}"
            );
        }
    }

    #[test]
    fn test_unknown_zone_abbreviation_is_utc() {
        assert_eq!(
            parse_time("03 Jan 2014 22:45 XYZ"),
            Ok(utc(2014, 1, 3, 22, 45, 0))
        );
    }

    #[test]
    fn test_zone_offset() {
        assert_eq!(zone_offset("+0530"), FixedOffset::east_opt(5 * 3600 + 30 * 60));
        assert_eq!(zone_offset("-0000"), FixedOffset::east_opt(0));
        assert_eq!(zone_offset("cdt"), FixedOffset::east_opt(-5 * 3600));
        assert_eq!(zone_offset("+05"), None);
        assert_eq!(zone_offset("2014"), None);
    }

    proptest! {
        #[test]
        fn rfc1123_gmt_parses_to_same_instant(secs in 0i64..4_000_000_000) {
            let instant = DateTime::from_timestamp(secs, 0).unwrap();
            let text = instant.format("%a, %d %b %Y %H:%M:%S GMT").to_string();
            prop_assert_eq!(parse_time(&text), Ok(instant));
        }

        #[test]
        fn numeric_offset_is_applied(secs in 0i64..4_000_000_000, hours in -12i32..=14) {
            let instant = DateTime::from_timestamp(secs, 0).unwrap();
            let offset = FixedOffset::east_opt(hours * 3600).unwrap();
            let text = instant.with_timezone(&offset).format("%a, %d %b %Y %H:%M:%S %z").to_string();
            prop_assert_eq!(parse_time(&text), Ok(instant));
        }
    }
}

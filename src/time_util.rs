use chrono::{Datelike, NaiveDate, NaiveDateTime};

use crate::error::SchemaError;

/// Raw timestamp as it arrives from a source row: either already a native
/// value, or a string that may carry a `" +NNNN UTC"` offset suffix.
#[derive(Debug, Clone)]
pub enum RawTimestamp {
    Naive(NaiveDateTime),
    Text(String),
}

impl RawTimestamp {
    /// Canonicalizes to a timezone-naive wall clock. The offset suffix (if any)
    /// is stripped rather than applied: every timestamp in this pipeline is
    /// already expressed in the billing account's reporting timezone, and the
    /// suffix only documents that fact for humans reading raw exports.
    pub fn normalize(&self) -> Result<NaiveDateTime, SchemaError> {
        match self {
            RawTimestamp::Naive(dt) => Ok(*dt),
            RawTimestamp::Text(s) => parse_flexible_timestamp(s),
        }
    }
}

pub fn parse_flexible_timestamp(raw: &str) -> Result<NaiveDateTime, SchemaError> {
    let trimmed = raw.trim();
    let without_suffix = strip_offset_suffix(trimmed);

    const FORMATS: &[&str] = &[
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S%.f",
    ];
    for fmt in FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(without_suffix, fmt) {
            return Ok(dt);
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(without_suffix, "%Y-%m-%d") {
        return Ok(date.and_hms_opt(0, 0, 0).expect("midnight is always valid"));
    }

    Err(SchemaError::BadTimestamp {
        raw: raw.to_string(),
        reason: "did not match any recognized timestamp format".to_string(),
    })
}

/// Strips a trailing `" +NNNN UTC"` / `" +NNNN"` / `" UTC"` offset annotation.
/// The wall-clock fields to its left are left untouched — see `normalize`.
fn strip_offset_suffix(s: &str) -> &str {
    let s = s.strip_suffix(" UTC").unwrap_or(s).trim_end();
    if let Some(pos) = s.rfind(' ') {
        let tail = &s[pos + 1..];
        let looks_like_offset = tail.len() >= 4
            && (tail.starts_with('+') || tail.starts_with('-'))
            && tail[1..].chars().all(|c| c.is_ascii_digit());
        if looks_like_offset {
            return s[..pos].trim_end();
        }
    }
    s
}

pub fn days_in_month(year: i32, month: u32) -> u32 {
    let first_of_month = NaiveDate::from_ymd_opt(year, month, 1).expect("valid month");
    let first_of_next = if month == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1)
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1)
    }
    .expect("valid month");
    (first_of_next - first_of_month).num_days() as u32
}

pub fn hours_in_month(year: i32, month: u32) -> u32 {
    days_in_month(year, month) * 24
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_offset_suffix() {
        let dt = parse_flexible_timestamp("2024-01-01 00:00:00 +0000 UTC").unwrap();
        assert_eq!(dt.to_string(), "2024-01-01 00:00:00");
    }

    #[test]
    fn accepts_iso_without_suffix() {
        let dt = parse_flexible_timestamp("2024-03-05T12:30:00").unwrap();
        assert_eq!(dt.date().day(), 5);
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse_flexible_timestamp("not a timestamp").is_err());
    }

    #[test]
    fn days_in_month_handles_leap_february() {
        assert_eq!(days_in_month(2024, 2), 29);
        assert_eq!(days_in_month(2023, 2), 28);
    }

    #[test]
    fn hours_in_month_october() {
        assert_eq!(hours_in_month(2024, 10), 744);
    }

    #[test]
    fn hours_in_month_december_crosses_year() {
        assert_eq!(days_in_month(2024, 12), 31);
        assert_eq!(hours_in_month(2024, 12), 744);
    }
}

//! Fixation record export
//!
//! Records are written as comma-separated text with a fixed header row.

use crate::types::FixationRecord;
use chrono::{DateTime, SecondsFormat, Utc};
use std::fmt::Write as _;

/// Header row of the export format
pub const CSV_HEADER: &str = "trial,start_ISO,end_ISO,duration_ms";

/// ISO-8601 UTC timestamp with millisecond precision (`2024-01-15T14:00:00.000Z`)
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Render records as CSV. An empty list yields the header alone.
pub fn to_csv(records: &[FixationRecord]) -> String {
    let mut out = String::with_capacity(CSV_HEADER.len() + 1 + records.len() * 64);
    out.push_str(CSV_HEADER);
    out.push('\n');
    for r in records {
        // Writing into a String cannot fail
        let _ = writeln!(
            out,
            "{},{},{},{}",
            r.trial_id,
            format_timestamp(&r.start),
            format_timestamp(&r.end),
            r.duration_ms
        );
    }
    out
}

/// Download file name for an export taken at `now`
pub fn file_name(now: DateTime<Utc>) -> String {
    format!("fixations_{}.csv", now.timestamp_millis())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    fn at(ms: i64) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(ms).unwrap()
    }

    #[test]
    fn test_csv_rows() {
        let start = Utc.with_ymd_and_hms(2024, 1, 15, 14, 0, 0).unwrap();
        let records = vec![
            FixationRecord {
                trial_id: 1,
                start,
                end: start + chrono::Duration::milliseconds(352),
                duration_ms: 352,
            },
            FixationRecord {
                trial_id: 2,
                start: start + chrono::Duration::seconds(2),
                end: start + chrono::Duration::milliseconds(2400),
                duration_ms: 400,
            },
        ];

        assert_eq!(
            to_csv(&records),
            "trial,start_ISO,end_ISO,duration_ms\n\
             1,2024-01-15T14:00:00.000Z,2024-01-15T14:00:00.352Z,352\n\
             2,2024-01-15T14:00:02.000Z,2024-01-15T14:00:02.400Z,400\n"
        );
    }

    #[test]
    fn test_empty_export_is_header_only() {
        assert_eq!(to_csv(&[]), "trial,start_ISO,end_ISO,duration_ms\n");
    }

    #[test]
    fn test_file_name_uses_unix_millis() {
        assert_eq!(file_name(at(1_705_327_200_123)), "fixations_1705327200123.csv");
    }
}

use chrono::{DateTime, Local, TimeZone};
use unicode_segmentation::UnicodeSegmentation;

/// Converts a milliseconds-since-Unix-epoch timestamp into a local datetime.
pub fn unix_time_millis_to_datetime(millis: u64) -> Option<DateTime<Local>> {
    Local.timestamp_millis_opt(millis as i64).single()
}

/// Returns the first user-perceived character (grapheme cluster) of the given
/// string, used as the textual fallback for rooms without an avatar.
pub fn first_grapheme(s: &str) -> String {
    s.graphemes(true).next().map(ToString::to_string).unwrap_or_default()
}

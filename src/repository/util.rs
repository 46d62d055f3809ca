//! Column conversions shared by the diesel repositories.
//!
//! Timestamps are stored as RFC 3339 text with millisecond precision and a
//! `Z` suffix, so lexical order in SQL matches chronological order.

use chrono::{DateTime, SecondsFormat, Utc};

pub fn stored_timestamp(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Required timestamp column. Unreadable values sort first as the epoch.
pub fn read_timestamp(s: &str) -> DateTime<Utc> {
    parse_timestamp(s).unwrap_or(DateTime::UNIX_EPOCH)
}

pub fn read_timestamp_opt(s: Option<String>) -> Option<DateTime<Utc>> {
    s.as_deref().and_then(parse_timestamp)
}

/// SQLite has no boolean type.
pub fn flag(b: bool) -> i32 {
    i32::from(b)
}

/// Medium title reduced for fuzzy lookup: lowercase alphanumeric words
/// separated by single spaces.
pub fn normalize_title(title: &str) -> String {
    let mut out = String::with_capacity(title.len());
    for word in title
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
    {
        if !out.is_empty() {
            out.push(' ');
        }
        out.extend(word.chars().flat_map(char::to_lowercase));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timestamps_sort_as_text() {
        let early = Utc::now();
        let late = early + chrono::Duration::milliseconds(1500);
        assert!(stored_timestamp(early) < stored_timestamp(late));
        assert_eq!(
            read_timestamp(&stored_timestamp(early)).timestamp_millis(),
            early.timestamp_millis()
        );
    }

    #[test]
    fn test_unreadable_timestamps() {
        assert_eq!(read_timestamp("garbage"), DateTime::UNIX_EPOCH);
        assert_eq!(read_timestamp_opt(Some("garbage".to_string())), None);
        assert_eq!(read_timestamp_opt(None), None);
    }

    #[test]
    fn test_normalize_title() {
        assert_eq!(normalize_title("  The   Novel: Part II! "), "the novel part ii");
        assert_eq!(normalize_title("The-Novel"), normalize_title("the novel"));
    }
}

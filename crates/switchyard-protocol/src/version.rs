//! Protocol version negotiation.
//!
//! Versions are `YYYY-MM-DD` date strings, so lexical order is chronological
//! order. The responder answers with the newest version it speaks that is not
//! newer than the one the initiator asked for.

use chrono::NaiveDate;

/// Newest version this implementation speaks
pub const LATEST_PROTOCOL_VERSION: &str = "2025-11-25";

/// Every version this implementation speaks, newest first
pub const SUPPORTED_VERSIONS: &[&str] = &["2025-11-25", "2025-06-18", "2025-03-26", "2024-11-05"];

/// Whether `version` is a real calendar date in `YYYY-MM-DD` form
pub fn is_well_formed(version: &str) -> bool {
    version.len() == 10 && NaiveDate::parse_from_str(version, "%Y-%m-%d").is_ok()
}

/// Pick the newest entry of `supported` that is `<= requested`.
///
/// Returns `None` when every supported version is newer than the request or
/// the request is malformed.
pub fn negotiate<'a, S: AsRef<str>>(requested: &str, supported: &'a [S]) -> Option<&'a str> {
    if !is_well_formed(requested) {
        return None;
    }
    supported
        .iter()
        .map(AsRef::as_ref)
        .filter(|v| is_well_formed(v) && *v <= requested)
        .max()
}

/// Newest entry of `supported`
pub fn latest<S: AsRef<str>>(supported: &[S]) -> Option<&str> {
    supported.iter().map(AsRef::as_ref).max()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_match_wins() {
        assert_eq!(negotiate("2025-11-25", &["2025-11-25", "2024-11-05"]), Some("2025-11-25"));
    }

    #[test]
    fn test_falls_back_to_older() {
        assert_eq!(negotiate("2025-06-18", &["2025-11-25", "2024-11-05"]), Some("2024-11-05"));
    }

    #[test]
    fn test_newer_request_gets_responder_latest() {
        assert_eq!(negotiate("2026-01-01", SUPPORTED_VERSIONS), Some(LATEST_PROTOCOL_VERSION));
    }

    #[test]
    fn test_disjoint_sets() {
        assert_eq!(negotiate("2024-01-01", &["2025-11-25", "2025-06-18"]), None);
        assert_eq!(negotiate("not-a-date", SUPPORTED_VERSIONS), None);
    }

    #[test]
    fn test_well_formed() {
        assert!(is_well_formed("2024-11-05"));
        assert!(!is_well_formed("2024-1-05"));
        assert!(!is_well_formed("2024/11/05"));
        assert!(!is_well_formed("2024-13-40"));
    }
}

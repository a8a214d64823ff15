//! The incremental-fetch watermark.

use chrono::{DateTime, Duration, Utc};

/// Wire format of the Provider's conditional header.
pub const CURSOR_FORMAT: &str = "%a, %d %b %Y %H:%M:%S +0000";

/// Single process-wide watermark bounding incremental Provider fetches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct SyncCursor {
    since: DateTime<Utc>,
}

impl SyncCursor {
    pub fn at(since: DateTime<Utc>) -> Self {
        Self { since }
    }

    /// A cursor `lookback_days` before `now`; used for the first fetch and
    /// for grower bootstrap.
    pub fn bootstrap(now: DateTime<Utc>, lookback_days: i64) -> Self {
        Self {
            since: now - Duration::days(lookback_days),
        }
    }

    pub fn since(&self) -> DateTime<Utc> {
        self.since
    }

    /// The conditional-header value for this cursor.
    pub fn header_value(&self) -> String {
        format_since(self.since)
    }

    /// Move the watermark forward. Never moves it back.
    pub fn advance(&mut self, to: DateTime<Utc>) {
        if to > self.since {
            self.since = to;
        }
    }
}

pub fn format_since(at: DateTime<Utc>) -> String {
    at.format(CURSOR_FORMAT).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn header_value_is_rfc1123_style() {
        let at = Utc.with_ymd_and_hms(2024, 3, 5, 7, 8, 9).unwrap();
        assert_eq!(SyncCursor::at(at).header_value(), "Tue, 05 Mar 2024 07:08:09 +0000");
    }

    #[test]
    fn bootstrap_reaches_back_four_years() {
        let now = Utc.with_ymd_and_hms(2024, 3, 5, 0, 0, 0).unwrap();
        let cursor = SyncCursor::bootstrap(now, 1461);
        assert_eq!(cursor.since(), Utc.with_ymd_and_hms(2020, 3, 5, 0, 0, 0).unwrap());
    }

    #[test]
    fn advance_is_monotonic() {
        let later = Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap();
        let earlier = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let mut cursor = SyncCursor::at(later);
        cursor.advance(earlier);
        assert_eq!(cursor.since(), later);
    }
}

//! Common types and utilities shared across models.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// Format a timestamp for storage.
///
/// Fixed-width microsecond RFC 3339 in UTC, so lexical order in SQL matches
/// chronological order.
pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Current time formatted for storage
pub fn now_timestamp() -> String {
    format_timestamp(Utc::now())
}

/// Parse a stored or client-supplied RFC 3339 timestamp into UTC
pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Deserialize a field that distinguishes "absent" from "explicitly null".
///
/// Use with `#[serde(default, deserialize_with = "nullable")]` on an
/// `Option<Option<T>>`: absent is `None`, `null` is `Some(None)`.
pub fn nullable<'de, T, D>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

/// Page request as sent by clients (`?page=2&page_size=20`)
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct PageParams {
    pub page: Option<i64>,
    pub page_size: Option<i64>,
}

/// A resolved, clamped page window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageWindow {
    pub page: i64,
    pub page_size: i64,
}

impl PageWindow {
    /// Resolve client parameters against the configured defaults.
    /// Page numbers are 1-based; anything lower is treated as the first page.
    pub fn resolve(params: PageParams, default_size: i64, max_size: i64) -> Self {
        let page = params.page.unwrap_or(1).max(1);
        let page_size = params.page_size.unwrap_or(default_size).clamp(1, max_size.max(1));
        Self { page, page_size }
    }

    pub fn offset(&self) -> i64 {
        (self.page - 1).saturating_mul(self.page_size)
    }

    pub fn total_pages(&self, count: i64) -> i64 {
        if count == 0 {
            0
        } else {
            (count + self.page_size - 1) / self.page_size
        }
    }
}

/// Paginated list envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page<T> {
    pub count: i64,
    pub current_page: i64,
    pub total_pages: i64,
    pub page_size: i64,
    pub results: Vec<T>,
}

impl<T> Page<T> {
    pub fn new(window: PageWindow, count: i64, results: Vec<T>) -> Self {
        Self {
            count,
            current_page: window.page,
            total_pages: window.total_pages(count),
            page_size: window.page_size,
            results,
        }
    }

    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            count: self.count,
            current_page: self.current_page,
            total_pages: self.total_pages,
            page_size: self.page_size,
            results: self.results.into_iter().map(f).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_timestamps_sort_lexically() {
        let a = format_timestamp(Utc.with_ymd_and_hms(2026, 1, 1, 9, 0, 0).unwrap());
        let b = format_timestamp(Utc.with_ymd_and_hms(2026, 1, 1, 10, 0, 0).unwrap());
        assert_eq!(a, "2026-01-01T09:00:00.000000Z");
        assert!(a < b);
    }

    #[test]
    fn test_parse_timestamp_normalizes_offset() {
        let parsed = parse_timestamp("2026-03-01T12:00:00+02:00").unwrap();
        assert_eq!(format_timestamp(parsed), "2026-03-01T10:00:00.000000Z");
        assert!(parse_timestamp("next tuesday").is_none());
    }

    #[test]
    fn test_page_window_defaults_and_clamping() {
        let w = PageWindow::resolve(PageParams::default(), 10, 50);
        assert_eq!(w, PageWindow { page: 1, page_size: 10 });

        let w = PageWindow::resolve(PageParams { page: Some(0), page_size: Some(500) }, 10, 50);
        assert_eq!(w, PageWindow { page: 1, page_size: 50 });

        let w = PageWindow::resolve(PageParams { page: Some(3), page_size: Some(4) }, 10, 50);
        assert_eq!(w.offset(), 8);
    }

    #[derive(Deserialize)]
    struct Patch {
        #[serde(default, deserialize_with = "nullable")]
        assignee: Option<Option<i64>>,
    }

    #[test]
    fn test_nullable_distinguishes_absent_and_null() {
        let absent: Patch = serde_json::from_str("{}").unwrap();
        let null: Patch = serde_json::from_str(r#"{"assignee": null}"#).unwrap();
        let set: Patch = serde_json::from_str(r#"{"assignee": 7}"#).unwrap();
        assert_eq!(absent.assignee, None);
        assert_eq!(null.assignee, Some(None));
        assert_eq!(set.assignee, Some(Some(7)));
    }

    #[test]
    fn test_total_pages() {
        let w = PageWindow { page: 1, page_size: 10 };
        assert_eq!(w.total_pages(0), 0);
        assert_eq!(w.total_pages(10), 1);
        assert_eq!(w.total_pages(11), 2);
    }
}

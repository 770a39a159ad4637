//! Last-modified date filtering for sitemap entries.

/// Exclusive date bounds over ISO-8601 date strings.
///
/// Dates are compared as strings, which orders ISO-8601 values chronologically
/// as long as both sides use the same precision prefix (`2024-01-31` vs
/// `2024-01-31T10:00:00+00:00` compares by the shared date first).
///
/// # Example
///
/// ```rust
/// use stackpull_core::DateFilter;
///
/// let filter = DateFilter::new(Some("2024-01-01"), Some("2023-06-01")).unwrap();
/// assert!(filter.admits("2023-09-15"));
/// assert!(!filter.admits("2024-01-01"));
/// assert!(DateFilter::new(None, None).is_none());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DateFilter {
    before: Option<String>,
    after: Option<String>,
}

impl DateFilter {
    /// Builds a filter from optional bounds.
    ///
    /// Returns `None` when neither bound is given; callers treat that as
    /// "admit everything". Empty strings count as absent.
    pub fn new(before: Option<&str>, after: Option<&str>) -> Option<Self> {
        let before = before.map(str::trim).filter(|s| !s.is_empty()).map(str::to_string);
        let after = after.map(str::trim).filter(|s| !s.is_empty()).map(str::to_string);

        if before.is_none() && after.is_none() {
            return None;
        }

        Some(Self { before, after })
    }

    pub fn before(&self) -> Option<&str> {
        self.before.as_deref()
    }

    pub fn after(&self) -> Option<&str> {
        self.after.as_deref()
    }

    /// Returns true if `date` lies strictly between the bounds.
    pub fn admits(&self, date: &str) -> bool {
        let date = date.trim();
        let after_ok = self.after.as_deref().is_none_or(|after| date > after);
        let before_ok = self.before.as_deref().is_none_or(|before| date < before);
        after_ok && before_ok
    }
}

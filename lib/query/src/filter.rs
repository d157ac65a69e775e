//! Date presets and pagination.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::QueryError;

/// A lower bound on `created_at`, or none for all time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DateFilter {
    since: Option<DateTime<Utc>>,
}

impl DateFilter {
    /// No lower bound.
    #[must_use]
    pub fn all_time() -> Self {
        Self::default()
    }

    /// Only events created at or after `since`.
    #[must_use]
    pub fn since(since: DateTime<Utc>) -> Self {
        Self { since: Some(since) }
    }

    /// Returns the lower bound.
    #[must_use]
    pub fn floor(&self) -> Option<DateTime<Utc>> {
        self.since
    }
}

/// Date presets for the turn listing and daily chart.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ListingPeriod {
    #[serde(rename = "last_24_hours")]
    Last24Hours,
    #[serde(rename = "last_7_days")]
    Last7Days,
    #[serde(rename = "last_30_days")]
    Last30Days,
    #[default]
    AllTime,
}

impl ListingPeriod {
    /// All presets in display order.
    pub const ALL: [Self; 4] = [
        Self::Last24Hours,
        Self::Last7Days,
        Self::Last30Days,
        Self::AllTime,
    ];

    /// Returns the display label.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Last24Hours => "Last 24 hours",
            Self::Last7Days => "Last 7 days",
            Self::Last30Days => "Last 30 days",
            Self::AllTime => "All time",
        }
    }

    fn lookback(&self) -> Option<Duration> {
        match self {
            Self::Last24Hours => Some(Duration::days(1)),
            Self::Last7Days => Some(Duration::days(7)),
            Self::Last30Days => Some(Duration::days(30)),
            Self::AllTime => None,
        }
    }

    /// Returns the filter this preset selects at `now`.
    #[must_use]
    pub fn filter(&self, now: DateTime<Utc>) -> DateFilter {
        self.lookback()
            .map_or_else(DateFilter::all_time, |lookback| DateFilter::since(now - lookback))
    }
}

/// Date presets for the weekly trend charts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrendPeriod {
    LastWeek,
    #[serde(rename = "last_6_months")]
    Last6Months,
    LastYear,
    #[default]
    AllTime,
}

impl TrendPeriod {
    /// All presets in display order.
    pub const ALL: [Self; 4] = [
        Self::LastWeek,
        Self::Last6Months,
        Self::LastYear,
        Self::AllTime,
    ];

    /// Returns the display label.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::LastWeek => "Last week",
            Self::Last6Months => "Last 6 months",
            Self::LastYear => "Last year",
            Self::AllTime => "All time",
        }
    }

    fn lookback(&self) -> Option<Duration> {
        match self {
            Self::LastWeek => Some(Duration::days(7)),
            Self::Last6Months => Some(Duration::days(180)),
            Self::LastYear => Some(Duration::days(365)),
            Self::AllTime => None,
        }
    }

    /// Returns the filter this preset selects at `now`.
    #[must_use]
    pub fn filter(&self, now: DateTime<Utc>) -> DateFilter {
        self.lookback()
            .map_or_else(DateFilter::all_time, |lookback| DateFilter::since(now - lookback))
    }
}

/// Page sizes offered by the turn listing.
pub const PAGE_SIZES: [u64; 4] = [10, 25, 50, 100];

/// Page size used when none is requested.
pub const DEFAULT_PAGE_SIZE: u64 = 25;

/// A requested page, before it is clamped against the row count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRequest {
    number: u64,
    size: u64,
}

impl PageRequest {
    /// Creates a request for the 1-based page `number`.
    ///
    /// # Errors
    ///
    /// Returns [`QueryError::InvalidInput`] if `size` is not one of
    /// [`PAGE_SIZES`].
    pub fn new(number: u64, size: u64) -> Result<Self, QueryError> {
        if !PAGE_SIZES.contains(&size) {
            return Err(QueryError::InvalidInput {
                details: format!("page size {size} is not one of {PAGE_SIZES:?}"),
            });
        }
        Ok(Self { number, size })
    }

    /// Returns the requested page number.
    #[must_use]
    pub fn number(&self) -> u64 {
        self.number
    }

    /// Returns the page size.
    #[must_use]
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Resolves the request against `total` rows.
    ///
    /// The page number is clamped into `1..=max_pages`, where `max_pages`
    /// is at least 1.
    #[must_use]
    pub fn resolve(&self, total: u64) -> Page {
        let max_pages = total.div_ceil(self.size).max(1);
        let number = self.number.clamp(1, max_pages);
        Page {
            number,
            size: self.size,
            max_pages,
        }
    }
}

impl Default for PageRequest {
    fn default() -> Self {
        Self {
            number: 1,
            size: DEFAULT_PAGE_SIZE,
        }
    }
}

/// A page resolved against a row count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Page {
    number: u64,
    size: u64,
    max_pages: u64,
}

impl Page {
    /// Returns the 1-based page number.
    #[must_use]
    pub fn number(&self) -> u64 {
        self.number
    }

    /// Returns the page size, used as `LIMIT`.
    #[must_use]
    pub fn limit(&self) -> u64 {
        self.size
    }

    /// Returns the number of rows skipped, used as `OFFSET`.
    #[must_use]
    pub fn offset(&self) -> u64 {
        (self.number - 1) * self.size
    }

    /// Returns the number of pages.
    #[must_use]
    pub fn max_pages(&self) -> u64 {
        self.max_pages
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 15, 12, 0, 0).single().expect("valid time")
    }

    #[test]
    fn listing_presets() {
        assert_eq!(ListingPeriod::default(), ListingPeriod::AllTime);
        assert_eq!(ListingPeriod::AllTime.filter(now()).floor(), None);
        assert_eq!(
            ListingPeriod::Last24Hours.filter(now()).floor(),
            Some(now() - Duration::days(1))
        );
        assert_eq!(
            ListingPeriod::Last30Days.filter(now()).floor(),
            Some(now() - Duration::days(30))
        );
    }

    #[test]
    fn trend_presets() {
        assert_eq!(
            TrendPeriod::Last6Months.filter(now()).floor(),
            Some(now() - Duration::days(180))
        );
        assert_eq!(
            TrendPeriod::LastYear.filter(now()).floor(),
            Some(now() - Duration::days(365))
        );
        assert_eq!(TrendPeriod::AllTime.filter(now()), DateFilter::all_time());
    }

    #[test]
    fn presets_deserialize_from_query_values() {
        let period: ListingPeriod = serde_json::from_str("\"last_24_hours\"").expect("decode");
        assert_eq!(period, ListingPeriod::Last24Hours);
        let period: TrendPeriod = serde_json::from_str("\"last_6_months\"").expect("decode");
        assert_eq!(period, TrendPeriod::Last6Months);
        let period: TrendPeriod = serde_json::from_str("\"last_week\"").expect("decode");
        assert_eq!(period, TrendPeriod::LastWeek);
    }

    #[test]
    fn page_size_must_be_offered() {
        assert!(PageRequest::new(1, 25).is_ok());
        let err = PageRequest::new(1, 30).unwrap_err();
        assert!(err.to_string().contains("page size 30"));
    }

    #[test]
    fn page_number_is_clamped() {
        let request = PageRequest::new(9, 25).expect("request");
        let page = request.resolve(60);
        assert_eq!(page.max_pages(), 3);
        assert_eq!(page.number(), 3);
        assert_eq!(page.offset(), 50);
        assert_eq!(page.limit(), 25);

        let page = PageRequest::new(0, 10).expect("request").resolve(95);
        assert_eq!(page.number(), 1);
        assert_eq!(page.offset(), 0);
        assert_eq!(page.max_pages(), 10);
    }

    #[test]
    fn empty_result_has_one_page() {
        let page = PageRequest::default().resolve(0);
        assert_eq!(page.max_pages(), 1);
        assert_eq!(page.number(), 1);
        assert_eq!(page.limit(), DEFAULT_PAGE_SIZE);
    }
}

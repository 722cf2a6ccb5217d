//! Core data types shared by the ingestion and query paths.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// One normalized report, keyed by `report_id`.
///
/// `country_lat`/`country_long` are always present: the normalizer rejects
/// records without them, and the store derives its point column from them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub report_id: i64,
    pub primary_country: String,
    pub primary_country_iso3: String,
    pub primary_country_shortname: Option<String>,
    pub country_lat: f64,
    pub country_long: f64,
    pub date_report_created: DateTime<Utc>,
    pub headline_title: Option<String>,
    pub headline_summary: Option<String>,
    pub language: Option<String>,
    pub source_name: Option<String>,
    pub source_homepage: Option<String>,
    pub report_url_alias: Option<String>,
    pub disaster_id: Option<i64>,
    pub disaster_name: Option<String>,
    pub disaster_glide: Option<String>,
    pub disaster_type: Option<String>,
    pub disaster_status: Option<String>,
}

impl Report {
    /// EWKT for the report's location in SRID 4326 (`POINT(long lat)`).
    pub fn geom_ewkt(&self) -> String {
        format!(
            "SRID=4326;POINT({} {})",
            self.country_long, self.country_lat
        )
    }
}

/// Half-open `[start, end)` range bounding one ingestion pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// Longest lookback accepted from config, the CLI or HTTP.
pub const MAX_LOOKBACK_DAYS: i64 = 3650;

/// A lookback of `days`, rejected unless it is in `1..=MAX_LOOKBACK_DAYS`.
pub fn lookback_days(days: i64) -> Result<Duration, String> {
    if !(1..=MAX_LOOKBACK_DAYS).contains(&days) {
        return Err(format!(
            "days must be between 1 and {}, got {}",
            MAX_LOOKBACK_DAYS, days
        ));
    }
    Duration::try_days(days).ok_or_else(|| format!("days out of range: {}", days))
}

/// A lookback of `hours`, rejected unless it fits within `MAX_LOOKBACK_DAYS`.
pub fn lookback_hours(hours: i64) -> Result<Duration, String> {
    let max = MAX_LOOKBACK_DAYS * 24;
    if !(1..=max).contains(&hours) {
        return Err(format!("hours must be between 1 and {}, got {}", max, hours));
    }
    Duration::try_hours(hours).ok_or_else(|| format!("hours out of range: {}", hours))
}

impl TimeWindow {
    /// `[end - lookback, end)`. A lookback reaching past the earliest
    /// representable instant starts the window there instead.
    pub fn ending_at(end: DateTime<Utc>, lookback: Duration) -> Self {
        Self {
            start: end
                .checked_sub_signed(lookback)
                .unwrap_or(DateTime::<Utc>::MIN_UTC),
            end,
        }
    }

    /// `[now - lookback, now)`, with `now` truncated to whole seconds.
    pub fn ending_now(lookback: Duration) -> Self {
        let now = Utc::now();
        let now = DateTime::from_timestamp(now.timestamp(), 0).unwrap_or(now);
        Self::ending_at(now, lookback)
    }
}

/// Parsed model output: a read query plus a row-highlight condition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranslatedQuery {
    pub query: String,
    pub highlight_condition: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_window_bounds() {
        let end = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let window = TimeWindow::ending_at(end, Duration::hours(4));
        assert_eq!(window.end, end);
        assert_eq!(
            window.start,
            Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_window_now_has_no_subseconds() {
        let window = TimeWindow::ending_now(Duration::hours(1));
        assert_eq!(window.end.timestamp_subsec_nanos(), 0);
    }

    #[test]
    fn test_huge_lookback_saturates_instead_of_overflowing() {
        let window = TimeWindow::ending_now(Duration::days(100_000_000));
        assert_eq!(window.start, DateTime::<Utc>::MIN_UTC);
        assert!(window.start < window.end);
    }

    #[test]
    fn test_lookback_bounds() {
        assert_eq!(lookback_days(5).unwrap(), Duration::days(5));
        assert_eq!(lookback_hours(6).unwrap(), Duration::hours(6));
        assert!(lookback_days(0).is_err());
        assert!(lookback_days(-3).is_err());
        assert!(lookback_days(100_000_000).is_err());
        assert!(lookback_days(i64::MAX).is_err());
        assert!(lookback_hours(MAX_LOOKBACK_DAYS * 24 + 1).is_err());
        assert!(lookback_days(MAX_LOOKBACK_DAYS).is_ok());
    }
}

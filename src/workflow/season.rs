//! Seasonal date windows repeated over years.

use std::fmt;

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use tracing::warn;

use super::WorkflowError;

/// A (month, day) pair without a year.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MonthDay {
    /// Month, 1..=12.
    pub month: u32,
    /// Day of month, 1..=31.
    pub day: u32,
}

impl MonthDay {
    /// Creates a pair without validating it.
    #[must_use]
    pub const fn new(month: u32, day: u32) -> Self {
        Self { month, day }
    }

    /// Month and day of a concrete date.
    #[must_use]
    pub fn of(date: NaiveDate) -> Self {
        Self::new(date.month(), date.day())
    }
}

impl fmt::Display for MonthDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}-{:02}", self.month, self.day)
    }
}

impl std::str::FromStr for MonthDay {
    type Err = WorkflowError;

    /// Parses `MM-DD`.
    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let invalid = || WorkflowError::InvalidDate(format!("expected MM-DD, got '{raw}'"));
        let (month, day) = raw.trim().split_once('-').ok_or_else(invalid)?;
        let month = month.parse().map_err(|_| invalid())?;
        let day = day.parse().map_err(|_| invalid())?;
        Ok(Self::new(month, day))
    }
}

/// Last day of `month` in `year`, or `None` for an invalid month.
#[must_use]
pub fn last_day_of_month(year: i32, month: u32) -> Option<u32> {
    let first = NaiveDate::from_ymd_opt(year, month, 1)?;
    let next = if month == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1)?
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1)?
    };
    u32::try_from(next.signed_duration_since(first).num_days()).ok()
}

/// Builds a date, clamping a too-large day to the end of its month.
///
/// # Errors
///
/// Returns [`WorkflowError::InvalidDate`] for a month outside 1..=12 or a
/// zero day.
pub fn safe_date_with_adjust(year: i32, month_day: MonthDay) -> Result<NaiveDate, WorkflowError> {
    let MonthDay { month, day } = month_day;
    if !(1..=12).contains(&month) {
        return Err(WorkflowError::InvalidDate(format!(
            "invalid month {month}; must be between 1 and 12"
        )));
    }
    if day == 0 {
        return Err(WorkflowError::InvalidDate(format!(
            "invalid day {day}; not a calendar day"
        )));
    }

    let last = last_day_of_month(year, month)
        .ok_or_else(|| WorkflowError::InvalidDate(format!("year {year} out of range")))?;
    let clamped = day.min(last);
    if clamped != day {
        warn!(
            "adjusting invalid date {year}-{month:02}-{day:02} -> {year}-{month:02}-{clamped:02}"
        );
    }
    NaiveDate::from_ymd_opt(year, month, clamped)
        .ok_or_else(|| WorkflowError::InvalidDate(format!("{year}-{month:02}-{clamped:02}")))
}

/// One concrete inclusive date range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DateWindow {
    /// First day.
    pub start: NaiveDate,
    /// Last day.
    pub end: NaiveDate,
}

impl DateWindow {
    /// Start of the first day, e.g. `2021-06-01T00:00:00.000Z`.
    #[must_use]
    pub fn start_iso(&self) -> String {
        format!("{}T00:00:00.000Z", self.start.format("%Y-%m-%d"))
    }

    /// End of the last day, e.g. `2021-08-31T23:59:59.999Z`.
    #[must_use]
    pub fn end_iso(&self) -> String {
        format!("{}T23:59:59.999Z", self.end.format("%Y-%m-%d"))
    }
}

/// One window per year from `start` to `end` of that same year.
///
/// # Errors
///
/// Returns [`WorkflowError::NoYears`] for an empty year list,
/// [`WorkflowError::InvalidDate`] for invalid month/day values, and
/// [`WorkflowError::InvertedWindow`] when a year's end precedes its start.
pub fn seasonal_windows(
    years: &[i32],
    start: MonthDay,
    end: MonthDay,
) -> Result<Vec<DateWindow>, WorkflowError> {
    if years.is_empty() {
        return Err(WorkflowError::NoYears);
    }
    years
        .iter()
        .map(|&year| {
            let window = DateWindow {
                start: safe_date_with_adjust(year, start)?,
                end: safe_date_with_adjust(year, end)?,
            };
            if window.end < window.start {
                return Err(WorkflowError::InvertedWindow {
                    year,
                    start: window.start,
                    end: window.end,
                });
            }
            Ok(window)
        })
        .collect()
}

/// Year-independent (month, day) range; wraps across New Year when
/// `start > end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeasonFilter {
    /// First included day.
    pub start: MonthDay,
    /// Last included day.
    pub end: MonthDay,
}

impl SeasonFilter {
    /// Creates a filter from inclusive bounds.
    #[must_use]
    pub const fn new(start: MonthDay, end: MonthDay) -> Self {
        Self { start, end }
    }

    /// True when `date` falls inside the season.
    #[must_use]
    pub fn contains(&self, date: NaiveDate) -> bool {
        let day = MonthDay::of(date);
        if self.start <= self.end {
            self.start <= day && day <= self.end
        } else {
            day >= self.start || day <= self.end
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_last_day_of_month_handles_leap_years() {
        assert_eq!(last_day_of_month(2024, 2), Some(29));
        assert_eq!(last_day_of_month(2023, 2), Some(28));
        assert_eq!(last_day_of_month(2023, 12), Some(31));
        assert_eq!(last_day_of_month(2023, 13), None);
    }

    #[test]
    fn test_day_past_month_end_is_clamped() {
        let date = safe_date_with_adjust(2021, MonthDay::new(6, 31)).unwrap();
        assert_eq!(date, ymd(2021, 6, 30));
        let date = safe_date_with_adjust(2023, MonthDay::new(2, 30)).unwrap();
        assert_eq!(date, ymd(2023, 2, 28));
    }

    #[test]
    fn test_invalid_month_and_zero_day_are_errors() {
        assert!(matches!(
            safe_date_with_adjust(2021, MonthDay::new(13, 1)),
            Err(WorkflowError::InvalidDate(_))
        ));
        assert!(matches!(
            safe_date_with_adjust(2021, MonthDay::new(5, 0)),
            Err(WorkflowError::InvalidDate(_))
        ));
    }

    #[test]
    fn test_seasonal_windows_per_year() {
        let windows =
            seasonal_windows(&[2021, 2022], MonthDay::new(6, 1), MonthDay::new(8, 31)).unwrap();
        assert_eq!(windows.len(), 2);
        assert_eq!(windows[0].start_iso(), "2021-06-01T00:00:00.000Z");
        assert_eq!(windows[1].end_iso(), "2022-08-31T23:59:59.999Z");
    }

    #[test]
    fn test_seasonal_windows_rejects_inverted_and_empty() {
        assert!(matches!(
            seasonal_windows(&[2021], MonthDay::new(11, 1), MonthDay::new(2, 28)),
            Err(WorkflowError::InvertedWindow { year: 2021, .. })
        ));
        assert!(matches!(
            seasonal_windows(&[], MonthDay::new(1, 1), MonthDay::new(2, 1)),
            Err(WorkflowError::NoYears)
        ));
    }

    #[test]
    fn test_season_filter_wraps_new_year() {
        let filter = SeasonFilter::new(MonthDay::new(11, 1), MonthDay::new(2, 28));
        assert!(filter.contains(ymd(2021, 12, 15)));
        assert!(filter.contains(ymd(2022, 1, 10)));
        assert!(!filter.contains(ymd(2022, 7, 1)));
    }

    #[test]
    fn test_season_filter_plain_range_is_inclusive() {
        let filter = SeasonFilter::new(MonthDay::new(6, 1), MonthDay::new(8, 31));
        assert!(filter.contains(ymd(2021, 6, 1)));
        assert!(filter.contains(ymd(2021, 8, 31)));
        assert!(!filter.contains(ymd(2021, 9, 1)));
    }

    #[test]
    fn test_month_day_parse_and_display() {
        let parsed: MonthDay = "06-01".parse().unwrap();
        assert_eq!(parsed, MonthDay::new(6, 1));
        assert_eq!(parsed.to_string(), "06-01");
        assert!("june".parse::<MonthDay>().is_err());
    }
}

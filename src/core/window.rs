use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Slack applied around a window when choosing which log objects to fetch.
///
/// CloudTrail delivers a batch a few minutes after the events it contains and
/// names it after the delivery time, so objects just outside the window can
/// still hold in-window records.
pub const OBJECT_TIME_PADDING_SECONDS: i64 = 5 * 60;

/// Converts a second count to a chrono duration, saturating at chrono's
/// limit of `i64::MAX` milliseconds.
pub fn seconds_to_duration(seconds: u64) -> Duration {
    let seconds = seconds.min((i64::MAX / 1000) as u64);
    Duration::seconds(seconds as i64)
}

/// Half-open time range `[start, start + duration)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeWindow {
    pub start: DateTime<Utc>,
    pub duration_seconds: u64,
}

impl TimeWindow {
    pub fn new(start: DateTime<Utc>, duration_seconds: u64) -> Self {
        Self {
            start,
            duration_seconds,
        }
    }

    pub fn duration(&self) -> Duration {
        seconds_to_duration(self.duration_seconds)
    }

    /// Exclusive upper bound of the window.
    pub fn end(&self) -> DateTime<Utc> {
        self.start
            .checked_add_signed(self.duration())
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    pub fn contains(&self, time: DateTime<Utc>) -> bool {
        time >= self.start && time < self.end()
    }

    /// The window widened by [`OBJECT_TIME_PADDING_SECONDS`] on both sides.
    pub fn padded(&self) -> PaddedWindow {
        let padding = Duration::seconds(OBJECT_TIME_PADDING_SECONDS);
        PaddedWindow {
            start: self
                .start
                .checked_sub_signed(padding)
                .unwrap_or(DateTime::<Utc>::MIN_UTC),
            end: self
                .end()
                .checked_add_signed(padding)
                .unwrap_or(DateTime::<Utc>::MAX_UTC),
        }
    }
}

/// A window widened for object selection. `end` is exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PaddedWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl PaddedWindow {
    pub fn contains(&self, time: DateTime<Utc>) -> bool {
        time >= self.start && time < self.end
    }

    /// Every UTC calendar day touched by the padded window, first to last,
    /// inclusive of the day the exclusive end falls on. Days are produced as
    /// the iterator is advanced.
    pub fn days(&self) -> Days {
        Days {
            next: Some(self.start.date_naive()),
            last: self.end.date_naive(),
        }
    }
}

/// Iterator over the days of a [`PaddedWindow`].
#[derive(Debug, Clone)]
pub struct Days {
    next: Option<NaiveDate>,
    last: NaiveDate,
}

impl Iterator for Days {
    type Item = NaiveDate;

    fn next(&mut self) -> Option<NaiveDate> {
        let day = self.next.filter(|day| *day <= self.last)?;
        self.next = day.succ_opt();
        Some(day)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn contains_is_half_open() {
        let start = Utc.with_ymd_and_hms(2025, 3, 6, 2, 25, 0).unwrap();
        let window = TimeWindow::new(start, 3600);

        assert!(window.contains(start));
        assert!(window.contains(start + Duration::seconds(3599)));
        assert!(!window.contains(start + Duration::seconds(3600)));
        assert!(!window.contains(start - Duration::seconds(1)));
    }

    #[test]
    fn padded_days_cross_midnight() {
        let start = Utc.with_ymd_and_hms(2025, 3, 6, 0, 2, 0).unwrap();
        let window = TimeWindow::new(start, 23 * 3600 + 55 * 60);

        let days: Vec<NaiveDate> = window.padded().days().collect();
        assert_eq!(
            days,
            vec![
                NaiveDate::from_ymd_opt(2025, 3, 5).unwrap(),
                NaiveDate::from_ymd_opt(2025, 3, 6).unwrap(),
                NaiveDate::from_ymd_opt(2025, 3, 7).unwrap(),
            ]
        );
    }

    #[test]
    fn padded_days_single_day() {
        let start = Utc.with_ymd_and_hms(2025, 3, 6, 2, 25, 0).unwrap();
        let days: Vec<NaiveDate> = TimeWindow::new(start, 3600).padded().days().collect();
        assert_eq!(days, vec![NaiveDate::from_ymd_opt(2025, 3, 6).unwrap()]);
    }

    #[test]
    fn longest_window_yields_days_on_demand() {
        let start = Utc.with_ymd_and_hms(2025, 3, 6, 2, 25, 0).unwrap();
        let mut days = TimeWindow::new(start, u64::MAX).padded().days();

        assert_eq!(days.next(), NaiveDate::from_ymd_opt(2025, 3, 6));
        assert_eq!(days.next(), NaiveDate::from_ymd_opt(2025, 3, 7));
    }
}

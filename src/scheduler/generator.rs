//! Calendar-correct occurrence generation
//!
//! Computes the concrete future execution timestamps for a campaign from
//! its start time, repeat frequency, and planning horizon. Monthly stepping
//! is calendar-accurate: the day-of-month is preserved and clamped to the
//! target month's length, so a Jan 31 start yields Feb 28 (or 29), never
//! Mar 3. The horizon bound itself is the 30-days-per-month approximation.

use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc};

use super::error::{SchedulerError, SchedulerResult};
use crate::models::Frequency;

/// Generates occurrence timestamps for campaign schedules
///
/// A generator call is a pure function of its inputs; regenerating after a
/// parameter change is the reconciliation layer's job, not the generator's.
#[derive(Debug, Clone, Default)]
pub struct ScheduleGenerator;

impl ScheduleGenerator {
    /// Create a new schedule generator
    pub fn new() -> Self {
        Self
    }

    /// Generate the full occurrence sequence for a schedule window.
    ///
    /// The first occurrence is `start`; generation stops once the next
    /// step would pass `start + horizon_months * 30 days`. A `None`
    /// frequency produces exactly one occurrence at `start`.
    pub fn generate(
        &self,
        start: DateTime<Utc>,
        frequency: Frequency,
        horizon_months: u32,
    ) -> SchedulerResult<Vec<DateTime<Utc>>> {
        if horizon_months == 0 {
            return Err(SchedulerError::invalid_horizon(horizon_months));
        }

        if frequency == Frequency::None {
            return Ok(vec![start]);
        }

        let horizon_end = start + Duration::days(i64::from(horizon_months) * 30);

        let mut occurrences = Vec::new();
        let mut current = start;
        while current <= horizon_end {
            occurrences.push(current);
            current = step(current, frequency);
        }

        Ok(occurrences)
    }

    /// Generate only the occurrences at or after `now`.
    ///
    /// Errors when the whole horizon lies in the past, which is the
    /// unrecoverable form of a stale start time.
    pub fn upcoming(
        &self,
        start: DateTime<Utc>,
        frequency: Frequency,
        horizon_months: u32,
        now: DateTime<Utc>,
    ) -> SchedulerResult<Vec<DateTime<Utc>>> {
        let future: Vec<_> = self
            .generate(start, frequency, horizon_months)?
            .into_iter()
            .filter(|ts| *ts >= now)
            .collect();

        if future.is_empty() {
            return Err(SchedulerError::horizon_expired(
                start.to_rfc3339(),
                horizon_months,
            ));
        }

        Ok(future)
    }
}

/// Advance one occurrence step for the given frequency.
///
/// Monthly steps proceed from the (possibly clamped) current date, so
/// Jan 31 → Feb 28 → Mar 28.
fn step(current: DateTime<Utc>, frequency: Frequency) -> DateTime<Utc> {
    match frequency {
        Frequency::Daily => current + Duration::hours(24),
        Frequency::Weekly => current + Duration::days(7),
        Frequency::Monthly => add_calendar_month(current),
        // Unreachable: generate() returns before stepping for one-shots.
        Frequency::None => current + Duration::days(1),
    }
}

/// Add one calendar month, clamping the day to the target month's length
fn add_calendar_month(dt: DateTime<Utc>) -> DateTime<Utc> {
    let (next_year, next_month) = if dt.month() == 12 {
        (dt.year() + 1, 1)
    } else {
        (dt.year(), dt.month() + 1)
    };

    let clamped_day = dt.day().min(days_in_month(next_year, next_month));

    // Valid by construction: clamped_day never exceeds the month length.
    let date = NaiveDate::from_ymd_opt(next_year, next_month, clamped_day).unwrap();
    DateTime::from_naive_utc_and_offset(date.and_time(dt.time()), Utc)
}

/// Number of days in a month (leap-aware)
fn days_in_month(year: i32, month: u32) -> u32 {
    let (next_year, next_month) = if month == 12 {
        (year + 1, 1)
    } else {
        (year, month + 1)
    };

    NaiveDate::from_ymd_opt(next_year, next_month, 1)
        .unwrap()
        .pred_opt()
        .unwrap()
        .day()
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn utc(y: i32, m: u32, d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, 0, 0).unwrap()
    }

    #[test]
    fn test_daily_sequence() {
        let gen = ScheduleGenerator::new();
        let start = utc(2025, 3, 1, 9);
        let seq = gen.generate(start, Frequency::Daily, 1).unwrap();

        // 30-day horizon, inclusive of both endpoints
        assert_eq!(seq.len(), 31);
        assert_eq!(seq[0], start);
        assert_eq!(seq[1], start + Duration::hours(24));
    }

    #[test]
    fn test_weekly_one_month_horizon_yields_five() {
        let gen = ScheduleGenerator::new();
        let start = utc(2025, 6, 2, 8);
        let seq = gen.generate(start, Frequency::Weekly, 1).unwrap();

        assert_eq!(seq.len(), 5);
        for (i, ts) in seq.iter().enumerate() {
            assert_eq!(*ts, start + Duration::days(7 * i as i64));
        }
    }

    #[test]
    fn test_monthly_jan_31_clamps_to_feb_end() {
        let gen = ScheduleGenerator::new();

        // Non-leap year
        let seq = gen
            .generate(utc(2025, 1, 31, 12), Frequency::Monthly, 3)
            .unwrap();
        assert_eq!(seq[1], utc(2025, 2, 28, 12));
        // Subsequent steps proceed from the clamped date
        assert_eq!(seq[2], utc(2025, 3, 28, 12));

        // Leap year
        let seq = gen
            .generate(utc(2024, 1, 31, 12), Frequency::Monthly, 2)
            .unwrap();
        assert_eq!(seq[1], utc(2024, 2, 29, 12));
    }

    #[test]
    fn test_monthly_mar_31_clamps_to_apr_30() {
        let gen = ScheduleGenerator::new();
        let seq = gen
            .generate(utc(2025, 3, 31, 0), Frequency::Monthly, 2)
            .unwrap();
        assert_eq!(seq[1], utc(2025, 4, 30, 0));
    }

    #[test]
    fn test_monthly_year_rollover() {
        let gen = ScheduleGenerator::new();
        let seq = gen
            .generate(utc(2025, 12, 15, 6), Frequency::Monthly, 2)
            .unwrap();
        assert_eq!(seq[1], utc(2026, 1, 15, 6));
    }

    #[test]
    fn test_none_frequency_is_one_shot() {
        let gen = ScheduleGenerator::new();
        let start = utc(2025, 5, 1, 10);
        let seq = gen.generate(start, Frequency::None, 6).unwrap();
        assert_eq!(seq, vec![start]);
    }

    #[test]
    fn test_zero_horizon_rejected() {
        let gen = ScheduleGenerator::new();
        let err = gen
            .generate(utc(2025, 5, 1, 10), Frequency::Daily, 0)
            .unwrap_err();
        assert!(matches!(err, SchedulerError::InvalidHorizon { .. }));
    }

    #[test]
    fn test_strictly_increasing() {
        let gen = ScheduleGenerator::new();
        for freq in [Frequency::Daily, Frequency::Weekly, Frequency::Monthly] {
            let seq = gen.generate(utc(2024, 1, 31, 23), freq, 12).unwrap();
            for pair in seq.windows(2) {
                assert!(pair[0] < pair[1], "sequence not increasing for {freq}");
            }
        }
    }

    #[test]
    fn test_upcoming_filters_past() {
        let gen = ScheduleGenerator::new();
        let start = utc(2025, 1, 6, 9);
        let now = utc(2025, 1, 20, 0);
        let seq = gen
            .upcoming(start, Frequency::Weekly, 2, now)
            .unwrap();

        assert!(seq.iter().all(|ts| *ts >= now));
        assert_eq!(seq[0], utc(2025, 1, 20, 9));
    }

    #[test]
    fn test_upcoming_expired_horizon_rejected() {
        let gen = ScheduleGenerator::new();
        let start = utc(2020, 1, 1, 0);
        let now = utc(2025, 1, 1, 0);
        let err = gen
            .upcoming(start, Frequency::Weekly, 1, now)
            .unwrap_err();
        assert!(matches!(err, SchedulerError::HorizonExpired { .. }));
    }

    #[test]
    fn test_days_in_month() {
        assert_eq!(days_in_month(2025, 2), 28);
        assert_eq!(days_in_month(2024, 2), 29);
        assert_eq!(days_in_month(2025, 4), 30);
        assert_eq!(days_in_month(2025, 12), 31);
    }
}

//! Cutoff boundary between the hot and cold tiers
//!
//! `cutoff = today's UTC midnight - offset`. Days on or after the cutoff's
//! calendar day are answered by the hot tier; earlier days by the cold tier.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CutoffOffset {
    pub days: i64,
    pub minutes: i64,
    pub seconds: i64,
}

impl Default for CutoffOffset {
    fn default() -> Self {
        Self {
            days: 1,
            minutes: 0,
            seconds: 0,
        }
    }
}

impl CutoffOffset {
    pub fn as_duration(&self) -> Duration {
        Duration::days(self.days)
            + Duration::minutes(self.minutes)
            + Duration::seconds(self.seconds)
    }
}

pub fn today_midnight_utc() -> DateTime<Utc> {
    midnight_of(Utc::now())
}

pub fn midnight_of(instant: DateTime<Utc>) -> DateTime<Utc> {
    instant
        .date_naive()
        .and_hms_opt(0, 0, 0)
        .map(|naive| naive.and_utc())
        .unwrap_or(instant)
}

pub fn resolve_cutoff(now_midnight: DateTime<Utc>, offset: &CutoffOffset) -> DateTime<Utc> {
    now_midnight - offset.as_duration()
}

pub fn cutoff_day(cutoff: DateTime<Utc>) -> NaiveDate {
    cutoff.date_naive()
}

/// Inclusive day range, empty when `from > to`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DayRange {
    pub from: NaiveDate,
    pub to: NaiveDate,
}

impl DayRange {
    pub fn new(from: NaiveDate, to: NaiveDate) -> Option<Self> {
        (from <= to).then_some(Self { from, to })
    }

    pub fn days(&self) -> impl Iterator<Item = NaiveDate> {
        let to = self.to;
        self.from.iter_days().take_while(move |day| *day <= to)
    }
}

/// How one `[from, to]` query splits across the tiers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TierSplit {
    pub cutoff_day: NaiveDate,
    pub hot: Option<DayRange>,
    pub cold: Option<DayRange>,
}

/// Split `[from, to]` at `cutoff_day`; the two halves never overlap
pub fn split_range(from: NaiveDate, to: NaiveDate, cutoff_day: NaiveDate) -> TierSplit {
    let hot = DayRange::new(from.max(cutoff_day), to);
    let cold = cutoff_day
        .pred_opt()
        .and_then(|last_cold_day| DayRange::new(from, to.min(last_cold_day)));

    TierSplit { cutoff_day, hot, cold }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn day(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn test_resolve_cutoff() {
        let midnight = Utc.with_ymd_and_hms(2024, 1, 10, 0, 0, 0).unwrap();

        let cutoff = resolve_cutoff(midnight, &CutoffOffset::default());
        assert_eq!(cutoff, Utc.with_ymd_and_hms(2024, 1, 9, 0, 0, 0).unwrap());
        assert_eq!(cutoff_day(cutoff), day("2024-01-09"));

        let odd = CutoffOffset { days: 0, minutes: 90, seconds: 30 };
        let cutoff = resolve_cutoff(midnight, &odd);
        assert_eq!(cutoff, Utc.with_ymd_and_hms(2024, 1, 9, 22, 29, 30).unwrap());
        assert_eq!(cutoff_day(cutoff), day("2024-01-09"));
    }

    #[test]
    fn test_midnight_of() {
        let instant = Utc.with_ymd_and_hms(2024, 3, 5, 17, 42, 9).unwrap();
        assert_eq!(midnight_of(instant), Utc.with_ymd_and_hms(2024, 3, 5, 0, 0, 0).unwrap());
    }

    #[test]
    fn test_split_straddling_range() {
        let split = split_range(day("2024-01-05"), day("2024-01-12"), day("2024-01-09"));

        assert_eq!(split.cold, DayRange::new(day("2024-01-05"), day("2024-01-08")));
        assert_eq!(split.hot, DayRange::new(day("2024-01-09"), day("2024-01-12")));
    }

    #[test]
    fn test_split_one_sided_ranges() {
        let cutoff = day("2024-01-09");

        let all_cold = split_range(day("2024-01-01"), day("2024-01-03"), cutoff);
        assert!(all_cold.hot.is_none());
        assert!(all_cold.cold.is_some());

        let all_hot = split_range(day("2024-01-09"), day("2024-01-09"), cutoff);
        assert_eq!(all_hot.hot.unwrap().days().collect::<Vec<_>>(), vec![day("2024-01-09")]);
        assert!(all_hot.cold.is_none());
    }

    #[test]
    fn test_every_day_in_exactly_one_tier() {
        let cutoff = day("2024-02-28");
        let split = split_range(day("2024-02-20"), day("2024-03-02"), cutoff);

        let hot: Vec<_> = split.hot.map(|r| r.days().collect()).unwrap_or_default();
        let cold: Vec<_> = split.cold.map(|r| r.days().collect()).unwrap_or_default();

        assert_eq!(hot.len() + cold.len(), 12);
        assert!(hot.iter().all(|d| *d >= cutoff));
        assert!(cold.iter().all(|d| *d < cutoff));
    }
}

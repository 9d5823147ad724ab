use std::sync::{PoisonError, RwLock};

use chrono::{DateTime, NaiveDate, Utc};

use super::domain::SchoolYear;

/// Source of "now" for the ledger; injected so tests can pin the active school year.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    fn today(&self) -> NaiveDate {
        self.now().date_naive()
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub DateTime<Utc>);

impl FixedClock {
    /// Noon UTC on `date`.
    pub fn on(date: NaiveDate) -> Self {
        let noon = date
            .and_hms_opt(12, 0, 0)
            .unwrap_or_default()
            .and_utc();
        Self(noon)
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

/// Clock that only moves when told to; lets one service live through a year rollover.
#[derive(Debug)]
pub struct ManualClock {
    now: RwLock<DateTime<Utc>>,
}

impl ManualClock {
    pub fn on(date: NaiveDate) -> Self {
        Self {
            now: RwLock::new(FixedClock::on(date).0),
        }
    }

    pub fn set(&self, date: NaiveDate) {
        let mut now = self.now.write().unwrap_or_else(PoisonError::into_inner);
        *now = FixedClock::on(date).0;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.read().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Maps dates onto school years using the configured cutover month.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchoolCalendar {
    cutover_month: u32,
}

impl SchoolCalendar {
    pub fn new(cutover_month: u32) -> Self {
        Self {
            cutover_month: cutover_month.clamp(1, 12),
        }
    }

    pub fn cutover_month(&self) -> u32 {
        self.cutover_month
    }

    pub fn year_of(&self, date: NaiveDate) -> SchoolYear {
        SchoolYear::containing(date, self.cutover_month)
    }

    pub fn active_year(&self, clock: &dyn Clock) -> SchoolYear {
        self.year_of(clock.today())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(year: i32, month: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(year, month, day).expect("valid date")
    }

    #[test]
    fn active_year_follows_the_clock() {
        let calendar = SchoolCalendar::new(9);
        assert_eq!(
            calendar.active_year(&FixedClock::on(date(2024, 6, 30))),
            SchoolYear::starting(2023)
        );
        assert_eq!(
            calendar.active_year(&FixedClock::on(date(2024, 9, 2))),
            SchoolYear::starting(2024)
        );
    }

    #[test]
    fn manual_clock_moves_the_active_year() {
        let calendar = SchoolCalendar::new(9);
        let clock = ManualClock::on(date(2024, 5, 15));
        assert_eq!(calendar.active_year(&clock), SchoolYear::starting(2023));

        clock.set(date(2024, 9, 16));
        assert_eq!(calendar.active_year(&clock), SchoolYear::starting(2024));
    }

    #[test]
    fn january_cutover_aligns_with_calendar_year() {
        let calendar = SchoolCalendar::new(1);
        assert_eq!(calendar.year_of(date(2025, 1, 1)), SchoolYear::starting(2025));
        assert_eq!(calendar.year_of(date(2025, 12, 31)), SchoolYear::starting(2025));
    }

    #[test]
    fn out_of_range_cutover_is_clamped() {
        assert_eq!(SchoolCalendar::new(0).cutover_month(), 1);
        assert_eq!(SchoolCalendar::new(14).cutover_month(), 12);
    }
}

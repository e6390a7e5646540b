use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl fmt::Display for DateRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} to {}", self.start, self.end)
    }
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        DateRange { start, end }
    }

    /// The `days` days ending on `today`, both ends inclusive.
    pub fn trailing_days(today: NaiveDate, days: u32) -> Self {
        DateRange {
            start: today - Duration::days(i64::from(days)),
            end: today,
        }
    }

    /// A symmetric window of `days` around `center`.
    pub fn around(center: NaiveDate, days: u32) -> Self {
        let delta = Duration::days(i64::from(days));
        DateRange {
            start: center - delta,
            end: center + delta,
        }
    }

    pub fn contains(self, date: NaiveDate) -> bool {
        date >= self.start && date <= self.end
    }
}

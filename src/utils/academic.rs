// src/utils/academic.rs

use chrono::{DateTime, Datelike, NaiveDate, TimeZone, Utc};

/// Academic year a date belongs to, named by its starting calendar year.
/// January to August belong to the year that started the previous September.
pub fn academic_year_for(date: NaiveDate) -> i32 {
    if date.month() <= 8 {
        date.year() - 1
    } else {
        date.year()
    }
}

/// Half-open UTC interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeWindow {
    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        self.start <= instant && instant < self.end
    }
}

/// September 1st of `year` up to (excluding) September 1st of `year + 1`.
pub fn academic_year_window(year: i32) -> Option<TimeWindow> {
    let start = Utc.with_ymd_and_hms(year, 9, 1, 0, 0, 0).single()?;
    let end = Utc.with_ymd_and_hms(year + 1, 9, 1, 0, 0, 0).single()?;
    Some(TimeWindow { start, end })
}

/// Years offered in reporting filters around the current academic year.
pub fn selectable_years(current: i32) -> Vec<i32> {
    (current - 2..=current + 1).collect()
}

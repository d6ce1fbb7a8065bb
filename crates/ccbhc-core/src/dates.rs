//! Clinical date arithmetic
//!
//! The measure rules lean on three pieces of date math that have to match the
//! reporting specification exactly: ages computed by truncated 365.25-day
//! division, calendar-month offsets with end-of-month clamping, and business
//! day counts that exclude the starting day.

use chrono::{Datelike, Days, Months, NaiveDate, NaiveDateTime, Weekday};

/// Age in whole years at `on`, by truncated division of elapsed days.
///
/// A patient whose 18th birthday falls on the encounter date computes to 18;
/// one day earlier computes to 17.
pub fn age_at(dob: NaiveDate, on: NaiveDate) -> i64 {
    let days = (on - dob).num_days();
    (days as f64 / 365.25).floor() as i64
}

/// Age as of the end of a measurement year: plain year subtraction.
pub fn year_age(dob: NaiveDate, year: i32) -> i64 {
    (year - dob.year()) as i64
}

/// `date + months`, clamped to the end of the target month
pub fn add_months(date: NaiveDate, months: u32) -> NaiveDate {
    date.checked_add_months(Months::new(months))
        .expect("date out of range")
}

/// `date - months`, clamped to the end of the target month
pub fn sub_months(date: NaiveDate, months: u32) -> NaiveDate {
    date.checked_sub_months(Months::new(months))
        .expect("date out of range")
}

/// `date + days`
pub fn add_days(date: NaiveDate, days: u64) -> NaiveDate {
    date.checked_add_days(Days::new(days)).expect("date out of range")
}

/// `date - days`
pub fn sub_days(date: NaiveDate, days: u64) -> NaiveDate {
    date.checked_sub_days(Days::new(days)).expect("date out of range")
}

/// `date + years`, clamped (Feb 29 anniversaries land on Feb 28)
pub fn add_years(date: NaiveDate, years: u32) -> NaiveDate {
    add_months(date, years * 12)
}

fn is_weekday(date: NaiveDate) -> bool {
    !matches!(date.weekday(), Weekday::Sat | Weekday::Sun)
}

/// Number of weekdays in the inclusive range `[start, end]`
fn weekdays_inclusive(start: NaiveDate, end: NaiveDate) -> i64 {
    if end < start {
        return 0;
    }
    let total = (end - start).num_days() + 1;
    let full_weeks = total / 7;
    let mut count = full_weeks * 5;
    let mut day = add_days(start, (full_weeks * 7) as u64);
    while day <= end {
        if is_weekday(day) {
            count += 1;
        }
        day = add_days(day, 1);
    }
    count
}

/// Business days elapsed from `start` to `end`, not counting `start` itself.
///
/// A Monday call with a Tuesday evaluation counts 1; a same-day evaluation
/// counts 0.
pub fn business_days_between(start: NaiveDate, end: NaiveDate) -> i64 {
    weekdays_inclusive(start, end) - 1
}

/// Reporting age bucket used by the stratified outputs
pub fn age_bucket(age: i64) -> &'static str {
    if age >= 18 {
        "18+"
    } else {
        "12-18"
    }
}

/// `timestamp + months`, clamped like [`add_months`], keeping the time of day
pub fn add_months_dt(dt: NaiveDateTime, months: u32) -> NaiveDateTime {
    NaiveDateTime::new(add_months(dt.date(), months), dt.time())
}

//! Measurement period
//!
//! Reporting runs once per period. All extraction queries and year filters
//! derive from this value instead of hard-coded dates, so a re-run against a
//! database snapshot is deterministic.

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

/// The annual reporting period a cohort record belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeasurementPeriod {
    /// First measurement year covered by the run
    pub start_year: i32,
}

impl MeasurementPeriod {
    pub fn new(start_year: i32) -> Self {
        Self { start_year }
    }

    /// January 1 of the first measurement year
    pub fn start(&self) -> NaiveDate {
        NaiveDate::from_ymd_opt(self.start_year, 1, 1).expect("valid year")
    }

    /// Midnight at the start of the period
    pub fn start_datetime(&self) -> NaiveDateTime {
        self.start().and_hms_opt(0, 0, 0).expect("valid time")
    }

    /// Year used by the prior-visit lookback (new-client checks reach into
    /// the second half of the previous year)
    pub fn prior_year(&self) -> i32 {
        self.start_year - 1
    }

    /// Whether a year falls inside the run
    pub fn contains_year(&self, year: i32) -> bool {
        year >= self.start_year
    }
}

//! Typed rows returned by the clinical data source
//!
//! Each struct mirrors one extraction shape. Rows are immutable once read;
//! all filtering and derivation happens in the measure layer.

use chrono::{NaiveDate, NaiveDateTime};

/// A clinical visit joined with the patient's date of birth
#[derive(Debug, Clone, PartialEq)]
pub struct EncounterRow {
    pub patient_id: i64,
    pub encounter_id: i64,
    pub visit: NaiveDateTime,
    /// Missing DOB fails every age filter downstream
    pub dob: Option<NaiveDate>,
}

/// A clinical visit without patient detail (evaluations, services)
#[derive(Debug, Clone, PartialEq)]
pub struct EncounterEventRow {
    pub patient_id: i64,
    pub encounter_id: i64,
    pub visit: NaiveDateTime,
}

/// A diagnosis joined with the visit it was recorded at
#[derive(Debug, Clone, PartialEq)]
pub struct DiagnosisRow {
    pub patient_id: i64,
    /// None when the diagnosis has no linked encounter; such rows can never
    /// trigger a dated exclusion
    pub recorded_at: Option<NaiveDateTime>,
}

/// One screening-tool administration
#[derive(Debug, Clone, PartialEq)]
pub struct ScreeningRow {
    pub patient_id: i64,
    pub encounter_id: i64,
    pub visit: NaiveDateTime,
    /// The EMR stores some scores as free text; unparsable values come back
    /// as None and never satisfy a score threshold
    pub score: Option<i64>,
}

/// A brief-counseling intervention recorded on a treatment plan
#[derive(Debug, Clone, PartialEq)]
pub struct CounselingRow {
    pub patient_id: i64,
    pub encounter_id: i64,
    pub visit: NaiveDateTime,
}

/// A first-contact call from program management
#[derive(Debug, Clone, PartialEq)]
pub struct CallRow {
    pub patient_id: i64,
    pub call_id: i64,
    pub start: NaiveDateTime,
    pub dob: Option<NaiveDate>,
}

/// A billable encounter used by the prior-visit lookback
#[derive(Debug, Clone, PartialEq)]
pub struct BillableVisitRow {
    pub patient_id: i64,
    pub visit: NaiveDateTime,
}

/// Ethnicity, race, and birth date attributes for one patient
#[derive(Debug, Clone, PartialEq)]
pub struct DemographicsRow {
    pub patient_id: i64,
    pub dob: Option<NaiveDate>,
    pub ethnicity: Option<String>,
    pub race: Option<String>,
}

/// An insurance plan enrollment span
#[derive(Debug, Clone, PartialEq)]
pub struct InsuranceSpan {
    pub patient_id: i64,
    pub start: NaiveDate,
    /// None means the enrollment is still active
    pub end: Option<NaiveDate>,
    /// Lowercased payer plan name
    pub plan: String,
}

impl InsuranceSpan {
    /// Whether the span covers `on`; an open span covers every later date
    pub fn active_on(&self, on: NaiveDate) -> bool {
        self.start <= on && self.end.map_or(true, |end| end >= on)
    }

    /// Whether the plan name marks a Medicaid product
    pub fn is_medicaid(&self) -> bool {
        self.plan.contains("medicaid")
    }
}

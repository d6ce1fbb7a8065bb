//! Shared fixtures for the measure tests
#![allow(dead_code)]

use ccbhc_core::{MeasurementPeriod, Table, Value};
use ccbhc_emr::{
    InsuranceSpan, MemoryCall, MemoryDiagnosis, MemoryEncounter, MemoryPatient, MemoryScreening,
    MemorySource, ScreeningTool,
};
use ccbhc_measures::PipelineContext;
use chrono::{NaiveDate, NaiveDateTime};
use std::sync::Arc;

pub fn d(y: i32, m: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, day).unwrap()
}

pub fn dt(y: i32, m: u32, day: u32) -> NaiveDateTime {
    d(y, m, day).and_hms_opt(9, 0, 0).unwrap()
}

pub fn dt_at(y: i32, m: u32, day: u32, hour: u32) -> NaiveDateTime {
    d(y, m, day).and_hms_opt(hour, 0, 0).unwrap()
}

/// Context over a fixture source with the 2024 measurement period
pub fn ctx(source: MemorySource) -> PipelineContext {
    PipelineContext::new(Arc::new(source), MeasurementPeriod::new(2024))
}

pub fn patient(patient_id: i64, dob: NaiveDate) -> MemoryPatient {
    MemoryPatient {
        patient_id,
        dob: Some(dob),
        ethnicity: Some("Not Hispanic or Latino".to_string()),
        race: Some("White".to_string()),
    }
}

pub fn encounter(patient_id: i64, encounter_id: i64, visit: NaiveDateTime) -> MemoryEncounter {
    MemoryEncounter {
        patient_id,
        encounter_id,
        visit,
        cpt: None,
        encounter_type: None,
        billable: true,
    }
}

pub fn coded_encounter(
    patient_id: i64,
    encounter_id: i64,
    visit: NaiveDateTime,
    cpt: &str,
) -> MemoryEncounter {
    MemoryEncounter {
        cpt: Some(cpt.to_string()),
        ..encounter(patient_id, encounter_id, visit)
    }
}

pub fn typed_encounter(
    patient_id: i64,
    encounter_id: i64,
    visit: NaiveDateTime,
    encounter_type: &str,
) -> MemoryEncounter {
    MemoryEncounter {
        encounter_type: Some(encounter_type.to_string()),
        ..encounter(patient_id, encounter_id, visit)
    }
}

pub fn diagnosis(patient_id: i64, icd10: &str, recorded_at: NaiveDateTime) -> MemoryDiagnosis {
    MemoryDiagnosis {
        patient_id,
        icd10: icd10.to_string(),
        recorded_at: Some(recorded_at),
    }
}

pub fn screening(
    tool: ScreeningTool,
    patient_id: i64,
    encounter_id: i64,
    visit: NaiveDateTime,
    score: Option<i64>,
) -> MemoryScreening {
    MemoryScreening {
        tool,
        patient_id,
        encounter_id,
        visit,
        score,
    }
}

pub fn call(patient_id: i64, call_id: i64, start: NaiveDateTime) -> MemoryCall {
    MemoryCall {
        patient_id,
        call_id,
        start,
    }
}

pub fn medicaid_span(patient_id: i64, start: NaiveDate) -> InsuranceSpan {
    InsuranceSpan {
        patient_id,
        start,
        end: None,
        plan: "medicaid managed care".to_string(),
    }
}

/// The row whose cohort key equals `key`, as a column-name/value pairing
pub fn row_by_key(table: &Table, key: &str) -> Option<Vec<Value>> {
    let idx = table
        .column_index("patient_measurement_year_id")
        .expect("cohort key column");
    table
        .rows()
        .iter()
        .find(|row| row[idx] == Value::Str(key.to_string()))
        .cloned()
}

/// Value of `column` in the row keyed by `key`
pub fn cell(table: &Table, key: &str, column: &str) -> Value {
    let row = row_by_key(table, key).unwrap_or_else(|| panic!("no row for key {key}"));
    let idx = table.column_index(column).expect("column exists");
    row[idx].clone()
}

/// All values of the cohort key column
pub fn keys(table: &Table) -> Vec<String> {
    table
        .column("patient_measurement_year_id")
        .expect("cohort key column")
        .iter()
        .map(|v| v.to_string())
        .collect()
}

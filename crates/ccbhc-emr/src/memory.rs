//! In-memory data source and sink
//!
//! Backs the measure tests: fixtures are plain structs shaped like the
//! warehouse tables, and each trait method applies the same filters as its
//! SQL counterpart.

use crate::error::Result;
use crate::rows::{
    BillableVisitRow, CallRow, CounselingRow, DemographicsRow, DiagnosisRow, EncounterEventRow,
    EncounterRow, InsuranceSpan, ScreeningRow,
};
use crate::sink::MeasureSink;
use crate::source::{ClinicalDataSource, CodeFilter, ScreeningTool};
use async_trait::async_trait;
use ccbhc_core::{MeasurementPeriod, Table};
use chrono::{NaiveDate, NaiveDateTime};
use std::collections::BTreeMap;
use std::sync::Mutex;

/// One encounter summary row
#[derive(Debug, Clone)]
pub struct MemoryEncounter {
    pub patient_id: i64,
    pub encounter_id: i64,
    pub visit: NaiveDateTime,
    pub cpt: Option<String>,
    pub encounter_type: Option<String>,
    pub billable: bool,
}

/// One patient detail row
#[derive(Debug, Clone)]
pub struct MemoryPatient {
    pub patient_id: i64,
    pub dob: Option<NaiveDate>,
    pub ethnicity: Option<String>,
    pub race: Option<String>,
}

/// One diagnosis row, already joined to its visit date
#[derive(Debug, Clone)]
pub struct MemoryDiagnosis {
    pub patient_id: i64,
    pub icd10: String,
    pub recorded_at: Option<NaiveDateTime>,
}

/// One screening-tool administration
#[derive(Debug, Clone)]
pub struct MemoryScreening {
    pub tool: ScreeningTool,
    pub patient_id: i64,
    pub encounter_id: i64,
    pub visit: NaiveDateTime,
    pub score: Option<i64>,
}

/// One first-contact call
#[derive(Debug, Clone)]
pub struct MemoryCall {
    pub patient_id: i64,
    pub call_id: i64,
    pub start: NaiveDateTime,
}

/// Fixture-backed clinical data source
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    pub patients: Vec<MemoryPatient>,
    pub encounters: Vec<MemoryEncounter>,
    pub diagnoses: Vec<MemoryDiagnosis>,
    pub screenings: Vec<MemoryScreening>,
    pub counselings: Vec<CounselingRow>,
    pub calls: Vec<MemoryCall>,
    pub insurance: Vec<InsuranceSpan>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    fn dob_of(&self, patient_id: i64) -> Option<NaiveDate> {
        self.patients
            .iter()
            .find(|p| p.patient_id == patient_id)
            .and_then(|p| p.dob)
    }

    fn encounter_row(&self, e: &MemoryEncounter) -> EncounterRow {
        EncounterRow {
            patient_id: e.patient_id,
            encounter_id: e.encounter_id,
            visit: e.visit,
            dob: self.dob_of(e.patient_id),
        }
    }
}

#[async_trait]
impl ClinicalDataSource for MemorySource {
    async fn encounters(&self, period: &MeasurementPeriod) -> Result<Vec<EncounterRow>> {
        let mut rows: Vec<EncounterRow> = self
            .encounters
            .iter()
            .filter(|e| e.visit >= period.start_datetime())
            .map(|e| self.encounter_row(e))
            .collect();
        rows.sort_by_key(|r| (r.patient_id, r.visit));
        Ok(rows)
    }

    async fn encounters_with_codes(
        &self,
        period: Option<&MeasurementPeriod>,
        codes: &[&str],
    ) -> Result<Vec<EncounterRow>> {
        let mut rows: Vec<EncounterRow> = self
            .encounters
            .iter()
            .filter(|e| {
                e.cpt
                    .as_deref()
                    .map_or(false, |cpt| codes.contains(&cpt))
            })
            .filter(|e| period.map_or(true, |p| e.visit >= p.start_datetime()))
            .map(|e| self.encounter_row(e))
            .collect();
        rows.sort_by_key(|r| (r.patient_id, r.visit));
        Ok(rows)
    }

    async fn diagnoses(&self, filter: &CodeFilter) -> Result<Vec<DiagnosisRow>> {
        Ok(self
            .diagnoses
            .iter()
            .filter(|d| filter.matches(&d.icd10))
            .map(|d| DiagnosisRow {
                patient_id: d.patient_id,
                recorded_at: d.recorded_at,
            })
            .collect())
    }

    async fn screenings(
        &self,
        tool: ScreeningTool,
        period: Option<&MeasurementPeriod>,
    ) -> Result<Vec<ScreeningRow>> {
        let mut rows: Vec<ScreeningRow> = self
            .screenings
            .iter()
            .filter(|s| s.tool == tool)
            .filter(|s| period.map_or(true, |p| s.visit >= p.start_datetime()))
            .map(|s| ScreeningRow {
                patient_id: s.patient_id,
                encounter_id: s.encounter_id,
                visit: s.visit,
                score: s.score,
            })
            .collect();
        rows.sort_by_key(|r| (r.patient_id, r.visit));
        Ok(rows)
    }

    async fn brief_counseling_encounters(&self) -> Result<Vec<CounselingRow>> {
        Ok(self.counselings.clone())
    }

    async fn intake_calls(&self, period: &MeasurementPeriod) -> Result<Vec<CallRow>> {
        Ok(self
            .calls
            .iter()
            .filter(|c| c.start >= period.start_datetime())
            .map(|c| CallRow {
                patient_id: c.patient_id,
                call_id: c.call_id,
                start: c.start,
                dob: self.dob_of(c.patient_id),
            })
            .collect())
    }

    async fn initial_evaluations(
        &self,
        period: &MeasurementPeriod,
    ) -> Result<Vec<EncounterEventRow>> {
        let mut rows: Vec<EncounterEventRow> = self
            .encounters
            .iter()
            .filter(|e| {
                e.encounter_type
                    .as_deref()
                    .map_or(false, |t| t.starts_with("Initial Evaluation-1"))
            })
            .filter(|e| e.visit >= period.start_datetime())
            .map(|e| EncounterEventRow {
                patient_id: e.patient_id,
                encounter_id: e.encounter_id,
                visit: e.visit,
            })
            .collect();
        rows.sort_by_key(|r| (r.patient_id, r.visit));
        Ok(rows)
    }

    async fn billable_encounters_since(&self, year: i32) -> Result<Vec<BillableVisitRow>> {
        let since = NaiveDate::from_ymd_opt(year, 1, 1)
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .expect("valid year");
        Ok(self
            .encounters
            .iter()
            .filter(|e| e.billable && e.visit >= since)
            .map(|e| BillableVisitRow {
                patient_id: e.patient_id,
                visit: e.visit,
            })
            .collect())
    }

    async fn clinical_services(
        &self,
        period: &MeasurementPeriod,
    ) -> Result<Vec<EncounterEventRow>> {
        let mut rows: Vec<EncounterEventRow> = self
            .encounters
            .iter()
            .filter(|e| e.billable)
            .filter(|e| {
                !e.encounter_type
                    .as_deref()
                    .map_or(false, |t| t.starts_with("Initial Evaluation"))
            })
            .filter(|e| e.visit >= period.start_datetime())
            .map(|e| EncounterEventRow {
                patient_id: e.patient_id,
                encounter_id: e.encounter_id,
                visit: e.visit,
            })
            .collect();
        rows.sort_by_key(|r| (r.patient_id, r.visit));
        Ok(rows)
    }

    async fn demographics(&self, patient_ids: &[i64]) -> Result<Vec<DemographicsRow>> {
        Ok(self
            .patients
            .iter()
            .filter(|p| patient_ids.contains(&p.patient_id))
            .map(|p| DemographicsRow {
                patient_id: p.patient_id,
                dob: p.dob,
                ethnicity: p.ethnicity.clone(),
                race: p.race.clone(),
            })
            .collect())
    }

    async fn insurance_spans(&self, patient_ids: &[i64]) -> Result<Vec<InsuranceSpan>> {
        Ok(self
            .insurance
            .iter()
            .filter(|s| patient_ids.contains(&s.patient_id))
            .cloned()
            .collect())
    }
}

/// Sink that keeps written tables in memory
#[derive(Debug, Default)]
pub struct MemorySink {
    tables: Mutex<BTreeMap<String, Table>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every table written so far
    pub fn tables(&self) -> BTreeMap<String, Table> {
        self.tables.lock().expect("sink poisoned").clone()
    }

    pub fn table(&self, name: &str) -> Option<Table> {
        self.tables.lock().expect("sink poisoned").get(name).cloned()
    }
}

#[async_trait]
impl MeasureSink for MemorySink {
    async fn write_table(&self, name: &str, table: &Table) -> Result<()> {
        self.tables
            .lock()
            .expect("sink poisoned")
            .insert(name.to_string(), table.clone());
        Ok(())
    }
}

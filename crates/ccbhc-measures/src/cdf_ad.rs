//! CDF-AD - Depression screening and follow-up for adults
//!
//! Percentage of clients aged 18 and older screened for depression with a
//! standardized tool during the measurement year and, if positive, with a
//! follow-up plan documented.

use crate::context::PipelineContext;
use crate::error::{MeasureError, Result};
use crate::measure::{Measure, MeasureDataset};
use crate::stratify::{CoveragePolicy, DupPolicy, Stratifier};
use crate::submeasure::{
    collect_measurement_data, measurement_year_id, Submeasure, SubmeasureOutput, COHORT_KEY,
};
use async_trait::async_trait;
use ccbhc_core::dates::age_at;
use ccbhc_core::{Table, Value};
use ccbhc_emr::{CodeFilter, ScreeningRow, ScreeningTool};
use chrono::{Datelike, NaiveDateTime};
use std::collections::{BTreeMap, HashMap};

/// Encounter codes that qualify a visit for the denominator
const QUALIFYING_CPT_CODES: &[&str] = &[
    "59400", "59510", "59610", "59618", "90791", "90792", "90832", "90834", "90837", "92625",
    "96105", "96110", "96112", "96116", "96125", "96136", "96138", "96156", "96158", "97161",
    "97162", "97163", "97165", "97166", "97167", "99078", "99202", "99203", "99204", "99205",
    "99212", "99213", "99214", "99215", "99304", "99305", "99306", "99307", "99308", "99309",
    "99310", "99315", "99316", "99318", "99324", "99325", "99326", "99327", "99328", "99334",
    "99335", "99336", "99337", "99339", "99340", "99401", "99402", "99403", "99483", "99484",
    "99492", "99493", "99384", "99385", "99386", "99387", "99394", "99395", "99396", "99397",
];

fn depression_filter() -> CodeFilter {
    CodeFilter::new().exacts(&[
        "F01.51", "F32.A", "F32.0", "F32.1", "F32.2", "F32.3", "F32.4", "F32.5", "F32.89",
        "F32.9", "F33.0", "F33.1", "F33.2", "F33.3", "F33.40", "F33.41", "F33.42", "F33.8",
        "F33.9", "F34.1", "F34.81", "F34.89", "F43.21", "F43.23", "F53.0", "F53.1", "O90.6",
        "O99.340", "O99.341", "O99.342", "O99.343", "O99.345",
    ])
}

fn bipolar_filter() -> CodeFilter {
    CodeFilter::new().exacts(&[
        "F31.10", "F31.11", "F31.12", "F31.13", "F31.2", "F31.30", "F31.31", "F31.32", "F31.4",
        "F31.5", "F31.60", "F31.61", "F31.62", "F31.63", "F31.64", "F31.70", "F31.71", "F31.72",
        "F31.73", "F31.74", "F31.75", "F31.76", "F31.77", "F31.78", "F31.81", "F31.89", "F31.9",
    ])
}

const POSITIVE_WITH_FOLLOW_UP: &str = "Positive screening with follow up";
const NEGATIVE_SCREENING: &str = "Negative screening";

const POSITIVE_SCORE_THRESHOLD: i64 = 9;

#[derive(Debug, Clone)]
struct CdfRecord {
    patient_id: i64,
    encounter_id: i64,
    visit: NaiveDateTime,
    year: i32,
    key: String,
    screening_encounter_id: Option<i64>,
    screening_date: Option<NaiveDateTime>,
    last_encounter: Option<NaiveDateTime>,
    numerator: bool,
    numerator_desc: Option<&'static str>,
}

/// Adults with a qualifying encounter, screened for depression
pub struct CdfAdSub1 {
    records: Vec<CdfRecord>,
    stratify: Option<Table>,
}

impl CdfAdSub1 {
    pub fn new() -> Self {
        Self {
            records: Vec::new(),
            stratify: None,
        }
    }
}

impl Default for CdfAdSub1 {
    fn default() -> Self {
        Self::new()
    }
}

fn apply_diagnosis_exclusion(records: &mut Vec<CdfRecord>, diagnoses: &[ccbhc_emr::DiagnosisRow]) {
    let mut first_dx: HashMap<i64, NaiveDateTime> = HashMap::new();
    for dx in diagnoses {
        if let Some(recorded) = dx.recorded_at {
            first_dx
                .entry(dx.patient_id)
                .and_modify(|d| *d = (*d).min(recorded))
                .or_insert(recorded);
        }
    }
    records.retain(|r| match first_dx.get(&r.patient_id) {
        Some(dx_date) => r.visit <= *dx_date,
        None => true,
    });
}

fn resolve_screenings(records: &mut [CdfRecord], screenings: &[ScreeningRow]) {
    let mut last_by_patient: HashMap<i64, NaiveDateTime> = HashMap::new();
    for r in records.iter() {
        last_by_patient
            .entry(r.patient_id)
            .and_modify(|d| *d = (*d).max(r.visit))
            .or_insert(r.visit);
    }

    let mut by_patient_year: HashMap<(i64, i32), Vec<&ScreeningRow>> = HashMap::new();
    for s in screenings {
        by_patient_year
            .entry((s.patient_id, s.visit.year()))
            .or_default()
            .push(s);
    }
    for group in by_patient_year.values_mut() {
        group.sort_by_key(|s| (s.visit, s.encounter_id));
    }

    for record in records.iter_mut() {
        let screenings = by_patient_year
            .get(&(record.patient_id, record.year))
            .map(Vec::as_slice)
            .unwrap_or(&[]);
        let positives: Vec<&&ScreeningRow> = screenings
            .iter()
            .filter(|s| s.score.map_or(false, |score| score > POSITIVE_SCORE_THRESHOLD))
            .collect();

        if positives.is_empty() {
            record.numerator = true;
            record.numerator_desc = Some(NEGATIVE_SCREENING);
            if let Some(first) = screenings.first() {
                record.screening_encounter_id = Some(first.encounter_id);
                record.screening_date = Some(first.visit);
            }
            continue;
        }

        let last_encounter = last_by_patient[&record.patient_id];
        record.last_encounter = Some(last_encounter);
        match positives.iter().find(|s| last_encounter > s.visit) {
            Some(followed_up) => {
                record.numerator = true;
                record.numerator_desc = Some(POSITIVE_WITH_FOLLOW_UP);
                record.screening_encounter_id = Some(followed_up.encounter_id);
                record.screening_date = Some(followed_up.visit);
            }
            None => {
                record.numerator = false;
                record.numerator_desc = None;
                record.screening_encounter_id = Some(positives[0].encounter_id);
                record.screening_date = Some(positives[0].visit);
            }
        }
    }
}

#[async_trait]
impl Submeasure for CdfAdSub1 {
    fn name(&self) -> &str {
        "CDF_AD"
    }

    /// First qualifying encounter per client per measurement year
    async fn fetch_populace(&mut self, ctx: &PipelineContext) -> Result<()> {
        let encounters = ctx
            .source()
            .encounters_with_codes(Some(ctx.period()), QUALIFYING_CPT_CODES)
            .await?;
        let mut first: BTreeMap<(i64, i32), &ccbhc_emr::EncounterRow> = BTreeMap::new();
        for e in &encounters {
            first
                .entry((e.patient_id, e.visit.year()))
                .and_modify(|current| {
                    if (e.visit, e.encounter_id) < (current.visit, current.encounter_id) {
                        *current = e;
                    }
                })
                .or_insert(e);
        }
        self.records = first
            .values()
            .filter(|e| {
                e.dob
                    .map(|dob| age_at(dob, e.visit.date()) >= 18)
                    .unwrap_or(false)
            })
            .map(|e| CdfRecord {
                patient_id: e.patient_id,
                encounter_id: e.encounter_id,
                visit: e.visit,
                year: e.visit.year(),
                key: measurement_year_id(e.patient_id, e.visit.year()),
                screening_encounter_id: None,
                screening_date: None,
                last_encounter: None,
                numerator: false,
                numerator_desc: None,
            })
            .collect();
        Ok(())
    }

    /// Remove clients with a depression or bipolar diagnosis recorded before
    /// their qualifying visit
    async fn remove_exclusions(&mut self, ctx: &PipelineContext) -> Result<()> {
        let depressions = ctx.source().diagnoses(&depression_filter()).await?;
        apply_diagnosis_exclusion(&mut self.records, &depressions);
        let bipolars = ctx.source().diagnoses(&bipolar_filter()).await?;
        apply_diagnosis_exclusion(&mut self.records, &bipolars);
        Ok(())
    }

    async fn apply_time_constraint(&mut self, _ctx: &PipelineContext) -> Result<()> {
        Ok(())
    }

    async fn find_performance_met(&mut self, ctx: &PipelineContext) -> Result<()> {
        let screenings = ctx.source().screenings(ScreeningTool::PhqAdult, None).await?;
        resolve_screenings(&mut self.records, &screenings);
        Ok(())
    }

    async fn stratify_data(&mut self, ctx: &PipelineContext) -> Result<()> {
        let ids: Vec<i64> = self.records.iter().map(|r| r.patient_id).collect();
        let strat =
            Stratifier::load(ctx, &ids, DupPolicy::KeepFirst, CoveragePolicy::NotCovered).await?;
        let mut table = Table::new([COHORT_KEY, "measurement_year", "Ethnicity", "Race", "Medicaid"]);
        for record in &self.records {
            let anchor = record
                .screening_date
                .map(|d| d.date())
                .unwrap_or_else(|| record.visit.date());
            table.push_row(vec![
                Value::Str(record.key.clone()),
                Value::Str(record.year.to_string()),
                strat.ethnicity(record.patient_id),
                strat.race(record.patient_id),
                strat.medicaid(record.patient_id, anchor),
            ])?;
        }
        self.stratify = Some(table);
        Ok(())
    }

    fn return_final_data(&mut self) -> Result<SubmeasureOutput> {
        let mut populace = Table::new([
            COHORT_KEY,
            "PatientId",
            "EncounterId",
            "screening_encounter_id",
            "last_encounter",
            "numerator",
            "numerator_desc",
        ]);
        for record in &self.records {
            populace.push_row(vec![
                Value::Str(record.key.clone()),
                Value::Int(record.patient_id),
                Value::Int(record.encounter_id),
                record.screening_encounter_id.into(),
                record.last_encounter.into(),
                Value::Bool(record.numerator),
                record.numerator_desc.into(),
            ])?;
        }
        let stratify = self
            .stratify
            .take()
            .ok_or_else(|| MeasureError::logic("CDF_AD stratified before final projection"))?;
        Ok(SubmeasureOutput { populace, stratify })
    }
}

/// Percentage of clients aged 18 and older screened for depression, with a
/// follow-up plan documented when the screening is positive
pub struct CdfAd;

impl CdfAd {
    pub fn new() -> Self {
        Self
    }
}

impl Default for CdfAd {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Measure for CdfAd {
    fn name(&self) -> &str {
        "CDF AD"
    }

    async fn collect(&self, ctx: &PipelineContext) -> Result<Vec<MeasureDataset>> {
        let mut sub1 = CdfAdSub1::new();
        let out = collect_measurement_data(&mut sub1, ctx).await?;
        Ok(vec![
            MeasureDataset::new("CDF_AD", out.populace),
            MeasureDataset::new("CDF_AD_stratify", out.stratify),
        ])
    }
}

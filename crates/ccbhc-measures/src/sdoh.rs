//! SDOH - Social drivers of health screening
//!
//! Percentage of clients 18 years and older screened for food insecurity,
//! housing instability, transportation needs, utility difficulties, and
//! interpersonal safety.

use crate::context::PipelineContext;
use crate::error::{MeasureError, Result};
use crate::measure::{Measure, MeasureDataset};
use crate::stratify::{CoveragePolicy, DupPolicy, Stratifier};
use crate::submeasure::{
    collect_measurement_data, measurement_year_id, Submeasure, SubmeasureOutput, COHORT_KEY,
};
use async_trait::async_trait;
use ccbhc_core::dates::{add_years, age_at};
use ccbhc_core::{Table, Value};
use ccbhc_emr::ScreeningTool;
use chrono::{Datelike, NaiveDate, NaiveDateTime};
use std::collections::{BTreeMap, HashMap};

/// Encounter codes that qualify a visit for the denominator
const QUALIFYING_CPT_CODES: &[&str] = &[
    "59400", "59510", "59610", "59618", "78012", "78070", "78075", "78102", "78140", "78185",
    "78195", "78202", "78215", "78261", "78290", "78300", "78305", "78315", "78414", "78428",
    "78456", "78458", "78579", "78580", "78582", "78597", "78601", "78630", "78699", "78708",
    "78725", "78740", "78801", "78803", "78999", "90791", "90792", "90832", "90834", "90837",
    "90839", "90845", "90945", "90947", "90951", "90952", "90953", "90954", "90955", "90956",
    "90957", "90958", "90959", "90960", "90961", "90962", "90963", "90964", "90965", "90966",
    "90967", "90968", "90969", "90970", "92002", "92004", "92012", "92014", "92507", "92508",
    "92521", "92522", "92523", "92524", "92526", "92537", "92538", "92540", "92541", "92542",
    "92544", "92545", "92548", "92549", "92550", "92557", "92567", "92568", "92570", "92588",
    "92625", "92626", "92650", "92651", "92652", "92653", "96116", "96156", "96158", "97129",
    "97161", "97162", "97163", "97164", "97802", "97803", "97804", "98960", "98961", "98962",
    "99203", "99204", "99205", "99211", "99212", "99213", "99214", "99215", "99221", "99222",
    "99223", "99231", "99232", "99233", "99236", "99242", "99243", "99244", "99245", "99281",
    "99282", "99283", "99284", "99285", "99304", "99305", "99306", "99307", "99308", "99309",
    "99310", "99381", "99382", "99383", "99384", "99385", "99386", "99387", "99391", "99392",
    "99393", "99394", "99395", "99396", "99397", "99401", "99402", "99403", "99404", "99411",
    "99412", "99429", "99495", "99496", "99512", "D0120", "D0140", "D0145", "D0150", "D0160",
    "D0170", "D0180", "D7111", "D7140", "D7210", "D7220", "D7230", "D7240", "D7241", "D7250",
    "D7251", "G0101", "G0108", "G0270", "G0271", "G0402", "G0438", "G0439", "G0447", "G0473",
    "G9054",
];

#[derive(Debug, Clone)]
struct SdohRecord {
    patient_id: i64,
    encounter_id: i64,
    visit: NaiveDateTime,
    dob: NaiveDate,
    age: i64,
    year: i32,
    key: String,
    screening_id: Option<i64>,
    screening_date: Option<NaiveDateTime>,
    numerator: bool,
}

/// Adults with a qualifying encounter, screened for social needs
pub struct SdohSub1 {
    encounters: Vec<ccbhc_emr::EncounterRow>,
    records: Vec<SdohRecord>,
    stratify: Option<Table>,
}

impl SdohSub1 {
    pub fn new() -> Self {
        Self {
            encounters: Vec::new(),
            records: Vec::new(),
            stratify: None,
        }
    }
}

impl Default for SdohSub1 {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Submeasure for SdohSub1 {
    fn name(&self) -> &str {
        "SDOH"
    }

    /// Clients seen for a qualifying encounter during the measurement year
    async fn fetch_populace(&mut self, ctx: &PipelineContext) -> Result<()> {
        self.encounters = ctx
            .source()
            .encounters_with_codes(Some(ctx.period()), QUALIFYING_CPT_CODES)
            .await?;
        Ok(())
    }

    /// Drop encounters where the client was under 18 at the date of service,
    /// then anchor each client-year on the first remaining encounter. The
    /// order matters for clients who turn 18 mid-year: their anchor must be
    /// an encounter after the birthday.
    async fn remove_exclusions(&mut self, _ctx: &PipelineContext) -> Result<()> {
        let mut first: BTreeMap<(i64, i32), SdohRecord> = BTreeMap::new();
        for e in &self.encounters {
            let Some(dob) = e.dob else { continue };
            let age = age_at(dob, e.visit.date());
            if age < 18 {
                continue;
            }
            let year = e.visit.year();
            let record = SdohRecord {
                patient_id: e.patient_id,
                encounter_id: e.encounter_id,
                visit: e.visit,
                dob,
                age,
                year,
                key: measurement_year_id(e.patient_id, year),
                screening_id: None,
                screening_date: None,
                numerator: false,
            };
            first
                .entry((e.patient_id, year))
                .and_modify(|current| {
                    if (record.visit, record.encounter_id)
                        < (current.visit, current.encounter_id)
                    {
                        *current = record.clone();
                    }
                })
                .or_insert(record);
        }
        self.records = first.into_values().collect();
        self.encounters.clear();
        Ok(())
    }

    /// The screening itself has no fixed window; what matters is the most
    /// recent screening in the client's measurement year
    async fn apply_time_constraint(&mut self, _ctx: &PipelineContext) -> Result<()> {
        for record in &mut self.records {
            record.numerator = match record.screening_date {
                Some(screened) if record.age == 18 => {
                    // a screening taken while still 17 does not count
                    screened.date() >= add_years(record.dob, 18)
                }
                Some(_) => true,
                None => false,
            };
        }
        Ok(())
    }

    /// Attach each client-year's latest social-needs screening
    async fn find_performance_met(&mut self, ctx: &PipelineContext) -> Result<()> {
        let screenings = ctx
            .source()
            .screenings(ScreeningTool::SocialNeeds, Some(ctx.period()))
            .await?;
        let mut latest: HashMap<(i64, i32), (NaiveDateTime, i64)> = HashMap::new();
        for s in &screenings {
            let entry = latest
                .entry((s.patient_id, s.visit.year()))
                .or_insert((s.visit, s.encounter_id));
            if (s.visit, s.encounter_id) > *entry {
                *entry = (s.visit, s.encounter_id);
            }
        }
        for record in &mut self.records {
            if let Some((visit, encounter_id)) = latest.get(&(record.patient_id, record.year)) {
                record.screening_date = Some(*visit);
                record.screening_id = Some(*encounter_id);
            }
        }
        Ok(())
    }

    /// The screening lookup has to land before the birthday check, so this
    /// sub-measure runs the performance step first
    async fn get_numerator(&mut self, ctx: &PipelineContext) -> Result<()> {
        self.find_performance_met(ctx).await?;
        self.apply_time_constraint(ctx).await
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
            "numerator",
            "screening_id",
            "screening_date",
        ]);
        for record in &self.records {
            populace.push_row(vec![
                Value::Str(record.key.clone()),
                Value::Int(record.patient_id),
                Value::Int(record.encounter_id),
                Value::Bool(record.numerator),
                record.screening_id.into(),
                record.screening_date.into(),
            ])?;
        }
        let stratify = self
            .stratify
            .take()
            .ok_or_else(|| MeasureError::logic("SDOH stratified before final projection"))?;
        Ok(SubmeasureOutput { populace, stratify })
    }
}

/// Percentage of clients 18 years and older screened for social drivers of
/// health
pub struct Sdoh;

impl Sdoh {
    pub fn new() -> Self {
        Self
    }
}

impl Default for Sdoh {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Measure for Sdoh {
    fn name(&self) -> &str {
        "SDOH"
    }

    async fn collect(&self, ctx: &PipelineContext) -> Result<Vec<MeasureDataset>> {
        let mut sub1 = SdohSub1::new();
        let out = collect_measurement_data(&mut sub1, ctx).await?;
        Ok(vec![
            MeasureDataset::new("SDOH", out.populace),
            MeasureDataset::new("SDOH_stratify", out.stratify),
        ])
    }
}

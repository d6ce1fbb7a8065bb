//! I-SERV - Time until provision of initial services
//!
//! Sub-measure 1: business days from a new client's first contact to their
//! initial evaluation. Sub-measure 2: business days from first contact to
//! the first clinical service. Both report a day count per client rather
//! than a boolean, and both surface clients who never reached the service as
//! a separate exclusions list for the reporting template.

use crate::context::PipelineContext;
use crate::error::{MeasureError, Result};
use crate::measure::{Measure, MeasureDataset};
use crate::stratify::{CoveragePolicy, DupPolicy, Stratifier};
use crate::submeasure::{
    collect_measurement_data, measurement_year_id, Submeasure, SubmeasureOutput, COHORT_KEY,
};
use async_trait::async_trait;
use ccbhc_core::dates::{age_bucket, business_days_between, year_age};
use ccbhc_core::{Table, Value};
use ccbhc_emr::EncounterEventRow;
use chrono::{Datelike, NaiveDateTime};
use std::collections::{HashMap, HashSet};

/// Clients evaluated after the measurement year boundary report this fixed
/// business-day count instead of the true elapsed time
const LATE_EVALUATION_PENALTY_DAYS: i64 = 31;

/// Clients younger than this at the end of the measurement year are excluded
const MINIMUM_AGE: i64 = 12;

#[derive(Debug, Clone)]
struct MatchedEvent {
    encounter_id: i64,
    date: NaiveDateTime,
}

#[derive(Debug, Clone)]
struct CallRecord {
    patient_id: i64,
    call_id: i64,
    start: NaiveDateTime,
    year: i32,
    key: String,
    age: Option<i64>,
    event: Option<MatchedEvent>,
    late: bool,
    business_days: Option<i64>,
}

/// Match each call to the earliest event on or after it
fn match_next_event(calls: &mut [CallRecord], events: &[EncounterEventRow]) {
    let mut by_patient: HashMap<i64, Vec<&EncounterEventRow>> = HashMap::new();
    for event in events {
        by_patient.entry(event.patient_id).or_default().push(event);
    }
    for group in by_patient.values_mut() {
        group.sort_by_key(|e| (e.visit, e.encounter_id));
    }
    for call in calls.iter_mut() {
        call.event = by_patient
            .get(&call.patient_id)
            .and_then(|events| events.iter().find(|e| e.visit >= call.start))
            .map(|e| MatchedEvent {
                encounter_id: e.encounter_id,
                date: e.visit,
            });
    }
}

/// Flag events dated outside the call's measurement year
fn flag_late_events(calls: &mut [CallRecord]) {
    for call in calls.iter_mut() {
        if let Some(event) = &call.event {
            call.late = event.date.year() != call.year;
        }
    }
}

/// Split off calls that never reached the event; the remainder get their
/// business-day count, with late events clamped to the fixed penalty
fn count_business_days(calls: &mut Vec<CallRecord>) -> Vec<CallRecord> {
    let unreached: Vec<CallRecord> = calls.iter().filter(|c| c.event.is_none()).cloned().collect();
    calls.retain(|c| c.event.is_some());
    for call in calls.iter_mut() {
        let Some(event) = &call.event else { continue };
        let days = if call.late {
            LATE_EVALUATION_PENALTY_DAYS
        } else {
            business_days_between(call.start.date(), event.date.date())
        };
        call.business_days = Some(days);
    }
    unreached
}

fn exclusions_table(unreached: &[CallRecord]) -> Result<Table> {
    let mut table = Table::new(["PatientID", "StartDate"]);
    for call in unreached {
        table.push_row(vec![Value::Int(call.patient_id), Value::DateTime(call.start)])?;
    }
    Ok(table)
}

/// Average time until provision of initial evaluation
pub struct IServSub1 {
    calls: Vec<CallRecord>,
    unreached: Vec<CallRecord>,
    stratify: Option<Table>,
}

impl IServSub1 {
    pub fn new() -> Self {
        Self {
            calls: Vec::new(),
            unreached: Vec::new(),
            stratify: None,
        }
    }

    /// Calls that never reached an initial evaluation, for the reporting
    /// template's additional notes
    fn exclusions(&self) -> Result<Table> {
        exclusions_table(&self.unreached)
    }

    /// Sub-measure 2 starts from this cohort
    fn cohort_seeds(&self) -> Vec<Sub2Seed> {
        self.calls
            .iter()
            .map(|c| Sub2Seed {
                patient_id: c.patient_id,
                call_id: c.call_id,
                start: c.start,
                year: c.year,
                key: c.key.clone(),
            })
            .collect()
    }
}

impl Default for IServSub1 {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Submeasure for IServSub1 {
    fn name(&self) -> &str {
        "ISERV_sub_1"
    }

    /// New-client calls in the period, matched to the earliest initial
    /// evaluation on or after each call; one record per client per
    /// measurement year, earliest call first
    async fn fetch_populace(&mut self, ctx: &PipelineContext) -> Result<()> {
        let mut raw = ctx.source().intake_calls(ctx.period()).await?;
        raw.sort_by_key(|c| (c.patient_id, c.start, c.call_id));

        let mut seen: HashSet<(i64, i32)> = HashSet::new();
        self.calls = raw
            .iter()
            .filter(|c| seen.insert((c.patient_id, c.start.year())))
            .map(|c| CallRecord {
                patient_id: c.patient_id,
                call_id: c.call_id,
                start: c.start,
                year: c.start.year(),
                key: measurement_year_id(c.patient_id, c.start.year()),
                age: c.dob.map(|dob| year_age(dob, c.start.year())),
                event: None,
                late: false,
                business_days: None,
            })
            .collect();

        let evals = ctx.source().initial_evaluations(ctx.period()).await?;
        match_next_event(&mut self.calls, &evals);
        Ok(())
    }

    /// New clients only: no billable visit in the second half of the prior
    /// year, no first contact in December, and age 12 or older at the end of
    /// the measurement year
    async fn remove_exclusions(&mut self, ctx: &PipelineContext) -> Result<()> {
        let prior = ctx
            .source()
            .billable_encounters_since(ctx.period().prior_year())
            .await?;
        let not_new: HashSet<(i64, i32)> = prior
            .iter()
            .filter(|v| v.visit.month() > 6)
            .map(|v| (v.patient_id, v.visit.year() + 1))
            .collect();
        self.calls
            .retain(|c| !not_new.contains(&(c.patient_id, c.year)));

        // first contact in the last month of the year cannot be evaluated
        // within the year
        self.calls.retain(|c| c.start.month() != 12);

        self.calls
            .retain(|c| c.age.map_or(false, |age| age >= MINIMUM_AGE));
        Ok(())
    }

    async fn apply_time_constraint(&mut self, _ctx: &PipelineContext) -> Result<()> {
        flag_late_events(&mut self.calls);
        Ok(())
    }

    /// The numerator is a business-day count; clients with no evaluation at
    /// all move to the exclusions list
    async fn find_performance_met(&mut self, _ctx: &PipelineContext) -> Result<()> {
        self.unreached = count_business_days(&mut self.calls);
        Ok(())
    }

    async fn stratify_data(&mut self, ctx: &PipelineContext) -> Result<()> {
        let ids: Vec<i64> = self.calls.iter().map(|c| c.patient_id).collect();
        let strat =
            Stratifier::load(ctx, &ids, DupPolicy::KeepFirst, CoveragePolicy::Unknown).await?;
        let mut table = Table::new([COHORT_KEY, "age", "Ethnicity", "Race", "Medicaid"]);
        for call in &self.calls {
            let age = call
                .age
                .ok_or_else(|| MeasureError::logic("ISERV_sub_1 stratified before the age filter"))?;
            table.push_row(vec![
                Value::Str(call.key.clone()),
                Value::Str(age_bucket(age).to_string()),
                strat.ethnicity(call.patient_id),
                strat.race(call.patient_id),
                strat.medicaid(call.patient_id, call.start.date()),
            ])?;
        }
        self.stratify = Some(table);
        Ok(())
    }

    fn return_final_data(&mut self) -> Result<SubmeasureOutput> {
        let mut populace = Table::new([
            "PatientID",
            COHORT_KEY,
            "CallID",
            "eval_encounter_id",
            "business_days_from_call_to_eval",
        ]);
        for call in &self.calls {
            let event = call
                .event
                .as_ref()
                .ok_or_else(|| MeasureError::logic("ISERV_sub_1 cohort call without evaluation"))?;
            populace.push_row(vec![
                Value::Int(call.patient_id),
                Value::Str(call.key.clone()),
                Value::Int(call.call_id),
                Value::Int(event.encounter_id),
                call.business_days.into(),
            ])?;
        }
        let stratify = self
            .stratify
            .take()
            .ok_or_else(|| MeasureError::logic("ISERV_sub_1 stratified before final projection"))?;
        Ok(SubmeasureOutput { populace, stratify })
    }
}

#[derive(Debug, Clone)]
struct Sub2Seed {
    patient_id: i64,
    call_id: i64,
    start: NaiveDateTime,
    year: i32,
    key: String,
}

/// Average time until provision of initial clinical services
pub struct IServSub2 {
    seeds: Vec<Sub2Seed>,
    sub1_stratify: Table,
    calls: Vec<CallRecord>,
    unreached: Vec<CallRecord>,
    stratify: Option<Table>,
}

impl IServSub2 {
    fn new(seeds: Vec<Sub2Seed>, sub1_stratify: Table) -> Self {
        Self {
            seeds,
            sub1_stratify,
            calls: Vec::new(),
            unreached: Vec::new(),
            stratify: None,
        }
    }

    fn exclusions(&self) -> Result<Table> {
        exclusions_table(&self.unreached)
    }
}

#[async_trait]
impl Submeasure for IServSub2 {
    fn name(&self) -> &str {
        "ISERV_sub_2"
    }

    /// Sub-measure 1's cohort, matched to the first billable clinical
    /// service on or after each call
    async fn fetch_populace(&mut self, ctx: &PipelineContext) -> Result<()> {
        self.calls = self
            .seeds
            .iter()
            .map(|s| CallRecord {
                patient_id: s.patient_id,
                call_id: s.call_id,
                start: s.start,
                year: s.year,
                key: s.key.clone(),
                age: None,
                event: None,
                late: false,
                business_days: None,
            })
            .collect();
        let services = ctx.source().clinical_services(ctx.period()).await?;
        match_next_event(&mut self.calls, &services);
        Ok(())
    }

    /// The starting population comes from sub-measure 1, which has already
    /// removed its exclusions
    async fn remove_exclusions(&mut self, _ctx: &PipelineContext) -> Result<()> {
        Ok(())
    }

    async fn apply_time_constraint(&mut self, _ctx: &PipelineContext) -> Result<()> {
        flag_late_events(&mut self.calls);
        Ok(())
    }

    async fn find_performance_met(&mut self, _ctx: &PipelineContext) -> Result<()> {
        self.unreached = count_business_days(&mut self.calls);
        Ok(())
    }

    /// Sub-measure 2's population is a strict subset of sub-measure 1's, so
    /// its stratification is the sub-1 rows restricted to this cohort
    async fn stratify_data(&mut self, _ctx: &PipelineContext) -> Result<()> {
        let keys: HashSet<&str> = self.calls.iter().map(|c| c.key.as_str()).collect();
        let key_idx = self.sub1_stratify.column_index(COHORT_KEY).map_err(|_| {
            MeasureError::logic("ISERV_sub_1 stratify table missing the cohort key")
        })?;
        let mut table = Table::new(self.sub1_stratify.columns().to_vec());
        for row in self.sub1_stratify.rows() {
            if let Value::Str(key) = &row[key_idx] {
                if keys.contains(key.as_str()) {
                    table.push_row(row.clone())?;
                }
            }
        }
        self.stratify = Some(table);
        Ok(())
    }

    fn return_final_data(&mut self) -> Result<SubmeasureOutput> {
        let mut populace = Table::new([
            "PatientID",
            COHORT_KEY,
            "StartDate",
            "service_encounter_id",
            "business_days_from_call_to_service",
        ]);
        for call in &self.calls {
            let event = call
                .event
                .as_ref()
                .ok_or_else(|| MeasureError::logic("ISERV_sub_2 cohort call without service"))?;
            populace.push_row(vec![
                Value::Int(call.patient_id),
                Value::Str(call.key.clone()),
                Value::DateTime(call.start),
                Value::Int(event.encounter_id),
                call.business_days.into(),
            ])?;
        }
        let stratify = self
            .stratify
            .take()
            .ok_or_else(|| MeasureError::logic("ISERV_sub_2 stratified before final projection"))?;
        Ok(SubmeasureOutput { populace, stratify })
    }
}

/// Average time for clients to access initial evaluation and initial
/// clinical services
pub struct IServ;

impl IServ {
    pub fn new() -> Self {
        Self
    }
}

impl Default for IServ {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Measure for IServ {
    fn name(&self) -> &str {
        "I SERV"
    }

    async fn collect(&self, ctx: &PipelineContext) -> Result<Vec<MeasureDataset>> {
        let mut sub1 = IServSub1::new();
        let out1 = collect_measurement_data(&mut sub1, ctx).await?;
        let mut datasets = vec![
            MeasureDataset::new("ISERV_sub_1", out1.populace),
            MeasureDataset::new("ISERV_sub_1_stratify", out1.stratify.clone()),
            MeasureDataset::new("IServ_sub1_exclusions", sub1.exclusions()?),
        ];

        // sub 2 re-uses sub 1's cohort and stratification in memory
        let mut sub2 = IServSub2::new(sub1.cohort_seeds(), out1.stratify);
        let out2 = collect_measurement_data(&mut sub2, ctx).await?;
        datasets.push(MeasureDataset::new("ISERV_sub_2", out2.populace));
        datasets.push(MeasureDataset::new("ISERV_sub_2_stratify", out2.stratify));
        datasets.push(MeasureDataset::new("IServ_sub2_exclusions", sub2.exclusions()?));
        Ok(datasets)
    }
}

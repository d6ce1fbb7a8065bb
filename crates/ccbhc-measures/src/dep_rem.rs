//! DEP-REM - Depression remission six months after an index event
//!
//! Percentage of clients with Major Depression or Dysthymia and an initial
//! PHQ-9 or PHQ-9M score greater than nine who reach remission (score below
//! five) six months, plus or minus 60 days, after the index event date.

use crate::context::PipelineContext;
use crate::error::{MeasureError, Result};
use crate::measure::{Measure, MeasureDataset};
use crate::stratify::{CoveragePolicy, DupPolicy, Stratifier};
use crate::submeasure::{
    collect_measurement_data, measurement_year_id, Submeasure, SubmeasureOutput, COHORT_KEY,
};
use async_trait::async_trait;
use ccbhc_core::dates::{add_days, add_months, add_months_dt, age_at, age_bucket};
use ccbhc_core::{Table, Value};
use ccbhc_emr::{CodeFilter, ScreeningRow, ScreeningTool};
use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime};
use std::collections::{BTreeMap, HashMap};

/// An index event starts with a score above nine
const INDEX_SCORE_THRESHOLD: i64 = 9;
/// Remission is any follow-up score below five
const REMISSION_SCORE_CEILING: i64 = 5;
/// The remission window sits six months out, sixty days either side
const REMISSION_OFFSET_MONTHS: u32 = 6;
const REMISSION_RANGE_DAYS: u64 = 60;

fn exclusion_filter() -> CodeFilter {
    // Bipolar, personality, schizophrenia/psychotic, pervasive developmental
    // and palliative diagnoses disqualify an index group
    CodeFilter::new()
        .prefix("F30.")
        .prefix("F31.")
        .exact("F34.0")
        .exact("F60.3")
        .exact("F60.4")
        .prefix("F68.1")
        .prefix("F20.")
        .exact("F21")
        .exact("F23")
        .prefix("F25.")
        .exact("F28")
        .exact("F29")
        .exact("F84.0")
        .exact("F84.3")
        .exact("F84.8")
        .exact("F84.9")
        .exact("Z51.1")
}

#[derive(Debug, Clone)]
struct PhqVisit {
    encounter_id: i64,
    visit: NaiveDateTime,
    score: Option<i64>,
}

/// One index event and every encounter attributed to it
#[derive(Debug, Clone)]
struct IndexGroup {
    patient_id: i64,
    key: String,
    index_encounter_id: i64,
    index_date: NaiveDateTime,
    visits: Vec<PhqVisit>,
    numerator: bool,
}

impl IndexGroup {
    /// Last day an exclusion diagnosis can disqualify this group
    fn exclusion_range_end(&self) -> NaiveDate {
        add_days(
            add_months(self.index_date.date(), REMISSION_OFFSET_MONTHS),
            REMISSION_RANGE_DAYS,
        )
    }
}

/// Clients reaching remission six months after an index event
pub struct DepRemSub1 {
    groups: Vec<IndexGroup>,
    stratify: Option<Table>,
}

impl DepRemSub1 {
    pub fn new() -> Self {
        Self {
            groups: Vec::new(),
            stratify: None,
        }
    }
}

impl Default for DepRemSub1 {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Submeasure for DepRemSub1 {
    fn name(&self) -> &str {
        "DepRem"
    }

    /// Union the adult and adolescent PHQ-9 pulls, derive each patient's
    /// index events, and attach every encounter to the most recent index
    /// event at or before it. Encounters preceding every index event are
    /// dropped entirely.
    async fn fetch_populace(&mut self, ctx: &PipelineContext) -> Result<()> {
        let mut screenings = ctx
            .source()
            .screenings(ScreeningTool::PhqAdult, Some(ctx.period()))
            .await?;
        screenings.extend(
            ctx.source()
                .screenings(ScreeningTool::PhqAdolescent, Some(ctx.period()))
                .await?,
        );
        screenings.sort_by_key(|s| (s.patient_id, s.visit, s.encounter_id));

        // first above-threshold score per patient per year
        let mut index_visits: BTreeMap<(i64, i32), &ScreeningRow> = BTreeMap::new();
        for s in &screenings {
            if s.score.map_or(false, |score| score > INDEX_SCORE_THRESHOLD) {
                index_visits.entry((s.patient_id, s.visit.year())).or_insert(s);
            }
        }
        let mut index_by_patient: HashMap<i64, Vec<&ScreeningRow>> = HashMap::new();
        for &index in index_visits.values() {
            index_by_patient.entry(index.patient_id).or_default().push(index);
        }

        let mut groups: BTreeMap<String, IndexGroup> = BTreeMap::new();
        for s in &screenings {
            let Some(candidates) = index_by_patient.get(&s.patient_id) else {
                continue;
            };
            // most recent index event at or before this visit, by date
            let Some(index) = candidates
                .iter()
                .filter(|idx| idx.visit.date() <= s.visit.date())
                .last()
            else {
                continue;
            };
            let key = measurement_year_id(s.patient_id, index.visit.year());
            groups
                .entry(key.clone())
                .or_insert_with(|| IndexGroup {
                    patient_id: s.patient_id,
                    key,
                    index_encounter_id: index.encounter_id,
                    index_date: index.visit,
                    visits: Vec::new(),
                    numerator: false,
                })
                .visits
                .push(PhqVisit {
                    encounter_id: s.encounter_id,
                    visit: s.visit,
                    score: s.score,
                });
        }
        self.groups = groups.into_values().collect();
        Ok(())
    }

    /// Drop index groups with a disqualifying diagnosis dated on or before
    /// the end of the group's remission period
    async fn remove_exclusions(&mut self, ctx: &PipelineContext) -> Result<()> {
        let diagnoses = ctx.source().diagnoses(&exclusion_filter()).await?;
        let mut dx_dates: HashMap<i64, Vec<NaiveDate>> = HashMap::new();
        for dx in diagnoses {
            if let Some(recorded) = dx.recorded_at {
                dx_dates.entry(dx.patient_id).or_default().push(recorded.date());
            }
        }
        // the window is compared by full date, not measurement year: an index
        // event late in one year can be excluded by a diagnosis early the next
        self.groups.retain(|group| {
            let end = group.exclusion_range_end();
            dx_dates
                .get(&group.patient_id)
                .map_or(true, |dates| dates.iter().all(|d| *d > end))
        });
        Ok(())
    }

    /// Narrow each group to its index visit plus encounters inside the
    /// remission window
    async fn apply_time_constraint(&mut self, _ctx: &PipelineContext) -> Result<()> {
        for group in &mut self.groups {
            let center = add_months_dt(group.index_date, REMISSION_OFFSET_MONTHS);
            let min_range = center - Duration::days(REMISSION_RANGE_DAYS as i64);
            let max_range = center + Duration::days(REMISSION_RANGE_DAYS as i64);
            let index_encounter_id = group.index_encounter_id;
            group.visits.retain(|v| {
                v.encounter_id == index_encounter_id
                    || (v.visit >= min_range && v.visit <= max_range)
            });
        }
        Ok(())
    }

    /// An index group reaches the numerator when any kept encounter scores
    /// below five
    async fn find_performance_met(&mut self, _ctx: &PipelineContext) -> Result<()> {
        for group in &mut self.groups {
            group.numerator = group
                .visits
                .iter()
                .any(|v| v.score.map_or(false, |score| score < REMISSION_SCORE_CEILING));
        }
        Ok(())
    }

    /// One stratify row per index event; clients under 12 at the index date
    /// (or with no usable birth date) are not stratified
    async fn stratify_data(&mut self, ctx: &PipelineContext) -> Result<()> {
        let ids: Vec<i64> = self.groups.iter().map(|g| g.patient_id).collect();
        let strat =
            Stratifier::load(ctx, &ids, DupPolicy::KeepLast, CoveragePolicy::Unknown).await?;
        let mut table = Table::new([COHORT_KEY, "Age", "Ethnicity", "Race", "Medicaid"]);
        for group in &self.groups {
            let Some(age) = strat
                .dob(group.patient_id)
                .map(|dob| age_at(dob, group.index_date.date()))
            else {
                continue;
            };
            if age < 12 {
                continue;
            }
            table.push_row(vec![
                Value::Str(group.key.clone()),
                Value::Str(age_bucket(age).to_string()),
                strat.ethnicity(group.patient_id),
                strat.race(group.patient_id),
                strat.medicaid(group.patient_id, group.index_date.date()),
            ])?;
        }
        self.stratify = Some(table);
        Ok(())
    }

    fn return_final_data(&mut self) -> Result<SubmeasureOutput> {
        let mut populace = Table::new(["PatientId", COHORT_KEY, "index_encounter_id", "numerator"]);
        for group in &self.groups {
            populace.push_row(vec![
                Value::Int(group.patient_id),
                Value::Str(group.key.clone()),
                Value::Int(group.index_encounter_id),
                Value::Bool(group.numerator),
            ])?;
        }
        let stratify = self
            .stratify
            .take()
            .ok_or_else(|| MeasureError::logic("DepRem stratified before final projection"))?;
        Ok(SubmeasureOutput { populace, stratify })
    }
}

/// Percentage of clients 12 years of age or older with Major Depression or
/// Dysthymia who reach remission six months after an index event date
pub struct DepRem;

impl DepRem {
    pub fn new() -> Self {
        Self
    }
}

impl Default for DepRem {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Measure for DepRem {
    fn name(&self) -> &str {
        "DEP REM"
    }

    async fn collect(&self, ctx: &PipelineContext) -> Result<Vec<MeasureDataset>> {
        let mut sub1 = DepRemSub1::new();
        let out = collect_measurement_data(&mut sub1, ctx).await?;
        Ok(vec![
            MeasureDataset::new("DepRem", out.populace),
            MeasureDataset::new("DepRem_stratify", out.stratify),
        ])
    }
}

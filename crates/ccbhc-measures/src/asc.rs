//! ASC - Unhealthy alcohol use screening and brief counseling
//!
//! Sub-measure 1: percentage of clients aged 18 and older screened for
//! unhealthy alcohol use with a systematic screening method within the last
//! 12 months. Sub-measure 2: percentage of clients identified as unhealthy
//! alcohol users in sub-measure 1 who received brief counseling.

use crate::context::PipelineContext;
use crate::error::{MeasureError, Result};
use crate::measure::{Measure, MeasureDataset};
use crate::stratify::{CoveragePolicy, DupPolicy, Stratifier};
use crate::submeasure::{
    collect_measurement_data, measurement_year_id, Submeasure, SubmeasureOutput, COHORT_KEY,
};
use async_trait::async_trait;
use ccbhc_core::dates::{age_at, sub_months};
use ccbhc_core::{Table, Value};
use ccbhc_emr::{CodeFilter, ScreeningTool};
use chrono::{Datelike, NaiveDate, NaiveDateTime};
use std::collections::{BTreeMap, HashMap, HashSet};

/// Preventive-visit CPT codes; one such visit qualifies a client even
/// without a second encounter in the year
const PREVENTIVE_CPT_CODES: &[&str] = &[
    "99385", "99386", "99387", "99395", "99396", "99397", "99401", "99402", "99403", "99404",
    "99411", "99412", "99429", "G0438", "G0439",
];

fn dementia_filter() -> CodeFilter {
    // Vascular dementia, dementia in other diseases, unspecified dementia
    CodeFilter::new().prefix("F01.").prefix("F02.").prefix("F03.")
}

#[derive(Debug, Clone)]
struct Visit {
    patient_id: i64,
    encounter_id: i64,
    visit: NaiveDateTime,
    age: Option<i64>,
    year: i32,
}

#[derive(Debug, Clone)]
struct CohortRecord {
    patient_id: i64,
    year: i32,
    key: String,
    encounter_id: i64,
    /// Most recent denominator-eligible encounter; anchors the lookback
    anchor: NaiveDateTime,
    window_start: NaiveDate,
    numerator: bool,
    screening_date: Option<NaiveDateTime>,
}

/// Clients screened for unhealthy alcohol use within the last 12 months
pub struct AscSub1 {
    visits: Vec<Visit>,
    cohort: Vec<CohortRecord>,
    stratify: Option<Table>,
}

impl AscSub1 {
    pub fn new() -> Self {
        Self {
            visits: Vec::new(),
            cohort: Vec::new(),
            stratify: None,
        }
    }

    /// Sub-measure 2 starts from these: clients screened and anchored
    fn numerator_seeds(&self) -> Vec<Sub2Seed> {
        self.cohort
            .iter()
            .filter(|r| r.numerator)
            .map(|r| Sub2Seed {
                patient_id: r.patient_id,
                year: r.year,
                last_encounter: r.anchor,
            })
            .collect()
    }
}

impl Default for AscSub1 {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Submeasure for AscSub1 {
    fn name(&self) -> &str {
        "ASC_sub_1"
    }

    /// Clients seen for at least two visits, or at least one preventive
    /// visit, during the measurement year
    async fn fetch_populace(&mut self, ctx: &PipelineContext) -> Result<()> {
        let encounters = ctx.source().encounters(ctx.period()).await?;
        let mut counts: HashMap<(i64, i32), usize> = HashMap::new();
        for e in &encounters {
            *counts.entry((e.patient_id, e.visit.year())).or_default() += 1;
        }
        self.visits = encounters
            .iter()
            .filter(|e| counts[&(e.patient_id, e.visit.year())] >= 2)
            .map(|e| Visit {
                patient_id: e.patient_id,
                encounter_id: e.encounter_id,
                visit: e.visit,
                age: e.dob.map(|dob| age_at(dob, e.visit.date())),
                year: e.visit.year(),
            })
            .collect();

        // preventive visits qualify on their own; the pull is code-filtered
        // only, each row carrying its own measurement year
        let preventive = ctx
            .source()
            .encounters_with_codes(None, PREVENTIVE_CPT_CODES)
            .await?;
        self.visits.extend(preventive.iter().map(|e| Visit {
            patient_id: e.patient_id,
            encounter_id: e.encounter_id,
            visit: e.visit,
            age: e.dob.map(|dob| age_at(dob, e.visit.date())),
            year: e.visit.year(),
        }));
        Ok(())
    }

    /// Remove clients under 18 and clients with dementia at any time through
    /// the end of their measurement year
    async fn remove_exclusions(&mut self, ctx: &PipelineContext) -> Result<()> {
        self.visits
            .retain(|v| v.age.map_or(false, |age| age >= 18));

        let dementia = ctx.source().diagnoses(&dementia_filter()).await?;
        let mut earliest_year: HashMap<i64, i32> = HashMap::new();
        for dx in dementia {
            if let Some(recorded) = dx.recorded_at {
                let year = recorded.year();
                earliest_year
                    .entry(dx.patient_id)
                    .and_modify(|y| *y = (*y).min(year))
                    .or_insert(year);
            }
        }
        self.visits.retain(|v| match earliest_year.get(&v.patient_id) {
            Some(first_dx_year) => v.year < *first_dx_year,
            None => true,
        });
        Ok(())
    }

    /// The most recent eligible encounter per client-year anchors the
    /// 12-month screening lookback
    async fn apply_time_constraint(&mut self, _ctx: &PipelineContext) -> Result<()> {
        let mut latest: BTreeMap<(i64, i32), &Visit> = BTreeMap::new();
        for visit in &self.visits {
            latest
                .entry((visit.patient_id, visit.year))
                .and_modify(|current| {
                    if (visit.visit, visit.encounter_id) > (current.visit, current.encounter_id) {
                        *current = visit;
                    }
                })
                .or_insert(visit);
        }
        self.cohort = latest
            .values()
            .map(|v| CohortRecord {
                patient_id: v.patient_id,
                year: v.year,
                key: measurement_year_id(v.patient_id, v.year),
                encounter_id: v.encounter_id,
                anchor: v.visit,
                window_start: sub_months(v.visit.date(), 12),
                numerator: false,
                screening_date: None,
            })
            .collect();
        Ok(())
    }

    /// Mark clients with a systematic screening inside their lookback window
    async fn find_performance_met(&mut self, ctx: &PipelineContext) -> Result<()> {
        let screenings = ctx.source().screenings(ScreeningTool::Audit, None).await?;
        let mut by_patient: HashMap<i64, Vec<NaiveDateTime>> = HashMap::new();
        for s in screenings {
            by_patient.entry(s.patient_id).or_default().push(s.visit);
        }
        for record in &mut self.cohort {
            let in_window = by_patient
                .get(&record.patient_id)
                .map(|dates| {
                    dates
                        .iter()
                        .filter(|d| {
                            d.date() >= record.window_start && d.date() <= record.anchor.date()
                        })
                        .max()
                        .copied()
                })
                .unwrap_or(None);
            record.numerator = in_window.is_some();
            record.screening_date = in_window;
        }
        Ok(())
    }

    async fn stratify_data(&mut self, ctx: &PipelineContext) -> Result<()> {
        let ids: Vec<i64> = self.cohort.iter().map(|r| r.patient_id).collect();
        let strat =
            Stratifier::load(ctx, &ids, DupPolicy::KeepFirst, CoveragePolicy::Unknown).await?;
        let mut table = Table::new([COHORT_KEY, "measurement_year", "Ethnicity", "Race", "Medicaid"]);
        for record in &self.cohort {
            table.push_row(vec![
                Value::Str(record.key.clone()),
                Value::Int(record.year as i64),
                strat.ethnicity(record.patient_id),
                strat.race(record.patient_id),
                strat.medicaid(record.patient_id, record.anchor.date()),
            ])?;
        }
        self.stratify = Some(table);
        Ok(())
    }

    fn return_final_data(&mut self) -> Result<SubmeasureOutput> {
        let mut populace = Table::new([
            COHORT_KEY,
            "PatientId",
            "EncounterID",
            "screening_date",
            "numerator",
        ]);
        for record in &self.cohort {
            populace.push_row(vec![
                Value::Str(record.key.clone()),
                Value::Int(record.patient_id),
                Value::Int(record.encounter_id),
                record.screening_date.into(),
                Value::Bool(record.numerator),
            ])?;
        }
        let stratify = self
            .stratify
            .take()
            .ok_or_else(|| MeasureError::logic("ASC_sub_1 stratified before final projection"))?;
        Ok(SubmeasureOutput { populace, stratify })
    }
}

/// One sub-measure 1 numerator client handed to sub-measure 2
#[derive(Debug, Clone)]
struct Sub2Seed {
    patient_id: i64,
    year: i32,
    last_encounter: NaiveDateTime,
}

#[derive(Debug, Clone)]
struct Sub2Candidate {
    patient_id: i64,
    year: i32,
    key: String,
    screening_encounter_id: i64,
    screening_date: NaiveDateTime,
}

#[derive(Debug, Clone)]
struct Sub2Record {
    patient_id: i64,
    year: i32,
    key: String,
    encounter_id: i64,
    screening_date: NaiveDateTime,
    numerator: bool,
}

/// Unhealthy alcohol users from sub-measure 1 who received brief counseling
pub struct AscSub2 {
    seeds: Vec<Sub2Seed>,
    candidates: Vec<Sub2Candidate>,
    cohort: Vec<Sub2Record>,
    stratify: Option<Table>,
}

impl AscSub2 {
    fn new(seeds: Vec<Sub2Seed>) -> Self {
        Self {
            seeds,
            candidates: Vec::new(),
            cohort: Vec::new(),
            stratify: None,
        }
    }
}

#[async_trait]
impl Submeasure for AscSub2 {
    fn name(&self) -> &str {
        "ASC_sub_2"
    }

    /// Sub-measure 1 numerator clients with an AUDIT score of 8 or above
    /// screened within 1 year of their anchor encounter
    async fn fetch_populace(&mut self, ctx: &PipelineContext) -> Result<()> {
        let seed_ids: HashSet<i64> = self.seeds.iter().map(|s| s.patient_id).collect();
        let audits = ctx.source().screenings(ScreeningTool::Audit, None).await?;
        let mut by_patient: HashMap<i64, Vec<&ccbhc_emr::ScreeningRow>> = HashMap::new();
        for s in &audits {
            if seed_ids.contains(&s.patient_id) && s.score.map_or(false, |score| score >= 8) {
                by_patient.entry(s.patient_id).or_default().push(s);
            }
        }
        for seed in &self.seeds {
            let Some(screenings) = by_patient.get(&seed.patient_id) else {
                continue;
            };
            let earliest = sub_months(seed.last_encounter.date(), 12);
            for s in screenings {
                if s.visit <= seed.last_encounter && s.visit.date() >= earliest {
                    self.candidates.push(Sub2Candidate {
                        patient_id: seed.patient_id,
                        year: seed.year,
                        key: measurement_year_id(seed.patient_id, seed.year),
                        screening_encounter_id: s.encounter_id,
                        screening_date: s.visit,
                    });
                }
            }
        }
        Ok(())
    }

    /// The starting population comes from sub-measure 1, which has already
    /// removed its exclusions
    async fn remove_exclusions(&mut self, _ctx: &PipelineContext) -> Result<()> {
        Ok(())
    }

    /// Counseling must happen at the screening encounter, so the constraint
    /// is carried by the encounter-id join in the performance check
    async fn apply_time_constraint(&mut self, _ctx: &PipelineContext) -> Result<()> {
        Ok(())
    }

    /// Brief counseling recorded against the screening encounter itself
    async fn find_performance_met(&mut self, ctx: &PipelineContext) -> Result<()> {
        let counselings = ctx.source().brief_counseling_encounters().await?;
        let counseled: HashSet<i64> = counselings.iter().map(|c| c.encounter_id).collect();

        let mut grouped: BTreeMap<String, Vec<&Sub2Candidate>> = BTreeMap::new();
        for candidate in &self.candidates {
            grouped.entry(candidate.key.clone()).or_default().push(candidate);
        }
        self.cohort = grouped
            .into_values()
            .map(|mut group| {
                group.sort_by_key(|c| (c.screening_date, c.screening_encounter_id));
                let matched = group
                    .iter()
                    .find(|c| counseled.contains(&c.screening_encounter_id));
                let chosen = matched.unwrap_or(&group[0]);
                Sub2Record {
                    patient_id: chosen.patient_id,
                    year: chosen.year,
                    key: chosen.key.clone(),
                    encounter_id: chosen.screening_encounter_id,
                    screening_date: chosen.screening_date,
                    numerator: matched.is_some(),
                }
            })
            .collect();
        Ok(())
    }

    async fn stratify_data(&mut self, ctx: &PipelineContext) -> Result<()> {
        let ids: Vec<i64> = self.cohort.iter().map(|r| r.patient_id).collect();
        let strat =
            Stratifier::load(ctx, &ids, DupPolicy::KeepFirst, CoveragePolicy::Unknown).await?;
        let mut table = Table::new([COHORT_KEY, "measurement_year", "Ethnicity", "Race", "Medicaid"]);
        for record in &self.cohort {
            table.push_row(vec![
                Value::Str(record.key.clone()),
                Value::Int(record.year as i64),
                strat.ethnicity(record.patient_id),
                strat.race(record.patient_id),
                strat.medicaid(record.patient_id, record.screening_date.date()),
            ])?;
        }
        self.stratify = Some(table);
        Ok(())
    }

    fn return_final_data(&mut self) -> Result<SubmeasureOutput> {
        let mut populace = Table::new([COHORT_KEY, "PatientId", "EncounterID", "numerator"]);
        for record in &self.cohort {
            populace.push_row(vec![
                Value::Str(record.key.clone()),
                Value::Int(record.patient_id),
                Value::Int(record.encounter_id),
                Value::Bool(record.numerator),
            ])?;
        }
        let stratify = self
            .stratify
            .take()
            .ok_or_else(|| MeasureError::logic("ASC_sub_2 stratified before final projection"))?;
        Ok(SubmeasureOutput { populace, stratify })
    }
}

/// Percentage of clients aged 18 years and older screened for unhealthy
/// alcohol use, and who received brief counseling if identified as an
/// unhealthy alcohol user
pub struct Asc;

impl Asc {
    pub fn new() -> Self {
        Self
    }
}

impl Default for Asc {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Measure for Asc {
    fn name(&self) -> &str {
        "ASC"
    }

    async fn collect(&self, ctx: &PipelineContext) -> Result<Vec<MeasureDataset>> {
        let mut sub1 = AscSub1::new();
        let out1 = collect_measurement_data(&mut sub1, ctx).await?;
        // sub 2 chains off sub 1's numerator in memory
        let mut sub2 = AscSub2::new(sub1.numerator_seeds());
        let out2 = collect_measurement_data(&mut sub2, ctx).await?;
        Ok(vec![
            MeasureDataset::new("ASC_sub_1", out1.populace),
            MeasureDataset::new("ASC_sub_1_stratify", out1.stratify),
            MeasureDataset::new("ASC_sub_2", out2.populace),
            MeasureDataset::new("ASC_sub_2_stratify", out2.stratify),
        ])
    }
}

//! Shared stratification
//!
//! Attaches Ethnicity, Race, and the Medicaid-only flag to a finished
//! cohort. Demographic duplicates and missing-coverage rendering differ by
//! measure, so both are policies chosen by the caller.

use crate::context::PipelineContext;
use crate::error::Result;
use ccbhc_core::Value;
use ccbhc_emr::InsuranceSpan;
use chrono::NaiveDate;
use std::collections::HashMap;

/// Which demographics row wins when a patient has several
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DupPolicy {
    KeepFirst,
    KeepLast,
}

/// How a patient with no active insurance span at the anchor date reports
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoveragePolicy {
    /// Render the Medicaid flag as the "Unknown" sentinel
    Unknown,
    /// Treat missing coverage as definitively not Medicaid-only
    NotCovered,
}

/// Demographic and coverage lookups for one cohort
pub struct Stratifier {
    dob: HashMap<i64, NaiveDate>,
    ethnicity: HashMap<i64, String>,
    race: HashMap<i64, String>,
    spans: HashMap<i64, Vec<InsuranceSpan>>,
    coverage: CoveragePolicy,
}

impl Stratifier {
    /// Fetch demographics and insurance spans for the given patients
    pub async fn load(
        ctx: &PipelineContext,
        patient_ids: &[i64],
        dup: DupPolicy,
        coverage: CoveragePolicy,
    ) -> Result<Self> {
        let mut ids: Vec<i64> = patient_ids.to_vec();
        ids.sort_unstable();
        ids.dedup();

        let mut dob = HashMap::new();
        let mut ethnicity = HashMap::new();
        let mut race = HashMap::new();
        for row in ctx.source().demographics(&ids).await? {
            if let Some(birth) = row.dob {
                dob.entry(row.patient_id).or_insert(birth);
            }
            let keep = match dup {
                DupPolicy::KeepFirst => !ethnicity.contains_key(&row.patient_id),
                DupPolicy::KeepLast => true,
            };
            if keep {
                if let Some(value) = row.ethnicity {
                    ethnicity.insert(row.patient_id, value);
                } else if dup == DupPolicy::KeepLast {
                    ethnicity.remove(&row.patient_id);
                }
                match row.race {
                    Some(value) => {
                        race.insert(row.patient_id, value);
                    }
                    None => {
                        if dup == DupPolicy::KeepLast {
                            race.remove(&row.patient_id);
                        }
                    }
                }
            }
        }

        let mut spans: HashMap<i64, Vec<InsuranceSpan>> = HashMap::new();
        for span in ctx.source().insurance_spans(&ids).await? {
            spans.entry(span.patient_id).or_default().push(span);
        }

        Ok(Self {
            dob,
            ethnicity,
            race,
            spans,
            coverage,
        })
    }

    /// Birth date for a patient, when the EMR has one
    pub fn dob(&self, patient_id: i64) -> Option<NaiveDate> {
        self.dob.get(&patient_id).copied()
    }

    /// Ethnicity value for a patient, "Unknown" when unresolved
    pub fn ethnicity(&self, patient_id: i64) -> Value {
        self.ethnicity
            .get(&patient_id)
            .map(|v| Value::Str(v.clone()))
            .unwrap_or_else(Value::unknown)
    }

    /// Race value for a patient, "Unknown" when unresolved
    pub fn race(&self, patient_id: i64) -> Value {
        self.race
            .get(&patient_id)
            .map(|v| Value::Str(v.clone()))
            .unwrap_or_else(Value::unknown)
    }

    /// Medicaid-only flag at the anchor date.
    ///
    /// Active spans encode Medicaid as 1 and anything else as 2; the flag is
    /// true exactly when the sum is 1 (one active plan, and it is Medicaid).
    /// Zero active spans render per the coverage policy.
    pub fn medicaid(&self, patient_id: i64, anchor: NaiveDate) -> Value {
        let active: Vec<&InsuranceSpan> = self
            .spans
            .get(&patient_id)
            .map(|spans| spans.iter().filter(|s| s.active_on(anchor)).collect())
            .unwrap_or_default();
        if active.is_empty() {
            return match self.coverage {
                CoveragePolicy::Unknown => Value::unknown(),
                CoveragePolicy::NotCovered => Value::Bool(false),
            };
        }
        let sum: i64 = active
            .iter()
            .map(|s| if s.is_medicaid() { 1 } else { 2 })
            .sum();
        Value::Bool(sum == 1)
    }
}

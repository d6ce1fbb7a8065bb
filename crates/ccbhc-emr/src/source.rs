//! Clinical data source seam
//!
//! One method per extraction shape the measures need. Implementations must
//! keep reads deterministic against a database snapshot: the pipeline's only
//! recovery path is a full re-run.

use crate::error::Result;
use crate::rows::{
    BillableVisitRow, CallRow, CounselingRow, DemographicsRow, DiagnosisRow, EncounterEventRow,
    EncounterRow, InsuranceSpan, ScreeningRow,
};
use async_trait::async_trait;
use ccbhc_core::MeasurementPeriod;

/// Screening instruments recognized by the warehouse
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScreeningTool {
    /// PHQ-9 administered to adults
    PhqAdult,
    /// PHQ-9M administered to minors
    PhqAdolescent,
    /// AUDIT alcohol use screening
    Audit,
    /// Social needs screening tool
    SocialNeeds,
}

/// One ICD-10 match pattern
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IcdMatch {
    /// Code family, e.g. every `F01.*` code
    Prefix(String),
    /// A single code
    Exact(String),
}

/// A diagnosis-code filter built from prefix and exact patterns
#[derive(Debug, Clone, Default)]
pub struct CodeFilter {
    patterns: Vec<IcdMatch>,
}

impl CodeFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn prefix(mut self, code: &str) -> Self {
        self.patterns.push(IcdMatch::Prefix(code.to_string()));
        self
    }

    pub fn exact(mut self, code: &str) -> Self {
        self.patterns.push(IcdMatch::Exact(code.to_string()));
        self
    }

    pub fn exacts(mut self, codes: &[&str]) -> Self {
        for code in codes {
            self.patterns.push(IcdMatch::Exact(code.to_string()));
        }
        self
    }

    pub fn patterns(&self) -> &[IcdMatch] {
        &self.patterns
    }

    /// Whether a concrete code satisfies any pattern
    pub fn matches(&self, code: &str) -> bool {
        self.patterns.iter().any(|p| match p {
            IcdMatch::Prefix(prefix) => code.starts_with(prefix.as_str()),
            IcdMatch::Exact(exact) => code == exact,
        })
    }
}

/// Parameterized reads against the clinical warehouse
#[async_trait]
pub trait ClinicalDataSource: Send + Sync {
    /// All encounters on or after the period start, with patient DOB
    async fn encounters(&self, period: &MeasurementPeriod) -> Result<Vec<EncounterRow>>;

    /// Encounters whose CPT code is in `codes`. `period` of `None` applies
    /// the code filter alone (the preventive-visit pull is not date bounded).
    async fn encounters_with_codes(
        &self,
        period: Option<&MeasurementPeriod>,
        codes: &[&str],
    ) -> Result<Vec<EncounterRow>>;

    /// Diagnoses whose ICD-10 code matches the filter, joined to the visit
    /// they were recorded at
    async fn diagnoses(&self, filter: &CodeFilter) -> Result<Vec<DiagnosisRow>>;

    /// Screening-tool administrations, optionally bounded to the period
    async fn screenings(
        &self,
        tool: ScreeningTool,
        period: Option<&MeasurementPeriod>,
    ) -> Result<Vec<ScreeningRow>>;

    /// Brief-counseling interventions recorded on treatment plans
    async fn brief_counseling_encounters(&self) -> Result<Vec<CounselingRow>>;

    /// First-contact calls starting in the period
    async fn intake_calls(&self, period: &MeasurementPeriod) -> Result<Vec<CallRow>>;

    /// Initial evaluation encounters in the period
    async fn initial_evaluations(&self, period: &MeasurementPeriod)
        -> Result<Vec<EncounterEventRow>>;

    /// Billable encounters from `year` onward (prior-visit lookback)
    async fn billable_encounters_since(&self, year: i32) -> Result<Vec<BillableVisitRow>>;

    /// Billable non-evaluation clinical services in the period
    async fn clinical_services(&self, period: &MeasurementPeriod)
        -> Result<Vec<EncounterEventRow>>;

    /// Ethnicity and race attributes for the given patients
    async fn demographics(&self, patient_ids: &[i64]) -> Result<Vec<DemographicsRow>>;

    /// Insurance plan spans for the given patients
    async fn insurance_spans(&self, patient_ids: &[i64]) -> Result<Vec<InsuranceSpan>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_filter_prefix_and_exact() {
        let filter = CodeFilter::new().prefix("F01.").exact("F21");
        assert!(filter.matches("F01.51"));
        assert!(filter.matches("F21"));
        assert!(!filter.matches("F20.0"));
        assert!(!filter.matches("F21.1"));
    }

    #[test]
    fn test_code_filter_exacts() {
        let filter = CodeFilter::new().exacts(&["F32.0", "F32.1"]);
        assert!(filter.matches("F32.0"));
        assert!(!filter.matches("F32.2"));
    }
}

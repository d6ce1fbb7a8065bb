//! The sub-measure contract and its driver
//!
//! Every sub-measure implements the same step set; the driver enforces the
//! order `get_denominator -> get_numerator -> stratify_data ->
//! return_final_data` and logs each transition for the audit trail. Steps
//! are deterministic against a database snapshot, so a failed run is always
//! re-run whole rather than resumed.

use crate::context::PipelineContext;
use crate::error::{MeasureError, Result};
use async_trait::async_trait;
use ccbhc_core::Table;
use std::fmt;

/// Pipeline stages, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Denominator,
    Numerator,
    Stratification,
    Final,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Stage::Denominator => "denominator",
            Stage::Numerator => "numerator",
            Stage::Stratification => "stratification",
            Stage::Final => "final",
        };
        write!(f, "{label}")
    }
}

/// The two report tables a sub-measure produces
#[derive(Debug, Clone)]
pub struct SubmeasureOutput {
    /// Cohort table: one row per patient-measurement-year
    pub populace: Table,
    /// Stratification table, keyed the same way
    pub stratify: Table,
}

/// One sub-measure's computation steps.
///
/// The provided `get_denominator` / `get_numerator` methods fix the internal
/// ordering: populace before exclusions, time constraint before the
/// performance check. Sub-measures whose constraint is carried by a join key
/// implement `apply_time_constraint` as a no-op.
#[async_trait]
pub trait Submeasure: Send {
    fn name(&self) -> &str;

    /// Build the initial eligible population
    async fn fetch_populace(&mut self, ctx: &PipelineContext) -> Result<()>;

    /// Remove clinical and temporal exclusions from the population
    async fn remove_exclusions(&mut self, ctx: &PipelineContext) -> Result<()>;

    /// Narrow the population to the performance window
    async fn apply_time_constraint(&mut self, ctx: &PipelineContext) -> Result<()>;

    /// Decide which denominator members met performance
    async fn find_performance_met(&mut self, ctx: &PipelineContext) -> Result<()>;

    /// Attach demographics and coverage to the final cohort
    async fn stratify_data(&mut self, ctx: &PipelineContext) -> Result<()>;

    /// Project both tables down to their report column sets
    fn return_final_data(&mut self) -> Result<SubmeasureOutput>;

    async fn get_denominator(&mut self, ctx: &PipelineContext) -> Result<()> {
        self.fetch_populace(ctx).await?;
        self.remove_exclusions(ctx).await
    }

    async fn get_numerator(&mut self, ctx: &PipelineContext) -> Result<()> {
        self.apply_time_constraint(ctx).await?;
        self.find_performance_met(ctx).await
    }
}

/// Join key shared by every cohort and stratify table
pub const COHORT_KEY: &str = "patient_measurement_year_id";

/// Composite key for one patient's measurement year
pub fn measurement_year_id(patient_id: i64, year: i32) -> String {
    format!("{patient_id}-{year}")
}

/// Drive a sub-measure through the fixed protocol.
///
/// Each stage logs start, success, and failure; a failed stage aborts the
/// sub-measure with the error intact for the per-measure handler.
pub async fn collect_measurement_data<S>(
    sub: &mut S,
    ctx: &PipelineContext,
) -> Result<SubmeasureOutput>
where
    S: Submeasure + ?Sized,
{
    let name = sub.name().to_string();
    run_stage(&name, Stage::Denominator, sub.get_denominator(ctx)).await?;
    run_stage(&name, Stage::Numerator, sub.get_numerator(ctx)).await?;
    run_stage(&name, Stage::Stratification, sub.stratify_data(ctx)).await?;

    tracing::info!(submeasure = %name, stage = %Stage::Final, "projecting final data");
    let output = match sub.return_final_data() {
        Ok(output) => output,
        Err(err) => {
            tracing::error!(submeasure = %name, stage = %Stage::Final, error = %err, "stage failed");
            return Err(err);
        }
    };
    verify_unique_key(&name, &output)?;
    tracing::info!(
        submeasure = %name,
        cohort_rows = output.populace.len(),
        stratify_rows = output.stratify.len(),
        "sub-measure complete"
    );
    Ok(output)
}

async fn run_stage(
    name: &str,
    stage: Stage,
    step: impl std::future::Future<Output = Result<()>>,
) -> Result<()> {
    tracing::info!(submeasure = %name, stage = %stage, "computing");
    match step.await {
        Ok(()) => {
            tracing::info!(submeasure = %name, stage = %stage, "complete");
            Ok(())
        }
        Err(err) => {
            tracing::error!(submeasure = %name, stage = %stage, error = %err, "stage failed");
            Err(err)
        }
    }
}

fn verify_unique_key(name: &str, output: &SubmeasureOutput) -> Result<()> {
    for (label, table) in [("populace", &output.populace), ("stratify", &output.stratify)] {
        if table.columns().iter().any(|c| c == COHORT_KEY)
            && !table.is_unique_key(COHORT_KEY)?
        {
            return Err(MeasureError::logic(format!(
                "{name} {label} table has duplicate {COHORT_KEY} values"
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_measurement_year_id_format() {
        assert_eq!(measurement_year_id(123456, 2024), "123456-2024");
    }

    #[test]
    fn test_stage_labels() {
        assert_eq!(Stage::Denominator.to_string(), "denominator");
        assert_eq!(Stage::Final.to_string(), "final");
    }
}

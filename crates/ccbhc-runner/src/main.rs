//! CCBHC measure batch runner
//!
//! Runs every measure against the clinical warehouse and replaces the
//! report tables. One measure failing is logged and skipped; the rest of
//! the batch continues, and the missing tables signal the failure
//! downstream.

mod config;

use crate::config::RunnerConfig;
use anyhow::Result;
use ccbhc_core::MeasurementPeriod;
use ccbhc_emr::{MeasureSink, PgClinicalSource, PgMeasureSink};
use ccbhc_measures::{
    Asc, CdfAd, CdfCh, DepRem, IServ, Measure, MeasureDataset, PipelineContext, Sdoh,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Sub-measure 2 of I-SERV is a strict subset of sub-measure 1, so one
/// merged stratify table serves both. The name is kept verbatim for the
/// dashboard that already reads it.
const ISERV_MERGED_STRATIFY: &str = "ptISERV_sub_1_stratify_and_2_strtatify";

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing()?;

    let cfg = RunnerConfig::load()?;
    info!(
        measurement_year = cfg.measurement_year,
        "starting measure batch"
    );

    let source = PgClinicalSource::connect(
        &cfg.database_url,
        cfg.max_connections,
        Duration::from_secs(cfg.acquire_timeout_secs),
    )
    .await?;
    let sink = PgMeasureSink::with_pool(source.pool().clone());
    let ctx = PipelineContext::new(
        Arc::new(source),
        MeasurementPeriod::new(cfg.measurement_year),
    );

    let measures: Vec<Box<dyn Measure>> = vec![
        Box::new(Asc::new()),
        Box::new(CdfAd::new()),
        Box::new(CdfCh::new()),
        Box::new(DepRem::new()),
        Box::new(IServ::new()),
        Box::new(Sdoh::new()),
    ];

    for measure in &measures {
        if let Err(err) = run_measure(measure.as_ref(), &ctx, &sink).await {
            error!(measure = measure.name(), error = %err, "measure failed; skipping");
        }
    }

    info!("measure batch finished");
    Ok(())
}

async fn run_measure(
    measure: &dyn Measure,
    ctx: &PipelineContext,
    sink: &dyn MeasureSink,
) -> Result<()> {
    info!(measure = measure.name(), "computing measure");
    let datasets = measure.collect(ctx).await?;
    for (name, dataset) in plan_writes(&datasets) {
        sink.write_table(&name, &dataset.table).await?;
        info!(measure = measure.name(), table = %name, "pushed dataset");
    }
    Ok(())
}

/// Map dataset keys to sink table names: `pt` + key, with the I-SERV
/// stratify exception folded in
fn plan_writes<'a>(datasets: &'a [MeasureDataset]) -> Vec<(String, &'a MeasureDataset)> {
    datasets
        .iter()
        .filter_map(|dataset| match dataset.key.as_str() {
            "ISERV_sub_1_stratify" => Some((ISERV_MERGED_STRATIFY.to_string(), dataset)),
            "ISERV_sub_2_stratify" => None,
            key => Some((format!("pt{key}"), dataset)),
        })
        .collect()
}

fn init_tracing() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ccbhc_runner=info,ccbhc_measures=info,ccbhc_emr=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to initialize tracing: {}", e))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ccbhc_core::Table;

    fn dataset(key: &str) -> MeasureDataset {
        MeasureDataset::new(key, Table::new(["patient_measurement_year_id"]))
    }

    #[test]
    fn test_plan_writes_prefixes_keys() {
        let datasets = vec![dataset("ASC_sub_1"), dataset("ASC_sub_1_stratify")];
        let plan = plan_writes(&datasets);
        assert_eq!(plan[0].0, "ptASC_sub_1");
        assert_eq!(plan[1].0, "ptASC_sub_1_stratify");
    }

    #[test]
    fn test_plan_writes_merges_iserv_stratify() {
        let datasets = vec![
            dataset("ISERV_sub_1"),
            dataset("ISERV_sub_1_stratify"),
            dataset("IServ_sub1_exclusions"),
            dataset("ISERV_sub_2"),
            dataset("ISERV_sub_2_stratify"),
            dataset("IServ_sub2_exclusions"),
        ];
        let plan = plan_writes(&datasets);
        let names: Vec<&str> = plan.iter().map(|(name, _)| name.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "ptISERV_sub_1",
                ISERV_MERGED_STRATIFY,
                "ptIServ_sub1_exclusions",
                "ptISERV_sub_2",
                "ptIServ_sub2_exclusions",
            ]
        );
    }
}

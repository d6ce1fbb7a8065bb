//! Pipeline execution context
//!
//! The context carries the data source handle and the measurement period and
//! is passed explicitly to every sub-measure step.

use ccbhc_core::MeasurementPeriod;
use ccbhc_emr::ClinicalDataSource;
use std::sync::Arc;

/// Everything a sub-measure needs to run
#[derive(Clone)]
pub struct PipelineContext {
    source: Arc<dyn ClinicalDataSource>,
    period: MeasurementPeriod,
}

impl PipelineContext {
    pub fn new(source: Arc<dyn ClinicalDataSource>, period: MeasurementPeriod) -> Self {
        Self { source, period }
    }

    pub fn source(&self) -> &dyn ClinicalDataSource {
        self.source.as_ref()
    }

    pub fn period(&self) -> &MeasurementPeriod {
        &self.period
    }
}

//! The measure contract
//!
//! A measure owns one or more sub-measures, runs them in dependency order
//! (some sub-measures start from a sibling's numerator output), and hands
//! back named datasets for the sink.

use crate::context::PipelineContext;
use crate::error::Result;
use async_trait::async_trait;
use ccbhc_core::Table;

/// One named dataset produced by a measure
#[derive(Debug, Clone)]
pub struct MeasureDataset {
    /// Dataset key; the runner derives the sink table name from it
    pub key: String,
    pub table: Table,
}

impl MeasureDataset {
    pub fn new(key: impl Into<String>, table: Table) -> Self {
        Self {
            key: key.into(),
            table,
        }
    }
}

/// A standardized CCBHC performance metric
#[async_trait]
pub trait Measure: Send + Sync {
    fn name(&self) -> &str;

    /// Compute every sub-measure and return the datasets in sink order
    async fn collect(&self, ctx: &PipelineContext) -> Result<Vec<MeasureDataset>>;
}

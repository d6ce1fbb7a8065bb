//! Error types for measure computation

use thiserror::Error;

/// Result type alias for measure operations
pub type Result<T> = std::result::Result<T, MeasureError>;

/// Errors raised while computing a sub-measure
#[derive(Error, Debug)]
pub enum MeasureError {
    /// Extraction or write against the warehouse failed; aborts the
    /// sub-measure and is caught per measure by the runner
    #[error("Data access error: {0}")]
    DataAccess(#[from] ccbhc_emr::SourceError),

    /// A pipeline invariant was violated (missing upstream step, duplicate
    /// cohort keys, empty required join); fatal, never retried
    #[error("Logic error: {0}")]
    Logic(String),

    /// Building an output table failed
    #[error("Table error: {0}")]
    Table(#[from] ccbhc_core::error::CoreError),
}

impl MeasureError {
    pub fn logic(msg: impl Into<String>) -> Self {
        MeasureError::Logic(msg.into())
    }
}

//! Error types for CCBHC Core

use thiserror::Error;

/// Core error type
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Column not found: {0}")]
    ColumnNotFound(String),

    #[error("Row width mismatch: expected {expected} values, got {got}")]
    RowWidth { expected: usize, got: usize },

    #[error("Invalid value: {0}")]
    InvalidValue(String),
}

pub type Result<T> = std::result::Result<T, CoreError>;

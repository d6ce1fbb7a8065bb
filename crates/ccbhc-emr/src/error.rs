//! Error types for the data access layer

use thiserror::Error;

/// Result type alias for data access operations
pub type Result<T> = std::result::Result<T, SourceError>;

/// Errors raised by the clinical data source or the reporting sink
#[derive(Error, Debug)]
pub enum SourceError {
    /// Query or write against the database failed
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A fetched row could not be converted into its typed form
    #[error("Row decode error: {0}")]
    Decode(String),

    /// Table name outside the identifier charset accepted by the sink
    #[error("Invalid output table name: {0}")]
    InvalidTableName(String),

    /// Table shape problem while writing
    #[error("Table error: {0}")]
    Table(#[from] ccbhc_core::error::CoreError),
}

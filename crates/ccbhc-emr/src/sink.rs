//! Reporting sink seam
//!
//! Finished sub-measure tables are pushed under fixed names with full
//! replacement semantics: downstream dashboards read whole tables, and the
//! absence of a table after a run signals that its measure failed.

use crate::error::Result;
use async_trait::async_trait;
use ccbhc_core::Table;

/// Replace-mode writer for report tables
#[async_trait]
pub trait MeasureSink: Send + Sync {
    /// Replace `name` with `table`, creating it if missing
    async fn write_table(&self, name: &str, table: &Table) -> Result<()>;
}

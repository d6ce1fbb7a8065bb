//! In-memory tables handed to the sink
//!
//! `Table` is the tabular dataset that moves between the pipeline and the
//! sink. Column names are part of the reporting contract and are written
//! verbatim, so they are fixed at construction time.

use crate::error::{CoreError, Result};
use crate::value::Value;
use std::collections::HashSet;

/// A named-column, row-oriented table
#[derive(Debug, Clone, PartialEq)]
pub struct Table {
    columns: Vec<String>,
    rows: Vec<Vec<Value>>,
}

impl Table {
    /// Create an empty table with a fixed column set
    pub fn new<S: Into<String>>(columns: impl IntoIterator<Item = S>) -> Self {
        Self {
            columns: columns.into_iter().map(Into::into).collect(),
            rows: Vec::new(),
        }
    }

    /// Append a row; the row must match the column count
    pub fn push_row(&mut self, row: Vec<Value>) -> Result<()> {
        if row.len() != self.columns.len() {
            return Err(CoreError::RowWidth {
                expected: self.columns.len(),
                got: row.len(),
            });
        }
        self.rows.push(row);
        Ok(())
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<Value>] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Index of a named column
    pub fn column_index(&self, name: &str) -> Result<usize> {
        self.columns
            .iter()
            .position(|c| c == name)
            .ok_or_else(|| CoreError::ColumnNotFound(name.to_string()))
    }

    /// All values of a named column, in row order
    pub fn column(&self, name: &str) -> Result<Vec<&Value>> {
        let idx = self.column_index(name)?;
        Ok(self.rows.iter().map(|r| &r[idx]).collect())
    }

    /// True when every value of the named column is distinct.
    ///
    /// Cohort and stratify tables key on `patient_measurement_year_id`; the
    /// pipeline asserts this before anything reaches the sink.
    pub fn is_unique_key(&self, name: &str) -> Result<bool> {
        let idx = self.column_index(name)?;
        let mut seen = HashSet::new();
        for row in &self.rows {
            if !seen.insert(row[idx].to_string()) {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Table {
        let mut t = Table::new(["patient_measurement_year_id", "numerator"]);
        t.push_row(vec![Value::Str("1-2024".into()), Value::Bool(true)])
            .unwrap();
        t.push_row(vec![Value::Str("2-2024".into()), Value::Bool(false)])
            .unwrap();
        t
    }

    #[test]
    fn test_push_and_read() {
        let t = sample();
        assert_eq!(t.len(), 2);
        assert_eq!(t.columns(), &["patient_measurement_year_id", "numerator"]);
        let col = t.column("numerator").unwrap();
        assert_eq!(col, vec![&Value::Bool(true), &Value::Bool(false)]);
    }

    #[test]
    fn test_row_width_mismatch() {
        let mut t = sample();
        let err = t.push_row(vec![Value::Int(1)]).unwrap_err();
        assert!(matches!(err, CoreError::RowWidth { expected: 2, got: 1 }));
    }

    #[test]
    fn test_missing_column() {
        let t = sample();
        assert!(t.column("nope").is_err());
    }

    #[test]
    fn test_unique_key() {
        let mut t = sample();
        assert!(t.is_unique_key("patient_measurement_year_id").unwrap());
        t.push_row(vec![Value::Str("1-2024".into()), Value::Bool(true)])
            .unwrap();
        assert!(!t.is_unique_key("patient_measurement_year_id").unwrap());
    }
}

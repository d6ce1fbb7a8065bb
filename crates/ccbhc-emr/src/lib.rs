//! CCBHC EMR - Data access layer for the quality measure pipeline
//!
//! This crate owns the two external seams of the pipeline:
//! - [`ClinicalDataSource`]: typed, parameterized reads against the clinical
//!   warehouse (encounters, diagnoses, screenings, coverage, demographics)
//! - [`MeasureSink`]: replace-mode writes of finished report tables
//!
//! Both seams ship a PostgreSQL implementation backed by `sqlx` and an
//! in-memory implementation for tests.

pub mod error;
pub mod memory;
pub mod postgres;
pub mod rows;
pub mod sink;
pub mod source;

pub use error::{Result, SourceError};
pub use memory::{
    MemoryCall, MemoryDiagnosis, MemoryEncounter, MemoryPatient, MemoryScreening, MemorySink,
    MemorySource,
};
pub use postgres::{PgClinicalSource, PgMeasureSink};
pub use rows::{
    BillableVisitRow, CallRow, CounselingRow, DemographicsRow, DiagnosisRow, EncounterEventRow,
    EncounterRow, InsuranceSpan, ScreeningRow,
};
pub use sink::MeasureSink;
pub use source::{ClinicalDataSource, CodeFilter, IcdMatch, ScreeningTool};

//! DEP-REM measure behavior against fixture data

mod common;

use ccbhc_core::Value;
use ccbhc_emr::{MemorySource, ScreeningTool};
use ccbhc_measures::{DepRem, Measure};
use common::*;

async fn run_dep_rem(source: MemorySource) -> Vec<ccbhc_measures::MeasureDataset> {
    DepRem::new()
        .collect(&ctx(source))
        .await
        .expect("measure runs")
}

fn phq(patient_id: i64, encounter_id: i64, visit: chrono::NaiveDateTime, score: i64) -> ccbhc_emr::MemoryScreening {
    screening(ScreeningTool::PhqAdult, patient_id, encounter_id, visit, Some(score))
}

/// A score below five inside the six-month window reaches remission.
#[tokio::test]
async fn test_remission_inside_window() {
    let source = MemorySource {
        patients: vec![patient(1, d(1990, 1, 1))],
        screenings: vec![
            phq(1, 10, dt(2024, 1, 10), 15),
            // Jan 10 + 6 months = Jul 10; Jul 5 sits inside +/- 60 days
            phq(1, 11, dt(2024, 7, 5), 4),
        ],
        ..MemorySource::default()
    };
    let datasets = run_dep_rem(source).await;
    let populace = &datasets[0].table;
    assert_eq!(cell(populace, "1-2024", "numerator"), Value::Bool(true));
    assert_eq!(
        cell(populace, "1-2024", "index_encounter_id"),
        Value::Int(10)
    );
}

/// A low follow-up score outside the window does not count.
#[tokio::test]
async fn test_low_score_outside_window_misses() {
    let source = MemorySource {
        patients: vec![patient(1, d(1990, 1, 1))],
        screenings: vec![
            phq(1, 10, dt(2024, 1, 10), 15),
            // window ends Sep 8; Oct 1 is too late
            phq(1, 11, dt(2024, 10, 1), 4),
        ],
        ..MemorySource::default()
    };
    let datasets = run_dep_rem(source).await;
    assert_eq!(
        cell(&datasets[0].table, "1-2024", "numerator"),
        Value::Bool(false)
    );
}

/// The window is inclusive at its late edge (index + 6 months + 60 days).
#[tokio::test]
async fn test_window_late_edge_inclusive() {
    let source = MemorySource {
        patients: vec![patient(1, d(1990, 1, 1))],
        screenings: vec![
            phq(1, 10, dt_at(2024, 1, 10, 9), 15),
            // exactly index + 6 months + 60 days, same time of day
            phq(1, 11, dt_at(2024, 9, 8, 9), 2),
        ],
        ..MemorySource::default()
    };
    let datasets = run_dep_rem(source).await;
    assert_eq!(
        cell(&datasets[0].table, "1-2024", "numerator"),
        Value::Bool(true)
    );
}

/// Clients whose scores never exceed nine have no index event at all.
#[tokio::test]
async fn test_no_index_event_means_no_cohort_row() {
    let source = MemorySource {
        patients: vec![patient(1, d(1990, 1, 1))],
        screenings: vec![phq(1, 10, dt(2024, 1, 10), 8), phq(1, 11, dt(2024, 7, 5), 3)],
        ..MemorySource::default()
    };
    let datasets = run_dep_rem(source).await;
    assert!(datasets[0].table.is_empty());
}

/// An encounter dated before the client's first index event is never
/// attributed to a later index event.
#[tokio::test]
async fn test_encounter_before_index_is_dropped() {
    let source = MemorySource {
        patients: vec![patient(1, d(1990, 1, 1))],
        screenings: vec![
            // low score before any index event: dropped entirely
            phq(1, 9, dt(2024, 5, 2), 4),
            // index event in July; remission window centers on next January
            phq(1, 10, dt(2024, 7, 1), 15),
        ],
        ..MemorySource::default()
    };
    let datasets = run_dep_rem(source).await;
    assert_eq!(
        cell(&datasets[0].table, "1-2024", "numerator"),
        Value::Bool(false)
    );
}

/// Encounters in the next calendar year still belong to the prior year's
/// index group.
#[tokio::test]
async fn test_cross_year_attribution() {
    let source = MemorySource {
        patients: vec![patient(1, d(1990, 1, 1))],
        screenings: vec![
            phq(1, 10, dt(2024, 12, 1), 14),
            // Jun 1 2025 center, in window, and attributed to 2024's index
            phq(1, 11, dt(2025, 5, 28), 3),
        ],
        ..MemorySource::default()
    };
    let datasets = run_dep_rem(source).await;
    assert_eq!(keys(&datasets[0].table), vec!["1-2024"]);
    assert_eq!(
        cell(&datasets[0].table, "1-2024", "numerator"),
        Value::Bool(true)
    );
}

/// A disqualifying diagnosis inside the exclusion range removes the index
/// group; one after the range does not.
#[tokio::test]
async fn test_exclusion_diagnosis_range() {
    let source = MemorySource {
        patients: vec![patient(1, d(1990, 1, 1)), patient(2, d(1990, 1, 1))],
        screenings: vec![
            phq(1, 10, dt(2024, 1, 10), 15),
            phq(1, 11, dt(2024, 7, 5), 4),
            phq(2, 20, dt(2024, 1, 10), 15),
            phq(2, 21, dt(2024, 7, 5), 4),
        ],
        diagnoses: vec![
            // inside patient 1's exclusion range (ends Sep 8)
            diagnosis(1, "F31.2", dt(2024, 3, 1)),
            // after patient 2's range
            diagnosis(2, "F31.2", dt(2024, 10, 1)),
        ],
        ..MemorySource::default()
    };
    let datasets = run_dep_rem(source).await;
    assert_eq!(keys(&datasets[0].table), vec!["2-2024"]);
}

/// Clients under 12 at the index date keep their cohort row but are not
/// stratified.
#[tokio::test]
async fn test_under_twelve_not_stratified() {
    let source = MemorySource {
        patients: vec![patient(1, d(2015, 1, 1)), patient(2, d(1990, 1, 1))],
        screenings: vec![
            phq(1, 10, dt(2024, 1, 10), 15),
            phq(2, 20, dt(2024, 1, 10), 15),
        ],
        ..MemorySource::default()
    };
    let datasets = run_dep_rem(source).await;
    let populace = &datasets[0].table;
    let stratify = &datasets[1].table;
    assert_eq!(keys(populace).len(), 2);
    assert_eq!(keys(stratify), vec!["2-2024"]);
    assert_eq!(cell(stratify, "2-2024", "Age"), Value::Str("18+".into()));
}

/// Ages 12 through 17 land in the pediatric bucket.
#[tokio::test]
async fn test_age_bucket_for_adolescent() {
    let source = MemorySource {
        patients: vec![patient(1, d(2010, 1, 1))],
        screenings: vec![phq(1, 10, dt(2024, 6, 1), 15)],
        ..MemorySource::default()
    };
    let datasets = run_dep_rem(source).await;
    assert_eq!(
        cell(&datasets[1].table, "1-2024", "Age"),
        Value::Str("12-18".into())
    );
}

//! SDOH measure behavior against fixture data

mod common;

use ccbhc_core::Value;
use ccbhc_emr::{MemorySource, ScreeningTool};
use ccbhc_measures::{Measure, MeasureDataset, Sdoh};
use common::*;

async fn run_sdoh(source: MemorySource) -> Vec<MeasureDataset> {
    Sdoh::new()
        .collect(&ctx(source))
        .await
        .expect("measure runs")
}

/// An established adult passes with any screening in the year.
#[tokio::test]
async fn test_adult_with_screening_passes() {
    let source = MemorySource {
        patients: vec![patient(1, d(1990, 1, 1))],
        encounters: vec![coded_encounter(1, 10, dt(2024, 2, 1), "99213")],
        screenings: vec![screening(ScreeningTool::SocialNeeds, 1, 100, dt(2024, 5, 1), None)],
        ..MemorySource::default()
    };
    let datasets = run_sdoh(source).await;
    let populace = &datasets[0].table;
    assert_eq!(cell(populace, "1-2024", "numerator"), Value::Bool(true));
    assert_eq!(cell(populace, "1-2024", "screening_id"), Value::Int(100));
}

#[tokio::test]
async fn test_adult_without_screening_fails() {
    let source = MemorySource {
        patients: vec![patient(1, d(1990, 1, 1))],
        encounters: vec![coded_encounter(1, 10, dt(2024, 2, 1), "99213")],
        ..MemorySource::default()
    };
    let datasets = run_sdoh(source).await;
    assert_eq!(
        cell(&datasets[0].table, "1-2024", "numerator"),
        Value::Bool(false)
    );
}

/// A client who turns 18 mid-year only passes with a screening on or after
/// the birthday.
#[tokio::test]
async fn test_eighteen_year_old_needs_screening_after_birthday() {
    let base = MemorySource {
        patients: vec![patient(1, d(2006, 6, 15))],
        encounters: vec![
            // still 17: never anchors the cohort
            coded_encounter(1, 10, dt(2024, 3, 1), "99213"),
            // first eligible encounter after the birthday
            coded_encounter(1, 11, dt(2024, 7, 1), "99213"),
        ],
        ..MemorySource::default()
    };

    let mut before = base.clone();
    before.screenings = vec![screening(ScreeningTool::SocialNeeds, 1, 100, dt(2024, 5, 1), None)];
    let datasets = run_sdoh(before).await;
    let populace = &datasets[0].table;
    assert_eq!(cell(populace, "1-2024", "EncounterId"), Value::Int(11));
    assert_eq!(cell(populace, "1-2024", "numerator"), Value::Bool(false));

    let mut after = base.clone();
    after.screenings = vec![screening(ScreeningTool::SocialNeeds, 1, 100, dt(2024, 8, 1), None)];
    let datasets = run_sdoh(after).await;
    assert_eq!(
        cell(&datasets[0].table, "1-2024", "numerator"),
        Value::Bool(true)
    );
}

/// Clients under 18 all year never enter the denominator.
#[tokio::test]
async fn test_minor_excluded() {
    let source = MemorySource {
        patients: vec![patient(1, d(2010, 1, 1))],
        encounters: vec![coded_encounter(1, 10, dt(2024, 2, 1), "99213")],
        screenings: vec![screening(ScreeningTool::SocialNeeds, 1, 100, dt(2024, 5, 1), None)],
        ..MemorySource::default()
    };
    let datasets = run_sdoh(source).await;
    assert!(datasets[0].table.is_empty());
}

/// The latest screening of the year is the one reported.
#[tokio::test]
async fn test_latest_screening_reported() {
    let source = MemorySource {
        patients: vec![patient(1, d(1990, 1, 1))],
        encounters: vec![coded_encounter(1, 10, dt(2024, 2, 1), "99213")],
        screenings: vec![
            screening(ScreeningTool::SocialNeeds, 1, 100, dt(2024, 3, 1), None),
            screening(ScreeningTool::SocialNeeds, 1, 101, dt(2024, 9, 1), None),
        ],
        ..MemorySource::default()
    };
    let datasets = run_sdoh(source).await;
    let populace = &datasets[0].table;
    assert_eq!(cell(populace, "1-2024", "screening_id"), Value::Int(101));
    assert_eq!(
        cell(populace, "1-2024", "screening_date"),
        Value::DateTime(dt(2024, 9, 1))
    );
}

/// Missing coverage reports as false for this measure; the stratify table
/// never carries nulls.
#[tokio::test]
async fn test_stratify_fills_and_medicaid_policy() {
    let source = MemorySource {
        patients: vec![patient(1, d(1990, 1, 1)), patient(2, d(1985, 1, 1))],
        encounters: vec![
            coded_encounter(1, 10, dt(2024, 2, 1), "99213"),
            coded_encounter(2, 20, dt(2024, 2, 1), "99213"),
        ],
        insurance: vec![medicaid_span(1, d(2023, 1, 1))],
        ..MemorySource::default()
    };
    let datasets = run_sdoh(source).await;
    let stratify = &datasets[1].table;
    assert_eq!(cell(stratify, "1-2024", "Medicaid"), Value::Bool(true));
    assert_eq!(cell(stratify, "2-2024", "Medicaid"), Value::Bool(false));
    assert!(stratify.is_unique_key("patient_measurement_year_id").unwrap());
}

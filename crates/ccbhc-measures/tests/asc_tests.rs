//! ASC measure behavior against fixture data

mod common;

use ccbhc_core::Value;
use ccbhc_emr::{CounselingRow, MemorySource, ScreeningTool};
use ccbhc_measures::{Asc, Measure};
use common::*;

async fn run_asc(source: MemorySource) -> Vec<ccbhc_measures::MeasureDataset> {
    Asc::new().collect(&ctx(source)).await.expect("measure runs")
}

/// Two qualifying visits and an in-window screening produce a numerator hit;
/// dropping the second visit removes the client entirely.
#[tokio::test]
async fn test_two_visits_with_screening_meets_numerator() {
    let source = MemorySource {
        patients: vec![patient(1, d(2006, 3, 15))],
        encounters: vec![
            encounter(1, 10, dt(2024, 3, 15)),
            encounter(1, 11, dt(2024, 6, 1)),
        ],
        screenings: vec![screening(ScreeningTool::Audit, 1, 100, dt(2024, 1, 10), Some(3))],
        ..MemorySource::default()
    };
    let datasets = run_asc(source).await;
    let populace = &datasets[0].table;
    assert_eq!(cell(populace, "1-2024", "numerator"), Value::Bool(true));
    assert_eq!(
        cell(populace, "1-2024", "screening_date"),
        Value::DateTime(dt(2024, 1, 10))
    );
}

#[tokio::test]
async fn test_single_visit_without_preventive_code_is_dropped() {
    let source = MemorySource {
        patients: vec![patient(1, d(2006, 3, 15))],
        encounters: vec![encounter(1, 10, dt(2024, 3, 15))],
        screenings: vec![screening(ScreeningTool::Audit, 1, 100, dt(2024, 1, 10), Some(3))],
        ..MemorySource::default()
    };
    let datasets = run_asc(source).await;
    assert!(datasets[0].table.is_empty());
}

#[tokio::test]
async fn test_single_preventive_visit_qualifies() {
    let source = MemorySource {
        patients: vec![patient(1, d(1990, 1, 1))],
        encounters: vec![coded_encounter(1, 10, dt(2024, 5, 1), "99385")],
        ..MemorySource::default()
    };
    let datasets = run_asc(source).await;
    assert_eq!(keys(&datasets[0].table), vec!["1-2024"]);
    assert_eq!(cell(&datasets[0].table, "1-2024", "numerator"), Value::Bool(false));
}

/// Age boundary is inclusive at 18; a 17-year-old is excluded.
#[tokio::test]
async fn test_age_boundary_at_encounter_date() {
    let source = MemorySource {
        patients: vec![patient(1, d(2006, 3, 15)), patient(2, d(2007, 1, 1))],
        encounters: vec![
            // exactly 18 at the first visit
            encounter(1, 10, dt(2024, 3, 15)),
            encounter(1, 11, dt(2024, 6, 1)),
            // 17 all year
            encounter(2, 20, dt(2024, 3, 15)),
            encounter(2, 21, dt(2024, 6, 1)),
        ],
        ..MemorySource::default()
    };
    let datasets = run_asc(source).await;
    assert_eq!(keys(&datasets[0].table), vec!["1-2024"]);
}

/// The screening lookback is inclusive at both ends of
/// [anchor - 12 months, anchor].
#[tokio::test]
async fn test_screening_window_boundaries() {
    let source = MemorySource {
        patients: vec![patient(1, d(1990, 1, 1)), patient(2, d(1990, 1, 1))],
        encounters: vec![
            encounter(1, 10, dt(2024, 3, 1)),
            encounter(1, 11, dt(2024, 6, 1)),
            encounter(2, 20, dt(2024, 3, 1)),
            encounter(2, 21, dt(2024, 6, 1)),
        ],
        screenings: vec![
            // exactly twelve months before the anchor encounter
            screening(ScreeningTool::Audit, 1, 100, dt(2023, 6, 1), Some(2)),
            // one day too early
            screening(ScreeningTool::Audit, 2, 200, dt(2023, 5, 31), Some(2)),
        ],
        ..MemorySource::default()
    };
    let datasets = run_asc(source).await;
    let populace = &datasets[0].table;
    assert_eq!(cell(populace, "1-2024", "numerator"), Value::Bool(true));
    assert_eq!(cell(populace, "2-2024", "numerator"), Value::Bool(false));
}

/// A dementia diagnosis any time through the end of the measurement year
/// excludes the client; a later diagnosis does not.
#[tokio::test]
async fn test_dementia_exclusion_by_year() {
    let source = MemorySource {
        patients: vec![patient(1, d(1960, 1, 1)), patient(2, d(1960, 1, 1))],
        encounters: vec![
            encounter(1, 10, dt(2024, 3, 1)),
            encounter(1, 11, dt(2024, 6, 1)),
            encounter(2, 20, dt(2024, 3, 1)),
            encounter(2, 21, dt(2024, 6, 1)),
        ],
        diagnoses: vec![
            diagnosis(1, "F03.90", dt(2020, 2, 1)),
            diagnosis(2, "F03.90", dt(2025, 2, 1)),
        ],
        ..MemorySource::default()
    };
    let datasets = run_asc(source).await;
    assert_eq!(keys(&datasets[0].table), vec!["2-2024"]);
}

/// Brief counseling must land on the screening encounter itself.
#[tokio::test]
async fn test_sub2_counseling_at_screening_encounter() {
    let source = MemorySource {
        patients: vec![patient(1, d(1990, 1, 1)), patient(2, d(1990, 1, 1))],
        encounters: vec![
            encounter(1, 10, dt(2024, 3, 1)),
            encounter(1, 11, dt(2024, 6, 1)),
            encounter(2, 20, dt(2024, 3, 1)),
            encounter(2, 21, dt(2024, 6, 1)),
        ],
        screenings: vec![
            screening(ScreeningTool::Audit, 1, 100, dt(2024, 4, 1), Some(10)),
            screening(ScreeningTool::Audit, 2, 200, dt(2024, 4, 1), Some(10)),
        ],
        counselings: vec![
            // same session as patient 1's screening
            CounselingRow {
                patient_id: 1,
                encounter_id: 100,
                visit: dt(2024, 4, 1),
            },
            // unrelated encounter for patient 2
            CounselingRow {
                patient_id: 2,
                encounter_id: 999,
                visit: dt(2024, 4, 2),
            },
        ],
        ..MemorySource::default()
    };
    let datasets = run_asc(source).await;
    let sub2 = &datasets[2].table;
    assert_eq!(datasets[2].key, "ASC_sub_2");
    assert_eq!(cell(sub2, "1-2024", "numerator"), Value::Bool(true));
    assert_eq!(cell(sub2, "2-2024", "numerator"), Value::Bool(false));
}

/// A low scorer stays out of sub-measure 2 even though they were screened.
#[tokio::test]
async fn test_sub2_requires_unhealthy_score() {
    let source = MemorySource {
        patients: vec![patient(1, d(1990, 1, 1))],
        encounters: vec![
            encounter(1, 10, dt(2024, 3, 1)),
            encounter(1, 11, dt(2024, 6, 1)),
        ],
        screenings: vec![screening(ScreeningTool::Audit, 1, 100, dt(2024, 4, 1), Some(7))],
        ..MemorySource::default()
    };
    let datasets = run_asc(source).await;
    // screened, so sub 1 counts them
    assert_eq!(
        cell(&datasets[0].table, "1-2024", "numerator"),
        Value::Bool(true)
    );
    // but an AUDIT below 8 keeps them out of sub 2
    assert!(datasets[2].table.is_empty());
}

#[tokio::test]
async fn test_outputs_unique_and_stratified() {
    let source = MemorySource {
        patients: vec![patient(1, d(1990, 1, 1)), patient(2, d(1985, 1, 1))],
        encounters: vec![
            encounter(1, 10, dt(2024, 3, 1)),
            encounter(1, 11, dt(2024, 6, 1)),
            encounter(1, 12, dt(2024, 7, 1)),
            encounter(2, 20, dt(2024, 3, 1)),
            encounter(2, 21, dt(2024, 6, 1)),
        ],
        insurance: vec![medicaid_span(1, d(2023, 1, 1))],
        ..MemorySource::default()
    };
    let datasets = run_asc(source).await;
    let populace = &datasets[0].table;
    let stratify = &datasets[1].table;
    assert!(populace.is_unique_key("patient_measurement_year_id").unwrap());
    assert!(stratify.is_unique_key("patient_measurement_year_id").unwrap());
    assert_eq!(keys(populace), keys(stratify));
    assert_eq!(cell(stratify, "1-2024", "Medicaid"), Value::Bool(true));
    // no active coverage renders as the sentinel, not a null
    assert_eq!(cell(stratify, "2-2024", "Medicaid"), Value::unknown());
}

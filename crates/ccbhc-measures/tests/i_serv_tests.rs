//! I-SERV measure behavior against fixture data

mod common;

use ccbhc_core::Value;
use ccbhc_emr::MemorySource;
use ccbhc_measures::{IServ, Measure, MeasureDataset};
use common::*;

async fn run_iserv(source: MemorySource) -> Vec<MeasureDataset> {
    IServ::new()
        .collect(&ctx(source))
        .await
        .expect("measure runs")
}

fn dataset<'a>(datasets: &'a [MeasureDataset], key: &str) -> &'a MeasureDataset {
    datasets
        .iter()
        .find(|d| d.key == key)
        .unwrap_or_else(|| panic!("missing dataset {key}"))
}

/// Monday call, Tuesday evaluation: one business day.
#[tokio::test]
async fn test_next_day_evaluation_counts_one() {
    let source = MemorySource {
        patients: vec![patient(1, d(2000, 1, 1))],
        calls: vec![call(1, 500, dt(2024, 3, 4))],
        encounters: vec![typed_encounter(1, 10, dt(2024, 3, 5), "Initial Evaluation-1")],
        ..MemorySource::default()
    };
    let datasets = run_iserv(source).await;
    let populace = &dataset(&datasets, "ISERV_sub_1").table;
    assert_eq!(
        cell(populace, "1-2024", "business_days_from_call_to_eval"),
        Value::Int(1)
    );
    assert_eq!(cell(populace, "1-2024", "eval_encounter_id"), Value::Int(10));
}

/// A Friday call answered the following Monday also counts one business day.
#[tokio::test]
async fn test_weekend_skipped_in_count() {
    let source = MemorySource {
        patients: vec![patient(1, d(2000, 1, 1))],
        calls: vec![call(1, 500, dt(2024, 3, 1))],
        encounters: vec![typed_encounter(1, 10, dt(2024, 3, 4), "Initial Evaluation-1")],
        ..MemorySource::default()
    };
    let datasets = run_iserv(source).await;
    assert_eq!(
        cell(
            &dataset(&datasets, "ISERV_sub_1").table,
            "1-2024",
            "business_days_from_call_to_eval"
        ),
        Value::Int(1)
    );
}

/// An evaluation dated outside the call's measurement year reports the fixed
/// 31-day penalty regardless of true elapsed time.
#[tokio::test]
async fn test_late_evaluation_clamped_to_penalty() {
    let source = MemorySource {
        patients: vec![patient(1, d(2000, 1, 1))],
        calls: vec![call(1, 500, dt(2024, 11, 4))],
        encounters: vec![typed_encounter(1, 10, dt(2025, 1, 10), "Initial Evaluation-1")],
        ..MemorySource::default()
    };
    let datasets = run_iserv(source).await;
    assert_eq!(
        cell(
            &dataset(&datasets, "ISERV_sub_1").table,
            "1-2024",
            "business_days_from_call_to_eval"
        ),
        Value::Int(31)
    );
}

/// Clients who never reached an evaluation surface on the exclusions list
/// instead of the cohort.
#[tokio::test]
async fn test_unevaluated_call_moves_to_exclusions() {
    let source = MemorySource {
        patients: vec![patient(1, d(2000, 1, 1))],
        calls: vec![call(1, 500, dt(2024, 3, 4))],
        ..MemorySource::default()
    };
    let datasets = run_iserv(source).await;
    assert!(dataset(&datasets, "ISERV_sub_1").table.is_empty());
    let exclusions = &dataset(&datasets, "IServ_sub1_exclusions").table;
    assert_eq!(exclusions.len(), 1);
    assert_eq!(exclusions.rows()[0][0], Value::Int(1));
    assert_eq!(exclusions.rows()[0][1], Value::DateTime(dt(2024, 3, 4)));
}

/// A billable visit in the second half of the prior year means the caller is
/// not a new client.
#[tokio::test]
async fn test_prior_half_year_visit_excludes() {
    let source = MemorySource {
        patients: vec![patient(1, d(2000, 1, 1)), patient(2, d(2000, 1, 1))],
        calls: vec![call(1, 500, dt(2024, 3, 4)), call(2, 501, dt(2024, 3, 4))],
        encounters: vec![
            typed_encounter(1, 10, dt(2024, 3, 5), "Initial Evaluation-1"),
            typed_encounter(2, 20, dt(2024, 3, 5), "Initial Evaluation-1"),
            // Jul-Dec of the prior year disqualifies patient 1
            encounter(1, 30, dt(2023, 8, 15)),
            // Jan-Jun of the prior year does not disqualify patient 2
            encounter(2, 40, dt(2023, 3, 15)),
        ],
        ..MemorySource::default()
    };
    let datasets = run_iserv(source).await;
    assert_eq!(keys(&dataset(&datasets, "ISERV_sub_1").table), vec!["2-2024"]);
}

/// First contact during December is excluded outright.
#[tokio::test]
async fn test_december_call_excluded() {
    let source = MemorySource {
        patients: vec![patient(1, d(2000, 1, 1))],
        calls: vec![call(1, 500, dt(2024, 12, 2))],
        encounters: vec![typed_encounter(1, 10, dt(2024, 12, 3), "Initial Evaluation-1")],
        ..MemorySource::default()
    };
    let datasets = run_iserv(source).await;
    assert!(dataset(&datasets, "ISERV_sub_1").table.is_empty());
}

/// Age runs against the end of the measurement year: 12 is in, 11 is out.
#[tokio::test]
async fn test_end_of_year_age_boundary() {
    let source = MemorySource {
        patients: vec![patient(1, d(2012, 11, 1)), patient(2, d(2013, 2, 1))],
        calls: vec![call(1, 500, dt(2024, 3, 4)), call(2, 501, dt(2024, 3, 4))],
        encounters: vec![
            typed_encounter(1, 10, dt(2024, 3, 5), "Initial Evaluation-1"),
            typed_encounter(2, 20, dt(2024, 3, 5), "Initial Evaluation-1"),
        ],
        ..MemorySource::default()
    };
    let datasets = run_iserv(source).await;
    assert_eq!(keys(&dataset(&datasets, "ISERV_sub_1").table), vec!["1-2024"]);
}

/// Sub-measure 2 measures first contact to first clinical service, and its
/// stratification is the sub-1 rows restricted to its smaller cohort.
#[tokio::test]
async fn test_sub2_service_count_and_stratify_subset() {
    let source = MemorySource {
        patients: vec![patient(1, d(2000, 1, 1)), patient(2, d(2000, 1, 1))],
        calls: vec![call(1, 500, dt(2024, 3, 4)), call(2, 501, dt(2024, 3, 4))],
        encounters: vec![
            typed_encounter(1, 10, dt(2024, 3, 5), "Initial Evaluation-1"),
            typed_encounter(2, 20, dt(2024, 3, 5), "Initial Evaluation-1"),
            // a billable non-evaluation service for patient 1 only
            typed_encounter(1, 30, dt(2024, 3, 7), "Therapy Session"),
        ],
        ..MemorySource::default()
    };
    let datasets = run_iserv(source).await;
    let sub2 = &dataset(&datasets, "ISERV_sub_2").table;
    assert_eq!(keys(sub2), vec!["1-2024"]);
    assert_eq!(
        cell(sub2, "1-2024", "business_days_from_call_to_service"),
        Value::Int(3)
    );
    // patient 2 reached an evaluation but never a service
    let sub2_exclusions = &dataset(&datasets, "IServ_sub2_exclusions").table;
    assert_eq!(sub2_exclusions.len(), 1);
    assert_eq!(sub2_exclusions.rows()[0][0], Value::Int(2));

    let sub1_stratify = &dataset(&datasets, "ISERV_sub_1_stratify").table;
    let sub2_stratify = &dataset(&datasets, "ISERV_sub_2_stratify").table;
    assert_eq!(keys(sub1_stratify).len(), 2);
    assert_eq!(keys(sub2_stratify), vec!["1-2024"]);
}

/// Two calls in one year collapse to the earliest first contact.
#[tokio::test]
async fn test_repeat_calls_keep_first_contact() {
    let source = MemorySource {
        patients: vec![patient(1, d(2000, 1, 1))],
        calls: vec![call(1, 501, dt(2024, 5, 6)), call(1, 500, dt(2024, 3, 4))],
        encounters: vec![typed_encounter(1, 10, dt(2024, 5, 7), "Initial Evaluation-1")],
        ..MemorySource::default()
    };
    let datasets = run_iserv(source).await;
    let populace = &dataset(&datasets, "ISERV_sub_1").table;
    assert_eq!(keys(populace), vec!["1-2024"]);
    assert_eq!(cell(populace, "1-2024", "CallID"), Value::Int(500));
}

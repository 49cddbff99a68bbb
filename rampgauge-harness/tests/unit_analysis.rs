use rampgauge_common::{Stage, Thresholds};
use rampgauge_harness::analysis::{analyze, scan_order, Finding, StageBreach};
use rampgauge_harness::metrics::{Bucket, MetricsStore};
use rampgauge_harness::worker::RequestRecord;
use std::collections::BTreeMap;
use std::time::Duration;

fn stages(targets: &[u32]) -> Vec<Stage> {
    targets.iter().map(|&t| Stage::new(30.0, t)).collect()
}

/// `failed` failures and `slow` slow requests out of `total`.
fn bucket(total: u64, failed: u64, slow: u64) -> Bucket {
    let mut b = Bucket::new();
    for i in 0..total {
        b.observe(Duration::from_millis(10), i >= failed, i < slow);
    }
    b
}

fn buckets(entries: Vec<(usize, Bucket)>) -> BTreeMap<usize, Bucket> {
    entries.into_iter().collect()
}

fn breach_index(finding: &Finding) -> Option<usize> {
    finding.breach().map(|b| b.stage_index)
}

#[test]
fn test_scan_order_is_ascending_concurrency() {
    assert_eq!(scan_order(&stages(&[10, 50, 100, 10])), vec![0, 3, 1, 2]);
    assert_eq!(scan_order(&stages(&[100, 50, 10])), vec![2, 1, 0]);
}

#[test]
fn test_first_failure_breach() {
    // Failure rates 0.01, 0.02, 0.07, 0.03 with threshold 0.05.
    let report = analyze(
        &stages(&[10, 20, 30, 40]),
        &buckets(vec![
            (0, bucket(100, 1, 0)),
            (1, bucket(100, 2, 0)),
            (2, bucket(100, 7, 0)),
            (3, bucket(100, 3, 0)),
        ]),
        &Thresholds::default(),
    );
    assert_eq!(
        report.first_failure_breach_stage,
        Finding::Detected(StageBreach {
            stage_index: 2,
            stage_number: 3,
            target_concurrency: 30,
            rate: 0.07,
            threshold: 0.05,
        })
    );
    assert_eq!(report.first_slow_breach_stage, Finding::NoneDetected);
}

#[test]
fn test_breach_ignores_record_arrival_order() {
    let plan_stages = stages(&[10, 20, 30, 40]);
    let failures_per_stage = [1u64, 2, 7, 3];

    // Interleave the records of all stages, latest stage first.
    let store = MetricsStore::new();
    for i in 0..100u64 {
        for stage in (0..4).rev() {
            store.record(&RequestRecord {
                endpoint: "http://a/".to_string(),
                duration: Duration::from_millis(5),
                status_code: Some(200),
                success: i >= failures_per_stage[stage],
                slow: false,
                stage_key: stage,
            });
        }
    }

    let snapshot = store.into_snapshot();
    let report = analyze(&plan_stages, &snapshot.stages, &Thresholds::default());
    assert_eq!(breach_index(&report.first_failure_breach_stage), Some(2));
}

#[test]
fn test_scan_uses_concurrency_not_plan_order() {
    // Targets 10, 50, 100, 10 with failure rates 0.0, 0.02, 0.08, 0.01.
    let report = analyze(
        &stages(&[10, 50, 100, 10]),
        &buckets(vec![
            (0, bucket(100, 0, 0)),
            (1, bucket(100, 2, 0)),
            (2, bucket(100, 8, 0)),
            (3, bucket(100, 1, 0)),
        ]),
        &Thresholds::default(),
    );
    let breach = report.first_failure_breach_stage.breach().copied().unwrap();
    assert_eq!(breach.stage_index, 2);
    assert_eq!(breach.stage_number, 3);
    assert_eq!(breach.target_concurrency, 100);
}

#[test]
fn test_lower_concurrency_stage_later_in_plan_is_scanned_first() {
    // Plan order reaches the 100-VU stage first, but the 20-VU stage breaches too.
    let report = analyze(
        &stages(&[100, 20]),
        &buckets(vec![(0, bucket(100, 50, 0)), (1, bucket(100, 10, 0))]),
        &Thresholds::default(),
    );
    assert_eq!(breach_index(&report.first_failure_breach_stage), Some(1));
}

#[test]
fn test_failure_and_slow_scans_are_independent() {
    let report = analyze(
        &stages(&[10, 20, 30]),
        &buckets(vec![
            (0, bucket(100, 0, 10)),
            (1, bucket(100, 6, 10)),
            (2, bucket(100, 20, 50)),
        ]),
        &Thresholds::default(),
    );
    assert_eq!(breach_index(&report.first_slow_breach_stage), Some(0));
    assert_eq!(breach_index(&report.first_failure_breach_stage), Some(1));
}

#[test]
fn test_rate_equal_to_threshold_is_not_a_breach() {
    let report = analyze(
        &stages(&[10]),
        &buckets(vec![(0, bucket(100, 5, 5))]),
        &Thresholds::default(),
    );
    assert_eq!(report.first_failure_breach_stage, Finding::NoneDetected);
    assert_eq!(report.first_slow_breach_stage, Finding::NoneDetected);
}

#[test]
fn test_empty_stages_are_skipped() {
    // Stage 0 has no bucket, stage 1 an empty one; neither counts as passing or breaching.
    let report = analyze(
        &stages(&[10, 20, 30]),
        &buckets(vec![(1, Bucket::new()), (2, bucket(10, 10, 10))]),
        &Thresholds::default(),
    );
    assert_eq!(breach_index(&report.first_failure_breach_stage), Some(2));
    assert_eq!(breach_index(&report.first_slow_breach_stage), Some(2));
}

#[test]
fn test_no_data_reports_none_detected() {
    let report = analyze(&stages(&[10, 20]), &BTreeMap::new(), &Thresholds::default());
    assert_eq!(report.first_failure_breach_stage, Finding::NoneDetected);
    assert_eq!(report.first_slow_breach_stage, Finding::NoneDetected);
}

#[test]
fn test_finding_json_shape() {
    let json = serde_json::to_value(Finding::NoneDetected).unwrap();
    assert_eq!(json, serde_json::json!({ "status": "none detected" }));

    let json = serde_json::to_value(Finding::Detected(StageBreach {
        stage_index: 2,
        stage_number: 3,
        target_concurrency: 100,
        rate: 0.08,
        threshold: 0.05,
    }))
    .unwrap();
    assert_eq!(
        json,
        serde_json::json!({
            "status": "detected",
            "stageIndex": 2,
            "stageNumber": 3,
            "targetConcurrency": 100,
            "rate": 0.08,
            "threshold": 0.05
        })
    );
}

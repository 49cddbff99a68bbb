use rampgauge_harness::metrics::{Bucket, MetricsStore};
use rampgauge_harness::worker::RequestRecord;
use std::time::Duration;

fn record(endpoint: &str, stage_key: usize, ms: u64, success: bool, slow: bool) -> RequestRecord {
    RequestRecord {
        endpoint: endpoint.to_string(),
        duration: Duration::from_millis(ms),
        status_code: Some(if success { 200 } else { 500 }),
        success,
        slow,
        stage_key,
    }
}

#[test]
fn test_empty_bucket_has_no_rates() {
    let b = Bucket::new();
    assert!(b.is_empty());
    assert_eq!(b.failure_rate(), None);
    assert_eq!(b.slow_rate(), None);
    assert_eq!(b.success_rate(), None);
    assert_eq!(b.mean_ms(), None);
    assert_eq!(b.max_ms(), None);
    assert_eq!(b.percentile_ms(95.0), None);
}

#[test]
fn test_bucket_aggregates() {
    let mut b = Bucket::new();
    b.observe(Duration::from_millis(100), true, false);
    b.observe(Duration::from_millis(200), false, false);
    b.observe(Duration::from_millis(600), false, true);
    b.observe(Duration::from_millis(100), true, false);

    assert_eq!(b.requests, 4);
    assert_eq!(b.failures, 2);
    assert_eq!(b.slow_count, 1);
    assert_eq!(b.duration_count, 4);
    assert_eq!(b.duration_sum_us, 1_000_000);
    assert_eq!(b.duration_max_us, 600_000);
    assert_eq!(b.failure_rate(), Some(0.5));
    assert_eq!(b.slow_rate(), Some(0.25));
    assert_eq!(b.success_rate(), Some(0.5));
    assert_eq!(b.mean_ms(), Some(250.0));
    assert_eq!(b.max_ms(), Some(600.0));
}

#[test]
fn test_percentiles_within_histogram_precision() {
    let mut b = Bucket::new();
    for ms in 1..=100 {
        b.observe(Duration::from_millis(ms), true, false);
    }
    let p50 = b.percentile_ms(50.0).unwrap();
    let p99 = b.percentile_ms(99.0).unwrap();
    assert!((p50 - 50.0).abs() <= 0.1, "p50 was {p50}");
    assert!((p99 - 99.0).abs() <= 0.1, "p99 was {p99}");
    assert_eq!(b.percentile_ms(100.0), Some(100.0));
}

#[test]
fn test_merge_adds_counts() {
    let mut a = Bucket::new();
    a.observe(Duration::from_millis(10), true, false);
    let mut b = Bucket::new();
    b.observe(Duration::from_millis(900), false, true);
    b.observe(Duration::from_millis(20), true, false);

    a.merge(&b);
    assert_eq!(a.requests, 3);
    assert_eq!(a.failures, 1);
    assert_eq!(a.slow_count, 1);
    assert_eq!(a.max_ms(), Some(900.0));
    assert_eq!(a.percentile_ms(100.0), Some(900.0));
}

#[test]
fn test_store_keys_by_stage_and_endpoint() {
    let store = MetricsStore::new();
    store.record(&record("http://a/", 0, 10, true, false));
    store.record(&record("http://b/", 0, 10, false, false));
    store.record(&record("http://a/", 1, 700, false, true));

    let snap = store.into_snapshot();
    assert_eq!(snap.stages.len(), 2);
    assert_eq!(snap.endpoints.len(), 2);
    assert_eq!(snap.stage(0).unwrap().requests, 2);
    assert_eq!(snap.stage(1).unwrap().slow_count, 1);
    assert_eq!(snap.endpoint("http://a/").unwrap().requests, 2);
    assert_eq!(snap.endpoint("http://b/").unwrap().failures, 1);
    assert!(snap.stage(2).is_none());

    let overall = snap.overall();
    assert_eq!(overall.requests, 3);
    assert_eq!(overall.failures, 2);
    assert_eq!(overall.slow_count, 1);
}

#[test]
fn test_snapshot_leaves_store_usable() {
    let store = MetricsStore::new();
    store.record(&record("http://a/", 0, 10, true, false));
    let first = store.snapshot();
    let second = store.snapshot();
    assert_eq!(first.overall().requests, second.overall().requests);
}

#[test]
fn test_concurrent_writers_lose_nothing() {
    const THREADS: usize = 8;
    const PER_THREAD: usize = 2_000;
    let endpoints = ["http://a/", "http://b/", "http://c/"];
    let store = MetricsStore::new();

    std::thread::scope(|scope| {
        for t in 0..THREADS {
            let store = &store;
            scope.spawn(move || {
                for i in 0..PER_THREAD {
                    let n = t * PER_THREAD + i;
                    // Every 10th fails, every 4th is slow, spread over 4 stages.
                    let ms = (n % 50) as u64;
                    let failed = n % 10 == 0;
                    let slow = n % 4 == 0;
                    store.record(&record(endpoints[n % 3], n % 4, ms, !failed, slow));
                }
            });
        }
    });

    let snap = store.into_snapshot();
    let total = THREADS * PER_THREAD;
    let expected_failures = (0..total).filter(|n| n % 10 == 0).count() as u64;
    let expected_slow = (0..total).filter(|n| n % 4 == 0).count() as u64;

    let overall = snap.overall();
    assert_eq!(overall.requests, total as u64);
    assert_eq!(overall.failures, expected_failures);
    assert_eq!(overall.slow_count, expected_slow);

    let endpoint_requests: u64 = snap.endpoints.values().map(|b| b.requests).sum();
    let endpoint_failures: u64 = snap.endpoints.values().map(|b| b.failures).sum();
    assert_eq!(endpoint_requests, total as u64);
    assert_eq!(endpoint_failures, expected_failures);

    for (stage, bucket) in &snap.stages {
        assert_eq!(bucket.requests, (total / 4) as u64, "stage {stage}");
    }

    for bucket in snap.stages.values().chain(snap.endpoints.values()) {
        assert!(bucket.failures <= bucket.requests);
        assert!(bucket.slow_count <= bucket.requests);
        assert_eq!(bucket.duration_count, bucket.requests);
    }
}

use rampgauge_common::{Stage, Thresholds};
use serde::Serialize;
use std::collections::BTreeMap;

use crate::metrics::Bucket;

/// The stage at which a rate first crossed its threshold.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StageBreach {
    pub stage_index: usize,
    /// 1-based, as shown to people.
    pub stage_number: usize,
    pub target_concurrency: u32,
    pub rate: f64,
    pub threshold: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "status")]
pub enum Finding {
    #[serde(rename = "detected")]
    Detected(StageBreach),
    #[serde(rename = "none detected")]
    NoneDetected,
}

impl Finding {
    pub fn breach(&self) -> Option<&StageBreach> {
        match self {
            Finding::Detected(breach) => Some(breach),
            Finding::NoneDetected => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DegradationReport {
    pub first_failure_breach_stage: Finding,
    pub first_slow_breach_stage: Finding,
}

/// Stage indices in scan order: ascending target concurrency, plan order on ties.
pub fn scan_order(stages: &[Stage]) -> Vec<usize> {
    let mut order: Vec<usize> = (0..stages.len()).collect();
    order.sort_by_key(|&index| (stages[index].target_concurrency, index));
    order
}

/// Locate the first stage, in ascending concurrency order, whose failure rate
/// and (independently) whose slow rate exceeds its threshold. Stages without
/// traffic are skipped.
pub fn analyze(
    stages: &[Stage],
    buckets: &BTreeMap<usize, Bucket>,
    thresholds: &Thresholds,
) -> DegradationReport {
    let order = scan_order(stages);
    DegradationReport {
        first_failure_breach_stage: first_breach(
            stages,
            &order,
            buckets,
            thresholds.failure_rate,
            Bucket::failure_rate,
        ),
        first_slow_breach_stage: first_breach(
            stages,
            &order,
            buckets,
            thresholds.slow_rate,
            Bucket::slow_rate,
        ),
    }
}

fn first_breach(
    stages: &[Stage],
    order: &[usize],
    buckets: &BTreeMap<usize, Bucket>,
    threshold: f64,
    rate_of: fn(&Bucket) -> Option<f64>,
) -> Finding {
    order
        .iter()
        .filter_map(|&index| {
            let rate = buckets.get(&index).and_then(rate_of)?;
            (rate > threshold).then_some(StageBreach {
                stage_index: index,
                stage_number: index + 1,
                target_concurrency: stages[index].target_concurrency,
                rate,
                threshold,
            })
        })
        .next()
        .map_or(Finding::NoneDetected, Finding::Detected)
}

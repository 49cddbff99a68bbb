use rampgauge_common::{RunPlan, Thresholds};
use serde::{Serialize, Serializer};
use std::fmt::Write as _;

use crate::analysis::{analyze, DegradationReport, Finding};
use crate::metrics::Bucket;
use crate::RunOutcome;

/// Marker written wherever a value cannot be computed for lack of data.
pub const NO_DATA: &str = "N/A";

/// A derived number that may be undefined (e.g. a rate over zero requests).
/// Serializes as the number, or as `"N/A"`.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Stat(pub Option<f64>);

impl Stat {
    pub fn value(&self) -> Option<f64> {
        self.0
    }

    fn display(&self, scale: f64, suffix: &str) -> String {
        match self.0 {
            Some(v) => format!("{:.2}{suffix}", v * scale),
            None => NO_DATA.to_string(),
        }
    }
}

impl From<Option<f64>> for Stat {
    fn from(value: Option<f64>) -> Self {
        Stat(value)
    }
}

impl Serialize for Stat {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self.0 {
            Some(v) if v.is_finite() => serializer.serialize_f64(v),
            _ => serializer.serialize_str(NO_DATA),
        }
    }
}

/// Counts and derived figures for one bucket.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BucketView {
    pub requests: u64,
    pub failures: u64,
    pub slow_count: u64,
    pub failure_rate: Stat,
    pub slow_rate: Stat,
    pub mean_ms: Stat,
    pub p95_ms: Stat,
    pub max_ms: Stat,
}

impl BucketView {
    pub fn from_bucket(bucket: Option<&Bucket>) -> Self {
        match bucket {
            Some(b) => Self {
                requests: b.requests,
                failures: b.failures,
                slow_count: b.slow_count,
                failure_rate: b.failure_rate().into(),
                slow_rate: b.slow_rate().into(),
                mean_ms: b.mean_ms().into(),
                p95_ms: b.percentile_ms(95.0).into(),
                max_ms: b.max_ms().into(),
            },
            None => Self {
                requests: 0,
                failures: 0,
                slow_count: 0,
                failure_rate: Stat(None),
                slow_rate: Stat(None),
                mean_ms: Stat(None),
                p95_ms: Stat(None),
                max_ms: Stat(None),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LatencySummary {
    pub mean_ms: Stat,
    pub p50_ms: Stat,
    pub p90_ms: Stat,
    pub p95_ms: Stat,
    pub p99_ms: Stat,
    pub max_ms: Stat,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Summary {
    pub run_id: String,
    pub elapsed_secs: f64,
    pub stopped_early: bool,
    pub peak_concurrency: u32,
    pub total_requests: u64,
    pub total_failures: u64,
    pub total_slow: u64,
    pub success_rate: Stat,
    pub failure_rate: Stat,
    pub throughput_rps: Stat,
    pub latency: LatencySummary,
    /// The percentile the overall gate checks, and its measured value.
    pub gate_percentile: f64,
    pub gate_latency_ms: Stat,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EndpointRow {
    pub endpoint: String,
    pub dependents: Vec<String>,
    #[serde(flatten)]
    pub stats: BucketView,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StageRow {
    pub stage_index: usize,
    pub stage_number: usize,
    pub target_concurrency: u32,
    pub duration_secs: f64,
    #[serde(flatten)]
    pub stats: BucketView,
}

/// Final structured result of a run.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Report {
    pub summary: Summary,
    pub degradation_analysis: DegradationReport,
    pub endpoint_analysis: Vec<EndpointRow>,
    pub stage_analysis: Vec<StageRow>,
}

/// Overall pass/fail decision.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GateVerdict {
    pub failure_rate_exceeded: bool,
    pub latency_exceeded: bool,
}

impl GateVerdict {
    pub fn passed(&self) -> bool {
        !self.failure_rate_exceeded && !self.latency_exceeded
    }

    /// `0` pass, `1` failure rate over threshold, `2` latency percentile over threshold.
    pub fn exit_code(&self) -> i32 {
        if self.failure_rate_exceeded {
            1
        } else if self.latency_exceeded {
            2
        } else {
            0
        }
    }
}

impl Report {
    /// Build the report from a finished run. Reads the snapshot only; building
    /// twice from the same inputs gives identical reports.
    pub fn build(plan: &RunPlan, outcome: &RunOutcome) -> Self {
        let snapshot = &outcome.snapshot;
        let overall = snapshot.overall();
        let elapsed_secs = outcome.elapsed.as_secs_f64();
        let gate_percentile = plan.thresholds.gate_percentile;
        let throughput = (elapsed_secs > 0.0).then(|| overall.requests as f64 / elapsed_secs);

        let summary = Summary {
            run_id: outcome.run_id.to_string(),
            elapsed_secs,
            stopped_early: outcome.stopped_early,
            peak_concurrency: outcome.peak_concurrency,
            total_requests: overall.requests,
            total_failures: overall.failures,
            total_slow: overall.slow_count,
            success_rate: overall.success_rate().into(),
            failure_rate: overall.failure_rate().into(),
            throughput_rps: Stat(throughput),
            latency: LatencySummary {
                mean_ms: overall.mean_ms().into(),
                p50_ms: overall.percentile_ms(50.0).into(),
                p90_ms: overall.percentile_ms(90.0).into(),
                p95_ms: overall.percentile_ms(95.0).into(),
                p99_ms: overall.percentile_ms(99.0).into(),
                max_ms: overall.max_ms().into(),
            },
            gate_percentile,
            gate_latency_ms: overall.percentile_ms(gate_percentile).into(),
        };

        let endpoint_analysis = plan
            .endpoints
            .iter()
            .map(|target| EndpointRow {
                endpoint: target.base.clone(),
                dependents: target.dependents.clone(),
                stats: BucketView::from_bucket(snapshot.endpoint(&target.base)),
            })
            .collect();

        let stage_analysis = plan
            .stages
            .iter()
            .enumerate()
            .map(|(index, stage)| StageRow {
                stage_index: index,
                stage_number: index + 1,
                target_concurrency: stage.target_concurrency,
                duration_secs: stage.duration_secs,
                stats: BucketView::from_bucket(snapshot.stage(index)),
            })
            .collect();

        Report {
            summary,
            degradation_analysis: analyze(&plan.stages, &snapshot.stages, &plan.thresholds),
            endpoint_analysis,
            stage_analysis,
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// Apply the overall gate. A run with no requests at all passes.
    pub fn gate(&self, thresholds: &Thresholds) -> GateVerdict {
        let failure_rate_exceeded = self
            .summary
            .failure_rate
            .value()
            .is_some_and(|rate| rate > thresholds.failure_rate);
        let latency_exceeded = self
            .summary
            .gate_latency_ms
            .value()
            .is_some_and(|ms| ms > thresholds.gate_latency_ms as f64);
        GateVerdict {
            failure_rate_exceeded,
            latency_exceeded,
        }
    }

    /// Console rendering for humans.
    pub fn render_text(&self, thresholds: &Thresholds) -> String {
        let verdict = self.gate(thresholds);
        let pass_fail = |exceeded: bool| if exceeded { "✗" } else { "✓" };
        let s = &self.summary;
        let findings = &self.degradation_analysis;
        let mut out = String::new();

        let _ = writeln!(out, "RampGauge Results");
        let _ = writeln!(out, "=================");
        push_line(&mut out, "Run:", &s.run_id);
        let stopped = if s.stopped_early {
            "  (stopped early)"
        } else {
            ""
        };
        let duration = format!("{:.1} s{stopped}", s.elapsed_secs);
        push_line(&mut out, "Duration:", duration);
        push_line(&mut out, "Peak concurrency:", s.peak_concurrency);
        let _ = writeln!(out);
        push_line(&mut out, "Requests:", format_thousands(s.total_requests));
        let ms = |stat: Stat| stat.display(1.0, " ms");
        let rps = s.throughput_rps.display(1.0, " rps");
        push_line(&mut out, "Throughput:", rps);
        push_line(&mut out, "Mean latency:", ms(s.latency.mean_ms));
        push_line(&mut out, "P50 latency:", ms(s.latency.p50_ms));
        push_line(&mut out, "P99 latency:", ms(s.latency.p99_ms));
        push_line(&mut out, "Slow requests:", format_thousands(s.total_slow));
        let _ = writeln!(out);

        let failure_line = format!(
            "{}    [threshold: {:.2}%]  {}",
            s.failure_rate.display(100.0, "%"),
            thresholds.failure_rate * 100.0,
            pass_fail(verdict.failure_rate_exceeded),
        );
        push_line(&mut out, "Failure rate:", failure_line);
        let latency_line = format!(
            "{}    [threshold: {} ms]  {}",
            ms(s.gate_latency_ms),
            thresholds.gate_latency_ms,
            pass_fail(verdict.latency_exceeded),
        );
        let latency_label = format!("P{} latency:", s.gate_percentile);
        push_line(&mut out, &latency_label, latency_line);
        let _ = writeln!(out);

        let first_failure = describe_finding(&findings.first_failure_breach_stage);
        push_line(&mut out, "First failure breach:", first_failure);
        let first_slow = describe_finding(&findings.first_slow_breach_stage);
        push_line(&mut out, "First slow breach:", first_slow);
        let _ = writeln!(out);

        let _ = writeln!(
            out,
            "{:<40} {:>10} {:>10} {:>10} {:>10}",
            "Endpoint", "Requests", "Fail %", "Slow %", "Mean ms"
        );
        for row in &self.endpoint_analysis {
            let _ = writeln!(
                out,
                "{:<40} {:>10} {:>10} {:>10} {:>10}",
                row.endpoint,
                row.stats.requests,
                row.stats.failure_rate.display(100.0, ""),
                row.stats.slow_rate.display(100.0, ""),
                row.stats.mean_ms.display(1.0, ""),
            );
        }
        let _ = writeln!(out);

        let _ = writeln!(
            out,
            "{:<8} {:>8} {:>10} {:>10} {:>10} {:>10}",
            "Stage", "Target", "Requests", "Fail %", "Slow %", "Mean ms"
        );
        for row in &self.stage_analysis {
            let _ = writeln!(
                out,
                "{:<8} {:>8} {:>10} {:>10} {:>10} {:>10}",
                row.stage_number,
                row.target_concurrency,
                row.stats.requests,
                row.stats.failure_rate.display(100.0, ""),
                row.stats.slow_rate.display(100.0, ""),
                row.stats.mean_ms.display(1.0, ""),
            );
        }
        let _ = writeln!(out);
        let result = if verdict.passed() { "PASS" } else { "FAIL" };
        let _ = writeln!(out, "Result: {result}");
        out
    }
}

/// One `label value` line of the summary block, values aligned in one column.
fn push_line(out: &mut String, label: &str, value: impl std::fmt::Display) {
    let _ = writeln!(out, "{label:<23}{value}");
}

fn describe_finding(finding: &Finding) -> String {
    match finding {
        Finding::Detected(b) => format!(
            "stage {} (target {}), rate {:.2}% > {:.2}%",
            b.stage_number,
            b.target_concurrency,
            b.rate * 100.0,
            b.threshold * 100.0
        ),
        Finding::NoneDetected => "none detected".to_string(),
    }
}

pub fn format_thousands(n: u64) -> String {
    if n >= 1_000_000 {
        format!("~{}M", n / 1_000_000)
    } else if n >= 1_000 {
        format!("~{}K", n / 1_000)
    } else {
        n.to_string()
    }
}

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use crate::{RampGaugeError, Result};

pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 10_000;
pub const DEFAULT_EXPECTED_STATUS: u16 = 200;
pub const DEFAULT_THINK_TIME_MS: u64 = 1_000;
pub const DEFAULT_TICK_INTERVAL_MS: u64 = 100;
/// Longest accepted stage: one year.
pub const MAX_STAGE_DURATION_SECS: f64 = 365.0 * 24.0 * 60.0 * 60.0;

/// One timed segment of the ramp profile.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Stage {
    /// How long the scheduler takes to move from the previous target to this one.
    pub duration_secs: f64,
    pub target_concurrency: u32,
}

impl Stage {
    pub fn new(duration_secs: f64, target_concurrency: u32) -> Self {
        Self {
            duration_secs,
            target_concurrency,
        }
    }

    /// Wall-clock length of the stage. Only meaningful on a validated plan.
    pub fn duration(&self) -> Duration {
        Duration::try_from_secs_f64(self.duration_secs)
            .unwrap_or(Duration::ZERO)
    }
}

/// Parses `DURATION_SECS:TARGET`, e.g. `30:50` or `0.5:10`.
impl FromStr for Stage {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let (duration, target) = s
            .split_once(':')
            .ok_or_else(|| format!("expected DURATION_SECS:TARGET, got {s:?}"))?;
        let duration_secs = duration
            .trim()
            .trim_end_matches('s')
            .parse::<f64>()
            .map_err(|_| format!("invalid stage duration {duration:?}"))?;
        let target_concurrency = target
            .trim()
            .parse::<u32>()
            .map_err(|_| format!("invalid stage target {target:?}"))?;
        Ok(Stage {
            duration_secs,
            target_concurrency,
        })
    }
}

/// A base endpoint and the dependent endpoints fetched after it in every iteration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointTarget {
    pub base: String,
    #[serde(default)]
    pub dependents: Vec<String>,
}

impl EndpointTarget {
    pub fn new(base: impl Into<String>) -> Self {
        Self {
            base: base.into(),
            dependents: Vec::new(),
        }
    }

    pub fn with_dependents(base: impl Into<String>, dependents: Vec<String>) -> Self {
        Self {
            base: base.into(),
            dependents,
        }
    }

    /// The full sub-request sequence for one iteration: the base, then each dependent.
    pub fn sequence(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.base.as_str())
            .chain(self.dependents.iter().map(String::as_str))
    }
}

/// Latency classification and pass/fail gate thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Thresholds {
    /// A representative duration at or above this is "slow".
    pub slow_ms: u64,
    /// A representative duration must be strictly below this to count as a success.
    pub failure_latency_ms: u64,
    /// Stage failure-rate breach threshold; also the overall failure-rate gate.
    pub failure_rate: f64,
    /// Stage slow-rate breach threshold.
    pub slow_rate: f64,
    /// Latency percentile checked by the overall gate, in `(0, 100]`.
    pub gate_percentile: f64,
    pub gate_latency_ms: u64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            slow_ms: 500,
            failure_latency_ms: 500,
            failure_rate: 0.05,
            slow_rate: 0.05,
            gate_percentile: 95.0,
            gate_latency_ms: 500,
        }
    }
}

impl Thresholds {
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("failure_rate", self.failure_rate),
            ("slow_rate", self.slow_rate),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(RampGaugeError::InvalidThreshold { name, value });
            }
        }
        if !(self.gate_percentile > 0.0 && self.gate_percentile <= 100.0) {
            return Err(RampGaugeError::InvalidThreshold {
                name: "gate_percentile",
                value: self.gate_percentile,
            });
        }
        Ok(())
    }
}

/// Everything one run needs: the ramp profile, the targets and the thresholds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunPlan {
    pub stages: Vec<Stage>,
    pub endpoints: Vec<EndpointTarget>,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    #[serde(default = "default_expected_status")]
    pub expected_status: u16,
    #[serde(default = "default_think_time_ms")]
    pub think_time_ms: u64,
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
    #[serde(default)]
    pub thresholds: Thresholds,
}

fn default_request_timeout_ms() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_MS
}

fn default_expected_status() -> u16 {
    DEFAULT_EXPECTED_STATUS
}

fn default_think_time_ms() -> u64 {
    DEFAULT_THINK_TIME_MS
}

fn default_tick_interval_ms() -> u64 {
    DEFAULT_TICK_INTERVAL_MS
}

impl RunPlan {
    /// A plan with default timeouts and thresholds.
    pub fn new(stages: Vec<Stage>, endpoints: Vec<EndpointTarget>) -> Self {
        Self {
            stages,
            endpoints,
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
            expected_status: DEFAULT_EXPECTED_STATUS,
            think_time_ms: DEFAULT_THINK_TIME_MS,
            tick_interval_ms: DEFAULT_TICK_INTERVAL_MS,
            thresholds: Thresholds::default(),
        }
    }

    /// Read a JSON plan from `path`. The result is not validated.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| RampGaugeError::PlanIo(path.display().to_string(), e.to_string()))?;
        Self::from_json_str(&raw)
    }

    pub fn from_json_str(raw: &str) -> Result<Self> {
        serde_json::from_str(raw)
            .map_err(|e| RampGaugeError::PlanParse(e.to_string()))
    }

    /// Reject any plan that would produce a misleading or empty run.
    pub fn validate(&self) -> Result<()> {
        validate_stages(&self.stages)?;

        if self.endpoints.is_empty() {
            return Err(RampGaugeError::NoEndpoints);
        }
        // Endpoint metrics are keyed by base URL.
        let mut bases = HashSet::new();
        for target in &self.endpoints {
            for raw in target.sequence() {
                validate_url(raw)?;
            }
            if !bases.insert(target.base.as_str()) {
                return Err(RampGaugeError::DuplicateEndpoint(target.base.clone()));
            }
        }

        if self.request_timeout_ms == 0 {
            return Err(RampGaugeError::ZeroTimeout);
        }
        self.thresholds.validate()
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn think_time(&self) -> Duration {
        Duration::from_millis(self.think_time_ms)
    }

    /// Tick period for the scheduler, never zero.
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms.max(1))
    }

    /// Sum of all stage durations.
    pub fn total_duration(&self) -> Duration {
        self.stages.iter().map(Stage::duration).sum()
    }
}

/// Reject stage lists that cannot be ramped: empty, or any stage whose
/// duration is not in `(0, MAX_STAGE_DURATION_SECS]`.
pub fn validate_stages(stages: &[Stage]) -> Result<()> {
    if stages.is_empty() {
        return Err(RampGaugeError::NoStages);
    }
    for (index, stage) in stages.iter().enumerate() {
        let secs = stage.duration_secs;
        if !(secs > 0.0 && secs <= MAX_STAGE_DURATION_SECS) {
            return Err(RampGaugeError::InvalidStageDuration {
                index,
                duration_secs: stage.duration_secs,
            });
        }
    }
    Ok(())
}

fn validate_url(raw: &str) -> Result<()> {
    let parsed = url::Url::parse(raw)
        .map_err(|e| RampGaugeError::InvalidEndpoint(raw.to_string(), e.to_string()))?;
    match parsed.scheme() {
        "http" | "https" => Ok(()),
        other => Err(RampGaugeError::InvalidEndpoint(
            raw.to_string(),
            format!("unsupported scheme {other:?}"),
        )),
    }
}

use rampgauge_client::{ProbeClient, SubRequest};
use rampgauge_common::{Result, RunPlan, Thresholds};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{sleep_until, Instant};
use tracing::debug;

use crate::metrics::MetricsStore;
use crate::scheduler::Phase;
use crate::workload::Workload;

/// One iteration's representative measurement.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestRecord {
    /// Base URL of the endpoint the iteration targeted.
    pub endpoint: String,
    pub duration: Duration,
    /// `None` when the representative sub-request got no response.
    pub status_code: Option<u16>,
    pub success: bool,
    pub slow: bool,
    /// Index of the stage that was active when the iteration started.
    pub stage_key: usize,
}

/// Turns a representative sub-request into a [`RequestRecord`].
///
/// `success` needs the expected status and a duration under
/// `failure_latency_ms`; `slow` only looks at `slow_ms`. The two are tracked
/// independently, so a slow response with the right status is a failure only if
/// it also reaches `failure_latency_ms`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Classifier {
    pub expected_status: u16,
    pub slow_threshold: Duration,
    pub failure_threshold: Duration,
}

impl Classifier {
    pub fn new(expected_status: u16, thresholds: &Thresholds) -> Self {
        Self {
            expected_status,
            slow_threshold: Duration::from_millis(thresholds.slow_ms),
            failure_threshold: Duration::from_millis(thresholds.failure_latency_ms),
        }
    }

    pub fn classify(
        &self,
        endpoint: &str,
        representative: &SubRequest,
        stage_key: usize,
    ) -> RequestRecord {
        let duration = representative.duration;
        let status_ok = representative.status == Some(self.expected_status);
        RequestRecord {
            endpoint: endpoint.to_string(),
            duration,
            status_code: representative.status,
            success: status_ok && duration < self.failure_threshold,
            slow: duration >= self.slow_threshold,
            stage_key,
        }
    }
}

/// The slowest sub-request of an iteration; the earliest one wins a tie, so the
/// base keeps its place against an equally slow dependent.
pub fn representative(base: SubRequest, dependents: Vec<SubRequest>) -> SubRequest {
    let mut slowest = base;
    for sample in dependents {
        if sample.duration > slowest.duration {
            slowest = sample;
        }
    }
    slowest
}

/// Everything a virtual user needs to run iterations. Cheap to clone: one
/// clone is moved into every VU task.
#[derive(Clone)]
pub struct Dispatcher {
    client: ProbeClient,
    workload: Arc<Workload>,
    classifier: Classifier,
    think_time: Duration,
    store: Arc<MetricsStore>,
}

impl Dispatcher {
    pub fn new(plan: &RunPlan, client: ProbeClient, store: Arc<MetricsStore>) -> Result<Self> {
        Ok(Self {
            client,
            workload: Arc::new(Workload::new(plan.endpoints.clone())?),
            classifier: Classifier::new(plan.expected_status, &plan.thresholds),
            think_time: plan.think_time(),
            store,
        })
    }

    /// Issue the target's sub-requests one after another and reduce them to a record.
    pub async fn run_iteration(&self, ordinal: u32, stage_key: usize) -> RequestRecord {
        let target = self.workload.target_for(ordinal);

        let base = self.client.probe(&target.base).await;
        let mut dependents = Vec::with_capacity(target.dependents.len());
        for url in &target.dependents {
            dependents.push(self.client.probe(url).await);
        }

        let slowest = representative(base, dependents);
        self.classifier.classify(&target.base, &slowest, stage_key)
    }

    /// The VU loop: iterate while the published phase keeps this ordinal active.
    pub async fn run_virtual_user(self, ordinal: u32, mut phase_rx: watch::Receiver<Phase>) {
        let mut iterations = 0u64;
        loop {
            let phase = *phase_rx.borrow_and_update();
            let Some(stage_key) = phase.active_stage_for(ordinal) else {
                break;
            };

            let record = self.run_iteration(ordinal, stage_key).await;
            self.store.record(&record);
            iterations += 1;

            if !self.think(ordinal, &mut phase_rx).await {
                break;
            }
        }
        debug!(ordinal, iterations, "virtual user retired");
    }

    /// Pause between iterations. Returns `false` if the VU should stop, which can
    /// cut the pause short when the scheduler lowers the target or drains.
    async fn think(&self, ordinal: u32, phase_rx: &mut watch::Receiver<Phase>) -> bool {
        if self.think_time.is_zero() {
            return true;
        }
        let deadline = Instant::now() + self.think_time;
        loop {
            tokio::select! {
                _ = sleep_until(deadline) => return true,
                changed = phase_rx.changed() => {
                    if changed.is_err() {
                        return false;
                    }
                    let phase = *phase_rx.borrow_and_update();
                    if phase.active_stage_for(ordinal).is_none() {
                        return false;
                    }
                }
            }
        }
    }
}

//! Staged load generation with per-stage degradation detection.
//!
//! A [`scheduler::StageScheduler`] ramps virtual users through the plan's stages;
//! each VU runs [`worker::Dispatcher`] iterations whose records land in a shared
//! [`metrics::MetricsStore`]. After the run, [`report::Report::build`] turns the
//! snapshot into the final report, including the [`analysis`] of where failures
//! and slow responses first crossed their thresholds.

use rampgauge_client::{ClientConfig, ProbeClient};
use rampgauge_common::{Result, RunPlan};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use uuid::Uuid;

pub mod analysis;
pub mod metrics;
pub mod report;
pub mod scheduler;
pub mod worker;
pub mod workload;

use metrics::{MetricsSnapshot, MetricsStore};
use scheduler::StageScheduler;
use worker::Dispatcher;

/// Everything a finished run leaves behind.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub run_id: Uuid,
    pub snapshot: MetricsSnapshot,
    pub elapsed: Duration,
    pub stopped_early: bool,
    pub peak_concurrency: u32,
}

/// Execute `plan` until its last stage ends or `shutdown` resolves.
///
/// The plan is validated first; an invalid plan fails before any request is sent.
pub async fn run<S>(plan: &RunPlan, shutdown: S) -> Result<RunOutcome>
where
    S: Future<Output = ()>,
{
    plan.validate()?;

    let run_id = Uuid::new_v4();
    let store = Arc::new(MetricsStore::new());
    let client = ProbeClient::new(ClientConfig {
        request_timeout: plan.request_timeout(),
    });
    let dispatcher = Dispatcher::new(plan, client, Arc::clone(&store))?;
    let scheduler = StageScheduler::new(plan.stages.clone(), plan.tick_interval())?;

    info!(
        %run_id,
        stages = plan.stages.len(),
        endpoints = plan.endpoints.len(),
        planned_secs = plan.total_duration().as_secs_f64(),
        "starting run"
    );

    let schedule = scheduler
        .run(
            |ordinal, phase_rx| {
                tokio::spawn(dispatcher.clone().run_virtual_user(ordinal, phase_rx))
            },
            shutdown,
        )
        .await;
    drop(dispatcher);

    // Every VU task has been joined, so nothing writes to the store any more.
    let snapshot = match Arc::try_unwrap(store) {
        Ok(store) => store.into_snapshot(),
        Err(shared) => shared.snapshot(),
    };

    let requests = snapshot.overall().requests;
    info!(%run_id, requests, "run finished");
    Ok(RunOutcome {
        run_id,
        snapshot,
        elapsed: schedule.elapsed,
        stopped_early: schedule.stopped_early,
        peak_concurrency: schedule.peak_concurrency,
    })
}

use rampgauge_common::plan::validate_stages;
use rampgauge_common::{Result, Stage};
use std::collections::BTreeMap;
use std::future::Future;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    /// Working through the stage at this index.
    Ramping(usize),
    /// Past the last stage (or shut down); VUs are finishing their last iteration.
    Draining,
    Terminal,
}

/// What the scheduler currently asks of the worker pool. Published over a watch
/// channel; workers only ever read it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Phase {
    pub state: SchedulerState,
    pub target: u32,
}

impl Phase {
    pub const IDLE: Phase = Phase {
        state: SchedulerState::Idle,
        target: 0,
    };
    pub const DRAINING: Phase = Phase {
        state: SchedulerState::Draining,
        target: 0,
    };
    pub const TERMINAL: Phase = Phase {
        state: SchedulerState::Terminal,
        target: 0,
    };

    pub fn stage_index(&self) -> Option<usize> {
        match self.state {
            SchedulerState::Ramping(index) => Some(index),
            _ => None,
        }
    }

    /// The stage a VU with this ordinal should attribute its next iteration to,
    /// or `None` if the VU should retire.
    pub fn active_stage_for(&self, ordinal: u32) -> Option<usize> {
        self.stage_index().filter(|_| ordinal < self.target)
    }
}

/// Phase for a run that has been going for `elapsed`.
///
/// Concurrency moves linearly from the previous stage's target (0 before the first
/// stage) to the current stage's target over that stage's duration, rounded to the
/// nearest whole VU.
///
/// Draining policy: past the end of the last stage the phase is `Draining` and the
/// target drops straight to 0. There is no implicit ramp-down; every VU retires at
/// its next iteration boundary. A plan that wants a gradual ramp back toward 0 ends
/// with a stage whose target is 0.
pub fn phase_at(stages: &[Stage], elapsed: Duration) -> Phase {
    let mut stage_start = Duration::ZERO;
    let mut previous_target = 0u32;

    for (index, stage) in stages.iter().enumerate() {
        let duration = stage.duration();
        let stage_end = stage_start.saturating_add(duration);
        if elapsed < stage_end {
            let progress = (elapsed - stage_start).as_secs_f64() / duration.as_secs_f64();
            let from = previous_target as f64;
            let to = stage.target_concurrency as f64;
            let target = (from + (to - from) * progress).round() as u32;
            return Phase {
                state: SchedulerState::Ramping(index),
                target,
            };
        }
        stage_start = stage_end;
        previous_target = stage.target_concurrency;
    }

    Phase::DRAINING
}

/// How the schedule played out.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScheduleSummary {
    pub elapsed: Duration,
    /// `true` when the shutdown signal fired before the last stage ended.
    pub stopped_early: bool,
    pub peak_concurrency: u32,
}

/// Drives the number of live virtual users through the stage profile.
pub struct StageScheduler {
    stages: Vec<Stage>,
    tick: Duration,
    phase_tx: watch::Sender<Phase>,
}

impl StageScheduler {
    pub fn new(stages: Vec<Stage>, tick: Duration) -> Result<Self> {
        validate_stages(&stages)?;
        let (phase_tx, _) = watch::channel(Phase::IDLE);
        Ok(Self {
            stages,
            tick: tick.max(Duration::from_millis(1)),
            phase_tx,
        })
    }

    pub fn subscribe(&self) -> watch::Receiver<Phase> {
        self.phase_tx.subscribe()
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    /// Run the schedule to completion.
    ///
    /// `spawn_vu` is called with an ordinal and a phase receiver whenever a VU has
    /// to be added. VUs retire themselves once their ordinal is at or above the
    /// published target. When the last stage ends, or `shutdown` resolves, the
    /// target drops to 0 and this waits for every VU to finish.
    pub async fn run<F, S>(self, mut spawn_vu: F, shutdown: S) -> ScheduleSummary
    where
        F: FnMut(u32, watch::Receiver<Phase>) -> JoinHandle<()>,
        S: Future<Output = ()>,
    {
        let start = Instant::now();
        let mut vus: BTreeMap<u32, JoinHandle<()>> = BTreeMap::new();
        let mut stopped_early = false;
        let mut peak_concurrency = 0u32;

        let mut interval = tokio::time::interval(self.tick);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = interval.tick() => {}
                _ = &mut shutdown => {
                    info!("shutdown requested; draining virtual users");
                    stopped_early = true;
                    break;
                }
            }

            let phase = phase_at(&self.stages, start.elapsed());
            if phase.state == SchedulerState::Draining {
                break;
            }
            self.publish(phase);

            vus.retain(|_, handle| !handle.is_finished());
            for ordinal in 0..phase.target {
                if !vus.contains_key(&ordinal) {
                    debug!(ordinal, "spawning virtual user");
                    vus.insert(ordinal, spawn_vu(ordinal, self.phase_tx.subscribe()));
                }
            }
            peak_concurrency = peak_concurrency.max(vus.len() as u32);
        }

        self.publish(Phase::DRAINING);
        for (ordinal, handle) in vus {
            if let Err(e) = handle.await {
                warn!(ordinal, error = %e, "virtual user task failed");
            }
        }
        self.publish(Phase::TERMINAL);

        let elapsed = start.elapsed();
        let elapsed_secs = elapsed.as_secs_f64();
        info!(elapsed_secs, peak_concurrency, "schedule finished");
        ScheduleSummary {
            elapsed,
            stopped_early,
            peak_concurrency,
        }
    }

    fn publish(&self, phase: Phase) {
        self.phase_tx.send_if_modified(|current| {
            if *current == phase {
                return false;
            }
            if current.stage_index() != phase.stage_index() {
                match phase.state {
                    SchedulerState::Ramping(index) => info!(
                        stage = index + 1,
                        target_concurrency = self.stages[index].target_concurrency,
                        duration_secs = self.stages[index].duration_secs,
                        "entering stage"
                    ),
                    state => info!(?state, "scheduler state changed"),
                }
            }
            *current = phase;
            true
        });
    }
}

use clap::Parser;
use rampgauge_common::{EndpointTarget, RunPlan, Stage};
use rampgauge_harness::report::Report;
use std::path::PathBuf;
use std::process;
use tracing_subscriber::EnvFilter;

const DEFAULT_LOG_FILTER: &str = "rampgauge_harness=info,rampgauge_client=warn";

#[derive(Parser)]
#[command(
    name = "rampgauge",
    about = "Staged load generator with degradation detection"
)]
struct Args {
    /// JSON run plan. Flags below override its fields.
    #[arg(long)]
    plan: Option<PathBuf>,

    /// Stage as DURATION_SECS:TARGET (repeatable; replaces the plan's stages)
    #[arg(long = "stage")]
    stages: Vec<Stage>,

    /// Base endpoint URL (repeatable; replaces the plan's endpoints)
    #[arg(long = "endpoint")]
    endpoints: Vec<String>,

    /// Per sub-request timeout in milliseconds
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// Pause between iterations of one virtual user, in milliseconds
    #[arg(long)]
    think_time_ms: Option<u64>,

    /// Status code counted as success
    #[arg(long)]
    expected_status: Option<u16>,

    /// Latency at or above which a request is slow
    #[arg(long)]
    slow_ms: Option<u64>,

    /// Latency at or above which a request fails
    #[arg(long)]
    failure_latency_ms: Option<u64>,

    /// Stage failure-rate breach threshold and overall gate
    #[arg(long)]
    max_failure_rate: Option<f64>,

    /// Stage slow-rate breach threshold
    #[arg(long)]
    max_slow_rate: Option<f64>,

    /// Percentile checked by the overall latency gate
    #[arg(long)]
    gate_percentile: Option<f64>,

    /// Fail if the gate percentile exceeds this many milliseconds
    #[arg(long)]
    gate_latency_ms: Option<u64>,

    /// Write the JSON report here instead of stdout
    #[arg(long)]
    output: Option<PathBuf>,
}

impl Args {
    fn into_plan(self) -> Result<(RunPlan, Option<PathBuf>), String> {
        let mut plan = match &self.plan {
            Some(path) => RunPlan::from_json_file(path).map_err(|e| e.to_string())?,
            None => RunPlan::new(Vec::new(), Vec::new()),
        };

        if !self.stages.is_empty() {
            plan.stages = self.stages;
        }
        if !self.endpoints.is_empty() {
            plan.endpoints = self
                .endpoints
                .into_iter()
                .map(EndpointTarget::new)
                .collect();
        }
        if let Some(v) = self.timeout_ms {
            plan.request_timeout_ms = v;
        }
        if let Some(v) = self.think_time_ms {
            plan.think_time_ms = v;
        }
        if let Some(v) = self.expected_status {
            plan.expected_status = v;
        }
        let t = &mut plan.thresholds;
        if let Some(v) = self.slow_ms {
            t.slow_ms = v;
        }
        if let Some(v) = self.failure_latency_ms {
            t.failure_latency_ms = v;
        }
        if let Some(v) = self.max_failure_rate {
            t.failure_rate = v;
        }
        if let Some(v) = self.max_slow_rate {
            t.slow_rate = v;
        }
        if let Some(v) = self.gate_percentile {
            t.gate_percentile = v;
        }
        if let Some(v) = self.gate_latency_ms {
            t.gate_latency_ms = v;
        }

        plan.validate().map_err(|e| e.to_string())?;
        Ok((plan, self.output))
    }
}

/// Resolves on Ctrl-C. If the handler cannot be installed the run is never interrupted.
async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_err() {
        std::future::pending::<()>().await;
    }
}

#[tokio::main]
async fn main() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let (plan, output) = match Args::parse().into_plan() {
        Ok(parsed) => parsed,
        Err(e) => {
            eprintln!("Invalid run configuration: {e}");
            process::exit(3);
        }
    };

    let outcome = rampgauge_harness::run(&plan, shutdown_signal())
        .await
        .unwrap_or_else(|e| {
            eprintln!("Run failed to start: {e}");
            process::exit(3);
        });

    let report = Report::build(&plan, &outcome);
    let json = match report.to_json() {
        Ok(json) => json,
        Err(e) => {
            eprintln!("Failed to serialize report: {e}");
            process::exit(3);
        }
    };

    match output {
        Some(path) => {
            if let Err(e) = std::fs::write(&path, json) {
                eprintln!("Failed to write report to {}: {e}", path.display());
                process::exit(3);
            }
        }
        None => println!("{json}"),
    }

    eprint!("{}", report.render_text(&plan.thresholds));
    process::exit(report.gate(&plan.thresholds).exit_code());
}

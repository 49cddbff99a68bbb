use thiserror::Error;

pub mod plan;

pub use plan::{EndpointTarget, RunPlan, Stage, Thresholds};

/// Error types for RampGauge operations
#[derive(Debug, Error, Clone, PartialEq)]
pub enum RampGaugeError {
    #[error("Run plan has no stages")]
    NoStages,

    #[error("Stage {index} has invalid duration: {duration_secs}s")]
    InvalidStageDuration { index: usize, duration_secs: f64 },

    #[error("Run plan has no endpoints")]
    NoEndpoints,

    #[error("Invalid endpoint URL {0:?}: {1}")]
    InvalidEndpoint(String, String),

    #[error("Duplicate base endpoint {0:?}")]
    DuplicateEndpoint(String),

    #[error("Request timeout must be positive")]
    ZeroTimeout,

    #[error("Invalid threshold {name}: {value}")]
    InvalidThreshold { name: &'static str, value: f64 },

    #[error("Failed to read run plan {0}: {1}")]
    PlanIo(String, String),

    #[error("Failed to parse run plan: {0}")]
    PlanParse(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Request timed out after {0} ms")]
    Timeout(u64),
}

/// Result type for RampGauge operations
pub type Result<T> = std::result::Result<T, RampGaugeError>;

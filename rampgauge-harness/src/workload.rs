use rampgauge_common::{EndpointTarget, RampGaugeError, Result};

/// Fixed assignment of virtual users to endpoints.
///
/// VU `n` always drives `targets[n % targets.len()]`, so two runs with the same
/// plan spread load across endpoints identically.
///
/// | ordinal | 2 targets | 3 targets |
/// |---------|-----------|-----------|
/// |    0    |     0     |     0     |
/// |    1    |     1     |     1     |
/// |    2    |     0     |     2     |
/// |    3    |     1     |     0     |
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Workload {
    targets: Vec<EndpointTarget>,
}

impl Workload {
    pub fn new(targets: Vec<EndpointTarget>) -> Result<Self> {
        if targets.is_empty() {
            return Err(RampGaugeError::NoEndpoints);
        }
        Ok(Self { targets })
    }

    /// Index of the target for `ordinal`. Exposed for deterministic testing.
    pub fn target_index(ordinal: u32, target_count: usize) -> usize {
        ordinal as usize % target_count
    }

    pub fn target_for(&self, ordinal: u32) -> &EndpointTarget {
        &self.targets[Self::target_index(ordinal, self.targets.len())]
    }

    pub fn targets(&self) -> &[EndpointTarget] {
        &self.targets
    }
}

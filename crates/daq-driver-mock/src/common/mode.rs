//! Operational modes for mock devices.
//!
//! - **Instant**: progress is counted in polls, not wall-clock time. Fully
//!   deterministic, used by unit tests.
//! - **Realistic**: captures take the configured exposure and temperatures
//!   drift towards their setpoint over time.
//! - **Chaos**: realistic timing plus random failures on every operation.

use serde::{Deserialize, Serialize};

/// Operational modes for mock devices
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MockMode {
    /// Poll-counted, deterministic - for unit tests
    #[default]
    Instant,
    /// Hardware-like timing - for integration tests and demos
    Realistic,
    /// Hardware-like timing with random failures - for resilience testing
    Chaos,
}

impl MockMode {
    /// Whether progress follows wall-clock time.
    #[must_use]
    pub fn is_timed(&self) -> bool {
        !matches!(self, MockMode::Instant)
    }
}

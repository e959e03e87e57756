//! Error injection framework for mock devices.
//!
//! Lets tests make a mock spectrometer or cryostat fail on chosen operations,
//! after a number of calls, at random, or drop off the network entirely.
//! Failures are reported as daq-core `DriverError`s.

use super::rng::MockRng;
use daq_core::error::{DriverError, DriverErrorKind};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// Error injection configuration for mock devices
#[derive(Clone, Debug)]
pub struct ErrorConfig {
    /// Per-operation failure rate (0.0 to 1.0), "*" applies to every operation
    failure_rates: Arc<HashMap<&'static str, f64>>,
    /// Specific failure scenarios
    scenarios: Arc<Vec<ErrorScenario>>,
    /// RNG for failure decisions
    rng: Arc<MockRng>,
    /// State tracking for scenarios
    state: Arc<Mutex<ErrorState>>,
}

/// A scripted failure.
#[derive(Debug, Clone)]
pub enum ErrorScenario {
    /// Fail `operation` after it succeeded `count` times
    FailAfterN {
        /// Operation name, e.g. "start_capture"
        operation: &'static str,
        /// Successful calls before failing
        count: u32,
    },
    /// Every call to `operation` times out
    Timeout {
        /// Operation name
        operation: &'static str,
    },
    /// The first call of any operation loses the link; every later call fails
    CommunicationLoss,
}

#[derive(Default, Debug)]
struct ErrorState {
    /// Operation counters for FailAfterN scenarios
    operation_counts: HashMap<&'static str, u32>,
    /// Whether communication is lost
    communication_lost: bool,
}

impl ErrorConfig {
    /// Create error config with no errors (default)
    pub fn none() -> Self {
        Self::build(HashMap::new(), Vec::new(), None)
    }

    /// Uniform random failures on every operation, with an optional seed
    pub fn random_failures_seeded(rate: f64, seed: Option<u64>) -> Self {
        let mut rates = HashMap::new();
        rates.insert("*", rate);
        Self::build(rates, Vec::new(), seed)
    }

    /// Create error config with a single scenario
    pub fn scenario(scenario: ErrorScenario) -> Self {
        Self::scenarios(vec![scenario])
    }

    /// Create error config with multiple scenarios
    pub fn scenarios(scenarios: Vec<ErrorScenario>) -> Self {
        Self::build(HashMap::new(), scenarios, None)
    }

    /// Create error config with custom failure rates per operation
    pub fn with_rates(rates: HashMap<&'static str, f64>) -> Self {
        Self::build(rates, Vec::new(), None)
    }

    fn build(
        rates: HashMap<&'static str, f64>,
        scenarios: Vec<ErrorScenario>,
        seed: Option<u64>,
    ) -> Self {
        Self {
            failure_rates: Arc::new(rates),
            scenarios: Arc::new(scenarios),
            rng: Arc::new(MockRng::new(seed)),
            state: Arc::new(Mutex::new(ErrorState::default())),
        }
    }

    /// Take the device off the network (or bring it back).
    pub fn set_offline(&self, offline: bool) {
        self.state.lock().communication_lost = offline;
    }

    /// Whether the device is currently unreachable.
    #[must_use]
    pub fn is_offline(&self) -> bool {
        self.state.lock().communication_lost
    }

    /// Check if an operation should fail and return appropriate error
    pub fn check_operation(
        &self,
        driver_type: &str,
        operation: &'static str,
    ) -> Result<(), DriverError> {
        let mut state = self.state.lock();

        if state.communication_lost {
            return Err(DriverError::new(
                driver_type,
                DriverErrorKind::Communication,
                "Communication lost",
            ));
        }

        for scenario in self.scenarios.iter() {
            match scenario {
                ErrorScenario::FailAfterN {
                    operation: op,
                    count,
                } if *op == operation => {
                    let current = state.operation_counts.entry(operation).or_insert(0);
                    *current += 1;
                    if *current > *count {
                        return Err(DriverError::new(
                            driver_type,
                            DriverErrorKind::Hardware,
                            format!("Injected failure after {} operations", count),
                        ));
                    }
                }
                ErrorScenario::Timeout { operation: op } if *op == operation => {
                    return Err(DriverError::new(
                        driver_type,
                        DriverErrorKind::Timeout,
                        format!("Operation '{}' timed out", operation),
                    ));
                }
                ErrorScenario::CommunicationLoss => {
                    state.communication_lost = true;
                    return Err(DriverError::new(
                        driver_type,
                        DriverErrorKind::Communication,
                        "Communication lost",
                    ));
                }
                _ => {}
            }
        }

        let rate = self
            .failure_rates
            .get(operation)
            .or_else(|| self.failure_rates.get("*"))
            .copied()
            .unwrap_or(0.0);

        if self.rng.should_fail(rate) {
            return Err(DriverError::new(
                driver_type,
                DriverErrorKind::Hardware,
                format!("Random failure on operation '{}'", operation),
            ));
        }

        Ok(())
    }

    /// Reset error state (clear counters, restore communication)
    pub fn reset(&self) {
        *self.state.lock() = ErrorState::default();
    }
}

impl Default for ErrorConfig {
    fn default() -> Self {
        Self::none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_errors() {
        let config = ErrorConfig::none();
        for _ in 0..100 {
            assert!(config.check_operation("mock", "is_stable").is_ok());
        }
    }

    #[test]
    fn test_random_failures() {
        let config = ErrorConfig::random_failures_seeded(0.5, Some(42));
        let failures = (0..1000)
            .filter(|_| config.check_operation("mock", "retrieve_frame").is_err())
            .count();
        assert!(failures > 400 && failures < 600, "Got {} failures", failures);
    }

    #[test]
    fn test_fail_after_n_and_reset() {
        let config = ErrorConfig::scenario(ErrorScenario::FailAfterN {
            operation: "start_capture",
            count: 2,
        });

        assert!(config.check_operation("mock", "start_capture").is_ok());
        assert!(config.check_operation("mock", "start_capture").is_ok());
        assert!(config.check_operation("mock", "start_capture").is_err());
        // Other operations are unaffected
        assert!(config.check_operation("mock", "retrieve_frame").is_ok());

        config.reset();
        assert!(config.check_operation("mock", "start_capture").is_ok());
    }

    #[test]
    fn test_timeout_scenario() {
        let config = ErrorConfig::scenario(ErrorScenario::Timeout {
            operation: "is_stable",
        });
        let err = config.check_operation("mock", "is_stable").unwrap_err();
        assert_eq!(err.kind, DriverErrorKind::Timeout);
        assert!(err.message.contains("timed out"));
        assert!(config.check_operation("mock", "current_temperature").is_ok());
    }

    #[test]
    fn test_communication_loss_is_sticky() {
        let config = ErrorConfig::scenario(ErrorScenario::CommunicationLoss);
        let err = config.check_operation("mock", "is_stable").unwrap_err();
        assert_eq!(err.kind, DriverErrorKind::Communication);
        assert!(config.check_operation("mock", "warmup").is_err());
        assert!(config.is_offline());
    }

    #[test]
    fn test_offline_toggle() {
        let config = ErrorConfig::none();
        config.set_offline(true);
        assert!(config.check_operation("mock", "is_stable").is_err());
        config.set_offline(false);
        assert!(config.check_operation("mock", "is_stable").is_ok());
    }

    #[test]
    fn test_custom_rates() {
        let mut rates = HashMap::new();
        rates.insert("retrieve_frame", 1.0);
        rates.insert("start_capture", 0.0);
        let config = ErrorConfig::with_rates(rates);

        for _ in 0..10 {
            assert!(config.check_operation("mock", "retrieve_frame").is_err());
            assert!(config.check_operation("mock", "start_capture").is_ok());
        }
    }
}

//! Mock cryostat / temperature controller.

use crate::common::{ErrorConfig, MockMode, MockRng};
use anyhow::Result;
use async_trait::async_trait;
use daq_core::capabilities::TemperatureControl;
use daq_core::error::{DriverError, DriverErrorKind};
use parking_lot::Mutex;
use std::time::Instant;
use tracing::debug;

const DRIVER: &str = "mock_cryostat";

/// Room temperature the cryostat returns to on warm-up.
pub const AMBIENT_K: f64 = 295.0;

/// A command received by the cryostat, recorded in arrival order.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CryostatCommand {
    /// New setpoint in kelvin
    SetTarget(f64),
    /// Automatic temperature control switched on or off
    AutoControl(bool),
    /// Warm up to ambient
    Warmup,
    /// Abort the running operation
    Abort,
}

// =============================================================================
// TemperatureSimulation
// =============================================================================

/// Exponential approach of the sample temperature to its goal.
#[derive(Debug, Clone)]
struct TemperatureSimulation {
    current: f64,
    drift_rate: f64, // 1/s
    last_update: Instant,
}

impl TemperatureSimulation {
    fn new(initial: f64, drift_rate: f64) -> Self {
        Self {
            current: initial,
            drift_rate,
            last_update: Instant::now(),
        }
    }

    fn update(&mut self, goal: f64, instant: bool) {
        if instant {
            self.current = goal;
        } else {
            let dt = self.last_update.elapsed().as_secs_f64();
            let diff = goal - self.current;
            self.current += diff * (1.0 - (-self.drift_rate * dt).exp());
        }
        self.last_update = Instant::now();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Activity {
    Idle,
    Tracking,
    WarmingUp,
}

#[derive(Debug)]
struct CryostatState {
    target: f64,
    auto_control: bool,
    activity: Activity,
    simulation: TemperatureSimulation,
    stable_polls: u32,
    commands: Vec<CryostatCommand>,
}

impl CryostatState {
    fn goal(&self) -> Option<f64> {
        match self.activity {
            Activity::Idle => None,
            Activity::Tracking => Some(self.target),
            Activity::WarmingUp => Some(AMBIENT_K),
        }
    }
}

// =============================================================================
// MockCryostatBuilder
// =============================================================================

/// Builder for [`MockCryostat`].
pub struct MockCryostatBuilder {
    mode: MockMode,
    initial_temperature: f64,
    tolerance: f64,
    settle_polls: u32,
    drift_rate: f64,
    noise: f64,
    error_config: ErrorConfig,
    seed: Option<u64>,
}

impl MockCryostatBuilder {
    fn new() -> Self {
        Self {
            mode: MockMode::Instant,
            initial_temperature: AMBIENT_K,
            tolerance: 0.5,
            settle_polls: 1,
            drift_rate: 0.5,
            noise: 0.0,
            error_config: ErrorConfig::none(),
            seed: None,
        }
    }

    /// Timing mode.
    pub fn mode(mut self, mode: MockMode) -> Self {
        self.mode = mode;
        self
    }

    /// Sample temperature at power-on, kelvin.
    pub fn initial_temperature(mut self, kelvin: f64) -> Self {
        self.initial_temperature = kelvin;
        self
    }

    /// Band around the target that counts as "at temperature".
    pub fn tolerance(mut self, kelvin: f64) -> Self {
        self.tolerance = kelvin.abs();
        self
    }

    /// Consecutive in-band polls needed before reporting stable.
    pub fn settle_polls(mut self, polls: u32) -> Self {
        self.settle_polls = polls.max(1);
        self
    }

    /// Exponential approach rate in 1/s (timed modes).
    pub fn drift_rate(mut self, rate: f64) -> Self {
        self.drift_rate = rate.max(0.0);
        self
    }

    /// Sensor noise amplitude, kelvin.
    pub fn noise(mut self, kelvin: f64) -> Self {
        self.noise = kelvin.abs();
        self
    }

    /// Error injection.
    pub fn error_config(mut self, config: ErrorConfig) -> Self {
        self.error_config = config;
        self
    }

    /// Seed for noise and random failures.
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Build the cryostat.
    pub fn build(self) -> MockCryostat {
        let error_config = if self.mode == MockMode::Chaos {
            ErrorConfig::random_failures_seeded(0.05, self.seed)
        } else {
            self.error_config
        };

        MockCryostat {
            mode: self.mode,
            tolerance: self.tolerance,
            settle_polls: self.settle_polls,
            noise: self.noise,
            error_config,
            rng: MockRng::new(self.seed),
            state: Mutex::new(CryostatState {
                target: self.initial_temperature,
                auto_control: false,
                activity: Activity::Idle,
                simulation: TemperatureSimulation::new(self.initial_temperature, self.drift_rate),
                // Idle at power-on counts as settled
                stable_polls: self.settle_polls + 1,
                commands: Vec::new(),
            }),
        }
    }
}

// =============================================================================
// MockCryostat
// =============================================================================

/// Simulated cryostat.
///
/// Stability is reported the way a real controller's "stable" flag behaves:
/// any new setpoint (or a warm-up) clears it, and it is raised again only
/// after the temperature has stayed within `tolerance` of the goal for more
/// than `settle_polls` consecutive polls. A setpoint equal to the previous one
/// therefore still produces a not-stable/stable transition.
///
/// In Instant mode the temperature jumps to its goal on the first poll after
/// a setpoint change and then needs `settle_polls` further in-band polls.
#[derive(Debug)]
pub struct MockCryostat {
    mode: MockMode,
    tolerance: f64,
    settle_polls: u32,
    noise: f64,
    error_config: ErrorConfig,
    rng: MockRng,
    state: Mutex<CryostatState>,
}

impl Default for MockCryostat {
    fn default() -> Self {
        Self::new()
    }
}

impl MockCryostat {
    /// Instant-mode cryostat at ambient temperature.
    pub fn new() -> Self {
        Self::builder().build()
    }

    /// Create builder for advanced configuration
    pub fn builder() -> MockCryostatBuilder {
        MockCryostatBuilder::new()
    }

    /// Error injection handle (e.g. to take the controller offline).
    pub fn error_config(&self) -> &ErrorConfig {
        &self.error_config
    }

    /// Every command received so far.
    pub fn commands(&self) -> Vec<CryostatCommand> {
        self.state.lock().commands.clone()
    }

    /// Setpoints received so far, in order.
    pub fn setpoints(&self) -> Vec<f64> {
        self.state
            .lock()
            .commands
            .iter()
            .filter_map(|c| match c {
                CryostatCommand::SetTarget(k) => Some(*k),
                _ => None,
            })
            .collect()
    }

    fn check(&self, operation: &'static str) -> Result<()> {
        self.error_config.check_operation(DRIVER, operation)?;
        Ok(())
    }

    fn update(&self, state: &mut CryostatState) {
        match state.goal() {
            Some(goal) => state.simulation.update(goal, !self.mode.is_timed()),
            None => state.simulation.last_update = Instant::now(),
        }
    }

    fn record(state: &mut CryostatState, command: CryostatCommand) {
        debug!(?command, "Cryostat command");
        state.commands.push(command);
    }
}

#[async_trait]
impl TemperatureControl for MockCryostat {
    async fn set_target_temperature(&self, kelvin: f64) -> Result<()> {
        self.check("set_target_temperature")?;
        if !(kelvin.is_finite() && kelvin > 0.0) {
            return Err(DriverError::new(
                DRIVER,
                DriverErrorKind::InvalidParameter,
                format!("setpoint {} K out of range", kelvin),
            )
            .into());
        }
        let mut state = self.state.lock();
        self.update(&mut state);
        state.target = kelvin;
        state.activity = Activity::Tracking;
        state.stable_polls = 0;
        Self::record(&mut state, CryostatCommand::SetTarget(kelvin));
        Ok(())
    }

    async fn target_temperature(&self) -> Result<f64> {
        self.check("target_temperature")?;
        Ok(self.state.lock().target)
    }

    async fn current_temperature(&self) -> Result<f64> {
        self.check("current_temperature")?;
        let mut state = self.state.lock();
        self.update(&mut state);
        Ok(state.simulation.current + self.rng.noise(self.noise))
    }

    async fn is_stable(&self) -> Result<bool> {
        self.check("is_stable")?;
        let mut state = self.state.lock();
        let settled_on = state.goal().unwrap_or(state.simulation.current);
        let in_band = (state.simulation.current - settled_on).abs() <= self.tolerance;
        if in_band {
            state.stable_polls = state.stable_polls.saturating_add(1);
        } else {
            state.stable_polls = 0;
        }
        // Advance after sampling so the first poll after a new setpoint sees
        // the old temperature
        self.update(&mut state);
        Ok(in_band && state.stable_polls > self.settle_polls)
    }

    async fn set_auto_control(&self, enabled: bool) -> Result<()> {
        self.check("set_auto_control")?;
        let mut state = self.state.lock();
        state.auto_control = enabled;
        Self::record(&mut state, CryostatCommand::AutoControl(enabled));
        Ok(())
    }

    async fn auto_control(&self) -> Result<bool> {
        self.check("auto_control")?;
        Ok(self.state.lock().auto_control)
    }

    async fn warmup(&self) -> Result<()> {
        self.check("warmup")?;
        let mut state = self.state.lock();
        self.update(&mut state);
        state.activity = Activity::WarmingUp;
        state.stable_polls = 0;
        Self::record(&mut state, CryostatCommand::Warmup);
        Ok(())
    }

    async fn abort(&self) -> Result<()> {
        self.check("abort")?;
        let mut state = self.state.lock();
        self.update(&mut state);
        state.activity = Activity::Idle;
        Self::record(&mut state, CryostatCommand::Abort);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_new_setpoint_clears_stability() {
        let cryostat = MockCryostat::new();
        assert!(cryostat.is_stable().await.unwrap());

        cryostat.set_target_temperature(10.0).await.unwrap();
        // First poll still sees ambient
        assert!(!cryostat.is_stable().await.unwrap());
        // In band, but not settled yet
        assert!(!cryostat.is_stable().await.unwrap());
        assert!(cryostat.is_stable().await.unwrap());
        assert_eq!(cryostat.current_temperature().await.unwrap(), 10.0);
    }

    #[tokio::test]
    async fn test_repeated_setpoint_resets_stability() {
        let cryostat = MockCryostat::new();
        cryostat.set_target_temperature(280.0).await.unwrap();
        while !cryostat.is_stable().await.unwrap() {}

        cryostat.set_target_temperature(280.0).await.unwrap();
        assert!(!cryostat.is_stable().await.unwrap());
        assert!(cryostat.is_stable().await.unwrap());
        assert_eq!(cryostat.setpoints(), vec![280.0, 280.0]);
    }

    #[tokio::test]
    async fn test_settle_polls() {
        let cryostat = MockCryostat::builder().settle_polls(3).build();
        cryostat.set_target_temperature(100.0).await.unwrap();
        let mut polls = 0;
        while !cryostat.is_stable().await.unwrap() {
            polls += 1;
            assert!(polls < 10);
        }
        // One poll to get there, three in band
        assert_eq!(polls, 4);
    }

    #[tokio::test]
    async fn test_warmup_and_abort() {
        let cryostat = MockCryostat::builder().initial_temperature(20.0).build();
        cryostat.warmup().await.unwrap();
        assert_eq!(cryostat.current_temperature().await.unwrap(), AMBIENT_K);

        cryostat.set_target_temperature(50.0).await.unwrap();
        cryostat.abort().await.unwrap();
        let held = cryostat.current_temperature().await.unwrap();
        assert_eq!(held, 50.0);
        assert_eq!(
            cryostat.commands(),
            vec![
                CryostatCommand::Warmup,
                CryostatCommand::SetTarget(50.0),
                CryostatCommand::Abort,
            ]
        );
    }

    #[tokio::test]
    async fn test_auto_control_flag() {
        let cryostat = MockCryostat::new();
        assert!(!cryostat.auto_control().await.unwrap());
        cryostat.set_auto_control(true).await.unwrap();
        assert!(cryostat.auto_control().await.unwrap());
    }

    #[tokio::test]
    async fn test_invalid_setpoint() {
        let cryostat = MockCryostat::new();
        assert!(cryostat.set_target_temperature(-4.0).await.is_err());
        assert!(cryostat.set_target_temperature(f64::INFINITY).await.is_err());
        assert!(cryostat.setpoints().is_empty());
    }

    #[tokio::test]
    async fn test_offline_controller() {
        let cryostat = MockCryostat::new();
        cryostat.error_config().set_offline(true);
        assert!(cryostat.set_target_temperature(100.0).await.is_err());
        assert!(cryostat.setpoints().is_empty());

        cryostat.error_config().set_offline(false);
        cryostat.set_target_temperature(100.0).await.unwrap();
        assert_eq!(cryostat.setpoints(), vec![100.0]);
    }

    #[tokio::test]
    async fn test_realistic_drift() {
        let cryostat = MockCryostat::builder()
            .mode(MockMode::Realistic)
            .initial_temperature(300.0)
            .drift_rate(20.0)
            .build();
        cryostat.set_target_temperature(200.0).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        let t = cryostat.current_temperature().await.unwrap();
        assert!(t < 300.0 && t > 200.0, "temperature {t} should be drifting");
    }
}

//! Mock spectrometer (CCD detector behind a grating spectrograph).

use crate::common::{ErrorConfig, MockMode, MockRng};
use crate::spectrum::generate_spectrum;
use anyhow::Result;
use async_trait::async_trait;
use daq_core::capabilities::{BinningControl, ExposureControl, FrameCapture, SpectrographControl};
use daq_core::data::{BinningMode, BinningSettings, Frame, FrameRetrieval};
use daq_core::error::{DriverError, DriverErrorKind};
use parking_lot::Mutex;
use std::time::{Duration, Instant};
use tracing::debug;

const DRIVER: &str = "mock_spectrometer";

// =============================================================================
// MockSpectrometerBuilder
// =============================================================================

/// Builder for [`MockSpectrometer`].
pub struct MockSpectrometerBuilder {
    sensor_width: u32,
    sensor_height: u32,
    mode: MockMode,
    exposure_s: f64,
    centre_wavelength_nm: f64,
    binning: BinningSettings,
    busy_polls: u32,
    noise_counts: f64,
    error_config: ErrorConfig,
    seed: Option<u64>,
}

impl MockSpectrometerBuilder {
    fn new() -> Self {
        Self {
            sensor_width: 1024,
            sensor_height: 100,
            mode: MockMode::Instant,
            exposure_s: 0.1,
            centre_wavelength_nm: 650.0,
            binning: BinningSettings {
                mode: BinningMode::LineSensor,
                row_bin_centre: 50,
                bin_width: 1,
                bin_height: 20,
            },
            busy_polls: 0,
            noise_counts: 5.0,
            error_config: ErrorConfig::none(),
            seed: None,
        }
    }

    /// Physical sensor size in pixels.
    pub fn sensor(mut self, width: u32, height: u32) -> Self {
        self.sensor_width = width.max(1);
        self.sensor_height = height.max(1);
        self
    }

    /// Timing mode.
    pub fn mode(mut self, mode: MockMode) -> Self {
        self.mode = mode;
        self
    }

    /// Initial exposure in seconds.
    pub fn exposure(mut self, seconds: f64) -> Self {
        self.exposure_s = seconds.max(0.0);
        self
    }

    /// Initial centre wavelength in nanometres.
    pub fn centre_wavelength(mut self, nm: f64) -> Self {
        self.centre_wavelength_nm = nm;
        self
    }

    /// Initial binning.
    pub fn binning(mut self, binning: BinningSettings) -> Self {
        self.binning = binning;
        self
    }

    /// In Instant mode, number of `capture_in_progress` polls that report
    /// busy before a capture completes.
    pub fn busy_polls(mut self, polls: u32) -> Self {
        self.busy_polls = polls;
        self
    }

    /// Read noise amplitude in counts.
    pub fn noise(mut self, counts: f64) -> Self {
        self.noise_counts = counts.max(0.0);
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

    /// Build the spectrometer.
    pub fn build(self) -> MockSpectrometer {
        let error_config = if self.mode == MockMode::Chaos {
            ErrorConfig::random_failures_seeded(0.05, self.seed)
        } else {
            self.error_config
        };

        MockSpectrometer {
            mode: self.mode,
            busy_polls: self.busy_polls,
            noise_counts: self.noise_counts,
            sensor: (self.sensor_width, self.sensor_height),
            error_config,
            rng: MockRng::new(self.seed),
            state: Mutex::new(SpectrometerState {
                exposure_s: self.exposure_s,
                centre_wavelength_nm: self.centre_wavelength_nm,
                binning: self.binning,
                acquisition_running: false,
                capture: Capture::Idle,
                drop_next: false,
                triggers: 0,
                releases: 0,
                frames_captured: 0,
            }),
        }
    }
}

// =============================================================================
// MockSpectrometer
// =============================================================================

#[derive(Debug)]
enum Capture {
    Idle,
    Exposing { started: Instant, polls_left: u32 },
    Done(Frame),
}

#[derive(Debug)]
struct SpectrometerState {
    exposure_s: f64,
    centre_wavelength_nm: f64,
    binning: BinningSettings,
    acquisition_running: bool,
    capture: Capture,
    drop_next: bool,
    triggers: u64,
    releases: u64,
    frames_captured: u64,
}

/// Simulated spectrometer.
///
/// Captures run "in the background": `start_capture` returns at once and the
/// frame becomes available after `busy_polls` polls (Instant mode) or after
/// the exposure time has elapsed (Realistic/Chaos). The readout shape follows
/// the binning mode:
///
/// | mode            | frame (height × width)                     |
/// |-----------------|--------------------------------------------|
/// | `FullSensor`    | sensor height × sensor width / bin width   |
/// | `BinnedSensor`  | sensor height / bin height × …             |
/// | `LineSensor`    | 1 × …                                      |
/// | `CustomRegions` | 1 × …                                      |
///
/// # Example
///
/// ```rust,ignore
/// let spectrometer = MockSpectrometer::builder().sensor(512, 64).build();
/// spectrometer.start_capture().await?;
/// while spectrometer.capture_in_progress().await? {}
/// let frame = spectrometer.retrieve_frame().await?;
/// ```
#[derive(Debug)]
pub struct MockSpectrometer {
    mode: MockMode,
    busy_polls: u32,
    noise_counts: f64,
    sensor: (u32, u32),
    error_config: ErrorConfig,
    rng: MockRng,
    state: Mutex<SpectrometerState>,
}

impl Default for MockSpectrometer {
    fn default() -> Self {
        Self::new()
    }
}

impl MockSpectrometer {
    /// Instant-mode spectrometer with a 1024×100 sensor in line mode.
    pub fn new() -> Self {
        Self::builder().build()
    }

    /// Create builder for advanced configuration
    pub fn builder() -> MockSpectrometerBuilder {
        MockSpectrometerBuilder::new()
    }

    /// Error injection handle (e.g. to take the device offline).
    pub fn error_config(&self) -> &ErrorConfig {
        &self.error_config
    }

    /// Make the next completed capture disappear, as if the data channel had
    /// been reset under the detector.
    pub fn drop_next_frame(&self) {
        self.state.lock().drop_next = true;
    }

    /// Number of accepted capture triggers.
    pub fn trigger_count(&self) -> u64 {
        self.state.lock().triggers
    }

    /// Number of `release` calls.
    pub fn release_count(&self) -> u64 {
        self.state.lock().releases
    }

    /// Number of frames handed out.
    pub fn frames_captured(&self) -> u64 {
        self.state.lock().frames_captured
    }

    /// Current value of the operator running indicator.
    pub fn is_acquisition_running(&self) -> bool {
        self.state.lock().acquisition_running
    }

    /// Shape of the next frame as `(height, width)`.
    pub fn frame_shape(&self) -> (u32, u32) {
        Self::shape_for(self.sensor, &self.state.lock().binning)
    }

    fn shape_for(sensor: (u32, u32), binning: &BinningSettings) -> (u32, u32) {
        let (sensor_width, sensor_height) = sensor;
        let width = (sensor_width / binning.bin_width.max(1)).max(1);
        let height = match binning.mode {
            BinningMode::FullSensor => sensor_height,
            BinningMode::BinnedSensor => (sensor_height / binning.bin_height.max(1)).max(1),
            BinningMode::LineSensor | BinningMode::CustomRegions => 1,
        };
        (height, width)
    }

    fn check(&self, operation: &'static str) -> Result<()> {
        self.error_config.check_operation(DRIVER, operation)?;
        Ok(())
    }

    /// Complete the running capture if its time has come.
    fn advance(&self, state: &mut SpectrometerState, poll: bool) -> Result<()> {
        let finished = match &mut state.capture {
            Capture::Exposing {
                started,
                polls_left,
            } => {
                if self.mode.is_timed() {
                    started.elapsed() >= Duration::from_secs_f64(state.exposure_s)
                } else if *polls_left > 0 {
                    if poll {
                        *polls_left -= 1;
                    }
                    false
                } else {
                    true
                }
            }
            _ => false,
        };

        if finished {
            if std::mem::take(&mut state.drop_next) {
                debug!("Dropping completed frame");
                state.capture = Capture::Idle;
            } else {
                let (height, width) = Self::shape_for(self.sensor, &state.binning);
                let pixels = generate_spectrum(
                    width,
                    height,
                    state.centre_wavelength_nm,
                    state.exposure_s,
                    self.noise_counts,
                    &self.rng,
                );
                state.capture = Capture::Done(Frame::new(width, height, pixels)?);
            }
        }
        Ok(())
    }
}

#[async_trait]
impl FrameCapture for MockSpectrometer {
    async fn start_capture(&self) -> Result<()> {
        self.check("start_capture")?;
        let mut state = self.state.lock();
        if matches!(state.capture, Capture::Exposing { .. }) {
            return Err(DriverError::new(
                DRIVER,
                DriverErrorKind::Hardware,
                "capture already in progress",
            )
            .into());
        }
        state.capture = Capture::Exposing {
            started: Instant::now(),
            polls_left: self.busy_polls,
        };
        state.triggers += 1;
        debug!(trigger = state.triggers, "Capture started");
        Ok(())
    }

    async fn capture_in_progress(&self) -> Result<bool> {
        self.check("capture_in_progress")?;
        let mut state = self.state.lock();
        // Report the poll that found it busy, complete on the next one
        let was_busy = matches!(
            state.capture,
            Capture::Exposing { polls_left, .. } if polls_left > 0 || self.mode.is_timed()
        );
        self.advance(&mut state, true)?;
        Ok(was_busy && matches!(state.capture, Capture::Exposing { .. }))
    }

    async fn retrieve_frame(&self) -> Result<FrameRetrieval> {
        self.check("retrieve_frame")?;
        let mut state = self.state.lock();
        self.advance(&mut state, false)?;
        match std::mem::replace(&mut state.capture, Capture::Idle) {
            Capture::Done(frame) => {
                state.frames_captured += 1;
                Ok(FrameRetrieval::Frame(frame))
            }
            still_exposing @ Capture::Exposing { .. } => {
                state.capture = still_exposing;
                Ok(FrameRetrieval::NoFrameAvailable)
            }
            Capture::Idle => Ok(FrameRetrieval::NoFrameAvailable),
        }
    }

    async fn release(&self) -> Result<()> {
        self.check("release")?;
        let mut state = self.state.lock();
        state.capture = Capture::Idle;
        state.releases += 1;
        Ok(())
    }

    async fn set_acquisition_running(&self, running: bool) -> Result<()> {
        self.check("set_acquisition_running")?;
        self.state.lock().acquisition_running = running;
        Ok(())
    }

    async fn acquisition_running(&self) -> Result<bool> {
        self.check("acquisition_running")?;
        Ok(self.state.lock().acquisition_running)
    }
}

#[async_trait]
impl ExposureControl for MockSpectrometer {
    async fn set_exposure(&self, seconds: f64) -> Result<()> {
        self.check("set_exposure")?;
        if !(seconds.is_finite() && seconds >= 0.0) {
            return Err(DriverError::new(
                DRIVER,
                DriverErrorKind::InvalidParameter,
                format!("exposure {} s out of range", seconds),
            )
            .into());
        }
        self.state.lock().exposure_s = seconds;
        Ok(())
    }

    async fn get_exposure(&self) -> Result<f64> {
        self.check("get_exposure")?;
        Ok(self.state.lock().exposure_s)
    }
}

#[async_trait]
impl SpectrographControl for MockSpectrometer {
    async fn set_centre_wavelength(&self, nm: f64) -> Result<()> {
        self.check("set_centre_wavelength")?;
        if !(nm.is_finite() && nm > 0.0) {
            return Err(DriverError::new(
                DRIVER,
                DriverErrorKind::InvalidParameter,
                format!("centre wavelength {} nm out of range", nm),
            )
            .into());
        }
        self.state.lock().centre_wavelength_nm = nm;
        Ok(())
    }

    async fn centre_wavelength(&self) -> Result<f64> {
        self.check("centre_wavelength")?;
        Ok(self.state.lock().centre_wavelength_nm)
    }
}

#[async_trait]
impl BinningControl for MockSpectrometer {
    async fn set_binning(&self, settings: BinningSettings) -> Result<()> {
        self.check("set_binning")?;
        if settings.bin_width == 0 || settings.bin_height == 0 {
            return Err(DriverError::new(
                DRIVER,
                DriverErrorKind::InvalidParameter,
                "bin sizes must be at least one pixel",
            )
            .into());
        }
        self.state.lock().binning = settings;
        Ok(())
    }

    async fn binning(&self) -> Result<BinningSettings> {
        self.check("binning")?;
        Ok(self.state.lock().binning)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_capture_ready_on_first_poll() {
        let spectrometer = MockSpectrometer::builder().sensor(64, 10).seed(1).build();

        assert_eq!(
            spectrometer.retrieve_frame().await.unwrap(),
            FrameRetrieval::NoFrameAvailable
        );

        spectrometer.start_capture().await.unwrap();
        assert!(!spectrometer.capture_in_progress().await.unwrap());
        let frame = spectrometer
            .retrieve_frame()
            .await
            .unwrap()
            .into_frame()
            .unwrap();
        assert_eq!(frame.shape(), (1, 64));
        assert_eq!(spectrometer.frames_captured(), 1);

        // Frame is handed out only once
        assert_eq!(
            spectrometer.retrieve_frame().await.unwrap(),
            FrameRetrieval::NoFrameAvailable
        );
    }

    #[tokio::test]
    async fn test_busy_polls() {
        let spectrometer = MockSpectrometer::builder().busy_polls(2).build();
        spectrometer.start_capture().await.unwrap();
        assert!(spectrometer.capture_in_progress().await.unwrap());
        assert!(spectrometer.capture_in_progress().await.unwrap());
        assert!(!spectrometer.capture_in_progress().await.unwrap());
        assert!(spectrometer.retrieve_frame().await.unwrap().into_frame().is_some());
    }

    #[tokio::test]
    async fn test_double_trigger_rejected() {
        let spectrometer = MockSpectrometer::builder().busy_polls(5).build();
        spectrometer.start_capture().await.unwrap();
        assert!(spectrometer.start_capture().await.is_err());
        assert_eq!(spectrometer.trigger_count(), 1);
    }

    #[tokio::test]
    async fn test_release_discards_capture() {
        let spectrometer = MockSpectrometer::builder().busy_polls(3).build();
        spectrometer.start_capture().await.unwrap();
        spectrometer.release().await.unwrap();
        assert!(!spectrometer.capture_in_progress().await.unwrap());
        assert_eq!(
            spectrometer.retrieve_frame().await.unwrap(),
            FrameRetrieval::NoFrameAvailable
        );
        assert_eq!(spectrometer.release_count(), 1);
    }

    #[tokio::test]
    async fn test_dropped_frame() {
        let spectrometer = MockSpectrometer::new();
        spectrometer.drop_next_frame();
        spectrometer.start_capture().await.unwrap();
        assert!(!spectrometer.capture_in_progress().await.unwrap());
        assert_eq!(
            spectrometer.retrieve_frame().await.unwrap(),
            FrameRetrieval::NoFrameAvailable
        );
    }

    #[tokio::test]
    async fn test_binning_controls_shape() {
        let spectrometer = MockSpectrometer::builder().sensor(1024, 100).build();
        assert_eq!(spectrometer.frame_shape(), (1, 1024));

        spectrometer
            .set_binning(BinningSettings {
                mode: BinningMode::BinnedSensor,
                row_bin_centre: 50,
                bin_width: 2,
                bin_height: 25,
            })
            .await
            .unwrap();
        assert_eq!(spectrometer.frame_shape(), (4, 512));

        spectrometer
            .set_binning(BinningSettings {
                mode: BinningMode::FullSensor,
                ..BinningSettings::default()
            })
            .await
            .unwrap();
        assert_eq!(spectrometer.frame_shape(), (100, 1024));

        let zero = BinningSettings {
            bin_width: 0,
            ..BinningSettings::default()
        };
        assert!(spectrometer.set_binning(zero).await.is_err());
    }

    #[tokio::test]
    async fn test_settings_roundtrip_and_validation() {
        let spectrometer = MockSpectrometer::new();
        spectrometer.set_exposure(2.0).await.unwrap();
        spectrometer.set_centre_wavelength(700.0).await.unwrap();
        assert_eq!(spectrometer.get_exposure().await.unwrap(), 2.0);
        assert_eq!(spectrometer.centre_wavelength().await.unwrap(), 700.0);
        assert!(spectrometer.set_exposure(-1.0).await.is_err());
        assert!(spectrometer.set_centre_wavelength(f64::NAN).await.is_err());
    }

    #[tokio::test]
    async fn test_offline_device() {
        let spectrometer = MockSpectrometer::new();
        spectrometer.error_config().set_offline(true);
        let err = spectrometer.start_capture().await.unwrap_err();
        let driver = err.downcast_ref::<DriverError>().unwrap();
        assert_eq!(driver.kind, DriverErrorKind::Communication);
        assert_eq!(spectrometer.trigger_count(), 0);
    }

    #[tokio::test]
    async fn test_realistic_exposure_timing() {
        let spectrometer = MockSpectrometer::builder()
            .mode(MockMode::Realistic)
            .exposure(0.05)
            .build();
        spectrometer.start_capture().await.unwrap();
        assert!(spectrometer.capture_in_progress().await.unwrap());
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(!spectrometer.capture_in_progress().await.unwrap());
        assert!(spectrometer.retrieve_frame().await.unwrap().into_frame().is_some());
    }
}

//! Collaborator Capabilities
//!
//! The orchestrator talks to two pieces of hardware through small, typed
//! capability traits instead of a path-based get/set router:
//!
//! - the detector (a spectrometer with a CCD) implements
//!   `FrameCapture + ExposureControl + SpectrographControl + BinningControl`,
//!   collected in the [`Detector`] composite trait
//! - the environment stage (a cryostat) implements [`TemperatureControl`]
//!
//! # Design Philosophy
//!
//! Each capability trait:
//! - Is async (uses #[async_trait])
//! - Is thread-safe (requires Send + Sync)
//! - Uses anyhow::Result for errors
//! - Never waits on hardware: queries answer from cached, last-known status
//!
//! The last point matters because the orchestrator polls these traits from a
//! fixed-interval tick. A capture can take seconds and thermal settling can
//! take hours; neither may stall the tick.

use crate::data::{BinningSettings, FrameRetrieval};
use anyhow::Result;
use async_trait::async_trait;

/// Capability: Single Frame Capture
///
/// # Contract
/// - `start_capture()` requests exactly one frame and returns immediately
/// - `capture_in_progress()` reports whether that frame is still being exposed
///   or read out
/// - `retrieve_frame()` hands out the completed frame, or
///   `FrameRetrieval::NoFrameAvailable` when no capture was started or the data
///   channel has been released
#[async_trait]
pub trait FrameCapture: Send + Sync {
    /// Request one frame.
    ///
    /// # Returns
    /// - Ok(()) if the request was accepted
    /// - Err if the capture service is unreachable
    async fn start_capture(&self) -> Result<()>;

    /// Whether the requested frame is still being captured.
    async fn capture_in_progress(&self) -> Result<bool>;

    /// Fetch the most recently completed frame.
    async fn retrieve_frame(&self) -> Result<FrameRetrieval>;

    /// Close the data channel. Pending frames are discarded.
    async fn release(&self) -> Result<()>;

    /// Set the "acquisition running" indicator shown to operators.
    async fn set_acquisition_running(&self, running: bool) -> Result<()>;

    /// Current value of the "acquisition running" indicator.
    ///
    /// # Default Implementation
    /// Returns an error indicating the query is not supported.
    async fn acquisition_running(&self) -> Result<bool> {
        anyhow::bail!("Acquisition running indicator not supported by this device")
    }
}

/// Capability: Exposure Time Control
///
/// # Contract
/// - Exposure is in seconds (not milliseconds)
/// - Setting exposure does not start acquisition
/// - Exposure applies to next acquisition
#[async_trait]
pub trait ExposureControl: Send + Sync {
    /// Set exposure/integration time in seconds.
    async fn set_exposure(&self, seconds: f64) -> Result<()>;

    /// Get current exposure setting in seconds.
    async fn get_exposure(&self) -> Result<f64>;
}

/// Capability: Spectrograph Grating Position
#[async_trait]
pub trait SpectrographControl: Send + Sync {
    /// Move the grating so that `nm` falls on the centre of the sensor.
    async fn set_centre_wavelength(&self, nm: f64) -> Result<()>;

    /// Current centre wavelength in nanometres.
    async fn centre_wavelength(&self) -> Result<f64>;
}

/// Capability: Sensor Binning
#[async_trait]
pub trait BinningControl: Send + Sync {
    /// Apply a binning configuration. Takes effect on the next capture.
    async fn set_binning(&self, settings: BinningSettings) -> Result<()>;

    /// Current binning configuration.
    async fn binning(&self) -> Result<BinningSettings>;
}

/// Capability: Temperature Stage Control
///
/// # Contract
/// - Temperatures are in kelvin
/// - `is_stable()` refers to the *current* target. After a new target is set
///   the flag may keep reporting the previous point for a few polls, so callers
///   must observe it drop before trusting it again.
/// - `warmup()`/`abort()` are the coarse command pair used when automatic
///   setpoint tracking is off
#[async_trait]
pub trait TemperatureControl: Send + Sync {
    /// Command a new target temperature.
    async fn set_target_temperature(&self, kelvin: f64) -> Result<()>;

    /// Last commanded target temperature.
    async fn target_temperature(&self) -> Result<f64>;

    /// Last measured sample temperature.
    async fn current_temperature(&self) -> Result<f64>;

    /// Whether the temperature has settled within tolerance of the target.
    async fn is_stable(&self) -> Result<bool>;

    /// Enable or disable automatic setpoint tracking.
    async fn set_auto_control(&self, enabled: bool) -> Result<()>;

    /// Whether automatic setpoint tracking is enabled.
    async fn auto_control(&self) -> Result<bool>;

    /// Start warming the stage towards ambient.
    async fn warmup(&self) -> Result<()>;

    /// Abort whatever the stage is currently doing.
    async fn abort(&self) -> Result<()>;
}

// =============================================================================
// Combined Traits (for trait objects)
// =============================================================================

/// Composite trait for spectrometers (convenience)
pub trait Detector: FrameCapture + ExposureControl + SpectrographControl + BinningControl {}

/// Blanket implementation - any type implementing all four traits gets Detector for free
impl<T> Detector for T where
    T: FrameCapture + ExposureControl + SpectrographControl + BinningControl
{
}

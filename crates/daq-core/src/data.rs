//! Value types exchanged between collaborators, the orchestrator and storage.

use crate::error::{AppResult, DaqError};
use serde::{Deserialize, Serialize};

/// Represents a single detector frame.
///
/// Pixels are stored row-major as 16-bit intensities, `height` rows of
/// `width` samples each. A spectrometer in line mode produces frames with a
/// height of one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    /// Width in pixels
    pub width: u32,

    /// Height in pixels
    pub height: u32,

    /// Row-major pixel data, `width * height` samples
    pub pixels: Vec<u16>,
}

impl Frame {
    /// Create a frame, checking that the buffer matches the dimensions.
    pub fn new(width: u32, height: u32, pixels: Vec<u16>) -> AppResult<Self> {
        let expected = width as usize * height as usize;
        if pixels.len() != expected {
            return Err(DaqError::Storage(format!(
                "frame buffer holds {} samples, {}x{} needs {}",
                pixels.len(),
                width,
                height,
                expected
            )));
        }
        Ok(Self {
            width,
            height,
            pixels,
        })
    }

    /// Frame shape as `(height, width)`, the order used by the dataset.
    #[must_use]
    pub fn shape(&self) -> (u32, u32) {
        (self.height, self.width)
    }

    /// Get pixel value at (x, y).
    #[must_use]
    pub fn get(&self, x: u32, y: u32) -> Option<u16> {
        if x >= self.width || y >= self.height {
            return None;
        }
        self.pixels.get((y * self.width + x) as usize).copied()
    }

    /// Mean intensity, 0.0 for an empty frame.
    #[must_use]
    pub fn mean(&self) -> f64 {
        if self.pixels.is_empty() {
            return 0.0;
        }
        let sum: u64 = self.pixels.iter().map(|&p| u64::from(p)).sum();
        sum as f64 / self.pixels.len() as f64
    }
}

/// Outcome of asking the detector for its most recent frame.
///
/// `NoFrameAvailable` is an ordinary answer, not a fault: it is what the
/// detector reports when no capture was ever started or its data channel was
/// reset (for example because the operator stopped the run mid-capture).
#[derive(Debug, Clone, PartialEq)]
pub enum FrameRetrieval {
    /// A completed frame.
    Frame(Frame),
    /// Nothing to hand out.
    NoFrameAvailable,
}

impl FrameRetrieval {
    /// Convert into an `Option`.
    #[must_use]
    pub fn into_frame(self) -> Option<Frame> {
        match self {
            FrameRetrieval::Frame(frame) => Some(frame),
            FrameRetrieval::NoFrameAvailable => None,
        }
    }
}

/// Sensor readout mode of the detector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum BinningMode {
    /// Every pixel row is read out individually.
    FullSensor,
    /// Rows are binned into blocks of `bin_height`.
    BinnedSensor,
    /// A single band of rows is binned into one line.
    #[default]
    LineSensor,
    /// User-defined regions of interest.
    CustomRegions,
}

impl BinningMode {
    /// Name recorded in dataset attributes.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            BinningMode::FullSensor => "FullSensor",
            BinningMode::BinnedSensor => "BinnedSensor",
            BinningMode::LineSensor => "LineSensor",
            BinningMode::CustomRegions => "CustomRegions",
        }
    }
}

impl std::fmt::Display for BinningMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for BinningMode {
    type Err = DaqError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "FullSensor" => Ok(BinningMode::FullSensor),
            "BinnedSensor" => Ok(BinningMode::BinnedSensor),
            "LineSensor" => Ok(BinningMode::LineSensor),
            "CustomRegions" => Ok(BinningMode::CustomRegions),
            other => Err(DaqError::Configuration(format!(
                "unknown binning mode '{}'",
                other
            ))),
        }
    }
}

/// Full binning configuration of the detector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BinningSettings {
    /// Readout mode.
    pub mode: BinningMode,
    /// Centre row of the binned band (line mode).
    pub row_bin_centre: u32,
    /// Horizontal bin size in pixels.
    pub bin_width: u32,
    /// Vertical bin size in pixels.
    pub bin_height: u32,
}

impl Default for BinningSettings {
    fn default() -> Self {
        Self {
            mode: BinningMode::LineSensor,
            row_bin_centre: 50,
            bin_width: 1,
            bin_height: 20,
        }
    }
}

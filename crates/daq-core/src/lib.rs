//! `daq-core`
//!
//! Core trait definitions and types shared by the acquisition workspace.
//!
//! ## Key Types
//!
//! - [`Frame`]: one detector frame of 16-bit intensities
//! - [`FrameRetrieval`]: sum type returned by the detector (`Frame` or `NoFrameAvailable`)
//! - [`Detector`] / [`TemperatureControl`]: typed collaborator contracts
//! - [`DaqError`]: application error type

pub mod capabilities;
pub mod data;
pub mod error;

pub use capabilities::{
    BinningControl, Detector, ExposureControl, FrameCapture, SpectrographControl,
    TemperatureControl,
};
pub use data::{BinningMode, BinningSettings, Frame, FrameRetrieval};
pub use error::{AppResult, DaqError, DriverError, DriverErrorKind};

// Re-export commonly used types
pub use anyhow::{anyhow, Result};

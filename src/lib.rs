//! # spectro-daq
//!
//! Unattended spectrometer acquisition with optional temperature sweeps.
//!
//! The acquisition logic lives in the workspace crates:
//!
//! - `daq-core`: collaborator traits (`Detector`, `TemperatureControl`),
//!   `Frame`, errors
//! - `daq-storage`: `DatasetWriter` / `DatasetReader` (HDF5 or binary)
//! - `daq-experiment`: the `AcquisitionOrchestrator` state machine and
//!   temperature schedules
//! - `daq-driver-mock`: simulated spectrometer and cryostat
//!
//! This crate adds the application shell:
//!
//! - [`config`]: figment-layered configuration
//! - [`logging`]: tracing subscriber setup
//! - [`messages`] / [`control`]: the control actor that owns the orchestrator,
//!   ticks it on a fixed interval and serves the control endpoints

pub mod config;
pub mod control;
pub mod logging;
pub mod messages;

pub use config::AppConfig;
pub use control::{ControlActor, ControlError, ControlHandle};
pub use messages::{ControlCommand, ControlStatus};

//! Acquisition sequencing.
//!
//! - [`AcquisitionOrchestrator`]: the tick-driven state machine
//! - [`TemperatureSchedule`] / [`ScheduleLibrary`]: setpoint queues and the
//!   directory they are loaded from
//! - [`AcquisitionState`], [`AcquisitionMode`], [`AcquisitionStatus`]

pub mod orchestrator;
pub mod schedule;
pub mod session;
pub mod state;

pub use orchestrator::AcquisitionOrchestrator;
pub use schedule::{ScheduleLibrary, TemperatureSchedule};
pub use session::{AcquisitionRequest, AcquisitionSession, PendingFrame};
pub use state::{AcquisitionMode, AcquisitionState, AcquisitionStatus};

//! Message types for the control actor.
//!
//! Commands are sent over an mpsc channel to the [`ControlActor`]; each
//! carries a oneshot sender for its reply. Progress flows the other way as
//! [`ControlStatus`] snapshots on a watch channel, so readers never touch the
//! state the actor is mutating.
//!
//! ```text
//! caller                              actor task
//! ------                              ----------
//! 1. Create command + oneshot
//! 2. Send via mpsc            ------>
//!                                     3. Apply command
//!                                     4. Publish ControlStatus (watch)
//!                                     5. Reply on oneshot
//! 6. Await oneshot receiver   <------
//! ```
//!
//! Each variant has a helper that builds the command and returns the
//! receiver:
//!
//! ```rust
//! use spectro_daq::messages::ControlCommand;
//!
//! let (cmd, rx) = ControlCommand::start(Some(5));
//! // cmd_tx.send(cmd).await?;
//! // let result = rx.await?;
//! ```
//!
//! [`ControlActor`]: crate::control::ControlActor

use daq_core::AppResult;
use daq_experiment::{AcquisitionState, AcquisitionStatus};
use serde::Serialize;
use std::path::PathBuf;
use tokio::sync::oneshot;

/// Commands accepted by the control actor.
#[derive(Debug)]
pub enum ControlCommand {
    /// Start a run with the current filename, mode and schedule.
    Start {
        /// Frames per point; the configured default when `None`
        frames: Option<u32>,
        /// Whether the run started
        response: oneshot::Sender<AppResult<()>>,
    },

    /// Request the running acquisition to stop.
    Stop {
        /// `false` if there was nothing to stop
        response: oneshot::Sender<bool>,
    },

    /// Change the dataset filename used by the next run.
    SetFilename {
        /// New filename
        filename: PathBuf,
        /// Acknowledgement
        response: oneshot::Sender<()>,
    },

    /// Select sweep (`true`) or fixed-count (`false`) mode for the next run.
    SetSweepMode {
        /// Sweep mode flag
        enabled: bool,
        /// Acknowledgement
        response: oneshot::Sender<()>,
    },

    /// Load a named schedule from the schedule directory.
    SelectSchedule {
        /// Schedule file name
        name: String,
        /// The loaded setpoints
        response: oneshot::Sender<AppResult<Vec<f64>>>,
    },

    /// List schedule files.
    ListSchedules {
        /// Sorted file names
        response: oneshot::Sender<AppResult<Vec<String>>>,
    },

    /// Query the detector's data-acquisition indicator.
    GettingData {
        /// Indicator value
        response: oneshot::Sender<AppResult<bool>>,
    },

    /// Stop any run, release the hardware and exit the actor loop.
    Shutdown {
        /// Sent once the actor has released everything
        response: oneshot::Sender<()>,
    },
}

impl ControlCommand {
    /// Helper to create a Start command
    pub fn start(frames: Option<u32>) -> (Self, oneshot::Receiver<AppResult<()>>) {
        let (tx, rx) = oneshot::channel();
        (
            Self::Start {
                frames,
                response: tx,
            },
            rx,
        )
    }

    /// Helper to create a Stop command
    pub fn stop() -> (Self, oneshot::Receiver<bool>) {
        let (tx, rx) = oneshot::channel();
        (Self::Stop { response: tx }, rx)
    }

    /// Helper to create a SetFilename command
    pub fn set_filename(filename: PathBuf) -> (Self, oneshot::Receiver<()>) {
        let (tx, rx) = oneshot::channel();
        (
            Self::SetFilename {
                filename,
                response: tx,
            },
            rx,
        )
    }

    /// Helper to create a SetSweepMode command
    pub fn set_sweep_mode(enabled: bool) -> (Self, oneshot::Receiver<()>) {
        let (tx, rx) = oneshot::channel();
        (
            Self::SetSweepMode {
                enabled,
                response: tx,
            },
            rx,
        )
    }

    /// Helper to create a SelectSchedule command
    pub fn select_schedule(name: String) -> (Self, oneshot::Receiver<AppResult<Vec<f64>>>) {
        let (tx, rx) = oneshot::channel();
        (Self::SelectSchedule { name, response: tx }, rx)
    }

    /// Helper to create a ListSchedules command
    pub fn list_schedules() -> (Self, oneshot::Receiver<AppResult<Vec<String>>>) {
        let (tx, rx) = oneshot::channel();
        (Self::ListSchedules { response: tx }, rx)
    }

    /// Helper to create a GettingData command
    pub fn getting_data() -> (Self, oneshot::Receiver<AppResult<bool>>) {
        let (tx, rx) = oneshot::channel();
        (Self::GettingData { response: tx }, rx)
    }

    /// Helper to create a Shutdown command
    pub fn shutdown() -> (Self, oneshot::Receiver<()>) {
        let (tx, rx) = oneshot::channel();
        (Self::Shutdown { response: tx }, rx)
    }
}

/// Snapshot published by the control actor after every change.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ControlStatus {
    /// Orchestrator progress
    pub acquisition: AcquisitionStatus,
    /// Filename for the next run
    pub filename: PathBuf,
    /// Sweep mode for the next run
    pub sweep_mode: bool,
    /// Name of the selected schedule
    pub selected_schedule: Option<String>,
    /// Setpoints of the selected schedule
    pub temp_list: Vec<f64>,
}

impl ControlStatus {
    /// Current acquisition state.
    #[must_use]
    pub fn state(&self) -> AcquisitionState {
        self.acquisition.state
    }

    /// Whether a run is in progress.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.acquisition.running
    }
}

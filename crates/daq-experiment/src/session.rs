//! Per-run bookkeeping owned by the orchestrator.

use chrono::{DateTime, Utc};
use daq_storage::{DatasetWriter, StorageFormat};
use std::path::PathBuf;

use crate::schedule::TemperatureSchedule;
use crate::state::AcquisitionMode;

/// Parameters of a run, as handed to `start_acquisition`.
#[derive(Debug, Clone, PartialEq)]
pub struct AcquisitionRequest {
    /// Dataset file to create. Must not exist.
    pub filename: PathBuf,
    /// Frames per setpoint (sweep) or in total (fixed).
    pub max_frames: u32,
    /// Operating mode.
    pub mode: AcquisitionMode,
    /// Setpoints to visit; ignored in fixed mode.
    pub schedule: TemperatureSchedule,
    /// On-disk format of the dataset.
    pub format: StorageFormat,
}

impl AcquisitionRequest {
    /// Fixed-count run.
    pub fn fixed(filename: impl Into<PathBuf>, frames: u32) -> Self {
        Self {
            filename: filename.into(),
            max_frames: frames,
            mode: AcquisitionMode::FixedFrames,
            schedule: TemperatureSchedule::empty(),
            format: StorageFormat::default(),
        }
    }

    /// Temperature sweep capturing `frames_per_point` frames at each setpoint.
    pub fn sweep(
        filename: impl Into<PathBuf>,
        frames_per_point: u32,
        schedule: TemperatureSchedule,
    ) -> Self {
        Self {
            filename: filename.into(),
            max_frames: frames_per_point,
            mode: AcquisitionMode::TemperatureSweep,
            schedule,
            format: StorageFormat::default(),
        }
    }

    /// Override the storage format.
    #[must_use]
    pub fn with_format(mut self, format: StorageFormat) -> Self {
        self.format = format;
        self
    }
}

/// Metadata captured when a frame is triggered, completed on retrieval.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PendingFrame {
    /// Trigger time, unix seconds.
    pub timestamp: i64,
    /// Environment temperature sampled just before the trigger.
    pub start_temperature: f64,
}

/// State of one run, from `start_acquisition` to a terminal state.
#[derive(Debug)]
pub struct AcquisitionSession {
    /// Dataset file.
    pub filename: PathBuf,
    /// Operating mode.
    pub mode: AcquisitionMode,
    /// Frames per point (sweep) or in total (fixed).
    pub max_frames: u32,
    /// Frames captured since the current setpoint was reached.
    pub frames_at_current_point: u32,
    /// Frames written in total; indexes the dataset.
    pub frames_total: u64,
    /// Setpoints not yet visited.
    pub schedule: TemperatureSchedule,
    /// Setpoint most recently pushed to the environment.
    pub current_setpoint: Option<f64>,
    /// Set by `stop_acquisition`; the in-flight frame is then discarded.
    pub stop_requested: bool,
    /// Frame that has been triggered but not yet stored.
    pub pending: Option<PendingFrame>,
    /// Open dataset.
    pub writer: DatasetWriter,
    /// When the session started.
    pub started_at: DateTime<Utc>,
}

impl AcquisitionSession {
    pub(crate) fn new(request: AcquisitionRequest, writer: DatasetWriter) -> Self {
        Self {
            filename: request.filename,
            mode: request.mode,
            max_frames: request.max_frames,
            frames_at_current_point: 0,
            frames_total: 0,
            schedule: request.schedule,
            current_setpoint: None,
            stop_requested: false,
            pending: None,
            writer,
            started_at: Utc::now(),
        }
    }

    /// Whether the current temperature point still needs frames.
    ///
    /// A sweep has no active point until its first setpoint has been pushed.
    #[must_use]
    pub fn point_has_capacity(&self) -> bool {
        let point_active = match self.mode {
            AcquisitionMode::FixedFrames => true,
            AcquisitionMode::TemperatureSweep => self.current_setpoint.is_some(),
        };
        point_active && self.frames_at_current_point < self.max_frames
    }

    /// Whether the session sweeps temperature.
    #[must_use]
    pub fn is_sweep(&self) -> bool {
        self.mode == AcquisitionMode::TemperatureSweep
    }
}

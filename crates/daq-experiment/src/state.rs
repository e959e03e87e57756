//! Acquisition states, modes and status snapshots.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// State of the acquisition state machine.
///
/// ```text
///            ┌──────────── frames left at point ─────────────┐
///            ▼                                               │
///  READY ──▶ WAIT_FRAME ──▶ FRAME_READY ──▶ READY ───────────┘
///    │                           │
///    │ next setpoint             └─ no frame after stop ──▶ COMPLETE
///    ▼
///  WAIT_STABLE_RESET ──▶ WAIT_TEMP ──▶ TEMP_READY ──▶ WAIT_FRAME
///
///  READY ── nothing left ──▶ COMPLETE
///  any   ── integrity failure ──▶ ERROR
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AcquisitionState {
    /// Deciding what to do next.
    Ready,
    /// A capture has been triggered.
    WaitFrame,
    /// The capture finished, the frame can be retrieved.
    FrameReady,
    /// Waiting for the environment to settle at the setpoint.
    WaitTemp,
    /// The setpoint has been reached.
    TempReady,
    /// Waiting for the stability flag to drop after a setpoint change.
    WaitStableReset,
    /// Run finished (normally or by stop request).
    Complete,
    /// Run aborted because of a setup or data integrity failure.
    Error,
}

impl AcquisitionState {
    /// Whether the state ends a run.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, AcquisitionState::Complete | AcquisitionState::Error)
    }

    /// Name exposed on the control surface.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            AcquisitionState::Ready => "READY",
            AcquisitionState::WaitFrame => "WAIT_FRAME",
            AcquisitionState::FrameReady => "FRAME_READY",
            AcquisitionState::WaitTemp => "WAIT_TEMP",
            AcquisitionState::TempReady => "TEMP_READY",
            AcquisitionState::WaitStableReset => "WAIT_STABLE_RESET",
            AcquisitionState::Complete => "COMPLETE",
            AcquisitionState::Error => "ERROR",
        }
    }
}

impl std::fmt::Display for AcquisitionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Operating mode of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AcquisitionMode {
    /// Capture a fixed number of frames at whatever temperature the stage holds.
    #[default]
    FixedFrames,
    /// Capture a fixed number of frames at each setpoint of a schedule.
    TemperatureSweep,
}

impl std::fmt::Display for AcquisitionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AcquisitionMode::FixedFrames => write!(f, "fixed_frames"),
            AcquisitionMode::TemperatureSweep => write!(f, "temperature_sweep"),
        }
    }
}

/// Read-only snapshot of the orchestrator, safe to hand to other tasks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AcquisitionStatus {
    /// Current state.
    pub state: AcquisitionState,
    /// Whether a session exists (ticks are still needed).
    pub running: bool,
    /// Mode of the current or last run.
    pub mode: Option<AcquisitionMode>,
    /// Dataset file of the current or last run.
    pub filename: Option<PathBuf>,
    /// When the current or last run started.
    pub started_at: Option<DateTime<Utc>>,
    /// Frames per point (sweep) or in total (fixed).
    pub max_frames: u32,
    /// Frames captured at the current point.
    pub current_frames: u32,
    /// Frames written in total.
    pub total_frames: u64,
    /// Setpoint currently being held (sweep mode).
    pub current_setpoint: Option<f64>,
    /// Setpoints not yet visited.
    pub remaining_setpoints: Vec<f64>,
    /// Whether the operator asked the run to stop.
    pub stop_requested: bool,
    /// Reason for the last ERROR transition.
    pub last_error: Option<String>,
}

impl AcquisitionStatus {
    /// Status before any run was started.
    #[must_use]
    pub fn idle() -> Self {
        Self {
            state: AcquisitionState::Ready,
            running: false,
            mode: None,
            filename: None,
            started_at: None,
            max_frames: 0,
            current_frames: 0,
            total_frames: 0,
            current_setpoint: None,
            remaining_setpoints: Vec::new(),
            stop_requested: false,
            last_error: None,
        }
    }
}

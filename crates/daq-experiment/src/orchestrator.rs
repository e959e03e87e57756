//! AcquisitionOrchestrator - polling state machine for acquisition runs
//!
//! The orchestrator sequences frame capture against temperature
//! stabilisation and streams every frame into a [`DatasetWriter`]. It never
//! blocks: each call to [`AcquisitionOrchestrator::tick`] polls the
//! collaborators once, performs at most one state transition and returns.
//!
//! # Scheduling
//!
//! The caller owns the clock: call `tick()` on a fixed interval (500 ms is the
//! reference) for as long as [`AcquisitionOrchestrator::is_running`] is true.
//! The tick in which the state machine is COMPLETE or ERROR releases the
//! session; after that `is_running()` is false and ticks are no-ops.
//!
//! # Failures
//!
//! - Collaborator queries that fail are logged and the state is held, so the
//!   same query is repeated on the next tick.
//! - Commands (capture trigger, setpoint) are sent exactly once, even when
//!   the call fails: a failed call may still have reached the device. A
//!   refused setpoint (hardware, configuration or parameter error) moves the
//!   run to ERROR.
//! - Shape mismatches, write failures and frames that vanish without a stop
//!   request move the run to ERROR. A stop discards the in-flight frame, so
//!   the detector is never asked for it.

use chrono::Utc;
use daq_core::{
    AppResult, DaqError, Detector, DriverError, FrameRetrieval, TemperatureControl,
};
use daq_storage::{DatasetSummary, DatasetWriter, FrameRecord, RunAttributes};
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

use crate::session::{AcquisitionRequest, AcquisitionSession, PendingFrame};
use crate::state::{AcquisitionMode, AcquisitionState, AcquisitionStatus};

/// Drives one acquisition run at a time.
pub struct AcquisitionOrchestrator {
    detector: Arc<dyn Detector>,
    environment: Arc<dyn TemperatureControl>,
    state: AcquisitionState,
    session: Option<AcquisitionSession>,
    last_run: Option<AcquisitionStatus>,
    last_error: Option<String>,
    last_summary: Option<DatasetSummary>,
}

impl AcquisitionOrchestrator {
    /// Create an orchestrator with no session, in READY.
    pub fn new(detector: Arc<dyn Detector>, environment: Arc<dyn TemperatureControl>) -> Self {
        Self {
            detector,
            environment,
            state: AcquisitionState::Ready,
            session: None,
            last_run: None,
            last_error: None,
            last_summary: None,
        }
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> AcquisitionState {
        self.state
    }

    /// Whether a session exists and `tick()` must keep being called.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.session.is_some()
    }

    /// Summary of the dataset closed by the last run.
    #[must_use]
    pub fn last_summary(&self) -> Option<&DatasetSummary> {
        self.last_summary.as_ref()
    }

    /// Read-only snapshot for progress reporting.
    #[must_use]
    pub fn status(&self) -> AcquisitionStatus {
        let mut status = match &self.session {
            Some(session) => Self::snapshot(session),
            None => self
                .last_run
                .clone()
                .unwrap_or_else(AcquisitionStatus::idle),
        };
        status.state = self.state;
        status.running = self.session.is_some();
        status.last_error = self.last_error.clone();
        status
    }

    /// Start a run.
    ///
    /// Detector settings are read and the dataset file is created before any
    /// collaborator is commanded, so a failed start leaves the hardware
    /// untouched.
    ///
    /// # Errors
    /// - `DaqError::SessionActive` if a session exists (state unchanged)
    /// - `DaqError::DatasetExists` or another setup error; the state becomes
    ///   ERROR and no session is created
    #[instrument(
        skip(self, request),
        fields(filename = %request.filename.display(), mode = %request.mode),
        err
    )]
    pub async fn start_acquisition(&mut self, request: AcquisitionRequest) -> AppResult<()> {
        if self.session.is_some() {
            return Err(DaqError::SessionActive);
        }

        let detector = Arc::clone(&self.detector);
        let attributes = match read_attributes(detector.as_ref()).await {
            Ok(attributes) => attributes,
            Err(e) => {
                self.fail(&e);
                return Err(e);
            }
        };

        let writer = match DatasetWriter::create(&request.filename, request.format, &attributes)
        {
            Ok(writer) => writer,
            Err(e) => {
                self.fail(&e);
                return Err(e);
            }
        };

        if request.mode == AcquisitionMode::TemperatureSweep {
            if let Err(e) = self.environment.set_auto_control(true).await {
                warn!(error = %e, "Failed to enable environment auto-control");
            }
        } else if let Err(e) = self.environment.warmup().await {
            warn!(error = %e, "Failed to send warmup command");
        }
        if let Err(e) = self.detector.set_acquisition_running(true).await {
            warn!(error = %e, "Failed to set detector running indicator");
        }

        info!(
            max_frames = request.max_frames,
            setpoints = request.schedule.len(),
            "Acquisition started"
        );

        self.session = Some(AcquisitionSession::new(request, writer));
        self.state = AcquisitionState::Ready;
        self.last_run = None;
        self.last_error = None;
        self.last_summary = None;
        Ok(())
    }

    /// Ask the run to stop.
    ///
    /// Moves the state machine to COMPLETE and discards any frame that is
    /// still being captured. The dataset is finalized and the collaborators
    /// released on the next tick. Returns `false` (and does nothing) when
    /// there is no session or the run is already terminal.
    #[instrument(skip(self))]
    pub fn stop_acquisition(&mut self) -> bool {
        if self.state.is_terminal() {
            debug!(state = %self.state, "Stop ignored, run already terminal");
            return false;
        }
        let Some(session) = self.session.as_mut() else {
            debug!("Stop ignored, no active session");
            return false;
        };

        session.stop_requested = true;
        if session.pending.take().is_some() {
            info!("Discarding in-flight frame");
        }
        info!(
            frames = session.frames_total,
            from = %self.state,
            "Stop requested"
        );
        self.state = AcquisitionState::Complete;
        true
    }

    /// Advance the state machine by at most one transition.
    ///
    /// Returns the state after the tick.
    pub async fn tick(&mut self) -> AcquisitionState {
        if self.session.is_none() {
            return self.state;
        }

        let before = self.state;
        match self.state {
            AcquisitionState::Ready => self.on_ready().await,
            AcquisitionState::WaitFrame => self.on_wait_frame().await,
            AcquisitionState::FrameReady => self.on_frame_ready().await,
            AcquisitionState::WaitTemp => self.on_wait_temp().await,
            AcquisitionState::TempReady => self.on_temp_ready().await,
            AcquisitionState::WaitStableReset => self.on_wait_stable_reset().await,
            AcquisitionState::Complete => self.on_complete().await,
            AcquisitionState::Error => self.on_error().await,
        }

        if self.state != before {
            debug!(from = %before, to = %self.state, "State transition");
        }
        self.state
    }

    async fn on_ready(&mut self) {
        let Some(session) = self.session.as_mut() else {
            return;
        };

        if session.point_has_capacity() {
            self.begin_frame_cycle().await;
            return;
        }

        if session.is_sweep() {
            if let Some(setpoint) = session.schedule.pop() {
                // Sent once: a failed push may still have reached the stage.
                let pushed = self.environment.set_target_temperature(setpoint).await;
                session.current_setpoint = Some(setpoint);
                session.frames_at_current_point = 0;

                match pushed {
                    Ok(()) => {
                        info!(
                            setpoint,
                            remaining = session.schedule.len(),
                            "Moving to next setpoint"
                        );
                    }
                    Err(e) => {
                        let err = DriverError::from_anyhow("environment", e);
                        if !err.kind.is_transient() {
                            self.fail(&DaqError::Driver(err));
                            return;
                        }
                        warn!(
                            setpoint,
                            error = %err,
                            "Setpoint push unconfirmed, waiting for the stage to react"
                        );
                    }
                }
                self.state = AcquisitionState::WaitStableReset;
                return;
            }
        }

        info!(frames = session.frames_total, "Nothing left to acquire");
        self.state = AcquisitionState::Complete;
    }

    async fn on_temp_ready(&mut self) {
        let has_capacity = self
            .session
            .as_ref()
            .is_some_and(AcquisitionSession::point_has_capacity);
        if has_capacity {
            self.begin_frame_cycle().await;
        } else {
            // No frames wanted at this point
            self.state = AcquisitionState::Ready;
        }
    }

    async fn begin_frame_cycle(&mut self) {
        let start_temperature = match self.environment.current_temperature().await {
            Ok(t) => t,
            Err(e) => {
                warn!(error = %e, "Cannot sample start temperature, retrying next tick");
                return;
            }
        };

        let Some(session) = self.session.as_mut() else {
            return;
        };

        let timestamp = Utc::now().timestamp();
        if let Err(e) = self.detector.start_capture().await {
            // Not re-issued: the frame shows up as missing in FRAME_READY.
            warn!(error = %e, "Capture trigger failed");
        }

        session.pending = Some(PendingFrame {
            timestamp,
            start_temperature,
        });
        debug!(
            frame = session.frames_total + 1,
            start_temperature, "Capture triggered"
        );
        self.state = AcquisitionState::WaitFrame;
    }

    async fn on_wait_frame(&mut self) {
        match self.detector.capture_in_progress().await {
            Ok(true) => {}
            Ok(false) => self.state = AcquisitionState::FrameReady,
            Err(e) => warn!(error = %e, "Detector status unavailable"),
        }
    }

    async fn on_frame_ready(&mut self) {
        let retrieval = match self.detector.retrieve_frame().await {
            Ok(retrieval) => retrieval,
            Err(e) => {
                warn!(error = %e, "Frame retrieval failed, retrying next tick");
                return;
            }
        };

        let frame = match retrieval {
            FrameRetrieval::Frame(frame) => frame,
            // A stop moves the run to COMPLETE before this state is polled
            // again, so an absent frame here is always an external reset.
            FrameRetrieval::NoFrameAvailable => {
                self.fail(&DaqError::FrameMissing);
                return;
            }
        };

        let temp_end = match self.environment.current_temperature().await {
            Ok(t) => t,
            Err(e) => {
                warn!(error = %e, "End temperature unavailable, recording NaN");
                f64::NAN
            }
        };

        let Some(session) = self.session.as_mut() else {
            return;
        };
        let Some(pending) = session.pending.take() else {
            self.fail(&DaqError::Storage(
                "retrieved a frame that was never triggered".to_string(),
            ));
            return;
        };

        let record = FrameRecord {
            timestamp: pending.timestamp,
            frame,
            temp_start: pending.start_temperature,
            temp_end,
        };

        match session.writer.append_frame(&record) {
            Ok(()) => {
                session.frames_at_current_point += 1;
                session.frames_total += 1;
                info!(
                    frame = session.frames_total,
                    point_frame = session.frames_at_current_point,
                    setpoint = ?session.current_setpoint,
                    temp_start = record.temp_start,
                    temp_end,
                    "Frame stored"
                );
                self.state = AcquisitionState::Ready;
            }
            Err(e) => self.fail(&e),
        }
    }

    async fn on_wait_temp(&mut self) {
        match self.environment.is_stable().await {
            Ok(true) => {
                info!("Temperature stable");
                self.state = AcquisitionState::TempReady;
            }
            Ok(false) => {}
            Err(e) => warn!(error = %e, "Environment stability unavailable"),
        }
    }

    async fn on_wait_stable_reset(&mut self) {
        match self.environment.is_stable().await {
            Ok(false) => self.state = AcquisitionState::WaitTemp,
            Ok(true) => {}
            Err(e) => warn!(error = %e, "Environment stability unavailable"),
        }
    }

    async fn on_complete(&mut self) {
        let Some(session) = self.session.take() else {
            return;
        };
        self.last_run = Some(Self::snapshot(&session));
        let sweep = session.is_sweep();

        match session.writer.finalize() {
            Ok(summary) => {
                info!(
                    path = %summary.path.display(),
                    frames = summary.frames,
                    "Acquisition complete"
                );
                self.last_summary = Some(summary);
            }
            Err(e) => {
                error!(error = %e, "Failed to finalize dataset");
                self.last_error = Some(e.to_string());
                self.state = AcquisitionState::Error;
            }
        }

        if sweep {
            if let Err(e) = self.environment.set_auto_control(false).await {
                warn!(error = %e, "Failed to disable environment auto-control");
            }
        } else if let Err(e) = self.environment.abort().await {
            warn!(error = %e, "Failed to send abort command");
        }
        if let Err(e) = self.detector.release().await {
            warn!(error = %e, "Failed to release detector data channel");
        }
        if let Err(e) = self.detector.set_acquisition_running(false).await {
            warn!(error = %e, "Failed to clear detector running indicator");
        }
    }

    async fn on_error(&mut self) {
        let Some(session) = self.session.take() else {
            return;
        };
        self.last_run = Some(Self::snapshot(&session));

        match session.writer.finalize() {
            Ok(summary) => {
                warn!(
                    path = %summary.path.display(),
                    frames = summary.frames,
                    "Dataset closed after error"
                );
                self.last_summary = Some(summary);
            }
            Err(e) => error!(error = %e, "Failed to close dataset after error"),
        }

        if let Err(e) = self.detector.set_acquisition_running(false).await {
            warn!(error = %e, "Failed to clear detector running indicator");
        }
    }

    fn fail(&mut self, err: &DaqError) {
        error!(error = %err, state = %self.state, "Acquisition failed");
        self.last_error = Some(err.to_string());
        self.state = AcquisitionState::Error;
    }

    fn snapshot(session: &AcquisitionSession) -> AcquisitionStatus {
        AcquisitionStatus {
            state: AcquisitionState::Ready,
            running: true,
            mode: Some(session.mode),
            filename: Some(session.filename.clone()),
            started_at: Some(session.started_at),
            max_frames: session.max_frames,
            current_frames: session.frames_at_current_point,
            total_frames: session.frames_total,
            current_setpoint: session.current_setpoint,
            remaining_setpoints: session.schedule.remaining(),
            stop_requested: session.stop_requested,
            last_error: None,
        }
    }
}

/// Settings recorded as dataset attributes, read before the file is created.
async fn read_attributes(detector: &dyn Detector) -> AppResult<RunAttributes> {
    let exposure = detector
        .get_exposure()
        .await
        .map_err(|e| DriverError::from_anyhow("detector", e))?;
    let centre_wavelength = detector
        .centre_wavelength()
        .await
        .map_err(|e| DriverError::from_anyhow("detector", e))?;
    let binning = detector
        .binning()
        .await
        .map_err(|e| DriverError::from_anyhow("detector", e))?;

    Ok(RunAttributes {
        exposure,
        centre_wavelength,
        bin_mode: binning.mode,
        start_time: Utc::now(),
    })
}

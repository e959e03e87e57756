//! Control actor: the single owner of the acquisition orchestrator.
//!
//! The [`ControlActor`] runs in its own Tokio task. It drives
//! [`AcquisitionOrchestrator::tick`] on a fixed interval while a run is active
//! and applies [`ControlCommand`]s between ticks, so ticks never overlap and
//! nothing else mutates the session. Callers talk to it through a cloneable
//! [`ControlHandle`], which maps the named control endpoints
//! (`start_acquisition`, `filename`, `photo_lum_mode`, `temp_list_selected`,
//! ...) onto typed methods.
//!
//! ```no_run
//! use spectro_daq::config::AppConfig;
//! use spectro_daq::control::ControlActor;
//! use std::sync::Arc;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let config = AppConfig::load()?;
//! let actor = ControlActor::new(
//!     &config,
//!     Arc::new(config.mock.spectrometer()),
//!     Arc::new(config.mock.cryostat()),
//! );
//! let (handle, task) = actor.spawn();
//!
//! handle.start_acquisition(Some(5)).await?;
//! let finished = handle.wait_until_idle().await?;
//! println!("{} frames", finished.acquisition.total_frames);
//!
//! handle.shutdown().await?;
//! task.await?;
//! # Ok(())
//! # }
//! ```

use crate::config::AppConfig;
use crate::messages::{ControlCommand, ControlStatus};
use daq_core::{AppResult, DaqError, Detector, DriverError, FrameCapture, TemperatureControl};
use daq_experiment::{
    AcquisitionOrchestrator, AcquisitionRequest, AcquisitionState, ScheduleLibrary,
    TemperatureSchedule,
};
use daq_storage::StorageFormat;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Capacity of the command channel.
const COMMAND_CHANNEL_CAPACITY: usize = 32;

/// Errors returned by [`ControlHandle`].
#[derive(Error, Debug)]
pub enum ControlError {
    /// The actor task has exited.
    #[error("control service is not running")]
    ServiceStopped,
    /// The actor rejected the request.
    #[error(transparent)]
    Daq(#[from] DaqError),
}

impl From<oneshot::error::RecvError> for ControlError {
    fn from(_: oneshot::error::RecvError) -> Self {
        ControlError::ServiceStopped
    }
}

/// Owns the orchestrator and the run settings for the next start.
pub struct ControlActor {
    orchestrator: AcquisitionOrchestrator,
    detector: Arc<dyn Detector>,
    library: ScheduleLibrary,
    tick_interval: Duration,
    format: StorageFormat,
    filename: PathBuf,
    sweep_mode: bool,
    default_frames: u32,
    selected_schedule: Option<String>,
    schedule: TemperatureSchedule,
    status_tx: watch::Sender<ControlStatus>,
}

impl ControlActor {
    /// Create an actor for the given hardware.
    ///
    /// The schedule named in `[schedules].initial` is loaded here; a failure
    /// is logged and leaves no schedule selected.
    pub fn new(
        config: &AppConfig,
        detector: Arc<dyn Detector>,
        environment: Arc<dyn TemperatureControl>,
    ) -> Self {
        let library = ScheduleLibrary::new(&config.schedules.directory);
        let (selected_schedule, schedule) = match &config.schedules.initial {
            Some(name) => match library.load(name) {
                Ok(schedule) => (Some(name.clone()), schedule),
                Err(e) => {
                    warn!(schedule = %name, error = %e, "Initial schedule not loaded");
                    (None, TemperatureSchedule::empty())
                }
            },
            None => (None, TemperatureSchedule::empty()),
        };

        let orchestrator = AcquisitionOrchestrator::new(Arc::clone(&detector), environment);
        let status = ControlStatus {
            acquisition: orchestrator.status(),
            filename: config.acquisition.filename.clone(),
            sweep_mode: config.acquisition.sweep_mode,
            selected_schedule: selected_schedule.clone(),
            temp_list: schedule.remaining(),
        };
        let (status_tx, _) = watch::channel(status);

        Self {
            orchestrator,
            detector,
            library,
            tick_interval: config.acquisition.tick_interval(),
            format: config.storage.format,
            filename: config.acquisition.filename.clone(),
            sweep_mode: config.acquisition.sweep_mode,
            default_frames: config.acquisition.default_frames,
            selected_schedule,
            schedule,
            status_tx,
        }
    }

    /// Spawn the actor loop on the current runtime.
    pub fn spawn(self) -> (ControlHandle, JoinHandle<()>) {
        let (command_tx, command_rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        let handle = ControlHandle {
            command_tx,
            status_rx: self.status_tx.subscribe(),
        };
        let task = tokio::spawn(self.run(command_rx));
        (handle, task)
    }

    /// Actor event loop.
    ///
    /// Exits on `Shutdown` or when every handle has been dropped; either way
    /// a running acquisition is stopped and its dataset finalized first.
    pub async fn run(mut self, mut command_rx: mpsc::Receiver<ControlCommand>) {
        info!(
            tick_ms = self.tick_interval.as_millis() as u64,
            "Control actor started"
        );

        let mut ticker = tokio::time::interval(self.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                command = command_rx.recv() => match command {
                    Some(ControlCommand::Shutdown { response }) => {
                        self.shutdown().await;
                        let _ = response.send(());
                        break;
                    }
                    Some(command) => self.handle_command(command).await,
                    None => {
                        debug!("All control handles dropped");
                        self.shutdown().await;
                        break;
                    }
                },

                _ = ticker.tick(), if self.orchestrator.is_running() => {
                    self.orchestrator.tick().await;
                    self.publish();
                }
            }
        }

        info!("Control actor stopped");
    }

    async fn handle_command(&mut self, command: ControlCommand) {
        match command {
            ControlCommand::Start { frames, response } => {
                let result = self.start(frames).await;
                self.publish();
                let _ = response.send(result);
            }

            ControlCommand::Stop { response } => {
                let stopped = self.orchestrator.stop_acquisition();
                self.publish();
                let _ = response.send(stopped);
            }

            ControlCommand::SetFilename { filename, response } => {
                info!(filename = %filename.display(), "Filename set");
                self.filename = filename;
                self.publish();
                let _ = response.send(());
            }

            ControlCommand::SetSweepMode { enabled, response } => {
                info!(sweep = enabled, "Acquisition mode set");
                self.sweep_mode = enabled;
                self.publish();
                let _ = response.send(());
            }

            ControlCommand::SelectSchedule { name, response } => {
                let result = self.library.load(&name).map(|schedule| {
                    info!(schedule = %name, setpoints = schedule.len(), "Schedule selected");
                    let setpoints = schedule.remaining();
                    self.schedule = schedule;
                    self.selected_schedule = Some(name);
                    setpoints
                });
                self.publish();
                let _ = response.send(result);
            }

            ControlCommand::ListSchedules { response } => {
                let _ = response.send(self.library.available());
            }

            ControlCommand::GettingData { response } => {
                let result = self
                    .detector
                    .acquisition_running()
                    .await
                    .map_err(|e| DaqError::from(DriverError::from_anyhow("detector", e)));
                let _ = response.send(result);
            }

            // Handled by the event loop
            ControlCommand::Shutdown { response } => {
                let _ = response.send(());
            }
        }
    }

    async fn start(&mut self, frames: Option<u32>) -> AppResult<()> {
        let frames = frames.unwrap_or(self.default_frames);
        let request = if self.sweep_mode {
            AcquisitionRequest::sweep(self.filename.clone(), frames, self.schedule.clone())
        } else {
            AcquisitionRequest::fixed(self.filename.clone(), frames)
        };
        self.orchestrator
            .start_acquisition(request.with_format(self.format))
            .await
    }

    async fn shutdown(&mut self) {
        if self.orchestrator.stop_acquisition() {
            info!("Stopping acquisition for shutdown");
        }
        // One tick releases a COMPLETE or ERROR session
        while self.orchestrator.is_running() {
            self.orchestrator.tick().await;
        }
        self.publish();
    }

    fn publish(&self) {
        self.status_tx.send_replace(ControlStatus {
            acquisition: self.orchestrator.status(),
            filename: self.filename.clone(),
            sweep_mode: self.sweep_mode,
            selected_schedule: self.selected_schedule.clone(),
            temp_list: self.schedule.remaining(),
        });
    }
}

/// Cloneable client for the control actor.
#[derive(Clone, Debug)]
pub struct ControlHandle {
    command_tx: mpsc::Sender<ControlCommand>,
    status_rx: watch::Receiver<ControlStatus>,
}

impl ControlHandle {
    async fn send(&self, command: ControlCommand) -> Result<(), ControlError> {
        self.command_tx
            .send(command)
            .await
            .map_err(|_| ControlError::ServiceStopped)
    }

    /// Latest status snapshot.
    #[must_use]
    pub fn status(&self) -> ControlStatus {
        self.status_rx.borrow().clone()
    }

    /// Watch channel of status snapshots.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<ControlStatus> {
        self.status_rx.clone()
    }

    /// `start_acquisition(num_frames)`. `None` uses the configured default.
    pub async fn start_acquisition(&self, frames: Option<u32>) -> Result<(), ControlError> {
        let (cmd, rx) = ControlCommand::start(frames);
        self.send(cmd).await?;
        Ok(rx.await??)
    }

    /// `stop_acquisition()`. Returns `false` if no run was active.
    pub async fn stop_acquisition(&self) -> Result<bool, ControlError> {
        let (cmd, rx) = ControlCommand::stop();
        self.send(cmd).await?;
        Ok(rx.await?)
    }

    /// `state`
    #[must_use]
    pub fn state(&self) -> AcquisitionState {
        self.status_rx.borrow().state()
    }

    /// `filename`
    #[must_use]
    pub fn filename(&self) -> PathBuf {
        self.status_rx.borrow().filename.clone()
    }

    /// `filename` (write). Applies to the next run.
    pub async fn set_filename(&self, filename: impl Into<PathBuf>) -> Result<(), ControlError> {
        let (cmd, rx) = ControlCommand::set_filename(filename.into());
        self.send(cmd).await?;
        Ok(rx.await?)
    }

    /// `max_frames`
    #[must_use]
    pub fn max_frames(&self) -> u32 {
        self.status_rx.borrow().acquisition.max_frames
    }

    /// `current_frames`: frames at the current point.
    #[must_use]
    pub fn current_frames(&self) -> u32 {
        self.status_rx.borrow().acquisition.current_frames
    }

    /// `photo_lum_mode`: `true` selects temperature sweep.
    #[must_use]
    pub fn photo_lum_mode(&self) -> bool {
        self.status_rx.borrow().sweep_mode
    }

    /// `photo_lum_mode` (write). Applies to the next run.
    pub async fn set_photo_lum_mode(&self, enabled: bool) -> Result<(), ControlError> {
        let (cmd, rx) = ControlCommand::set_sweep_mode(enabled);
        self.send(cmd).await?;
        Ok(rx.await?)
    }

    /// `temp_list`: setpoints of the selected schedule.
    #[must_use]
    pub fn temp_list(&self) -> Vec<f64> {
        self.status_rx.borrow().temp_list.clone()
    }

    /// `temp_list_selected`
    #[must_use]
    pub fn temp_list_selected(&self) -> Option<String> {
        self.status_rx.borrow().selected_schedule.clone()
    }

    /// `temp_list_selected` (write): load a schedule by name.
    pub async fn select_schedule(&self, name: impl Into<String>) -> Result<Vec<f64>, ControlError> {
        let (cmd, rx) = ControlCommand::select_schedule(name.into());
        self.send(cmd).await?;
        Ok(rx.await??)
    }

    /// `photo_mode_temps_avail`: schedule files on disk.
    pub async fn photo_mode_temps_avail(&self) -> Result<Vec<String>, ControlError> {
        let (cmd, rx) = ControlCommand::list_schedules();
        self.send(cmd).await?;
        Ok(rx.await??)
    }

    /// `getting_data`: the detector's acquisition indicator.
    pub async fn getting_data(&self) -> Result<bool, ControlError> {
        let (cmd, rx) = ControlCommand::getting_data();
        self.send(cmd).await?;
        Ok(rx.await??)
    }

    /// Wait until no run is active and return the final snapshot.
    pub async fn wait_until_idle(&self) -> Result<ControlStatus, ControlError> {
        let mut status_rx = self.status_rx.clone();
        loop {
            {
                let status = status_rx.borrow_and_update();
                if !status.is_running() {
                    return Ok(status.clone());
                }
            }
            status_rx
                .changed()
                .await
                .map_err(|_| ControlError::ServiceStopped)?;
        }
    }

    /// Stop any run and end the actor loop.
    pub async fn shutdown(&self) -> Result<(), ControlError> {
        let (cmd, rx) = ControlCommand::shutdown();
        self.send(cmd).await?;
        Ok(rx.await?)
    }
}

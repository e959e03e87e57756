//! CLI entry point for spectro-daq
//!
//! - `run`: acquire against the simulated spectrometer and cryostat until
//!   the run completes (Ctrl+C stops it early, keeping the frames so far)
//! - `schedules`: list the temperature schedules on disk
//! - `inspect`: summarise a dataset file
//!
//! ```bash
//! spectro-daq run --frames 20 --filename cold.dat
//! spectro-daq run --sweep --schedule cooldown --frames 5
//! spectro-daq inspect cold.dat --json
//! ```

// Global allocator
#[cfg(not(test))]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use anyhow::{anyhow, bail, Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use daq_core::BinningMode;
use daq_experiment::{AcquisitionState, ScheduleLibrary};
use daq_storage::DatasetReader;
use serde::Serialize;
use spectro_daq::config::{AppConfig, DEFAULT_CONFIG_PATH};
use spectro_daq::control::ControlActor;
use spectro_daq::logging;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::signal;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "spectro-daq")]
#[command(about = "Spectrometer acquisition with temperature sweeps", long_about = None)]
struct Cli {
    /// Configuration file (TOML)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one acquisition against the simulated hardware
    Run {
        /// Frames in total (fixed mode) or per setpoint (sweep mode)
        #[arg(long)]
        frames: Option<u32>,

        /// Sweep the schedule instead of capturing a fixed count
        #[arg(long)]
        sweep: bool,

        /// Schedule file to sweep
        #[arg(long)]
        schedule: Option<String>,

        /// Dataset file to create (must not exist)
        #[arg(long)]
        filename: Option<PathBuf>,
    },

    /// List available temperature schedules
    Schedules,

    /// Print a summary of a dataset file
    Inspect {
        /// Dataset file
        file: PathBuf,

        /// Machine-readable output
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = load_config(cli.config.as_deref())?;
    logging::init_from_config(&config).map_err(|e| anyhow!(e))?;

    match cli.command {
        Commands::Run {
            frames,
            sweep,
            schedule,
            filename,
        } => run_acquisition(&config, frames, sweep, schedule, filename).await,
        Commands::Schedules => list_schedules(&config),
        Commands::Inspect { file, json } => inspect(&file, json),
    }
}

fn load_config(path: Option<&Path>) -> Result<AppConfig> {
    let config = match path {
        Some(path) => {
            if !path.is_file() {
                bail!("Configuration file {} not found", path.display());
            }
            AppConfig::load_from(path)
        }
        None => AppConfig::load_from(DEFAULT_CONFIG_PATH),
    }
    .context("Failed to load configuration")?;

    config
        .validate()
        .map_err(|e| anyhow!("Invalid configuration: {}", e))?;
    Ok(config)
}

async fn run_acquisition(
    config: &AppConfig,
    frames: Option<u32>,
    sweep: bool,
    schedule: Option<String>,
    filename: Option<PathBuf>,
) -> Result<()> {
    let detector = Arc::new(config.mock.spectrometer());
    let cryostat = Arc::new(config.mock.cryostat());
    let (handle, task) = ControlActor::new(config, detector, cryostat).spawn();

    if let Some(filename) = filename {
        handle.set_filename(filename).await?;
    }
    if sweep {
        handle.set_photo_lum_mode(true).await?;
    }
    if let Some(name) = schedule {
        let setpoints = handle.select_schedule(name.as_str()).await?;
        info!(schedule = %name, ?setpoints, "Schedule selected");
    }

    if let Err(e) = handle.start_acquisition(frames).await {
        handle.shutdown().await?;
        task.await?;
        return Err(e).context("Acquisition did not start");
    }
    println!(
        "Acquiring into {} ({} mode)",
        handle.filename().display(),
        if handle.photo_lum_mode() { "sweep" } else { "fixed" }
    );

    let finished = tokio::select! {
        status = handle.wait_until_idle() => status?,
        _ = signal::ctrl_c() => {
            warn!("Interrupted, stopping acquisition");
            handle.stop_acquisition().await?;
            handle.wait_until_idle().await?
        }
    };

    handle.shutdown().await?;
    task.await?;

    let acquisition = &finished.acquisition;
    println!(
        "{}: {} frames written to {}",
        acquisition.state,
        acquisition.total_frames,
        finished.filename.display()
    );
    if acquisition.state == AcquisitionState::Error {
        bail!(
            "Acquisition failed: {}",
            acquisition.last_error.as_deref().unwrap_or("unknown error")
        );
    }
    Ok(())
}

fn list_schedules(config: &AppConfig) -> Result<()> {
    let library = ScheduleLibrary::new(&config.schedules.directory);
    let names = library.available()?;
    if names.is_empty() {
        println!("No schedules in {}", library.directory().display());
        return Ok(());
    }
    for name in names {
        match library.load(&name) {
            Ok(schedule) => println!("{:<24} {:?}", name, schedule.remaining()),
            Err(e) => println!("{:<24} invalid: {}", name, e),
        }
    }
    Ok(())
}

#[derive(Serialize)]
struct InspectReport {
    path: PathBuf,
    frames: usize,
    consistent: bool,
    shape: Option<(u32, u32)>,
    exposure: f64,
    centre_wavelength: f64,
    bin_mode: BinningMode,
    start_time: DateTime<Utc>,
    end_time: Option<DateTime<Utc>>,
    temperature_range: Option<(f64, f64)>,
}

fn inspect(path: &Path, json: bool) -> Result<()> {
    let contents = DatasetReader::open(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;

    let temperature_range = contents
        .temp_start
        .iter()
        .chain(&contents.temp_end)
        .copied()
        .filter(|t| t.is_finite())
        .fold(None, |range: Option<(f64, f64)>, t| match range {
            Some((lo, hi)) => Some((lo.min(t), hi.max(t))),
            None => Some((t, t)),
        });

    let report = InspectReport {
        path: path.to_path_buf(),
        frames: contents.frame_count(),
        consistent: contents.is_consistent(),
        shape: contents.shape(),
        exposure: contents.attributes.exposure,
        centre_wavelength: contents.attributes.centre_wavelength,
        bin_mode: contents.attributes.bin_mode,
        start_time: contents.attributes.start_time,
        end_time: contents.end_time,
        temperature_range,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("Dataset:            {}", report.path.display());
    println!("Frames:             {}", report.frames);
    if let Some((height, width)) = report.shape {
        println!("Frame shape:        {} x {}", height, width);
    }
    println!("Exposure:           {} s", report.exposure);
    println!("Centre wavelength:  {} nm", report.centre_wavelength);
    println!("Binning:            {}", report.bin_mode);
    println!("Started:            {}", report.start_time.to_rfc3339());
    match report.end_time {
        Some(end) => println!("Finished:           {}", end.to_rfc3339()),
        None => println!("Finished:           (run still open)"),
    }
    if let Some((lo, hi)) = report.temperature_range {
        println!("Temperature:        {:.2} K .. {:.2} K", lo, hi);
    }
    if !report.consistent {
        println!("Warning: sequences have unequal lengths");
    }
    Ok(())
}

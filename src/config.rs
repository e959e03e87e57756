//! Application configuration.
//!
//! Settings are layered with `figment`, later layers overriding earlier ones:
//!
//! 1. built-in defaults ([`AppConfig::default`])
//! 2. a TOML file (`config/default.toml` unless `--config` is given)
//! 3. environment variables prefixed `SPECTRO_DAQ_`, with `__` separating
//!    nesting levels, e.g. `SPECTRO_DAQ_ACQUISITION__TICK_INTERVAL_MS=250`
//!
//! ## Schema
//!
//! - **`[acquisition]`**: tick interval, dataset filename, sweep mode, default
//!   frame count for `start_acquisition` without an explicit count
//! - **`[schedules]`**: directory holding the temperature step files and the
//!   schedule selected at startup
//! - **`[storage]`**: dataset format (`hdf5` or `binary`)
//! - **`[logging]`**: level, output format, ANSI colours
//! - **`[mock]`**: simulated spectrometer and cryostat parameters

use daq_driver_mock::{MockCryostat, MockMode, MockSpectrometer};
use daq_storage::StorageFormat;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default configuration file, relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

/// Prefix of environment overrides.
pub const ENV_PREFIX: &str = "SPECTRO_DAQ_";

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    /// Acquisition loop settings
    pub acquisition: AcquisitionConfig,
    /// Temperature schedule files
    pub schedules: ScheduleConfig,
    /// Dataset storage
    pub storage: StorageConfig,
    /// Tracing output
    pub logging: LoggingConfig,
    /// Simulated hardware
    pub mock: MockConfig,
}

/// `[acquisition]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AcquisitionConfig {
    /// Interval between orchestrator ticks, milliseconds.
    pub tick_interval_ms: u64,
    /// Dataset file for the next run. Defaults to `temp.hdf5` or `temp.dat`
    /// depending on the default storage format.
    pub filename: PathBuf,
    /// Start runs in temperature-sweep mode.
    pub sweep_mode: bool,
    /// Frame count used when a start request carries none.
    pub default_frames: u32,
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 500,
            filename: PathBuf::from(format!("temp.{}", StorageFormat::default().extension())),
            sweep_mode: false,
            default_frames: 10,
        }
    }
}

impl AcquisitionConfig {
    /// Tick interval as a `Duration`.
    #[must_use]
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }
}

/// `[schedules]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    /// Directory of schedule files.
    pub directory: PathBuf,
    /// Schedule selected at startup, if any.
    pub initial: Option<String>,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("temp_steps"),
            initial: None,
        }
    }
}

/// `[storage]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct StorageConfig {
    /// On-disk dataset format.
    pub format: StorageFormat,
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Multi-line, human oriented
    #[default]
    Pretty,
    /// One line per event
    Compact,
    /// Newline-delimited JSON
    Json,
}

/// `[logging]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// trace, debug, info, warn or error. `RUST_LOG` takes precedence.
    pub level: String,
    /// Output format.
    pub format: LogFormat,
    /// ANSI colours (pretty and compact only).
    pub ansi: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
            ansi: true,
        }
    }
}

/// `[mock]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MockConfig {
    /// Timing mode of both devices.
    pub mode: MockMode,
    /// Detector sensor width, pixels.
    pub width: u32,
    /// Detector sensor height, pixels.
    pub height: u32,
    /// Initial exposure, seconds.
    pub exposure_s: f64,
    /// Initial spectrograph centre wavelength, nanometres.
    pub centre_wavelength_nm: f64,
    /// Sample temperature at startup, kelvin.
    pub initial_temperature_k: f64,
    /// Stability band around the setpoint, kelvin.
    pub stability_tolerance_k: f64,
    /// In-band polls before the cryostat reports stable.
    pub settle_polls: u32,
    /// Seed for reproducible noise.
    pub seed: Option<u64>,
}

impl Default for MockConfig {
    fn default() -> Self {
        Self {
            mode: MockMode::Realistic,
            width: 1024,
            height: 100,
            exposure_s: 0.1,
            centre_wavelength_nm: 650.0,
            initial_temperature_k: 295.0,
            stability_tolerance_k: 0.5,
            settle_polls: 2,
            seed: None,
        }
    }
}

impl MockConfig {
    /// Build the simulated spectrometer.
    #[must_use]
    pub fn spectrometer(&self) -> MockSpectrometer {
        let builder = MockSpectrometer::builder()
            .sensor(self.width, self.height)
            .mode(self.mode)
            .exposure(self.exposure_s)
            .centre_wavelength(self.centre_wavelength_nm);
        match self.seed {
            Some(seed) => builder.seed(seed).build(),
            None => builder.build(),
        }
    }

    /// Build the simulated cryostat.
    #[must_use]
    pub fn cryostat(&self) -> MockCryostat {
        let builder = MockCryostat::builder()
            .mode(self.mode)
            .initial_temperature(self.initial_temperature_k)
            .tolerance(self.stability_tolerance_k)
            .settle_polls(self.settle_polls);
        match self.seed {
            Some(seed) => builder.seed(seed).build(),
            None => builder.build(),
        }
    }
}

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

impl AppConfig {
    /// Load from [`DEFAULT_CONFIG_PATH`] and the environment.
    ///
    /// A missing file is not an error; defaults apply.
    pub fn load() -> Result<Self, figment::Error> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load from a specific TOML file and the environment.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, figment::Error> {
        Self::figment(path.as_ref()).extract()
    }

    /// The provider stack, exposed for inspection.
    pub fn figment(path: &Path) -> Figment {
        Figment::from(Serialized::defaults(AppConfig::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> Result<(), String> {
        if self.acquisition.tick_interval_ms == 0 {
            return Err("acquisition.tick_interval_ms must be greater than zero".to_string());
        }
        if self.acquisition.filename.as_os_str().is_empty() {
            return Err("acquisition.filename must not be empty".to_string());
        }
        self.storage
            .format
            .check_filename(&self.acquisition.filename)
            .map_err(|e| e.to_string())?;

        if !LOG_LEVELS.contains(&self.logging.level.to_lowercase().as_str()) {
            return Err(format!(
                "Invalid logging.level '{}'. Must be one of: {}",
                self.logging.level,
                LOG_LEVELS.join(", ")
            ));
        }

        let mock = &self.mock;
        if mock.width == 0 || mock.height == 0 {
            return Err(format!(
                "mock detector size {}x{} must be non-zero",
                mock.width, mock.height
            ));
        }
        if !(mock.exposure_s.is_finite() && mock.exposure_s >= 0.0) {
            return Err(format!("mock.exposure_s {} is invalid", mock.exposure_s));
        }
        for (name, value) in [
            ("mock.centre_wavelength_nm", mock.centre_wavelength_nm),
            ("mock.initial_temperature_k", mock.initial_temperature_k),
            ("mock.stability_tolerance_k", mock.stability_tolerance_k),
        ] {
            if !value.is_finite() {
                return Err(format!("{} must be finite, got {}", name, value));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::Write;

    fn write_toml(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    #[serial]
    fn test_missing_file_gives_defaults() {
        let config = AppConfig::load_from("does/not/exist.toml").unwrap();
        assert_eq!(config, AppConfig::default());
        assert_eq!(config.acquisition.tick_interval(), Duration::from_millis(500));
        assert_eq!(
            config.acquisition.filename,
            PathBuf::from(format!("temp.{}", config.storage.format.extension()))
        );
        assert_eq!(config.schedules.directory, PathBuf::from("temp_steps"));
        assert!(config.validate().is_ok());
    }

    #[test]
    #[serial]
    fn test_partial_file_overrides() {
        let file = write_toml(
            r#"
            [acquisition]
            filename = "run42.dat"
            sweep_mode = true

            [storage]
            format = "binary"

            [mock]
            mode = "instant"
            seed = 7
            "#,
        );
        let config = AppConfig::load_from(file.path()).unwrap();
        assert_eq!(config.acquisition.filename, PathBuf::from("run42.dat"));
        assert!(config.acquisition.sweep_mode);
        assert_eq!(config.acquisition.tick_interval_ms, 500);
        assert_eq!(config.storage.format, StorageFormat::Binary);
        assert_eq!(config.mock.mode, MockMode::Instant);
        assert_eq!(config.mock.seed, Some(7));
        assert_eq!(config.mock.width, 1024);
    }

    #[test]
    #[serial]
    fn test_env_overrides_file() {
        let file = write_toml("[acquisition]\ntick_interval_ms = 100\n");
        std::env::set_var("SPECTRO_DAQ_ACQUISITION__TICK_INTERVAL_MS", "250");
        std::env::set_var("SPECTRO_DAQ_LOGGING__FORMAT", "json");
        let result = AppConfig::load_from(file.path());
        std::env::remove_var("SPECTRO_DAQ_ACQUISITION__TICK_INTERVAL_MS");
        std::env::remove_var("SPECTRO_DAQ_LOGGING__FORMAT");

        let config = result.unwrap();
        assert_eq!(config.acquisition.tick_interval_ms, 250);
        assert_eq!(config.logging.format, LogFormat::Json);
    }

    #[test]
    #[serial]
    fn test_bad_value_is_reported() {
        let file = write_toml("[storage]\nformat = \"csv\"\n");
        assert!(AppConfig::load_from(file.path()).is_err());
    }

    #[test]
    #[serial]
    fn test_shipped_config_names_match_format() {
        let config = AppConfig::load_from(DEFAULT_CONFIG_PATH).unwrap();
        assert_eq!(config.storage.format, StorageFormat::Binary);
        assert_eq!(config.acquisition.filename, PathBuf::from("temp.dat"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_binary_format_with_hdf5_name_rejected() {
        let mut config = AppConfig::default();
        config.storage.format = StorageFormat::Binary;
        config.acquisition.filename = PathBuf::from("temp.hdf5");
        assert!(config.validate().unwrap_err().contains("HDF5 extension"));

        config.acquisition.filename = PathBuf::from("temp.dat");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation() {
        let mut config = AppConfig::default();
        config.acquisition.tick_interval_ms = 0;
        assert!(config.validate().unwrap_err().contains("tick_interval_ms"));

        let mut config = AppConfig::default();
        config.acquisition.filename = PathBuf::new();
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.mock.height = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.mock.initial_temperature_k = f64::NAN;
        assert!(config.validate().unwrap_err().contains("initial_temperature_k"));

        let mut config = AppConfig::default();
        config.logging.level = "verbose".to_string();
        assert!(config.validate().is_err());
    }

    #[tokio::test]
    async fn test_mock_devices_follow_config() {
        use daq_core::{ExposureControl, SpectrographControl, TemperatureControl};

        let mock = MockConfig {
            mode: MockMode::Instant,
            exposure_s: 0.5,
            centre_wavelength_nm: 700.0,
            initial_temperature_k: 80.0,
            seed: Some(3),
            ..MockConfig::default()
        };
        let spectrometer = mock.spectrometer();
        assert_eq!(spectrometer.get_exposure().await.unwrap(), 0.5);
        assert_eq!(spectrometer.centre_wavelength().await.unwrap(), 700.0);
        assert_eq!(spectrometer.frame_shape(), (1, 1024));
        assert_eq!(mock.cryostat().current_temperature().await.unwrap(), 80.0);
    }
}

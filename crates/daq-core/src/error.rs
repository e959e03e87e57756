//! Custom error types for the acquisition system.
//!
//! `DaqError` is the primary error type shared by every crate in the
//! workspace. It is built with `thiserror` so that lower-level failures
//! (I/O, collaborator drivers, storage backends) convert into it with `?`.
//!
//! ## Error Hierarchy
//!
//! - **Setup errors** (`DatasetExists`, `SessionActive`, `Configuration`,
//!   `ScheduleNotFound`, `InvalidSchedule`, `FeatureNotEnabled`): a run cannot
//!   start. No session is created.
//! - **Collaborator errors** (`Driver`): a detector or environment call failed.
//!   Pure queries are re-polled on the next tick.
//! - **Data integrity errors** (`ShapeMismatch`, `FrameMissing`, `Storage`):
//!   the run stops in the ERROR state.

use std::path::PathBuf;
use thiserror::Error;

// =============================================================================
// Driver Errors
// =============================================================================

/// Category of a collaborator failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverErrorKind {
    /// The remote service did not answer or the link dropped.
    Communication,
    /// The request did not complete in time.
    Timeout,
    /// The device reported a fault.
    Hardware,
    /// The device rejected its configuration.
    Configuration,
    /// A parameter was out of range.
    InvalidParameter,
    /// Anything else.
    Unknown,
}

impl DriverErrorKind {
    /// Whether the request may have been lost in transit rather than refused.
    ///
    /// A command that failed transiently may still have reached the device.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        !matches!(
            self,
            DriverErrorKind::Hardware
                | DriverErrorKind::Configuration
                | DriverErrorKind::InvalidParameter
        )
    }
}

impl std::fmt::Display for DriverErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            DriverErrorKind::Communication => "communication",
            DriverErrorKind::Timeout => "timeout",
            DriverErrorKind::Hardware => "hardware",
            DriverErrorKind::Configuration => "configuration",
            DriverErrorKind::InvalidParameter => "invalid_parameter",
            DriverErrorKind::Unknown => "unknown",
        };
        write!(f, "{}", label)
    }
}

/// Failure reported by a detector or environment collaborator.
#[derive(Error, Debug, Clone)]
#[error("Driver '{driver_type}' {kind} error: {message}")]
pub struct DriverError {
    /// Which collaborator raised the error (e.g. "mock_spectrometer").
    pub driver_type: String,
    /// Failure category.
    pub kind: DriverErrorKind,
    /// Human readable detail.
    pub message: String,
}

impl DriverError {
    /// Build a driver error.
    pub fn new(
        driver_type: impl Into<String>,
        kind: DriverErrorKind,
        message: impl Into<String>,
    ) -> Self {
        Self {
            driver_type: driver_type.into(),
            kind,
            message: message.into(),
        }
    }

    /// Recover a `DriverError` from an `anyhow::Error` returned by a
    /// capability trait, wrapping foreign errors as `Unknown`.
    pub fn from_anyhow(driver_type: impl Into<String>, err: anyhow::Error) -> Self {
        match err.downcast::<DriverError>() {
            Ok(driver) => driver,
            Err(other) => Self::new(driver_type, DriverErrorKind::Unknown, format!("{:#}", other)),
        }
    }
}

/// Convenience alias for results using the application error type.
pub type AppResult<T> = std::result::Result<T, DaqError>;

/// Primary error type for the acquisition system.
#[derive(Error, Debug)]
pub enum DaqError {
    /// Semantic configuration problem caught during validation.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// File system failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Collaborator failure.
    #[error(transparent)]
    Driver(#[from] DriverError),

    /// Storage backend failure (encoding, HDF5 library errors).
    #[error("Storage error: {0}")]
    Storage(String),

    /// The dataset file already exists; datasets are never overwritten.
    #[error("Dataset file already exists: {}", .0.display())]
    DatasetExists(PathBuf),

    /// A frame did not match the shape fixed by the first frame of the run.
    #[error("Frame shape mismatch: expected {expected:?} (height, width), got {actual:?}")]
    ShapeMismatch {
        /// Shape established by the first frame.
        expected: (u32, u32),
        /// Shape of the offending frame.
        actual: (u32, u32),
    },

    /// `start_acquisition` was called while a session is still active.
    #[error("An acquisition session is already active")]
    SessionActive,

    /// The detector had no frame although no stop was requested.
    #[error("Detector returned no frame while the acquisition was still running")]
    FrameMissing,

    /// No schedule file with the given name exists.
    #[error("Temperature schedule '{0}' not found")]
    ScheduleNotFound(String),

    /// A schedule file could not be parsed.
    #[error("Invalid temperature schedule: {0}")]
    InvalidSchedule(String),

    /// Functionality was not compiled in.
    #[error("Feature '{0}' is not enabled. Please rebuild with --features {0}")]
    FeatureNotEnabled(String),
}

impl DaqError {
    /// Whether the error means the dataset file was already present.
    #[must_use]
    pub fn is_dataset_exists(&self) -> bool {
        matches!(self, DaqError::DatasetExists(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_driver_error_display() {
        let err = DriverError::new("mock_cryostat", DriverErrorKind::Communication, "link down");
        assert_eq!(
            err.to_string(),
            "Driver 'mock_cryostat' communication error: link down"
        );
    }

    #[test]
    fn test_driver_error_converts() {
        let err: DaqError = DriverError::new("x", DriverErrorKind::Timeout, "slow").into();
        assert!(matches!(err, DaqError::Driver(ref d) if d.kind == DriverErrorKind::Timeout));
    }

    #[test]
    fn test_from_anyhow_preserves_driver_error() {
        let original = DriverError::new("mock_spectrometer", DriverErrorKind::Hardware, "fault");
        let recovered = DriverError::from_anyhow("detector", anyhow::Error::new(original));
        assert_eq!(recovered.driver_type, "mock_spectrometer");
        assert_eq!(recovered.kind, DriverErrorKind::Hardware);

        let wrapped = DriverError::from_anyhow("detector", anyhow::anyhow!("socket closed"));
        assert_eq!(wrapped.driver_type, "detector");
        assert_eq!(wrapped.kind, DriverErrorKind::Unknown);
        assert!(wrapped.message.contains("socket closed"));
    }

    #[test]
    fn test_transient_kinds() {
        assert!(DriverErrorKind::Communication.is_transient());
        assert!(DriverErrorKind::Timeout.is_transient());
        assert!(DriverErrorKind::Unknown.is_transient());
        assert!(!DriverErrorKind::Hardware.is_transient());
        assert!(!DriverErrorKind::Configuration.is_transient());
        assert!(!DriverErrorKind::InvalidParameter.is_transient());
    }

    #[test]
    fn test_shape_mismatch_message() {
        let err = DaqError::ShapeMismatch {
            expected: (1, 1024),
            actual: (2, 512),
        };
        let msg = err.to_string();
        assert!(msg.contains("(1, 1024)"));
        assert!(msg.contains("(2, 512)"));
    }

    #[test]
    fn test_dataset_exists() {
        let err = DaqError::DatasetExists(PathBuf::from("run.h5"));
        assert!(err.is_dataset_exists());
        assert!(err.to_string().contains("run.h5"));
        assert!(!DaqError::FrameMissing.is_dataset_exists());
    }
}

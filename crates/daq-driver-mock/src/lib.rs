//! Mock hardware for spectro-daq.
//!
//! Simulated collaborators for running the acquisition loop without a lab:
//!
//! - [`MockSpectrometer`] - CCD detector behind a spectrograph, implementing
//!   the daq-core `Detector` capabilities
//! - [`MockCryostat`] - temperature controller implementing `TemperatureControl`
//!
//! Both share the [`common`] infrastructure: timing modes, seeded noise and
//! error injection.
//!
//! # Performance Characteristics
//!
//! - `Instant` mode: captures complete after a fixed number of polls and the
//!   cryostat reaches its setpoint on the next poll. Deterministic.
//! - `Realistic` mode: captures take the exposure time, the sample drifts
//!   exponentially towards its setpoint.
//! - `Chaos` mode: realistic, with a 5% random failure rate on every call.
//!
//! ```rust,ignore
//! use daq_driver_mock::{MockCryostat, MockSpectrometer};
//! use std::sync::Arc;
//!
//! let detector = Arc::new(MockSpectrometer::builder().sensor(1024, 1).build());
//! let cryostat = Arc::new(MockCryostat::builder().initial_temperature(295.0).build());
//! ```

pub mod common;
mod mock_cryostat;
mod mock_spectrometer;
mod spectrum;

// Re-export common types
pub use common::{ErrorConfig, ErrorScenario, MockMode, MockRng};

// Re-export driver types
pub use mock_cryostat::{CryostatCommand, MockCryostat, MockCryostatBuilder, AMBIENT_K};
pub use mock_spectrometer::{MockSpectrometer, MockSpectrometerBuilder};

// Re-export for convenience
pub use spectrum::{generate_spectrum, DISPERSION_NM_PER_PIXEL, EMISSION_LINE_NM};

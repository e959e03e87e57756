//! Common infrastructure for mock devices.
//!
//! - **mode**: Operational modes (Instant, Realistic, Chaos)
//! - **errors**: Error injection framework
//! - **rng**: Seeded random number generator

pub mod errors;
pub mod mode;
pub mod rng;

// Re-export commonly used types
pub use errors::{ErrorConfig, ErrorScenario};
pub use mode::MockMode;
pub use rng::MockRng;

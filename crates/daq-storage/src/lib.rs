//! Dataset storage for acquisition runs.
//!
//! A run produces one dataset file holding four frame-indexed sequences
//! (`timestamps`, `data`, `temp_start`, `temp_end`) plus scalar attributes
//! (`exposure`, `centre_wavelength`, `bin_mode`, `start_time`, `end_time`).
//!
//! Two on-disk formats are available:
//!
//! - **HDF5** (feature `storage_hdf5`): chunked, resizable datasets readable
//!   with h5py, MATLAB or HDFView while the run is still in progress.
//! - **Binary**: a length-prefixed record stream that needs no native
//!   libraries. Always compiled.
//!
//! [`DatasetWriter`] owns the file for the lifetime of a run; [`DatasetReader`]
//! reads either format back.

pub mod binary;
pub mod dataset;
#[cfg(feature = "storage_hdf5")]
pub mod hdf5_dataset;
pub mod reader;

pub use dataset::{
    DatasetBackend, DatasetSummary, DatasetWriter, FrameRecord, RunAttributes, StorageFormat,
};
pub use reader::{DatasetContents, DatasetReader};

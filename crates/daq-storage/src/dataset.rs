//! Dataset writer shared by all storage formats.

use chrono::{DateTime, Utc};
use daq_core::{AppResult, BinningMode, DaqError, Frame};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::binary::BinaryBackend;

const HDF5_EXTENSIONS: [&str; 3] = ["h5", "hdf5", "he5"];

/// Static attributes stamped into the file when it is created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunAttributes {
    /// Detector exposure in seconds.
    pub exposure: f64,
    /// Spectrograph centre wavelength in nanometres.
    pub centre_wavelength: f64,
    /// Sensor readout mode.
    pub bin_mode: BinningMode,
    /// Wall-clock time the file was created.
    pub start_time: DateTime<Utc>,
}

/// One frame together with its timing and temperature metadata.
///
/// The four fields map onto the four parallel sequences of the dataset and
/// are always written together.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameRecord {
    /// Capture trigger time, unix seconds.
    pub timestamp: i64,
    /// Pixel data.
    pub frame: Frame,
    /// Environment temperature sampled just before the trigger.
    pub temp_start: f64,
    /// Environment temperature sampled just after retrieval.
    pub temp_end: f64,
}

/// On-disk format of a dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageFormat {
    /// HDF5 container (requires the `storage_hdf5` feature).
    Hdf5,
    /// Length-prefixed record stream.
    Binary,
}

impl Default for StorageFormat {
    fn default() -> Self {
        if cfg!(feature = "storage_hdf5") {
            StorageFormat::Hdf5
        } else {
            StorageFormat::Binary
        }
    }
}

impl StorageFormat {
    /// Conventional file extension.
    #[must_use]
    pub fn extension(&self) -> &'static str {
        match self {
            StorageFormat::Hdf5 => "hdf5",
            StorageFormat::Binary => "dat",
        }
    }

    /// Reject file names that claim a different format.
    ///
    /// Tools such as h5py pick the reader from the extension, so a binary
    /// dataset must not be named `*.h5`/`*.hdf5`.
    pub fn check_filename(&self, path: &Path) -> AppResult<()> {
        let named_hdf5 = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| HDF5_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()));
        if *self == StorageFormat::Binary && named_hdf5 {
            return Err(DaqError::Configuration(format!(
                "{} has an HDF5 extension but the storage format is binary (use .{})",
                path.display(),
                self.extension()
            )));
        }
        Ok(())
    }
}

impl std::fmt::Display for StorageFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StorageFormat::Hdf5 => write!(f, "hdf5"),
            StorageFormat::Binary => write!(f, "binary"),
        }
    }
}

/// A storage format implementation.
///
/// `append` must grow all four sequences by one element as a single unit:
/// a reader may never observe sequences of unequal length.
pub trait DatasetBackend: Send {
    /// Append one frame record.
    fn append(&mut self, index: u64, record: &FrameRecord) -> AppResult<()>;

    /// Stamp the end time and close the file.
    fn finish(&mut self, end_time: DateTime<Utc>) -> AppResult<()>;
}

/// What a finalized dataset contains.
#[derive(Debug, Clone, PartialEq)]
pub struct DatasetSummary {
    /// Location of the file.
    pub path: PathBuf,
    /// Number of frames written.
    pub frames: u64,
    /// Frame shape as `(height, width)`, `None` if no frame was written.
    pub shape: Option<(u32, u32)>,
    /// Time stamped into the `end_time` attribute.
    pub end_time: DateTime<Utc>,
}

/// Owns a dataset file for the duration of one acquisition run.
///
/// The file is created exclusively: an existing file is never opened or
/// truncated. The frame shape is fixed by the first appended frame.
/// [`DatasetWriter::finalize`] consumes the writer so it can only run once.
pub struct DatasetWriter {
    path: PathBuf,
    format: StorageFormat,
    backend: Box<dyn DatasetBackend>,
    shape: Option<(u32, u32)>,
    frames_written: u64,
}

impl std::fmt::Debug for DatasetWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatasetWriter")
            .field("path", &self.path)
            .field("format", &self.format)
            .field("shape", &self.shape)
            .field("frames_written", &self.frames_written)
            .finish()
    }
}

impl DatasetWriter {
    /// Create a new dataset file and stamp its static attributes.
    ///
    /// # Errors
    /// - `DaqError::DatasetExists` if `path` already exists
    /// - `DaqError::Configuration` if a binary dataset is given an HDF5 name
    /// - `DaqError::FeatureNotEnabled` if HDF5 was requested but not compiled in
    /// - `DaqError::Io`/`DaqError::Storage` if the file cannot be created
    pub fn create(
        path: impl AsRef<Path>,
        format: StorageFormat,
        attributes: &RunAttributes,
    ) -> AppResult<Self> {
        let path = path.as_ref().to_path_buf();
        format.check_filename(&path)?;
        if path.exists() {
            return Err(DaqError::DatasetExists(path));
        }

        let backend: Box<dyn DatasetBackend> = match format {
            StorageFormat::Binary => Box::new(BinaryBackend::create(&path, attributes)?),
            #[cfg(feature = "storage_hdf5")]
            StorageFormat::Hdf5 => Box::new(crate::hdf5_dataset::Hdf5Backend::create(
                &path, attributes,
            )?),
            #[cfg(not(feature = "storage_hdf5"))]
            StorageFormat::Hdf5 => {
                return Err(DaqError::FeatureNotEnabled("storage_hdf5".to_string()))
            }
        };

        info!(
            path = %path.display(),
            %format,
            exposure = attributes.exposure,
            centre_wavelength = attributes.centre_wavelength,
            bin_mode = %attributes.bin_mode,
            "Created dataset"
        );

        Ok(Self {
            path,
            format,
            backend,
            shape: None,
            frames_written: 0,
        })
    }

    /// Append one frame and its metadata.
    ///
    /// # Errors
    /// `DaqError::ShapeMismatch` if the frame shape differs from the first
    /// frame of the run. Nothing is written in that case.
    pub fn append_frame(&mut self, record: &FrameRecord) -> AppResult<()> {
        let actual = record.frame.shape();
        if let Some(expected) = self.shape {
            if expected != actual {
                return Err(DaqError::ShapeMismatch { expected, actual });
            }
        }

        self.backend.append(self.frames_written, record)?;
        self.shape = Some(actual);
        self.frames_written += 1;
        debug!(frame = self.frames_written, "Appended frame to dataset");
        Ok(())
    }

    /// Stamp `end_time` and close the file.
    pub fn finalize(mut self) -> AppResult<DatasetSummary> {
        let end_time = Utc::now();
        self.backend.finish(end_time)?;
        info!(
            path = %self.path.display(),
            frames = self.frames_written,
            "Dataset finalized"
        );
        Ok(DatasetSummary {
            path: self.path,
            frames: self.frames_written,
            shape: self.shape,
            end_time,
        })
    }

    /// Location of the file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Format the file is written in.
    #[must_use]
    pub fn format(&self) -> StorageFormat {
        self.format
    }

    /// Frames written so far.
    #[must_use]
    pub fn frames_written(&self) -> u64 {
        self.frames_written
    }

    /// Shape fixed by the first frame, as `(height, width)`.
    #[must_use]
    pub fn shape(&self) -> Option<(u32, u32)> {
        self.shape
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reader::DatasetReader;
    use tempfile::tempdir;

    fn attributes() -> RunAttributes {
        RunAttributes {
            exposure: 0.5,
            centre_wavelength: 650.0,
            bin_mode: BinningMode::LineSensor,
            start_time: Utc::now(),
        }
    }

    fn record(ts: i64, width: u32, height: u32) -> FrameRecord {
        let pixels = (0..width * height).map(|i| i as u16).collect();
        FrameRecord {
            timestamp: ts,
            frame: Frame::new(width, height, pixels).unwrap(),
            temp_start: 280.0,
            temp_end: 280.1,
        }
    }

    #[test]
    fn test_create_refuses_existing_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("run.dat");
        std::fs::write(&path, b"precious").unwrap();

        let err = DatasetWriter::create(&path, StorageFormat::Binary, &attributes()).unwrap_err();
        assert!(err.is_dataset_exists());
        assert_eq!(std::fs::read(&path).unwrap(), b"precious");
    }

    #[test]
    fn test_shape_fixed_by_first_frame() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("run.dat");
        let mut writer = DatasetWriter::create(&path, StorageFormat::Binary, &attributes()).unwrap();

        writer.append_frame(&record(1, 8, 1)).unwrap();
        let err = writer.append_frame(&record(2, 4, 2)).unwrap_err();
        assert!(matches!(
            err,
            DaqError::ShapeMismatch {
                expected: (1, 8),
                actual: (2, 4)
            }
        ));
        assert_eq!(writer.frames_written(), 1);

        let summary = writer.finalize().unwrap();
        assert_eq!(summary.frames, 1);
        assert_eq!(summary.shape, Some((1, 8)));

        let contents = DatasetReader::open(&path).unwrap();
        assert_eq!(contents.frame_count(), 1);
        assert!(contents.end_time.is_some());
    }

    #[test]
    fn test_finalize_empty_dataset() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("empty.dat");
        let writer = DatasetWriter::create(&path, StorageFormat::Binary, &attributes()).unwrap();
        let summary = writer.finalize().unwrap();
        assert_eq!(summary.frames, 0);
        assert_eq!(summary.shape, None);

        let contents = DatasetReader::open(&path).unwrap();
        assert_eq!(contents.frame_count(), 0);
        assert!(contents.end_time.is_some());
    }

    #[test]
    fn test_binary_refuses_hdf5_name() {
        let dir = tempdir().unwrap();
        for name in ["temp.hdf5", "run.h5", "RUN.H5"] {
            let path = dir.path().join(name);
            let err =
                DatasetWriter::create(&path, StorageFormat::Binary, &attributes()).unwrap_err();
            assert!(matches!(err, DaqError::Configuration(_)), "{}", name);
            assert!(!path.exists());
        }
        assert!(StorageFormat::Binary
            .check_filename(Path::new("temp.dat"))
            .is_ok());
        assert!(StorageFormat::Hdf5
            .check_filename(Path::new("temp.hdf5"))
            .is_ok());
    }

    #[test]
    fn test_extension_matches_format() {
        assert_eq!(StorageFormat::Binary.extension(), "dat");
        assert_eq!(StorageFormat::Hdf5.extension(), "hdf5");
        let default = StorageFormat::default();
        let name = format!("temp.{}", default.extension());
        assert!(default.check_filename(Path::new(&name)).is_ok());
    }

    #[cfg(not(feature = "storage_hdf5"))]
    #[test]
    fn test_hdf5_requires_feature() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("run.h5");
        let err = DatasetWriter::create(&path, StorageFormat::Hdf5, &attributes()).unwrap_err();
        assert!(matches!(err, DaqError::FeatureNotEnabled(_)));
        assert!(!path.exists());
    }
}

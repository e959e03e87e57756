//! Read datasets back, whichever format they were written in.

use chrono::{DateTime, Utc};
use daq_core::{AppResult, DaqError, Frame};
use std::path::Path;

use crate::binary::{self, Record};
use crate::dataset::RunAttributes;

/// HDF5 superblock signature.
const HDF5_SIGNATURE: &[u8; 8] = b"\x89HDF\r\n\x1a\n";

/// In-memory copy of a dataset file.
#[derive(Debug, Clone, PartialEq)]
pub struct DatasetContents {
    /// Attributes stamped at creation.
    pub attributes: RunAttributes,
    /// `end_time` attribute, `None` while the run is still in progress.
    pub end_time: Option<DateTime<Utc>>,
    /// Capture trigger times, unix seconds.
    pub timestamps: Vec<i64>,
    /// Frames in capture order.
    pub data: Vec<Frame>,
    /// Temperatures sampled before each trigger.
    pub temp_start: Vec<f64>,
    /// Temperatures sampled after each retrieval.
    pub temp_end: Vec<f64>,
}

impl DatasetContents {
    /// Number of complete frames (shortest of the four sequences).
    #[must_use]
    pub fn frame_count(&self) -> usize {
        self.timestamps
            .len()
            .min(self.data.len())
            .min(self.temp_start.len())
            .min(self.temp_end.len())
    }

    /// Whether all four sequences have equal length.
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        let n = self.timestamps.len();
        self.data.len() == n && self.temp_start.len() == n && self.temp_end.len() == n
    }

    /// Frame shape as `(height, width)`.
    #[must_use]
    pub fn shape(&self) -> Option<(u32, u32)> {
        self.data.first().map(Frame::shape)
    }
}

/// Opens dataset files.
pub struct DatasetReader;

impl DatasetReader {
    /// Read a complete dataset into memory.
    ///
    /// The format is detected from the file signature.
    pub fn open(path: impl AsRef<Path>) -> AppResult<DatasetContents> {
        let path = path.as_ref();
        let bytes = std::fs::read(path)?;

        if bytes.starts_with(binary::MAGIC) {
            return Self::from_records(binary::decode_records(&bytes)?);
        }

        if bytes.starts_with(HDF5_SIGNATURE) {
            #[cfg(feature = "storage_hdf5")]
            return crate::hdf5_dataset::read(path);
            #[cfg(not(feature = "storage_hdf5"))]
            return Err(DaqError::FeatureNotEnabled("storage_hdf5".to_string()));
        }

        Err(DaqError::Storage(format!(
            "{} is not a recognised dataset file",
            path.display()
        )))
    }

    fn from_records(records: Vec<Record>) -> AppResult<DatasetContents> {
        let mut records = records.into_iter();
        let attributes = match records.next() {
            Some(Record::Attributes(attributes)) => attributes,
            _ => {
                return Err(DaqError::Storage(
                    "dataset does not start with attributes".to_string(),
                ))
            }
        };

        let mut contents = DatasetContents {
            attributes,
            end_time: None,
            timestamps: Vec::new(),
            data: Vec::new(),
            temp_start: Vec::new(),
            temp_end: Vec::new(),
        };

        for record in records {
            match record {
                Record::Frame(frame) => {
                    contents.timestamps.push(frame.timestamp);
                    contents.temp_start.push(frame.temp_start);
                    contents.temp_end.push(frame.temp_end);
                    contents.data.push(frame.frame);
                }
                Record::Finished { end_time } => contents.end_time = Some(end_time),
                Record::Attributes(_) => {
                    return Err(DaqError::Storage(
                        "duplicate attribute record".to_string(),
                    ))
                }
            }
        }

        Ok(contents)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_unrecognised_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("notes.txt");
        std::fs::write(&path, "hello world").unwrap();
        assert!(matches!(
            DatasetReader::open(&path),
            Err(DaqError::Storage(_))
        ));
    }

    #[test]
    fn test_missing_file() {
        let dir = tempdir().unwrap();
        assert!(matches!(
            DatasetReader::open(dir.path().join("absent.dat")),
            Err(DaqError::Io(_))
        ));
    }
}

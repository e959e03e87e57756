//! HDF5 dataset format.
//!
//! File layout:
//!
//! ```text
//! /timestamps   int64[n]          attrs: start_time, end_time
//! /data         uint16[n][h][w]   attrs: exposure, centre_wavelength, bin_mode
//! /temp_start   float64[n]
//! /temp_end     float64[n]
//! ```
//!
//! All datasets are chunked with unlimited extents so they can grow one frame
//! at a time. `timestamps` is extended last, and the file is flushed after
//! every frame. A frame that fails part way is cut off again so every
//! sequence keeps the same length.

use chrono::{DateTime, Utc};
use daq_core::{AppResult, DaqError, Frame};
use hdf5::types::VarLenUnicode;
use hdf5::{Dataset, File};
use ndarray::{s, ArrayView2};
use std::path::Path;
use tracing::warn;

use crate::dataset::{DatasetBackend, FrameRecord, RunAttributes};
use crate::reader::DatasetContents;

const SCALAR_CHUNK: usize = 64;
const ROW_CHUNK: usize = 1024;

fn h5err(err: hdf5::Error) -> DaqError {
    DaqError::Storage(format!("hdf5: {}", err))
}

fn varlen(value: &str) -> AppResult<VarLenUnicode> {
    value
        .parse::<VarLenUnicode>()
        .map_err(|e| DaqError::Storage(format!("invalid attribute string: {}", e)))
}

fn write_str_attr(dataset: &Dataset, name: &str, value: &str) -> AppResult<()> {
    let value = varlen(value)?;
    dataset
        .new_attr::<VarLenUnicode>()
        .create(name)
        .and_then(|attr| attr.write_scalar(&value))
        .map_err(h5err)
}

fn write_f64_attr(dataset: &Dataset, name: &str, value: f64) -> AppResult<()> {
    dataset
        .new_attr::<f64>()
        .create(name)
        .and_then(|attr| attr.write_scalar(&value))
        .map_err(h5err)
}

fn read_str_attr(dataset: &Dataset, name: &str) -> AppResult<String> {
    let value: VarLenUnicode = dataset
        .attr(name)
        .and_then(|attr| attr.read_scalar())
        .map_err(h5err)?;
    Ok(value.as_str().to_string())
}

fn parse_time(value: &str) -> AppResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| DaqError::Storage(format!("invalid timestamp '{}': {}", value, e)))
}

/// Writer half of the HDF5 format.
pub struct Hdf5Backend {
    file: Option<File>,
    timestamps: Dataset,
    data: Dataset,
    temp_start: Dataset,
    temp_end: Dataset,
}

impl Hdf5Backend {
    /// Create the file exclusively, lay out the datasets and stamp attributes.
    pub fn create(path: &Path, attributes: &RunAttributes) -> AppResult<Self> {
        let file = File::create_excl(path).map_err(h5err)?;

        let timestamps = file
            .new_dataset::<i64>()
            .chunk(SCALAR_CHUNK)
            .shape(0..)
            .create("timestamps")
            .map_err(h5err)?;
        let data = file
            .new_dataset::<u16>()
            .chunk((1, 1, ROW_CHUNK))
            .shape((0.., 0.., 0..))
            .create("data")
            .map_err(h5err)?;
        let temp_start = file
            .new_dataset::<f64>()
            .chunk(SCALAR_CHUNK)
            .shape(0..)
            .create("temp_start")
            .map_err(h5err)?;
        let temp_end = file
            .new_dataset::<f64>()
            .chunk(SCALAR_CHUNK)
            .shape(0..)
            .create("temp_end")
            .map_err(h5err)?;

        write_f64_attr(&data, "exposure", attributes.exposure)?;
        write_f64_attr(&data, "centre_wavelength", attributes.centre_wavelength)?;
        write_str_attr(&data, "bin_mode", attributes.bin_mode.as_str())?;
        write_str_attr(&timestamps, "start_time", &attributes.start_time.to_rfc3339())?;

        file.flush().map_err(h5err)?;

        Ok(Self {
            file: Some(file),
            timestamps,
            data,
            temp_start,
            temp_end,
        })
    }
}

impl Hdf5Backend {
    fn write_frame(&self, n: usize, record: &FrameRecord) -> AppResult<()> {
        let (height, width) = record.frame.shape();
        let (h, w) = (height as usize, width as usize);

        let view = ArrayView2::from_shape((h, w), record.frame.pixels.as_slice())
            .map_err(|e| DaqError::Storage(format!("frame layout: {}", e)))?;
        self.data.resize((n + 1, h, w)).map_err(h5err)?;
        self.data.write_slice(view, s![n, .., ..]).map_err(h5err)?;

        self.temp_start.resize((n + 1,)).map_err(h5err)?;
        self.temp_start
            .write_slice(&[record.temp_start][..], n..)
            .map_err(h5err)?;
        self.temp_end.resize((n + 1,)).map_err(h5err)?;
        self.temp_end
            .write_slice(&[record.temp_end][..], n..)
            .map_err(h5err)?;

        self.timestamps.resize((n + 1,)).map_err(h5err)?;
        self.timestamps
            .write_slice(&[record.timestamp][..], n..)
            .map_err(h5err)
    }

    /// Shrink every sequence back to `n` frames.
    fn truncate(&self, n: usize, frame_dims: (usize, usize)) -> hdf5::Result<()> {
        self.data.resize((n, frame_dims.0, frame_dims.1))?;
        self.temp_start.resize((n,))?;
        self.temp_end.resize((n,))?;
        self.timestamps.resize((n,))
    }
}

impl DatasetBackend for Hdf5Backend {
    fn append(&mut self, index: u64, record: &FrameRecord) -> AppResult<()> {
        let file = self
            .file
            .as_ref()
            .ok_or_else(|| DaqError::Storage("dataset is closed".to_string()))?;

        let n = index as usize;
        let frame_dims = match self.data.shape().as_slice() {
            [_, h, w] => (*h, *w),
            _ => (0, 0),
        };

        // A half-written frame must not leave the sequences at different lengths
        if let Err(e) = self.write_frame(n, record) {
            if let Err(rollback_err) = self.truncate(n, frame_dims) {
                warn!(frame = n, error = %rollback_err, "Could not roll back partial frame");
            }
            return Err(e);
        }

        file.flush().map_err(h5err)
    }

    fn finish(&mut self, end_time: DateTime<Utc>) -> AppResult<()> {
        write_str_attr(&self.timestamps, "end_time", &end_time.to_rfc3339())?;
        if let Some(file) = self.file.take() {
            file.flush().map_err(h5err)?;
            drop(file);
        }
        Ok(())
    }
}

/// Read an HDF5 dataset into memory.
pub(crate) fn read(path: &Path) -> AppResult<DatasetContents> {
    let file = File::open(path).map_err(h5err)?;
    let timestamps_ds = file.dataset("timestamps").map_err(h5err)?;
    let data_ds = file.dataset("data").map_err(h5err)?;

    let exposure: f64 = data_ds
        .attr("exposure")
        .and_then(|a| a.read_scalar())
        .map_err(h5err)?;
    let centre_wavelength: f64 = data_ds
        .attr("centre_wavelength")
        .and_then(|a| a.read_scalar())
        .map_err(h5err)?;
    let bin_mode = read_str_attr(&data_ds, "bin_mode")?.parse()?;
    let start_time = parse_time(&read_str_attr(&timestamps_ds, "start_time")?)?;
    let end_time = match read_str_attr(&timestamps_ds, "end_time") {
        Ok(value) => Some(parse_time(&value)?),
        Err(_) => None,
    };

    let timestamps = timestamps_ds.read_raw::<i64>().map_err(h5err)?;
    let temp_start = file
        .dataset("temp_start")
        .and_then(|d| d.read_raw::<f64>())
        .map_err(h5err)?;
    let temp_end = file
        .dataset("temp_end")
        .and_then(|d| d.read_raw::<f64>())
        .map_err(h5err)?;

    let shape = data_ds.shape();
    let pixels = data_ds.read_raw::<u16>().map_err(h5err)?;
    let (frames, height, width) = match shape.as_slice() {
        [n, h, w] => (*n, *h, *w),
        other => {
            return Err(DaqError::Storage(format!(
                "data has rank {}, expected 3",
                other.len()
            )))
        }
    };
    let frame_len = height * width;
    let mut data = Vec::with_capacity(frames);
    if frame_len > 0 {
        for chunk in pixels.chunks_exact(frame_len).take(frames) {
            data.push(Frame::new(width as u32, height as u32, chunk.to_vec())?);
        }
    }

    Ok(DatasetContents {
        attributes: RunAttributes {
            exposure,
            centre_wavelength,
            bin_mode,
            start_time,
        },
        end_time,
        timestamps,
        data,
        temp_start,
        temp_end,
    })
}

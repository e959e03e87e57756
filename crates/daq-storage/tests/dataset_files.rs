//! End-to-end tests for dataset files.

use chrono::Utc;
use daq_core::{BinningMode, Frame};
use daq_storage::{DatasetReader, DatasetWriter, FrameRecord, RunAttributes, StorageFormat};
use tempfile::tempdir;

fn attributes() -> RunAttributes {
    RunAttributes {
        exposure: 2.5,
        centre_wavelength: 710.0,
        bin_mode: BinningMode::BinnedSensor,
        start_time: Utc::now(),
    }
}

fn spectrum(index: u16, width: u32) -> FrameRecord {
    FrameRecord {
        timestamp: 1_700_000_000 + i64::from(index),
        frame: Frame::new(width, 1, (0..width as u16).map(|x| x + index).collect()).unwrap(),
        temp_start: 280.0 + f64::from(index),
        temp_end: 280.5 + f64::from(index),
    }
}

fn write_and_read(format: StorageFormat, file_name: &str) {
    let dir = tempdir().unwrap();
    let path = dir.path().join(file_name);
    let attrs = attributes();

    let mut writer = DatasetWriter::create(&path, format, &attrs).unwrap();
    for i in 0..3 {
        writer.append_frame(&spectrum(i, 16)).unwrap();
    }

    // Readable while the run is still in progress
    let partial = DatasetReader::open(&path).unwrap();
    assert_eq!(partial.frame_count(), 3);
    assert!(partial.is_consistent());
    assert!(partial.end_time.is_none());

    writer.finalize().unwrap();

    let contents = DatasetReader::open(&path).unwrap();
    assert!(contents.is_consistent());
    assert_eq!(contents.frame_count(), 3);
    assert_eq!(contents.shape(), Some((1, 16)));
    assert_eq!(contents.attributes.exposure, 2.5);
    assert_eq!(contents.attributes.centre_wavelength, 710.0);
    assert_eq!(contents.attributes.bin_mode, BinningMode::BinnedSensor);
    assert_eq!(
        contents.attributes.start_time.timestamp(),
        attrs.start_time.timestamp()
    );
    assert!(contents.end_time.unwrap() >= contents.attributes.start_time);
    assert_eq!(
        contents.timestamps,
        vec![1_700_000_000, 1_700_000_001, 1_700_000_002]
    );
    assert_eq!(contents.temp_start, vec![280.0, 281.0, 282.0]);
    assert_eq!(contents.temp_end, vec![280.5, 281.5, 282.5]);
    assert_eq!(contents.data[2].get(0, 0), Some(2));
    assert_eq!(contents.data[2].get(15, 0), Some(17));
}

#[test]
fn binary_dataset_reads_back() {
    write_and_read(StorageFormat::Binary, "run.dat");
}

#[cfg(feature = "storage_hdf5")]
#[test]
fn hdf5_dataset_reads_back() {
    write_and_read(StorageFormat::Hdf5, "run.h5");
}

#[test]
fn second_writer_cannot_claim_same_file() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("shared.dat");

    let mut first = DatasetWriter::create(&path, StorageFormat::Binary, &attributes()).unwrap();
    let second = DatasetWriter::create(&path, StorageFormat::Binary, &attributes());
    assert!(second.unwrap_err().is_dataset_exists());

    first.append_frame(&spectrum(0, 4)).unwrap();
    first.finalize().unwrap();
    assert_eq!(DatasetReader::open(&path).unwrap().frame_count(), 1);
}

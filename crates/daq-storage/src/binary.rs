//! Length-prefixed binary dataset format.
//!
//! Layout:
//!
//! ```text
//! "SPDQDAT1"                         8-byte magic
//! [u32 LE length][bincode Record]    Attributes, written on create
//! [u32 LE length][bincode Record]    Frame, one per appended frame
//! ...
//! [u32 LE length][bincode Record]    Finished { end_time }, written on finalize
//! ```
//!
//! Every record goes to disk in a single `write_all` followed by a flush.
//! Readers stop at an incomplete trailing record, so a file that is being
//! written (or whose writer crashed) still reads back as whole frames.

use chrono::{DateTime, Utc};
use daq_core::{AppResult, DaqError};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{self, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::dataset::{DatasetBackend, FrameRecord, RunAttributes};

/// File signature of the binary format.
pub const MAGIC: &[u8; 8] = b"SPDQDAT1";

#[derive(Debug, Serialize, Deserialize)]
pub(crate) enum Record {
    Attributes(RunAttributes),
    Frame(FrameRecord),
    Finished { end_time: DateTime<Utc> },
}

fn encode_err(err: bincode::Error) -> DaqError {
    DaqError::Storage(format!("bincode: {}", err))
}

/// Byte destination of a binary dataset.
pub trait RecordSink: Write + Seek + Send {
    /// Cut the stream back to `len` bytes.
    fn truncate(&mut self, len: u64) -> io::Result<()>;

    /// Force written bytes to stable storage.
    fn sync(&mut self) -> io::Result<()>;
}

impl RecordSink for File {
    fn truncate(&mut self, len: u64) -> io::Result<()> {
        self.set_len(len)
    }

    fn sync(&mut self) -> io::Result<()> {
        self.sync_all()
    }
}

/// Writer half of the binary format.
///
/// A record that fails part way through is cut off again, so the stream
/// always ends on a record boundary and later records stay readable.
pub struct BinaryBackend<S = File> {
    path: PathBuf,
    sink: Option<S>,
    /// Stream length after the last complete record.
    committed: u64,
}

impl BinaryBackend<File> {
    /// Create the file exclusively and write the attribute record.
    pub fn create(path: &Path, attributes: &RunAttributes) -> AppResult<Self> {
        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)
            .map_err(|e| match e.kind() {
                io::ErrorKind::AlreadyExists => DaqError::DatasetExists(path.to_path_buf()),
                _ => DaqError::Io(e),
            })?;
        Self::from_sink(file, path, attributes)
    }
}

impl<S: RecordSink> BinaryBackend<S> {
    /// Start a dataset on an empty sink. `path` is only used in messages.
    pub fn from_sink(sink: S, path: &Path, attributes: &RunAttributes) -> AppResult<Self> {
        let mut backend = Self {
            path: path.to_path_buf(),
            sink: Some(sink),
            committed: 0,
        };
        backend.write_bytes(MAGIC)?;
        backend.write_record(&Record::Attributes(attributes.clone()))?;
        Ok(backend)
    }

    fn write_bytes(&mut self, bytes: &[u8]) -> AppResult<()> {
        let sink = self.sink.as_mut().ok_or_else(|| {
            DaqError::Storage(format!("dataset {} is closed", self.path.display()))
        })?;

        let written = sink.write_all(bytes).and_then(|()| sink.flush());
        if let Err(e) = written {
            let committed = self.committed;
            let rollback = sink
                .truncate(committed)
                .and_then(|()| sink.seek(SeekFrom::Start(committed)).map(|_| ()));
            if let Err(rollback_err) = rollback {
                warn!(
                    path = %self.path.display(),
                    committed,
                    error = %rollback_err,
                    "Could not cut back partial record"
                );
            }
            return Err(DaqError::Io(e));
        }

        self.committed += bytes.len() as u64;
        Ok(())
    }

    fn write_record(&mut self, record: &Record) -> AppResult<()> {
        let payload = bincode::serialize(record).map_err(encode_err)?;
        let len = u32::try_from(payload.len())
            .map_err(|_| DaqError::Storage("record exceeds 4 GiB".to_string()))?;

        let mut buf = Vec::with_capacity(4 + payload.len());
        buf.extend_from_slice(&len.to_le_bytes());
        buf.extend_from_slice(&payload);
        self.write_bytes(&buf)
    }
}

impl<S: RecordSink> DatasetBackend for BinaryBackend<S> {
    fn append(&mut self, _index: u64, record: &FrameRecord) -> AppResult<()> {
        self.write_record(&Record::Frame(record.clone()))
    }

    fn finish(&mut self, end_time: DateTime<Utc>) -> AppResult<()> {
        self.write_record(&Record::Finished { end_time })?;
        if let Some(mut sink) = self.sink.take() {
            sink.sync()?;
        }
        Ok(())
    }
}

/// Decode the records of a binary dataset.
///
/// Returns the complete records in order. Bytes after the last complete
/// record are ignored.
pub(crate) fn decode_records(bytes: &[u8]) -> AppResult<Vec<Record>> {
    if !bytes.starts_with(MAGIC) {
        return Err(DaqError::Storage(
            "not a binary dataset (bad signature)".to_string(),
        ));
    }

    let mut records = Vec::new();
    let mut offset = MAGIC.len();
    while offset + 4 <= bytes.len() {
        let mut len_bytes = [0u8; 4];
        len_bytes.copy_from_slice(&bytes[offset..offset + 4]);
        let len = u32::from_le_bytes(len_bytes) as usize;

        let start = offset + 4;
        let end = start + len;
        if end > bytes.len() {
            // Record still being written
            break;
        }

        let record: Record = bincode::deserialize(&bytes[start..end]).map_err(encode_err)?;
        records.push(record);
        offset = end;
    }

    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use daq_core::{BinningMode, Frame};
    use std::io::Cursor;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use tempfile::tempdir;

    /// In-memory sink that fails once its byte allowance runs out.
    #[derive(Clone)]
    struct FullDisk {
        bytes: Arc<Mutex<Cursor<Vec<u8>>>>,
        allowance: Arc<AtomicUsize>,
    }

    impl FullDisk {
        fn new() -> Self {
            Self {
                bytes: Arc::new(Mutex::new(Cursor::new(Vec::new()))),
                allowance: Arc::new(AtomicUsize::new(usize::MAX)),
            }
        }

        fn allow(&self, bytes: usize) {
            self.allowance.store(bytes, Ordering::SeqCst);
        }

        fn contents(&self) -> Vec<u8> {
            self.bytes.lock().unwrap().get_ref().clone()
        }
    }

    impl Write for FullDisk {
        fn write(&mut self, data: &[u8]) -> io::Result<usize> {
            let allowance = self.allowance.load(Ordering::SeqCst);
            if allowance == 0 {
                return Err(io::Error::other("no space left on device"));
            }
            let n = data.len().min(allowance);
            let written = self.bytes.lock().unwrap().write(&data[..n])?;
            self.allowance.fetch_sub(written, Ordering::SeqCst);
            Ok(written)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl Seek for FullDisk {
        fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
            self.bytes.lock().unwrap().seek(pos)
        }
    }

    impl RecordSink for FullDisk {
        fn truncate(&mut self, len: u64) -> io::Result<()> {
            self.bytes.lock().unwrap().get_mut().truncate(len as usize);
            Ok(())
        }

        fn sync(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn attributes() -> RunAttributes {
        RunAttributes {
            exposure: 1.0,
            centre_wavelength: 532.0,
            bin_mode: BinningMode::FullSensor,
            start_time: Utc::now(),
        }
    }

    #[test]
    fn test_torn_tail_is_ignored() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("torn.dat");
        let mut backend = BinaryBackend::create(&path, &attributes()).unwrap();
        let record = FrameRecord {
            timestamp: 1_700_000_000,
            frame: Frame::new(2, 1, vec![3, 4]).unwrap(),
            temp_start: 10.0,
            temp_end: 10.5,
        };
        backend.append(0, &record).unwrap();
        drop(backend);

        let mut bytes = std::fs::read(&path).unwrap();
        let complete = decode_records(&bytes).unwrap();
        assert_eq!(complete.len(), 2);

        // Simulate a reader catching the writer half way through a record
        bytes.extend_from_slice(&100u32.to_le_bytes());
        bytes.extend_from_slice(&[0u8; 10]);
        let records = decode_records(&bytes).unwrap();
        assert_eq!(records.len(), 2);
        assert!(matches!(records[1], Record::Frame(ref r) if r.timestamp == 1_700_000_000));
    }

    #[test]
    fn test_bad_signature() {
        assert!(decode_records(b"\x89HDF\r\n\x1a\n").is_err());
        assert!(decode_records(b"").is_err());
    }

    #[test]
    fn test_append_after_finish_fails() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("closed.dat");
        let mut backend = BinaryBackend::create(&path, &attributes()).unwrap();
        backend.finish(Utc::now()).unwrap();

        let record = FrameRecord {
            timestamp: 0,
            frame: Frame::new(1, 1, vec![0]).unwrap(),
            temp_start: 0.0,
            temp_end: 0.0,
        };
        assert!(matches!(
            backend.append(0, &record),
            Err(DaqError::Storage(_))
        ));
    }

    #[test]
    fn test_failed_append_leaves_stream_readable() {
        let disk = FullDisk::new();
        let mut backend =
            BinaryBackend::from_sink(disk.clone(), Path::new("full.dat"), &attributes()).unwrap();
        let before = disk.contents();

        let frame = |timestamp| FrameRecord {
            timestamp,
            frame: Frame::new(4, 1, vec![1, 2, 3, 4]).unwrap(),
            temp_start: 77.0,
            temp_end: 77.5,
        };

        // Room for part of the length prefix and payload only
        disk.allow(6);
        assert!(matches!(backend.append(0, &frame(1)), Err(DaqError::Io(_))));
        assert_eq!(disk.contents(), before);

        disk.allow(usize::MAX);
        backend.append(0, &frame(2)).unwrap();
        backend.finish(Utc::now()).unwrap();

        let records = decode_records(&disk.contents()).unwrap();
        assert_eq!(records.len(), 3);
        assert!(matches!(records[0], Record::Attributes(_)));
        assert!(matches!(records[1], Record::Frame(ref r) if r.timestamp == 2));
        assert!(matches!(records[2], Record::Finished { .. }));
    }
}

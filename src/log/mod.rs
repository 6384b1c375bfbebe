//! Persistent single-node backend.
//!
//! Every mutation is appended to `data.log` as a CRC-protected frame and
//! applied to an ordered in-memory index. On open the log is replayed to
//! rebuild the index; a torn or corrupted tail is truncated at the last valid
//! frame and a warning is logged.

mod frame;

use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::{Mutex, RwLock};
use tracing::{debug, error, warn};

use crate::config::{DbConfig, DbType, SyncMode};
use crate::database::{Batch, Database, DbIterator};
use crate::error::{Error, Result};
use crate::iter::{KeyMap, RangeIterator};

use frame::{Record, encode_frame, read_frame};

/// Filename of the append-only log inside the database directory.
pub const LOG_FILENAME: &str = "data.log";

struct LogState {
  path: PathBuf,
  sync_mode: SyncMode,
  index: KeyMap,
  /// `None` once the database has been closed, or after a failed append
  /// could not be rolled back.
  writer: Mutex<Option<LogWriter>>,
  closed: AtomicBool,
  meter_prefix: RwLock<Option<String>>,
}

/// The open log file and the length of its committed prefix.
struct LogWriter {
  file: BufWriter<File>,
  /// Bytes of complete, acknowledged frames. Everything past this is junk.
  committed: u64,
}

impl LogWriter {
  fn write_frame(&mut self, frame: &[u8], sync: bool) -> io::Result<()> {
    self.file.write_all(frame)?;
    self.file.flush()?;
    if sync {
      self.file.get_ref().sync_data()?;
    }
    Ok(())
  }

  /// Drops whatever a failed append left behind, buffered or on disk.
  fn rollback(self) -> io::Result<Self> {
    let capacity = self.file.capacity();
    let (file, _discarded) = self.file.into_parts();
    file.set_len(self.committed)?;
    Ok(Self {
      file: BufWriter::with_capacity(capacity, file),
      committed: self.committed,
    })
  }
}

impl LogState {
  /// Appends one frame and applies it to the index.
  ///
  /// The writer lock is held while the index is updated so the index always
  /// reflects the log order. A failed append leaves neither the log nor the
  /// index changed.
  fn append(&self, records: &[Record], sync: bool) -> Result<()> {
    if records.is_empty() {
      return Ok(());
    }

    let frame = encode_frame(records)?;

    let mut guard = self.writer.lock();
    let writer = guard.as_mut().ok_or_else(|| self.unavailable())?;

    if let Err(e) = writer.write_frame(&frame, sync) {
      self.recover(&mut guard);
      return Err(e.into());
    }
    writer.committed += frame.len() as u64;

    let mut index = self.index.write();
    for record in records {
      apply(&mut index, record);
    }

    Ok(())
  }

  /// Truncates the log back to its committed length after a failed append.
  /// If that fails too, the writer is dropped and later appends are refused.
  fn recover(&self, slot: &mut Option<LogWriter>) {
    let Some(writer) = slot.take() else {
      return;
    };

    match writer.rollback() {
      Ok(writer) => *slot = Some(writer),
      Err(e) => {
        error!(
          target: "ironshard",
          "Failed to roll back torn append, refusing further writes. Path: {:?}, Error: {}",
          self.path,
          e
        );
      }
    }
  }

  fn unavailable(&self) -> Error {
    if self.closed.load(Ordering::Acquire) {
      Error::Closed
    } else {
      Error::Corruption(format!("log writer at {:?} is unusable after a failed append", self.path))
    }
  }

  fn check_open(&self) -> Result<()> {
    if self.closed.load(Ordering::Acquire) {
      return Err(Error::Closed);
    }
    Ok(())
  }
}

fn apply(index: &mut BTreeMap<Vec<u8>, Vec<u8>>, record: &Record) {
  match record {
    Record::Put { key, value } => {
      index.insert(key.clone(), value.clone());
    }
    Record::Delete { key } => {
      index.remove(key);
    }
  }
}

/// A durable key-value store backed by one append-only log file.
/// Cheap to clone; clones share the same file and index.
#[derive(Clone)]
pub struct LogDatabase {
  inner: Arc<LogState>,
}

impl LogDatabase {
  pub fn open(config: &DbConfig) -> Result<Self> {
    fs::create_dir_all(&config.dir)?;

    let log_path = config.dir.join(LOG_FILENAME);
    let (index, valid_end) = Self::replay(&log_path)?;

    let file = OpenOptions::new().create(true).append(true).open(&log_path)?;
    let file_len = file.metadata()?.len();
    if file_len > valid_end {
      warn!(
        target: "ironshard",
        "Log tail is corrupted, truncating {} bytes. Path: {:?}",
        file_len - valid_end,
        log_path
      );
      file.set_len(valid_end)?;
      file.sync_all()?;
    }

    debug!(target: "ironshard", "Opened log database at {:?} with {} keys", config.dir, index.len());

    Ok(Self {
      inner: Arc::new(LogState {
        path: config.dir.clone(),
        sync_mode: config.sync_mode,
        index: Arc::new(RwLock::new(index)),
        writer: Mutex::new(Some(LogWriter {
          file: BufWriter::with_capacity(config.write_buffer_size, file),
          committed: valid_end,
        })),
        closed: AtomicBool::new(false),
        meter_prefix: RwLock::new(None),
      }),
    })
  }

  /// Rebuilds the index from the log. Returns the index and the byte offset
  /// just past the last valid frame.
  fn replay(log_path: &Path) -> Result<(BTreeMap<Vec<u8>, Vec<u8>>, u64)> {
    let mut index = BTreeMap::new();
    if !log_path.exists() {
      return Ok((index, 0));
    }

    let mut reader = BufReader::new(File::open(log_path)?);
    let mut valid_end = 0u64;

    loop {
      match read_frame(&mut reader, valid_end) {
        Ok(Some((header, records))) => {
          for record in &records {
            apply(&mut index, record);
          }
          valid_end += header.frame_len();
        }
        Ok(None) => break,
        Err(e) => {
          // Anything unreadable ends the scan; open() truncates past valid_end.
          warn!(target: "ironshard", "Stopped log replay at offset {}: {}", valid_end, e);
          break;
        }
      }
    }

    Ok((index, valid_end))
  }

  /// Number of live keys.
  pub fn len(&self) -> usize {
    self.inner.index.read().len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  /// The prefix set by the last `meter` call.
  pub fn meter_prefix(&self) -> Option<String> {
    self.inner.meter_prefix.read().clone()
  }
}

impl Database for LogDatabase {
  fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
    let record = Record::Put {
      key: key.to_vec(),
      value: value.to_vec(),
    };
    self.inner.append(&[record], self.inner.sync_mode == SyncMode::Strict)
  }

  fn get(&self, key: &[u8]) -> Result<Vec<u8>> {
    self.inner.check_open()?;
    self.inner.index.read().get(key).cloned().ok_or(Error::NotFound)
  }

  fn has(&self, key: &[u8]) -> Result<bool> {
    self.inner.check_open()?;
    Ok(self.inner.index.read().contains_key(key))
  }

  fn delete(&self, key: &[u8]) -> Result<()> {
    let record = Record::Delete { key: key.to_vec() };
    self.inner.append(&[record], self.inner.sync_mode == SyncMode::Strict)
  }

  fn new_batch(&self) -> Box<dyn Batch> {
    Box::new(LogBatch {
      db: self.inner.clone(),
      records: Vec::new(),
      size: 0,
    })
  }

  fn new_iterator(&self) -> Box<dyn DbIterator> {
    Box::new(RangeIterator::new(self.inner.index.clone(), None, None))
  }

  fn new_iterator_with_start(&self, start: &[u8]) -> Box<dyn DbIterator> {
    Box::new(RangeIterator::new(self.inner.index.clone(), Some(start), None))
  }

  fn new_iterator_with_prefix(&self, prefix: &[u8]) -> Box<dyn DbIterator> {
    Box::new(RangeIterator::new(self.inner.index.clone(), None, Some(prefix)))
  }

  fn close(&self) {
    self.inner.closed.store(true, Ordering::Release);

    let Some(mut writer) = self.inner.writer.lock().take() else {
      return;
    };

    let result = writer
      .file
      .flush()
      .and_then(|_| writer.file.get_ref().sync_all());

    if let Err(e) = result {
      error!(target: "ironshard", "Failed to flush log on close. Data loss possible. Path: {:?}, Error: {}", self.inner.path, e);
    }
  }

  fn meter(&self, prefix: &str) {
    *self.inner.meter_prefix.write() = Some(prefix.to_string());
  }

  fn db_type(&self) -> DbType {
    DbType::Log
  }

  fn path(&self) -> &Path {
    &self.inner.path
  }
}

/// Accumulates records and appends them as a single frame.
pub struct LogBatch {
  db: Arc<LogState>,
  records: Vec<Record>,
  size: usize,
}

impl Batch for LogBatch {
  fn put(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
    let record = Record::Put {
      key: key.to_vec(),
      value: value.to_vec(),
    };
    self.size += record.size();
    self.records.push(record);
    Ok(())
  }

  fn write(&mut self) -> Result<()> {
    let sync = self.db.sync_mode != SyncMode::Async;
    self.db.append(&self.records, sync)
  }

  fn value_size(&self) -> usize {
    self.size
  }

  fn reset(&mut self) {
    self.records.clear();
    self.size = 0;
  }
}

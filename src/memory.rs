//! Volatile backend. Mostly useful for tests and throwaway nodes.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::RwLock;

use crate::config::DbType;
use crate::database::{Batch, Database, DbIterator};
use crate::error::{Error, Result};
use crate::iter::{KeyMap, RangeIterator};

/// An ordered in-memory key-value store.
pub struct MemoryDatabase {
  path: PathBuf,
  data: KeyMap,
  meter_prefix: RwLock<Option<String>>,
  closed: AtomicBool,
}

impl MemoryDatabase {
  pub fn new(path: impl Into<PathBuf>) -> Self {
    Self {
      path: path.into(),
      data: Arc::new(RwLock::new(BTreeMap::new())),
      meter_prefix: RwLock::new(None),
      closed: AtomicBool::new(false),
    }
  }

  /// Number of stored keys.
  pub fn len(&self) -> usize {
    self.data.read().len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  /// The prefix set by the last `meter` call.
  pub fn meter_prefix(&self) -> Option<String> {
    self.meter_prefix.read().clone()
  }

  fn check_open(&self) -> Result<()> {
    if self.closed.load(Ordering::Acquire) {
      return Err(Error::Closed);
    }
    Ok(())
  }
}

impl Database for MemoryDatabase {
  fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
    self.check_open()?;
    self.data.write().insert(key.to_vec(), value.to_vec());
    Ok(())
  }

  fn get(&self, key: &[u8]) -> Result<Vec<u8>> {
    self.check_open()?;
    self.data.read().get(key).cloned().ok_or(Error::NotFound)
  }

  fn has(&self, key: &[u8]) -> Result<bool> {
    self.check_open()?;
    Ok(self.data.read().contains_key(key))
  }

  fn delete(&self, key: &[u8]) -> Result<()> {
    self.check_open()?;
    self.data.write().remove(key);
    Ok(())
  }

  fn new_batch(&self) -> Box<dyn Batch> {
    Box::new(MemoryBatch {
      data: self.data.clone(),
      writes: Vec::new(),
      size: 0,
    })
  }

  fn new_iterator(&self) -> Box<dyn DbIterator> {
    Box::new(RangeIterator::new(self.data.clone(), None, None))
  }

  fn new_iterator_with_start(&self, start: &[u8]) -> Box<dyn DbIterator> {
    Box::new(RangeIterator::new(self.data.clone(), Some(start), None))
  }

  fn new_iterator_with_prefix(&self, prefix: &[u8]) -> Box<dyn DbIterator> {
    Box::new(RangeIterator::new(self.data.clone(), None, Some(prefix)))
  }

  fn close(&self) {
    self.closed.store(true, Ordering::Release);
  }

  fn meter(&self, prefix: &str) {
    *self.meter_prefix.write() = Some(prefix.to_string());
  }

  fn db_type(&self) -> DbType {
    DbType::Memory
  }

  fn path(&self) -> &Path {
    &self.path
  }
}

/// Buffers puts and applies them under a single write lock.
pub struct MemoryBatch {
  data: KeyMap,
  writes: Vec<(Vec<u8>, Vec<u8>)>,
  size: usize,
}

impl Batch for MemoryBatch {
  fn put(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
    self.writes.push((key.to_vec(), value.to_vec()));
    self.size += key.len() + value.len();
    Ok(())
  }

  fn write(&mut self) -> Result<()> {
    let mut map = self.data.write();
    for (key, value) in &self.writes {
      map.insert(key.clone(), value.clone());
    }
    Ok(())
  }

  fn value_size(&self) -> usize {
    self.size
  }

  fn reset(&mut self) {
    self.writes.clear();
    self.size = 0;
  }
}

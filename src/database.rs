//! Storage contracts shared by every backend, and the backend factory.

use std::path::Path;
use std::sync::Arc;

use crate::config::{DbConfig, DbType};
use crate::error::{Error, Result};
use crate::log::LogDatabase;
use crate::memory::MemoryDatabase;

/// A key-value store handle.
///
/// Implementations must be safe to share between threads: point operations,
/// batches and iterators against the same handle may run concurrently.
pub trait Database: Send + Sync {
  fn put(&self, key: &[u8], value: &[u8]) -> Result<()>;

  /// Returns `Error::NotFound` if the key is absent.
  fn get(&self, key: &[u8]) -> Result<Vec<u8>>;

  fn has(&self, key: &[u8]) -> Result<bool>;

  fn delete(&self, key: &[u8]) -> Result<()>;

  fn new_batch(&self) -> Box<dyn Batch>;

  /// Iterates over the whole key space.
  fn new_iterator(&self) -> Box<dyn DbIterator>;

  /// Iterates starting at `start` (or the first key after it).
  fn new_iterator_with_start(&self, start: &[u8]) -> Box<dyn DbIterator>;

  /// Iterates over keys beginning with `prefix`.
  fn new_iterator_with_prefix(&self, prefix: &[u8]) -> Box<dyn DbIterator>;

  /// Releases the underlying resources. Further calls are invalid.
  fn close(&self);

  /// Sets the name under which this database reports its activity.
  fn meter(&self, prefix: &str);

  fn db_type(&self) -> DbType;

  fn path(&self) -> &Path;
}

/// A write-only buffer committed to its database in one step.
pub trait Batch: Send {
  fn put(&mut self, key: &[u8], value: &[u8]) -> Result<()>;

  /// Commits the buffered writes. The buffer is kept until `reset`.
  fn write(&mut self) -> Result<()>;

  /// Bytes buffered so far. Callers flush once this crosses their threshold.
  fn value_size(&self) -> usize;

  fn reset(&mut self);
}

/// A cursor over key-value pairs.
///
/// `key` and `value` borrow the iterator's internal buffers and are only
/// valid until the next call to `next`.
pub trait DbIterator: Send {
  /// Advances to the next pair. Returns `false` when exhausted.
  fn next(&mut self) -> bool;

  /// The error that stopped iteration early, if any.
  fn error(&self) -> Option<Error>;

  fn key(&self) -> &[u8];

  fn value(&self) -> &[u8];

  /// Stops the iterator. After this `next` returns `false`.
  fn release(&mut self);
}

/// Opens a single backend as described by `config`.
///
/// `DbType::Sharded` is rejected here; build a `ShardedDatabase` instead.
pub fn open_database(config: &DbConfig) -> Result<Arc<dyn Database>> {
  match config.db_type {
    DbType::Memory => Ok(Arc::new(MemoryDatabase::new(config.dir.clone()))),
    DbType::Log => Ok(Arc::new(LogDatabase::open(config)?)),
    DbType::Sharded => Err(Error::Config(
      "sharded database must be built with ShardedDatabase::new".into(),
    )),
  }
}

use std::fmt;
use std::path::PathBuf;

use crate::error::{Error, Result};

/// Upper bound on the number of shards a `ShardedDatabase` may own.
pub const MAX_SHARDS: usize = 16;

/// Identifies the storage backend behind a `Database` handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DbType {
  /// Volatile ordered map. Everything is lost on drop.
  Memory,

  /// Append-only log file replayed into memory on open.
  Log,

  /// A `ShardedDatabase` spreading keys over N inner backends.
  Sharded,
}

impl fmt::Display for DbType {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = match self {
      DbType::Memory => "MemoryDB",
      DbType::Log => "LogDB",
      DbType::Sharded => "ShardedDB",
    };
    f.write_str(name)
  }
}

/// Defines how often the log backend flushes data to the physical disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncMode {
  /// Call `fsync` after every single `put`/`delete` and every batch.
  Strict,

  /// Call `fsync` only when a batch is written. Single writes go to the
  /// OS buffer only.
  BatchOnly,

  /// Never call `fsync` automatically. Relies on the OS background flush.
  Async,
}

#[derive(Debug, Clone)]
pub struct DbConfig {
  /// Directory owned by this database. Shards get `dir/<index>`.
  pub dir: PathBuf,

  /// Which backend `open_database` builds.
  pub db_type: DbType,

  /// Cache budget in MB handed to the backend.
  /// A sharded database divides it evenly between its shards.
  /// Default: 128.
  pub cache_size_mb: usize,

  /// Durability policy for persistent backends.
  pub sync_mode: SyncMode,

  /// Size of the in-memory write buffer in front of the log file.
  /// Default: 64 KB.
  pub write_buffer_size: usize,
}

impl Default for DbConfig {
  fn default() -> Self {
    Self {
      dir: PathBuf::from("./ironshard_data"),
      db_type: DbType::Memory,
      cache_size_mb: 128,
      sync_mode: SyncMode::BatchOnly,
      write_buffer_size: 64 * 1024, // 64 KB
    }
  }
}

impl DbConfig {
  pub fn new(dir: impl Into<PathBuf>, db_type: DbType) -> Self {
    Self {
      dir: dir.into(),
      db_type,
      ..Default::default()
    }
  }

  /// Derives the configuration of one shard out of `shard_count`.
  ///
  /// The directory gets the shard index appended and the cache budget is
  /// split evenly.
  pub fn for_shard(&self, index: usize, shard_count: ShardCount) -> Self {
    let mut copied = self.clone();
    copied.dir = self.dir.join(index.to_string());
    copied.cache_size_mb /= shard_count.get();
    copied
  }
}

/// A validated shard count: between 1 and `MAX_SHARDS`, and a power of two.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ShardCount(usize);

impl ShardCount {
  pub fn new(count: usize) -> Result<Self> {
    if count == 0 {
      return Err(Error::Config("shard count should be greater than 0".into()));
    }

    if count > MAX_SHARDS {
      return Err(Error::Config(format!(
        "shard count should be equal to or smaller than {}, but it is {}",
        MAX_SHARDS, count
      )));
    }

    if !is_pow2(count) {
      return Err(Error::Config(format!(
        "shard count should be power of two, but it is {}",
        count
      )));
    }

    Ok(Self(count))
  }

  #[inline]
  pub fn get(self) -> usize {
    self.0
  }

  /// Bit mask selecting a shard out of a key byte.
  #[inline]
  pub fn mask(self) -> usize {
    self.0 - 1
  }
}

impl TryFrom<usize> for ShardCount {
  type Error = Error;

  fn try_from(count: usize) -> Result<Self> {
    Self::new(count)
  }
}

/// Checks if the given number is a power of two. Zero is not.
#[inline]
pub fn is_pow2(num: usize) -> bool {
  num != 0 && (num & (num - 1)) == 0
}

use std::io;
use std::sync::Arc;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug, Clone)]
pub enum Error {
  #[error("I/O Error: {0}")]
  Io(Arc<io::Error>),

  #[error("Data Corruption: {0}")]
  Corruption(String),

  #[error("CRC32 Checksum Mismatch: expected {expected:#x}, got {actual:#x} at offset {offset}")]
  CrcMismatch { expected: u32, actual: u32, offset: u64 },

  #[error("Configuration Error: {0}")]
  Config(String),

  #[error("Database key for sharded database should be greater than 0")]
  EmptyKey,

  #[error("Data is not found with the given key")]
  NotFound,

  #[error("Sharded batch commit failed on shards {failed:?}: {source}")]
  PartialCommit {
    failed: Vec<usize>,
    #[source]
    source: Box<Error>,
  },

  #[error("Database is closed")]
  Closed,

  #[error("Batch worker lost the sub-batch of shard {0} (panicked or vanished)")]
  WorkerLost(usize),

  #[error("Not supported trie node cache type: {0}")]
  UnsupportedCacheType(String),
}

impl From<io::Error> for Error {
  fn from(e: io::Error) -> Self {
    Error::Io(Arc::new(e))
  }
}

impl Error {
  /// Unwraps a `PartialCommit` down to the backend error that caused it.
  pub fn root(&self) -> &Error {
    match self {
      Error::PartialCommit { source, .. } => source.root(),
      other => other,
    }
  }
}

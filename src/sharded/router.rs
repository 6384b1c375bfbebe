//! Key-based routing to determine shard assignment.
//!
//! The shard is picked by masking the key's first byte with `shard_count - 1`.
//! This is not a hash: the distribution across shards is only as good as the
//! entropy of that first byte. Keys that share a first byte always share a
//! shard, whatever follows.

use crate::config::ShardCount;
use crate::error::{Error, Result};

/// Returns the shard index owning `key`.
///
/// # Errors
///
/// Returns `Error::EmptyKey` if `key` has zero length.
#[inline]
pub fn shard_index(key: &[u8], shard_count: ShardCount) -> Result<usize> {
  match key.first() {
    Some(&first) => Ok(first as usize & shard_count.mask()),
    None => Err(Error::EmptyKey),
  }
}

/// Routes keys to shard indices.
#[derive(Debug, Clone, Copy)]
pub struct Router {
  shard_count: ShardCount,
}

impl Router {
  pub fn new(shard_count: ShardCount) -> Self {
    Self { shard_count }
  }

  /// Routes a key to its assigned shard index in `0..shard_count`.
  ///
  /// The same key always routes to the same shard.
  #[inline]
  pub fn route(&self, key: &[u8]) -> Result<usize> {
    shard_index(key, self.shard_count)
  }

  /// Returns the total number of shards.
  pub fn shard_count(&self) -> usize {
    self.shard_count.get()
  }
}

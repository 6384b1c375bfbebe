//! # IronShard
//!
//! `ironshard` is the sharded storage engine underneath a node's persistent
//! key-value store. It partitions a key space across N independently backed
//! stores, commits batches to all of them in parallel, and reads them back as
//! one key space.
//!
//! ## Key Features
//!
//! * **Deterministic Routing**: A key's first byte picks its shard.
//! * **Pooled Batch Commits**: One bounded worker pool per database, with
//!   per-shard failure reporting.
//! * **Merged Iteration**: Per-shard producers behind bounded channels, with
//!   backpressure and cancellation.
//! * **Reference Backends**: An in-memory store and a CRC-checked append-only
//!   log store.
//! * **Trie-Node Cache Selection**: Local, remote or hybrid caches built from
//!   configuration.
//!
//! ## Example
//!
//! ```no_run
//! use ironshard::sharded::ShardedDatabase;
//! use ironshard::{Batch, Database, DbConfig, DbType};
//!
//! # fn main() -> ironshard::Result<()> {
//! let db = ShardedDatabase::new(&DbConfig::new("/var/lib/node/chaindata", DbType::Log), 8)?;
//!
//! db.put(b"\x07header", b"rlp")?;
//! assert_eq!(db.get(b"\x07header")?, b"rlp");
//!
//! let mut batch = db.new_batch();
//! batch.put(b"\x01body", b"txs")?;
//! batch.put(b"\x02receipt", b"logs")?;
//! batch.write()?;
//! # Ok(())
//! # }
//! ```

mod cache;
mod config;
mod database;
mod error;
mod iter;
mod log;
mod memory;

pub mod sharded;

// Re-exports for the flat public API
pub use cache::{
  CacheConfig, CacheType, HybridCache, LocalCache, RemoteConnector, TrieNodeCache, new_trie_node_cache,
};
pub use config::{DbConfig, DbType, MAX_SHARDS, ShardCount, SyncMode, is_pow2};
pub use database::{Batch, Database, DbIterator, open_database};
pub use error::{Error, Result};
pub use log::{LOG_FILENAME, LogBatch, LogDatabase};
pub use memory::{MemoryBatch, MemoryDatabase};

//! # Sharded Database
//!
//! This module spreads one key space over N independent backends through the
//! `ShardedDatabase` wrapper. It provides:
//!
//! - **First-byte routing** of every key to exactly one shard
//! - **Parallel batch commits** on a fixed worker pool shared by all batches
//! - **Parallel iteration** with one producer thread per shard, exposed either
//!   as raw per-shard channels or merged into a single iterator
//!
//! ## Architecture
//!
//! Each shard is a complete backend with its own directory (`<dir>/<index>`)
//! and an even share of the cache budget. Point operations are routed and
//! delegated. A `ShardedBatch` keeps one sub-batch per shard; `write` enqueues
//! one task per shard on the pool's bounded queue and collects every result
//! on a channel private to that call.
//!
//! Iteration runs in two tiers. A `ChannelIterator` drains every shard's
//! native iterator into a bounded channel of `SHARD_CHANNEL_SIZE` entries. A
//! `SerialIterator` adds one combine thread that waits on all of those
//! channels at once and forwards entries into a single channel of
//! `COMBINED_CHANNEL_SIZE` entries. Full channels block their senders, so a
//! slow consumer slows the producers down rather than growing memory.
//!
//! ## Example
//!
//! ```no_run
//! use ironshard::sharded::{CancelContext, ShardedDatabase};
//! use ironshard::{Database, DbConfig, DbType};
//!
//! # fn main() -> ironshard::Result<()> {
//! let db = ShardedDatabase::new(&DbConfig::new("/tmp/chaindata", DbType::Memory), 4)?;
//! db.put(b"\x00genesis", b"block")?;
//!
//! // Consume every shard in parallel
//! let ctx = CancelContext::new();
//! let it = db.new_chan_iterator(&ctx, |shard| shard.new_iterator());
//! for (shard, rx) in it.channels().iter().enumerate() {
//!     for entry in rx.iter() {
//!         println!("shard {}: {:?}", shard, entry.key);
//!     }
//! }
//! it.release();
//! # Ok(())
//! # }
//! ```
//!
//! ## Limitations
//!
//! - **First-byte routing**: keys sharing a first byte always share a shard,
//!   so skewed prefixes give skewed shards
//! - **No cross-shard atomicity**: a failed batch can leave some shards
//!   committed (`Error::PartialCommit` names the others)
//! - **Unordered iteration**: only each shard's own order survives the merge
//! - **Fixed shard count**: changing it requires migrating the data

mod batch;
mod chan_iter;
mod context;
mod db;
mod pool;
mod router;
mod serial_iter;

// Public API exports
pub use batch::ShardedBatch;
pub use chan_iter::{ChannelIterator, Entry, SHARD_CHANNEL_SIZE};
pub use context::{CancelContext, SendOutcome};
pub use db::ShardedDatabase;
pub use router::{Router, shard_index};
pub use serial_iter::{COMBINED_CHANNEL_SIZE, EndOfStream, SerialIterator};

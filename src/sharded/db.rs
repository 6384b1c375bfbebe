//! ShardedDatabase implementation - the main public API.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{info, warn};

use crate::config::{DbConfig, DbType, ShardCount};
use crate::database::{Batch, Database, DbIterator, open_database};
use crate::error::{Error, Result};
use crate::sharded::batch::ShardedBatch;
use crate::sharded::chan_iter::{ChannelIterator, WorkerGauge};
use crate::sharded::context::CancelContext;
use crate::sharded::pool::BatchWorkerPool;
use crate::sharded::router::Router;
use crate::sharded::serial_iter::{EndOfStream, SerialIterator};

/// State shared by a database handle and the batches it created.
pub(crate) struct ShardSet {
  pub router: Router,
  pub shards: Vec<Arc<dyn Database>>,
  pub pool: BatchWorkerPool,
  closed: AtomicBool,
}

/// A key-value store spreading its keys over N independent backends.
///
/// Every key lives in exactly one shard, picked from its first byte (see
/// [`shard_index`](crate::sharded::shard_index)). Point operations go
/// straight to that shard. Batches commit all shards in parallel on a shared
/// worker pool. Iterators read all shards in parallel and merge the results
/// in no particular order.
///
/// # Example
///
/// ```no_run
/// use ironshard::sharded::ShardedDatabase;
/// use ironshard::{Batch, Database, DbConfig, DbType};
///
/// # fn main() -> ironshard::Result<()> {
/// let config = DbConfig::new("/var/lib/node/chaindata", DbType::Log);
/// let db = ShardedDatabase::new(&config, 4)?;
///
/// // Point writes go to the shard owning the key
/// db.put(b"\x01account", b"balance")?;
///
/// // Batches fan out to every shard
/// let mut batch = db.new_sharded_batch();
/// batch.put(b"\x02storage", b"slot")?;
/// batch.write()?;
///
/// let mut it = db.new_iterator();
/// while it.next() {
///     println!("{:?} => {:?}", it.key(), it.value());
/// }
/// it.release();
///
/// db.close();
/// # Ok(())
/// # }
/// ```
pub struct ShardedDatabase {
  path: PathBuf,
  set: Arc<ShardSet>,
  end_of_stream: EndOfStream,
  iter_workers: WorkerGauge,
}

impl ShardedDatabase {
  /// Opens `shard_count` backends of type `config.db_type`.
  ///
  /// Shard `i` lives in `config.dir/i` and gets `config.cache_size_mb /
  /// shard_count` of the cache budget.
  ///
  /// # Errors
  ///
  /// Returns error if:
  /// - `shard_count` is zero, above `MAX_SHARDS`, or not a power of two
  /// - `config.db_type` is `DbType::Sharded`
  /// - a backend fails to open (shards opened so far are closed again)
  pub fn new(config: &DbConfig, shard_count: usize) -> Result<Self> {
    Self::with_opener(config, shard_count, open_database)
  }

  /// Like `new`, but builds each shard with `open` from its derived config.
  pub fn with_opener<F>(config: &DbConfig, shard_count: usize, mut open: F) -> Result<Self>
  where
    F: FnMut(&DbConfig) -> Result<Arc<dyn Database>>,
  {
    let shard_count = ShardCount::new(shard_count)?;
    if config.db_type == DbType::Sharded {
      return Err(Error::Config("shards cannot be sharded databases themselves".into()));
    }

    let n = shard_count.get();
    if config.cache_size_mb > 0 && config.cache_size_mb < n {
      warn!(
        target: "ironshard::sharded",
        "cache_size_mb ({}) is less than shard count ({}). \
         Shards will run without a cache budget.",
        config.cache_size_mb,
        n
      );
    }

    let mut shards: Vec<Arc<dyn Database>> = Vec::with_capacity(n);
    for index in 0..n {
      match open(&config.for_shard(index, shard_count)) {
        Ok(shard) => shards.push(shard),
        Err(e) => {
          close_all(&shards);
          return Err(e);
        }
      }
    }

    Self::build(config.dir.clone(), shard_count, shards, config.db_type)
  }

  /// Wraps already opened backends. Shard `i` is `shards[i]`.
  ///
  /// # Errors
  ///
  /// Returns `Error::Config` if the number of shards is not a valid shard
  /// count. The backends are left open in that case.
  pub fn from_shards(path: impl Into<PathBuf>, shards: Vec<Arc<dyn Database>>) -> Result<Self> {
    let shard_count = ShardCount::new(shards.len())?;
    let inner_type = shards[0].db_type();
    Self::build(path.into(), shard_count, shards, inner_type)
  }

  fn build(path: PathBuf, shard_count: ShardCount, shards: Vec<Arc<dyn Database>>, inner_type: DbType) -> Result<Self> {
    let n = shard_count.get();
    let pool = match BatchWorkerPool::new(n, 2 * n) {
      Ok(pool) => pool,
      Err(e) => {
        close_all(&shards);
        return Err(e);
      }
    };

    info!(
      target: "ironshard::sharded",
      "Opened sharded database at {:?}: {} shards of {}",
      path,
      n,
      inner_type
    );

    Ok(Self {
      path,
      set: Arc::new(ShardSet {
        router: Router::new(shard_count),
        shards,
        pool,
        closed: AtomicBool::new(false),
      }),
      end_of_stream: EndOfStream::default(),
      iter_workers: WorkerGauge::default(),
    })
  }

  /// Sets how iterators built by the `Database` methods detect their end.
  pub fn with_end_of_stream(mut self, end_of_stream: EndOfStream) -> Self {
    self.end_of_stream = end_of_stream;
    self
  }

  pub fn shard_count(&self) -> usize {
    self.set.router.shard_count()
  }

  /// The backend at `index`, if any.
  pub fn shard(&self, index: usize) -> Option<&Arc<dyn Database>> {
    self.set.shards.get(index)
  }

  /// The shard owning `key`.
  pub fn shard_index(&self, key: &[u8]) -> Result<usize> {
    self.set.router.route(key)
  }

  /// Number of iterator threads (producers and combine workers) still running.
  pub fn iterator_workers(&self) -> usize {
    self.iter_workers.get()
  }

  /// Creates an empty batch spanning every shard.
  pub fn new_sharded_batch(&self) -> ShardedBatch {
    ShardedBatch::new(self.set.clone())
  }

  /// Starts one producer per shard over the iterators built by `factory`.
  ///
  /// Cancelling `ctx` stops the producers as `release` would.
  pub fn new_chan_iterator<F>(&self, ctx: &CancelContext, factory: F) -> ChannelIterator
  where
    F: Fn(&dyn Database) -> Box<dyn DbIterator>,
  {
    ChannelIterator::spawn(&self.set.shards, ctx, &self.iter_workers, factory)
  }

  /// Merges the iterators built by `factory` into a single stream.
  pub fn new_serial_iterator<F>(&self, end_of_stream: EndOfStream, factory: F) -> SerialIterator
  where
    F: Fn(&dyn Database) -> Box<dyn DbIterator>,
  {
    let chan_iter = self.new_chan_iterator(&CancelContext::new(), factory);
    SerialIterator::new(chan_iter, end_of_stream, &self.iter_workers)
  }

  fn check_open(&self) -> Result<()> {
    if self.set.closed.load(Ordering::Acquire) {
      return Err(Error::Closed);
    }
    Ok(())
  }

  fn shard_for(&self, key: &[u8]) -> Result<&dyn Database> {
    self.check_open()?;
    let index = self.set.router.route(key)?;
    Ok(self.set.shards[index].as_ref())
  }
}

impl Database for ShardedDatabase {
  fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
    self.shard_for(key)?.put(key, value)
  }

  fn get(&self, key: &[u8]) -> Result<Vec<u8>> {
    self.shard_for(key)?.get(key)
  }

  fn has(&self, key: &[u8]) -> Result<bool> {
    self.shard_for(key)?.has(key)
  }

  fn delete(&self, key: &[u8]) -> Result<()> {
    self.shard_for(key)?.delete(key)
  }

  fn new_batch(&self) -> Box<dyn Batch> {
    Box::new(self.new_sharded_batch())
  }

  fn new_iterator(&self) -> Box<dyn DbIterator> {
    Box::new(self.new_serial_iterator(self.end_of_stream, |db| db.new_iterator()))
  }

  fn new_iterator_with_start(&self, start: &[u8]) -> Box<dyn DbIterator> {
    Box::new(self.new_serial_iterator(self.end_of_stream, |db| db.new_iterator_with_start(start)))
  }

  fn new_iterator_with_prefix(&self, prefix: &[u8]) -> Box<dyn DbIterator> {
    Box::new(self.new_serial_iterator(self.end_of_stream, |db| db.new_iterator_with_prefix(prefix)))
  }

  /// Stops the batch workers, then closes every shard. Idempotent.
  fn close(&self) {
    if self.set.closed.swap(true, Ordering::AcqRel) {
      return;
    }

    self.set.pool.shutdown();
    close_all(&self.set.shards);
    info!(target: "ironshard::sharded", "Closed sharded database at {:?}", self.path);
  }

  /// Names shard `i` as `prefix` followed by `i`.
  fn meter(&self, prefix: &str) {
    for (index, shard) in self.set.shards.iter().enumerate() {
      shard.meter(&format!("{}{}", prefix, index));
    }
  }

  fn db_type(&self) -> DbType {
    DbType::Sharded
  }

  fn path(&self) -> &Path {
    &self.path
  }
}

fn close_all(shards: &[Arc<dyn Database>]) {
  for shard in shards {
    shard.close();
  }
}

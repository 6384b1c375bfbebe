//! Write batch spanning every shard.

use std::mem;
use std::sync::Arc;

use crossbeam_channel::bounded;
use tracing::error;

use crate::database::Batch;
use crate::error::{Error, Result};
use crate::sharded::db::ShardSet;
use crate::sharded::pool::BatchTask;

/// A batch holding one native sub-batch per shard.
///
/// `put` buffers into the sub-batch owning the key. `write` hands every
/// sub-batch to the shared worker pool and waits for all of them. Shards
/// commit independently: when some fail, the others stay committed and the
/// error names the failed shards.
pub struct ShardedBatch {
  set: Arc<ShardSet>,
  batches: Vec<Box<dyn Batch>>,
}

impl ShardedBatch {
  pub(crate) fn new(set: Arc<ShardSet>) -> Self {
    let batches = set.shards.iter().map(|shard| shard.new_batch()).collect();
    Self { set, batches }
  }

  /// Sub-batch sizes, indexed by shard.
  pub fn shard_sizes(&self) -> Vec<usize> {
    self.batches.iter().map(|b| b.value_size()).collect()
  }
}

impl Batch for ShardedBatch {
  fn put(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
    let index = self.set.router.route(key)?;
    self.batches[index].put(key, value)
  }

  /// Commits every sub-batch in parallel.
  ///
  /// # Errors
  ///
  /// - `Error::PartialCommit` naming the failed shards, wrapping the last
  ///   error observed. Shards not listed are committed.
  /// - `Error::Closed` if the database has been closed.
  fn write(&mut self) -> Result<()> {
    if self.value_size() == 0 {
      return Ok(());
    }

    let task_tx = self.set.pool.sender()?;
    let shard_count = self.batches.len();
    let (result_tx, result_rx) = bounded(shard_count);

    let mut slots: Vec<Option<Box<dyn Batch>>> = Vec::with_capacity(shard_count);
    let mut failed = Vec::new();
    let mut last_err = None;
    let mut pending = 0;

    for (index, batch) in mem::take(&mut self.batches).into_iter().enumerate() {
      let task = BatchTask {
        batch,
        index,
        result_tx: result_tx.clone(),
      };
      match task_tx.send(task) {
        Ok(()) => {
          slots.push(None);
          pending += 1;
        }
        // Queue closed while enqueueing. The task comes back unsent.
        Err(e) => {
          slots.push(Some(e.into_inner().batch));
          failed.push(index);
          last_err = Some(Error::Closed);
        }
      }
    }
    drop(task_tx);
    drop(result_tx);

    for _ in 0..pending {
      let Ok(done) = result_rx.recv() else {
        break;
      };

      if let Err(e) = done.result {
        error!(target: "ironshard::sharded", "Failed to write sharded batch. Shard: {}, Error: {}", done.index, e);
        failed.push(done.index);
        last_err = Some(e);
      }
      slots[done.index] = Some(done.batch);
    }

    // A worker died holding its sub-batch. Its writes are lost.
    for (index, slot) in slots.iter_mut().enumerate() {
      if slot.is_none() {
        error!(target: "ironshard::sharded", "Batch worker lost sub-batch of shard {}", index);
        *slot = Some(self.set.shards[index].new_batch());
        failed.push(index);
        last_err = Some(Error::WorkerLost(index));
      }
    }

    self.batches = slots.into_iter().flatten().collect();

    match last_err {
      None => Ok(()),
      Some(source) => {
        failed.sort_unstable();
        Err(Error::PartialCommit {
          failed,
          source: Box::new(source),
        })
      }
    }
  }

  /// The largest buffered size among the sub-batches.
  fn value_size(&self) -> usize {
    self.batches.iter().map(|b| b.value_size()).max().unwrap_or(0)
  }

  fn reset(&mut self) {
    for batch in &mut self.batches {
      batch.reset();
    }
  }
}

//! Per-shard producer threads feeding bounded channels.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;

use crossbeam_channel::{Receiver, Sender, bounded};
use parking_lot::Mutex;
use tracing::{error, trace};

use crate::database::{Database, DbIterator};
use crate::error::Error;
use crate::sharded::context::{CancelContext, SendOutcome};

/// Capacity of each per-shard channel.
pub const SHARD_CHANNEL_SIZE: usize = 128;

/// One key-value pair in flight between threads.
///
/// Both buffers are owned copies, independent of the iterator they came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
  pub key: Vec<u8>,
  pub value: Vec<u8>,
}

/// Counts live iterator threads (producers and combine workers).
#[derive(Clone, Default)]
pub(crate) struct WorkerGauge(Arc<AtomicUsize>);

pub(crate) struct WorkerGuard(Arc<AtomicUsize>);

impl WorkerGauge {
  pub fn enter(&self) -> WorkerGuard {
    self.0.fetch_add(1, Ordering::SeqCst);
    WorkerGuard(self.0.clone())
  }

  pub fn get(&self) -> usize {
    self.0.load(Ordering::SeqCst)
  }
}

impl Drop for WorkerGuard {
  fn drop(&mut self) {
    self.0.fetch_sub(1, Ordering::SeqCst);
  }
}

/// Iterates every shard in parallel, one producer thread per shard.
///
/// Each producer drains its shard's native iterator into a bounded channel
/// and closes the channel when the shard is exhausted or the iterator is
/// released. Use `channels` to consume shards in parallel, or wrap the
/// iterator in a `SerialIterator` to read it as a single stream.
pub struct ChannelIterator {
  ctx: CancelContext,
  channels: Vec<Receiver<Entry>>,
  /// Error reported by each shard's native iterator when its producer ended.
  errors: Arc<Vec<Mutex<Option<Error>>>>,
}

impl ChannelIterator {
  /// Opens one native iterator per shard with `new_iterator` and starts
  /// the producers. Cancelling `parent` stops them as well.
  pub(crate) fn spawn<F>(shards: &[Arc<dyn Database>], parent: &CancelContext, gauge: &WorkerGauge, new_iterator: F) -> Self
  where
    F: Fn(&dyn Database) -> Box<dyn DbIterator>,
  {
    let ctx = parent.child();
    let errors: Arc<Vec<Mutex<Option<Error>>>> = Arc::new(shards.iter().map(|_| Mutex::new(None)).collect());
    let mut channels = Vec::with_capacity(shards.len());

    for (index, shard) in shards.iter().enumerate() {
      let it = new_iterator(shard.as_ref());
      let (tx, rx) = bounded(SHARD_CHANNEL_SIZE);
      channels.push(rx);

      let ctx = ctx.clone();
      let errors = errors.clone();
      let guard = gauge.enter();
      thread::spawn(move || {
        let _guard = guard;
        produce(index, it, tx, &ctx, &errors[index]);
      });
    }

    Self { ctx, channels, errors }
  }

  /// Channels that can be subscribed on, indexed by shard.
  ///
  /// A channel disconnects once its shard is exhausted or the iterator is
  /// released. Entries of different shards arrive in no particular order.
  pub fn channels(&self) -> &[Receiver<Entry>] {
    &self.channels
  }

  pub(crate) fn context(&self) -> &CancelContext {
    &self.ctx
  }

  /// The first error reported by a shard iterator, in shard order.
  ///
  /// Shards whose producer is still running have nothing to report yet.
  pub fn error(&self) -> Option<Error> {
    self.errors.iter().find_map(|slot| slot.lock().clone())
  }

  /// Signals every producer to stop.
  ///
  /// Returns immediately: producers notice between steps, release their
  /// native iterators, and exit on their own.
  pub fn release(&self) {
    self.ctx.cancel();
  }
}

impl Drop for ChannelIterator {
  fn drop(&mut self) {
    self.ctx.cancel();
  }
}

fn produce(
  index: usize,
  mut it: Box<dyn DbIterator>,
  tx: Sender<Entry>,
  ctx: &CancelContext,
  error_slot: &Mutex<Option<Error>>,
) {
  while it.next() {
    if ctx.is_cancelled() {
      trace!(target: "ironshard::sharded", "Shard {} producer stopped by cancellation", index);
      break;
    }

    let entry = Entry {
      key: it.key().to_vec(),
      value: it.value().to_vec(),
    };

    match ctx.send(&tx, entry) {
      SendOutcome::Sent => {}
      SendOutcome::Cancelled | SendOutcome::Disconnected => {
        trace!(target: "ironshard::sharded", "Shard {} producer stopped early", index);
        break;
      }
    }
  }

  let err = it.error();
  if let Some(e) = &err {
    error!(target: "ironshard::sharded", "Error from shard iterator. Shard: {}, Error: {}", index, e);
  }
  *error_slot.lock() = err;
  it.release();
  // Dropping `tx` closes this shard's channel.
}

//! Fixed pool of threads committing sub-batches.
//!
//! All sharded batches of one database share a single bounded task queue.
//! Enqueueing blocks while the queue is full, which caps the number of
//! in-flight backend writes and pushes back on writers. Each task carries its
//! own result channel, so results never reach the wrong caller.

use std::panic::{self, AssertUnwindSafe};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Receiver, Sender, bounded};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, error};

use crate::database::Batch;
use crate::error::{Error, Result};

/// A sub-batch handed to a worker. The worker owns it until it reports back.
pub(crate) struct BatchTask {
  pub batch: Box<dyn Batch>,
  /// Shard index of the sub-batch.
  pub index: usize,
  pub result_tx: Sender<BatchResult>,
}

/// Outcome of one sub-batch commit. The sub-batch travels back with it.
pub(crate) struct BatchResult {
  pub index: usize,
  pub batch: Box<dyn Batch>,
  pub result: Result<()>,
}

pub(crate) struct BatchWorkerPool {
  /// `None` once the queue has been closed.
  task_tx: RwLock<Option<Sender<BatchTask>>>,
  workers: Mutex<Vec<JoinHandle<()>>>,
}

impl BatchWorkerPool {
  /// Starts `worker_count` workers sharing a queue of `queue_capacity` tasks.
  pub fn new(worker_count: usize, queue_capacity: usize) -> Result<Self> {
    let (task_tx, task_rx) = bounded(queue_capacity);

    let mut workers = Vec::with_capacity(worker_count);
    for i in 0..worker_count {
      let task_rx = task_rx.clone();
      let handle = thread::Builder::new()
        .name(format!("ironshard-batch-{}", i))
        .spawn(move || batch_write_worker(task_rx))?;
      workers.push(handle);
    }

    Ok(Self {
      task_tx: RwLock::new(Some(task_tx)),
      workers: Mutex::new(workers),
    })
  }

  /// A handle for enqueueing tasks. Drop it as soon as the tasks are queued,
  /// otherwise `shutdown` waits for it.
  pub fn sender(&self) -> Result<Sender<BatchTask>> {
    self.task_tx.read().clone().ok_or(Error::Closed)
  }

  /// Closes the queue and waits for the workers to drain it. Idempotent.
  pub fn shutdown(&self) {
    // Workers exit once every sender is gone.
    drop(self.task_tx.write().take());

    let workers = std::mem::take(&mut *self.workers.lock());
    for handle in workers {
      if handle.join().is_err() {
        error!(target: "ironshard::sharded", "Batch worker panicked");
      }
    }
  }
}

fn batch_write_worker(tasks: Receiver<BatchTask>) {
  for task in tasks.iter() {
    let BatchTask {
      mut batch,
      index,
      result_tx,
    } = task;

    // A panicking sub-batch is reported as lost; the worker keeps serving.
    let result = match panic::catch_unwind(AssertUnwindSafe(|| batch.write())) {
      Ok(result) => result,
      Err(_) => {
        error!(target: "ironshard::sharded", "Sub-batch write panicked. Shard: {}", index);
        Err(Error::WorkerLost(index))
      }
    };

    // The result channel has room for every shard; a failed send means the
    // caller is gone and nobody wants the outcome.
    if result_tx.send(BatchResult { index, batch, result }).is_err() {
      debug!(target: "ironshard::sharded", "Dropped batch result for shard {}: caller is gone", index);
    }
  }
}

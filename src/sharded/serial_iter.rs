//! Merges the per-shard channels into one stream.

use std::thread;
use std::time::Duration;

use crossbeam_channel::{Receiver, Select, Sender, TryRecvError, bounded};
use tracing::{debug, trace, warn};

use crate::database::DbIterator;
use crate::error::Error;
use crate::sharded::chan_iter::{ChannelIterator, Entry, WorkerGauge};
use crate::sharded::context::{CancelContext, SendOutcome};

/// Capacity of the merged channel.
pub const COMBINED_CHANNEL_SIZE: usize = 1024;

/// How `SerialIterator::next` decides the stream has ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EndOfStream {
  /// Block until an entry arrives or every shard is exhausted.
  #[default]
  Signaled,

  /// Poll the merged channel up to `retries` times, sleeping `interval`
  /// between attempts, and report the end if nothing showed up.
  ///
  /// A slow shard can make this end iteration early.
  Soft { retries: u32, interval: Duration },
}

impl EndOfStream {
  /// Five attempts ten milliseconds apart.
  pub const fn soft() -> Self {
    EndOfStream::Soft {
      retries: 5,
      interval: Duration::from_millis(10),
    }
  }
}

/// Reads all shards as one iterator.
///
/// Entries from different shards are interleaved in arrival order; the only
/// ordering kept is each shard's own native order.
pub struct SerialIterator {
  chan_iter: ChannelIterator,
  combined: Receiver<Entry>,
  end_of_stream: EndOfStream,

  current: Option<Entry>,
  finished: bool,
}

impl SerialIterator {
  pub(crate) fn new(chan_iter: ChannelIterator, end_of_stream: EndOfStream, gauge: &WorkerGauge) -> Self {
    let (tx, rx) = bounded(COMBINED_CHANNEL_SIZE);
    let sources = chan_iter.channels().to_vec();
    let ctx = chan_iter.context().clone();

    let guard = gauge.enter();
    thread::spawn(move || {
      let _guard = guard;
      combine(sources, tx, &ctx);
    });

    Self {
      chan_iter,
      combined: rx,
      end_of_stream,
      current: None,
      finished: false,
    }
  }

  fn recv_soft(&mut self, retries: u32, interval: Duration) -> Option<Entry> {
    for _ in 0..retries {
      match self.combined.try_recv() {
        Ok(entry) => return Some(entry),
        Err(TryRecvError::Disconnected) => {
          self.finished = true;
          return None;
        }
        Err(TryRecvError::Empty) => {
          debug!(target: "ironshard::sharded", "No value is ready on the merged channel");
          thread::sleep(interval);
        }
      }
    }

    warn!(
      target: "ironshard::sharded",
      "next() took more than {:?} on unclosed shard channels, reporting end of iteration",
      soft_wait_limit(retries, interval)
    );
    None
  }
}

/// Total time a soft end of stream waits before giving up.
fn soft_wait_limit(retries: u32, interval: Duration) -> Duration {
  interval.saturating_mul(retries)
}

impl DbIterator for SerialIterator {
  fn next(&mut self) -> bool {
    if self.finished {
      return false;
    }

    let received = match self.end_of_stream {
      EndOfStream::Signaled => match self.combined.recv() {
        Ok(entry) => Some(entry),
        Err(_) => {
          self.finished = true;
          None
        }
      },
      EndOfStream::Soft { retries, interval } => self.recv_soft(retries, interval),
    };

    let advanced = received.is_some();
    self.current = received;
    advanced
  }

  fn error(&self) -> Option<Error> {
    self.chan_iter.error()
  }

  fn key(&self) -> &[u8] {
    self.current.as_ref().map(|e| e.key.as_slice()).unwrap_or(&[])
  }

  fn value(&self) -> &[u8] {
    self.current.as_ref().map(|e| e.value.as_slice()).unwrap_or(&[])
  }

  fn release(&mut self) {
    self.finished = true;
    self.chan_iter.release();
  }
}

/// Forwards entries from every open source to `out` until all sources are
/// closed or `ctx` is cancelled, then closes `out` by dropping it.
fn combine(mut sources: Vec<Receiver<Entry>>, out: Sender<Entry>, ctx: &CancelContext) {
  let signals = ctx.signals();

  'merge: while !sources.is_empty() {
    let closed = {
      let mut sel = Select::new();
      for rx in &sources {
        sel.recv(rx);
      }
      for rx in &signals {
        sel.recv(rx);
      }

      loop {
        let op = sel.select();
        let index = op.index();

        if index >= sources.len() {
          let _ = op.recv(&signals[index - sources.len()]);
          trace!(target: "ironshard::sharded", "Combine worker ends due to cancellation");
          break 'merge;
        }

        match op.recv(&sources[index]) {
          Ok(entry) => {
            if ctx.send(&out, entry) != SendOutcome::Sent {
              trace!(target: "ironshard::sharded", "Combine worker ends, consumer is gone");
              break 'merge;
            }
          }
          // Source closed; it has to leave the select set.
          Err(_) => break index,
        }
      }
    };

    sources.swap_remove(closed);
  }

  trace!(target: "ironshard::sharded", "Combine worker finished");
}

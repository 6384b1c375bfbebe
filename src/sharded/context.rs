//! Cooperative cancellation for iterator workers.
//!
//! A context is cancelled by disconnecting a signal channel: every receiver
//! of that channel becomes ready at once, so threads parked in a `Select` on
//! it wake up without polling.

use std::sync::Arc;

use crossbeam_channel::{Receiver, Select, Sender, TryRecvError, bounded};
use parking_lot::Mutex;

struct Signal {
  trigger: Mutex<Option<Sender<()>>>,
  done: Receiver<()>,
}

impl Signal {
  fn new() -> Self {
    let (tx, rx) = bounded(0);
    Self {
      trigger: Mutex::new(Some(tx)),
      done: rx,
    }
  }

  fn is_fired(&self) -> bool {
    matches!(self.done.try_recv(), Err(TryRecvError::Disconnected))
  }
}

/// A cloneable cancellation handle.
///
/// A child context is cancelled when either it or any ancestor is cancelled;
/// cancelling a child leaves its parent untouched.
#[derive(Clone)]
pub struct CancelContext {
  /// This context's own signal first, then its ancestors'.
  chain: Vec<Arc<Signal>>,
}

/// What happened to a value handed to `CancelContext::send`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
  Sent,
  /// The context was cancelled before the channel had room.
  Cancelled,
  /// Every receiver of the channel is gone.
  Disconnected,
}

impl Default for CancelContext {
  fn default() -> Self {
    Self::new()
  }
}

impl CancelContext {
  /// A root context, cancelled only by an explicit `cancel`.
  pub fn new() -> Self {
    Self {
      chain: vec![Arc::new(Signal::new())],
    }
  }

  /// Derives a context that can be cancelled on its own.
  pub fn child(&self) -> Self {
    let mut chain = Vec::with_capacity(self.chain.len() + 1);
    chain.push(Arc::new(Signal::new()));
    chain.extend(self.chain.iter().cloned());
    Self { chain }
  }

  /// Cancels this context and its descendants. Idempotent.
  pub fn cancel(&self) {
    self.chain[0].trigger.lock().take();
  }

  pub fn is_cancelled(&self) -> bool {
    self.chain.iter().any(|s| s.is_fired())
  }

  /// Receivers that disconnect when this context is cancelled.
  /// Add them to a `Select` to wake on cancellation.
  pub fn signals(&self) -> Vec<Receiver<()>> {
    self.chain.iter().map(|s| s.done.clone()).collect()
  }

  /// Blocks until `value` is sent on `tx` or the context is cancelled.
  pub fn send<T>(&self, tx: &Sender<T>, value: T) -> SendOutcome {
    let signals = self.signals();

    let mut sel = Select::new();
    let send_index = sel.send(tx);
    for rx in &signals {
      sel.recv(rx);
    }

    let op = sel.select();
    let index = op.index();
    if index == send_index {
      return match op.send(tx, value) {
        Ok(()) => SendOutcome::Sent,
        Err(_) => SendOutcome::Disconnected,
      };
    }

    // Nothing is ever sent on a signal channel; a ready signal is a disconnect.
    let _ = op.recv(&signals[index - 1]);
    SendOutcome::Cancelled
  }
}

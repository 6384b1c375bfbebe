use std::collections::{BTreeMap, VecDeque};
use std::ops::Bound;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::database::DbIterator;
use crate::error::Error;

/// The ordered in-memory index shared by the single-node backends.
pub(crate) type KeyMap = Arc<RwLock<BTreeMap<Vec<u8>, Vec<u8>>>>;

/// Number of pairs copied out of the index per read lock.
const REFILL_CHUNK: usize = 256;

/// An iterator that walks an ordered `KeyMap` in key order.
///
/// Pairs are copied out in chunks so the read lock is never held between
/// calls to `next`. Writes landing after the cursor are observed, writes
/// before it are not.
pub struct RangeIterator {
  source: KeyMap,
  /// Lower bound of the next refill.
  cursor: Bound<Vec<u8>>,
  prefix: Option<Vec<u8>>,

  /// Pairs from the most recent refill.
  buffer: VecDeque<(Vec<u8>, Vec<u8>)>,
  current: Option<(Vec<u8>, Vec<u8>)>,

  exhausted: bool,
  released: bool,
}

impl RangeIterator {
  pub(crate) fn new(source: KeyMap, start: Option<&[u8]>, prefix: Option<&[u8]>) -> Self {
    let cursor = match (prefix, start) {
      (Some(p), _) => Bound::Included(p.to_vec()),
      (None, Some(s)) => Bound::Included(s.to_vec()),
      (None, None) => Bound::Unbounded,
    };

    Self {
      source,
      cursor,
      prefix: prefix.map(|p| p.to_vec()),
      buffer: VecDeque::new(),
      current: None,
      exhausted: false,
      released: false,
    }
  }

  fn refill(&mut self) {
    let map = self.source.read();

    let lower = match &self.cursor {
      Bound::Included(k) => Bound::Included(k.as_slice()),
      Bound::Excluded(k) => Bound::Excluded(k.as_slice()),
      Bound::Unbounded => Bound::Unbounded,
    };

    let mut copied = 0;
    for (key, value) in map.range::<[u8], _>((lower, Bound::Unbounded)) {
      if copied == REFILL_CHUNK {
        break;
      }

      if let Some(prefix) = &self.prefix {
        if !key.starts_with(prefix) {
          // Keys are ordered, nothing past here can match.
          self.exhausted = true;
          break;
        }
      }

      self.buffer.push_back((key.clone(), value.clone()));
      copied += 1;
    }

    if copied < REFILL_CHUNK {
      self.exhausted = true;
    }

    if let Some((last, _)) = self.buffer.back() {
      self.cursor = Bound::Excluded(last.clone());
    }
  }
}

impl DbIterator for RangeIterator {
  fn next(&mut self) -> bool {
    if self.released {
      return false;
    }

    loop {
      if let Some(pair) = self.buffer.pop_front() {
        self.current = Some(pair);
        return true;
      }

      if self.exhausted {
        self.current = None;
        return false;
      }

      self.refill();
    }
  }

  fn error(&self) -> Option<Error> {
    None
  }

  fn key(&self) -> &[u8] {
    self.current.as_ref().map(|(k, _)| k.as_slice()).unwrap_or(&[])
  }

  fn value(&self) -> &[u8] {
    self.current.as_ref().map(|(_, v)| v.as_slice()).unwrap_or(&[])
  }

  fn release(&mut self) {
    self.released = true;
    self.buffer.clear();
    self.current = None;
  }
}

//! ShardedBatch integration tests

#[path = "../common/mod.rs"]
mod common;

use common::{FaultyDatabase, TestEnv, faulty_sharded};
use ironshard::{Batch, Database, Error};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

#[test]
fn test_batch_commits_all_shards() {
  let env = TestEnv::memory(4);
  let mut batch = env.db.new_batch();

  for first in 0..64u8 {
    batch.put(&[first, 0xEE], &[first; 4]).unwrap();
  }
  batch.write().unwrap();

  for first in 0..64u8 {
    assert_eq!(env.db.get(&[first, 0xEE]).unwrap(), vec![first; 4]);
  }
}

#[test]
fn test_partial_failure_reports_failed_shard() {
  let (db, handles) = faulty_sharded(4, |i| FaultyDatabase::new(format!("/f/{}", i)));
  handles[2].fail_batch_writes(true);

  let mut batch = db.new_sharded_batch();
  for first in 0..4u8 {
    batch.put(&[first], b"value").unwrap();
  }

  let err = batch.write().unwrap_err();
  match &err {
    Error::PartialCommit { failed, source } => {
      assert_eq!(failed, &vec![2]);
      assert!(matches!(**source, Error::Corruption(_)));
    }
    other => panic!("expected PartialCommit, got {:?}", other),
  }
  assert!(matches!(err.root(), Error::Corruption(_)));

  // Healthy shards keep their writes
  for first in [0u8, 1, 3] {
    assert_eq!(db.get(&[first]).unwrap(), b"value");
  }
  assert!(matches!(db.get(&[2]), Err(Error::NotFound)));
}

#[test]
fn test_all_shards_failing_lists_every_index() {
  let (db, handles) = faulty_sharded(4, |i| FaultyDatabase::new(format!("/f/{}", i)));
  for h in &handles {
    h.fail_batch_writes(true);
  }

  let mut batch = db.new_batch();
  batch.put(b"\x00k", b"v").unwrap();

  match batch.write() {
    Err(Error::PartialCommit { failed, .. }) => assert_eq!(failed, vec![0, 1, 2, 3]),
    other => panic!("expected PartialCommit, got {:?}", other),
  }
}

#[test]
fn test_retry_after_failure_succeeds() {
  let (db, handles) = faulty_sharded(2, |i| FaultyDatabase::new(format!("/f/{}", i)));
  handles[1].fail_batch_writes(true);

  let mut batch = db.new_batch();
  batch.put(b"\x00a", b"1").unwrap();
  batch.put(b"\x01b", b"2").unwrap();
  assert!(batch.write().is_err());

  // The sub-batches came back from the workers intact
  handles[1].fail_batch_writes(false);
  batch.write().unwrap();
  assert_eq!(db.get(b"\x01b").unwrap(), b"2");
}

#[test]
fn test_panicking_backend_does_not_exhaust_pool() {
  let (db, handles) = faulty_sharded(1, |i| FaultyDatabase::new(format!("/f/{}", i)));
  handles[0].panic_batch_writes(true);
  let db = Arc::new(db);

  // Run the writes on a helper thread so a stuck pool fails the test
  // instead of hanging it.
  let (done_tx, done_rx) = crossbeam_channel::bounded(1);
  {
    let db = db.clone();
    thread::spawn(move || {
      let mut outcomes = Vec::new();
      for _ in 0..3 {
        let mut batch = db.new_batch();
        batch.put(b"\x00k", b"v").unwrap();
        outcomes.push(batch.write());
      }
      done_tx.send(outcomes).unwrap();
    });
  }

  let outcomes = done_rx.recv_timeout(Duration::from_secs(5)).expect("batch write hung");
  for outcome in outcomes {
    match outcome {
      Err(Error::PartialCommit { failed, source }) => {
        assert_eq!(failed, vec![0]);
        assert!(matches!(*source, Error::WorkerLost(0)));
      }
      other => panic!("expected PartialCommit, got {:?}", other),
    }
  }

  // The pool still serves healthy writes
  handles[0].panic_batch_writes(false);
  let mut batch = db.new_batch();
  batch.put(b"\x00k", b"v").unwrap();
  batch.write().unwrap();
  assert_eq!(db.get(b"\x00k").unwrap(), b"v");
}

#[test]
fn test_empty_write_is_noop() {
  let (db, handles) = faulty_sharded(4, |i| FaultyDatabase::new(format!("/f/{}", i)));
  for h in &handles {
    h.fail_batch_writes(true);
  }

  // Nothing buffered: the failing shards are never asked to commit
  let mut batch = db.new_batch();
  assert_eq!(batch.value_size(), 0);
  batch.write().unwrap();
}

#[test]
fn test_value_size_tracks_largest_shard() {
  let env = TestEnv::memory(4);
  let mut batch = env.db.new_sharded_batch();

  batch.put(&[0x00], &[0u8; 100]).unwrap();
  batch.put(&[0x01], &[0u8; 10]).unwrap();
  batch.put(&[0x05], &[0u8; 10]).unwrap();
  assert_eq!(batch.value_size(), 101);

  batch.reset();
  assert_eq!(batch.value_size(), 0);
  assert_eq!(batch.shard_sizes(), vec![0; 4]);
}

#[test]
fn test_reset_then_reuse() {
  let env = TestEnv::memory(2);
  let mut batch = env.db.new_batch();

  batch.put(b"\x00first", b"1").unwrap();
  batch.write().unwrap();
  batch.reset();

  batch.put(b"\x01second", b"2").unwrap();
  batch.write().unwrap();

  assert_eq!(env.db.get(b"\x00first").unwrap(), b"1");
  assert_eq!(env.db.get(b"\x01second").unwrap(), b"2");
}

#[test]
fn test_write_after_close_fails() {
  let env = TestEnv::memory(4);
  let mut batch = env.db.new_batch();
  batch.put(b"\x00k", b"v").unwrap();

  env.db.close();
  assert!(matches!(batch.write(), Err(Error::Closed)));
}

#[test]
fn test_log_batch_survives_restart() {
  let env = TestEnv::log(4);
  let mut batch = env.db.new_batch();
  for first in 0..32u8 {
    batch.put(&[first, 7], &[first]).unwrap();
  }
  batch.write().unwrap();
  env.db.close();

  let reopened = ironshard::sharded::ShardedDatabase::new(
    &ironshard::DbConfig::new(&env.root, ironshard::DbType::Log),
    4,
  )
  .unwrap();
  for first in 0..32u8 {
    assert_eq!(reopened.get(&[first, 7]).unwrap(), vec![first]);
  }
  reopened.close();
}

//! Basic ShardedDatabase integration tests

#[path = "../common/mod.rs"]
mod common;

use common::{FaultyDatabase, TestEnv, collect, faulty_sharded};
use ironshard::sharded::{ShardedDatabase, shard_index};
use ironshard::{Database, DbConfig, DbType, Error, MAX_SHARDS, MemoryDatabase, ShardCount};
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::TempDir;

#[test]
fn test_round_trip_every_first_byte() {
  for n in [1, 2, 4, 8, 16] {
    let env = TestEnv::memory(n);

    for first in 0..=255u8 {
      let key = [first, 0x42];
      env.db.put(&key, &[first]).unwrap();
    }

    for first in 0..=255u8 {
      let key = [first, 0x42];
      assert_eq!(env.db.get(&key).unwrap(), vec![first]);
      assert!(env.db.has(&key).unwrap());
    }
  }
}

#[test]
fn test_key_lands_in_routed_shard_only() {
  let env = TestEnv::memory(8);
  let sc = ShardCount::new(8).unwrap();

  env.db.put(b"\x0Dkey", b"value").unwrap();
  let owner = shard_index(b"\x0Dkey", sc).unwrap();
  assert_eq!(owner, 5);

  for i in 0..8 {
    let found = env.db.shard(i).unwrap().has(b"\x0Dkey").unwrap();
    assert_eq!(found, i == owner, "shard {}", i);
  }
}

#[test]
fn test_get_missing_and_delete() {
  let env = TestEnv::memory(4);

  assert!(matches!(env.db.get(b"absent"), Err(Error::NotFound)));
  assert!(!env.db.has(b"absent").unwrap());

  env.db.put(b"k", b"v").unwrap();
  env.db.delete(b"k").unwrap();
  assert!(matches!(env.db.get(b"k"), Err(Error::NotFound)));
}

#[test]
fn test_empty_key_rejected_everywhere() {
  let env = TestEnv::memory(4);

  assert!(matches!(env.db.put(b"", b"v"), Err(Error::EmptyKey)));
  assert!(matches!(env.db.get(b""), Err(Error::EmptyKey)));
  assert!(matches!(env.db.has(b""), Err(Error::EmptyKey)));
  assert!(matches!(env.db.delete(b""), Err(Error::EmptyKey)));
}

#[test]
fn test_invalid_shard_counts() {
  let dir = TempDir::new().unwrap();
  let config = DbConfig::new(dir.path(), DbType::Memory);

  for n in [0, 3, 6, MAX_SHARDS + 1, 32] {
    let res = ShardedDatabase::new(&config, n);
    assert!(matches!(res, Err(Error::Config(_))), "shard count {} accepted", n);
  }
}

#[test]
fn test_nested_sharding_rejected() {
  let config = DbConfig::new("/unused", DbType::Sharded);
  assert!(matches!(ShardedDatabase::new(&config, 4), Err(Error::Config(_))));
}

#[test]
fn test_shard_configs_are_derived() {
  let dir = TempDir::new().unwrap();
  let config = DbConfig {
    cache_size_mb: 256,
    ..DbConfig::new(dir.path(), DbType::Memory)
  };

  let mut seen = Vec::new();
  let db = ShardedDatabase::with_opener(&config, 4, |shard_cfg| {
    seen.push((shard_cfg.dir.clone(), shard_cfg.cache_size_mb));
    Ok(Arc::new(MemoryDatabase::new(shard_cfg.dir.clone())) as Arc<dyn Database>)
  })
  .unwrap();

  let expected: Vec<(PathBuf, usize)> = (0..4).map(|i| (dir.path().join(i.to_string()), 64)).collect();
  assert_eq!(seen, expected);
  assert_eq!(db.shard_count(), 4);
  assert_eq!(db.path(), dir.path());
  assert_eq!(db.db_type(), DbType::Sharded);
}

#[test]
fn test_open_failure_closes_opened_shards() {
  let opened: std::sync::Mutex<Vec<Arc<MemoryDatabase>>> = std::sync::Mutex::new(Vec::new());

  let res = ShardedDatabase::with_opener(&DbConfig::new("/fail", DbType::Memory), 4, |cfg| {
    if cfg.dir.ends_with("2") {
      return Err(Error::Config("injected open failure".into()));
    }
    let db = Arc::new(MemoryDatabase::new(cfg.dir.clone()));
    opened.lock().unwrap().push(db.clone());
    Ok(db as Arc<dyn Database>)
  });

  assert!(matches!(res, Err(Error::Config(_))));

  let opened = opened.into_inner().unwrap();
  assert_eq!(opened.len(), 2);
  for db in opened {
    assert!(matches!(db.put(b"k", b"v"), Err(Error::Closed)));
  }
}

#[test]
fn test_meter_names_shards() {
  let shards: Vec<Arc<MemoryDatabase>> = (0..4).map(|i| Arc::new(MemoryDatabase::new(format!("/m/{}", i)))).collect();
  let db = ShardedDatabase::from_shards("/m", shards.iter().map(|s| s.clone() as Arc<dyn Database>).collect()).unwrap();

  db.meter("chaindata/shard");

  for (i, shard) in shards.iter().enumerate() {
    assert_eq!(shard.meter_prefix().unwrap(), format!("chaindata/shard{}", i));
  }
}

#[test]
fn test_close_is_idempotent_and_final() {
  let (db, handles) = faulty_sharded(2, |i| FaultyDatabase::new(format!("/f/{}", i)));
  db.put(b"\x00k", b"v").unwrap();

  db.close();
  db.close();

  assert!(matches!(db.put(b"\x00k", b"v"), Err(Error::Closed)));
  assert!(matches!(db.get(b"\x00k"), Err(Error::Closed)));
  assert!(matches!(db.has(b"\x00k"), Err(Error::Closed)));
  assert!(matches!(db.delete(b"\x00k"), Err(Error::Closed)));

  // Shards are closed too
  for h in &handles {
    assert!(matches!(h.get(b"\x00k"), Err(Error::Closed)));
  }
}

#[test]
fn test_log_backend_survives_restart() {
  let dir = TempDir::new().unwrap();
  let config = DbConfig::new(dir.path(), DbType::Log);

  {
    let db = ShardedDatabase::new(&config, 4).unwrap();
    for first in 0..16u8 {
      db.put(&[first, 1], &[first; 8]).unwrap();
    }
    db.delete(&[3, 1]).unwrap();
    db.close();
  }

  for i in 0..4 {
    assert!(dir.path().join(i.to_string()).join(ironshard::LOG_FILENAME).exists());
  }

  let db = ShardedDatabase::new(&config, 4).unwrap();
  for first in 0..16u8 {
    if first == 3 {
      assert!(matches!(db.get(&[3, 1]), Err(Error::NotFound)));
    } else {
      assert_eq!(db.get(&[first, 1]).unwrap(), vec![first; 8]);
    }
  }

  let mut it = db.new_iterator();
  assert_eq!(collect(it.as_mut()).len(), 15);
  db.close();
}

//! Example: Using ShardedDatabase as a node's key-value store
//!
//! This example demonstrates:
//! - Opening a log-backed database split over 8 shards
//! - Point writes routed by the key's first byte
//! - Committing a batch across all shards
//! - Scanning all shards as one iterator and as parallel channels

use ironshard::sharded::{CancelContext, EndOfStream, ShardedDatabase};
use ironshard::{Batch, Database, DbConfig, DbIterator, DbType};

fn main() -> ironshard::Result<()> {
  tracing_subscriber::fmt().with_max_level(tracing::Level::DEBUG).init();

  println!("=== IronShard Example ===\n");

  let root = std::env::temp_dir().join("ironshard_example");
  let db = ShardedDatabase::new(&DbConfig::new(&root, DbType::Log), 8)?;
  println!("✓ Opened ShardedDatabase with {} shards at {:?}", db.shard_count(), root);

  // 1. Point writes
  println!("\n--- Writing Data ---");
  for i in 0..100u8 {
    let key = [i, b'h', b'd', b'r'];
    db.put(&key, format!("header_{}", i).as_bytes())?;
    if i < 3 {
      println!("  {:02x?} -> shard {}", key, db.shard_index(&key)?);
    }
  }
  println!("  ... (wrote 100 entries total)");

  // 2. A batch spanning every shard
  println!("\n--- Writing Batch ---");
  let mut batch = db.new_sharded_batch();
  for i in 0..100u8 {
    batch.put(&[i, b'b', b'd', b'y'], format!("body_{}", i).as_bytes())?;
  }
  println!("  sub-batch sizes: {:?}", batch.shard_sizes());
  batch.write()?;
  println!("✓ Committed batch of {} bytes (largest shard)", batch.value_size());

  // 3. One merged stream
  println!("\n--- Serial Scan ---");
  let mut it = db.new_iterator_with_prefix(&[0x05]);
  while it.next() {
    println!("  {:02x?} = {}", it.key(), String::from_utf8_lossy(it.value()));
  }
  it.release();

  let mut it = db.new_serial_iterator(EndOfStream::soft(), |shard| shard.new_iterator());
  let mut total = 0;
  while it.next() {
    total += 1;
  }
  it.release();
  println!("  soft end-of-stream scan saw {} entries", total);

  // 4. Parallel channels, one per shard
  println!("\n--- Channel Scan ---");
  let it = db.new_chan_iterator(&CancelContext::new(), |shard| shard.new_iterator());
  for (shard, rx) in it.channels().iter().enumerate() {
    println!("  shard {}: {} entries", shard, rx.iter().count());
  }
  it.release();

  db.close();
  println!("\n✓ Closed");
  Ok(())
}

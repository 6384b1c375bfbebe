//! Trie-node cache selection.
//!
//! The storage core only consumes a `TrieNodeCache`; this module picks the
//! concrete cache from configuration. A local cache is built in-process. A
//! remote cache is produced by a caller-supplied `RemoteConnector`, and a
//! hybrid cache layers the local cache in front of the remote one.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use lru::LruCache;
use parking_lot::Mutex;
use tracing::{error, info, warn};

use crate::error::{Error, Result};

/// A key-value cache for trie nodes.
pub trait TrieNodeCache: Send + Sync {
  fn set(&self, key: &[u8], value: &[u8]);

  fn get(&self, key: &[u8]) -> Option<Vec<u8>>;

  /// Returns the cached value together with whether it was present.
  fn has(&self, key: &[u8]) -> (Option<Vec<u8>>, bool);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheType {
  /// In-process LRU cache.
  Local,
  /// Networked cache reached through a `RemoteConnector`.
  Remote,
  /// Local cache in front of a remote one.
  Hybrid,
}

impl CacheType {
  pub const ALL: [CacheType; 3] = [CacheType::Local, CacheType::Remote, CacheType::Hybrid];

  pub fn as_str(&self) -> &'static str {
    match self {
      CacheType::Local => "LocalCache",
      CacheType::Remote => "RemoteCache",
      CacheType::Hybrid => "HybridCache",
    }
  }
}

impl fmt::Display for CacheType {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for CacheType {
  type Err = Error;

  /// Case-insensitive match against the canonical names.
  fn from_str(s: &str) -> Result<Self> {
    for valid in CacheType::ALL {
      if s.eq_ignore_ascii_case(valid.as_str()) {
        return Ok(valid);
      }
    }
    warn!(target: "ironshard::cache", "Invalid trie node cache type: {:?}, valid types: {:?}", s, CacheType::ALL);
    Err(Error::UnsupportedCacheType(s.to_string()))
  }
}

#[derive(Debug, Clone)]
pub struct CacheConfig {
  pub cache_type: CacheType,

  /// Memory allowance (MB) of the local cache. Zero disables it.
  pub local_cache_size_mb: usize,

  /// Endpoints of the remote cache.
  pub remote_endpoints: Vec<String>,

  /// Whether the remote cache runs in cluster mode.
  pub remote_cluster_enabled: bool,
}

impl Default for CacheConfig {
  /// A local cache with no memory, i.e. no cache at all.
  fn default() -> Self {
    Self {
      cache_type: CacheType::Local,
      local_cache_size_mb: 0,
      remote_endpoints: Vec::new(),
      remote_cluster_enabled: false,
    }
  }
}

/// Opens connections to a remote cache.
pub trait RemoteConnector {
  fn connect(&self, endpoints: &[String], cluster_enabled: bool) -> Result<Arc<dyn TrieNodeCache>>;
}

struct LocalState {
  entries: LruCache<Vec<u8>, Vec<u8>>,
  used_bytes: usize,
}

/// A byte-budgeted LRU cache.
pub struct LocalCache {
  capacity_bytes: usize,
  state: Mutex<LocalState>,
}

impl LocalCache {
  pub fn new(capacity_bytes: usize) -> Self {
    Self {
      capacity_bytes,
      state: Mutex::new(LocalState {
        entries: LruCache::unbounded(),
        used_bytes: 0,
      }),
    }
  }

  pub fn with_size_mb(size_mb: usize) -> Self {
    Self::new(size_mb * 1024 * 1024)
  }

  pub fn used_bytes(&self) -> usize {
    self.state.lock().used_bytes
  }

  pub fn len(&self) -> usize {
    self.state.lock().entries.len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }
}

impl TrieNodeCache for LocalCache {
  fn set(&self, key: &[u8], value: &[u8]) {
    let cost = key.len() + value.len();
    if cost > self.capacity_bytes {
      return;
    }

    let mut state = self.state.lock();
    if let Some(old) = state.entries.put(key.to_vec(), value.to_vec()) {
      state.used_bytes -= key.len() + old.len();
    }
    state.used_bytes += cost;

    while state.used_bytes > self.capacity_bytes {
      match state.entries.pop_lru() {
        Some((k, v)) => state.used_bytes -= k.len() + v.len(),
        None => break,
      }
    }
  }

  fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
    self.state.lock().entries.get(key).cloned()
  }

  fn has(&self, key: &[u8]) -> (Option<Vec<u8>>, bool) {
    let value = self.get(key);
    let found = value.is_some();
    (value, found)
  }
}

/// Reads through the local cache to the remote one; writes go to both.
pub struct HybridCache {
  local: Arc<dyn TrieNodeCache>,
  remote: Arc<dyn TrieNodeCache>,
}

impl HybridCache {
  pub fn new(local: Arc<dyn TrieNodeCache>, remote: Arc<dyn TrieNodeCache>) -> Self {
    Self { local, remote }
  }
}

impl TrieNodeCache for HybridCache {
  fn set(&self, key: &[u8], value: &[u8]) {
    self.local.set(key, value);
    self.remote.set(key, value);
  }

  fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
    if let Some(value) = self.local.get(key) {
      return Some(value);
    }

    let value = self.remote.get(key)?;
    self.local.set(key, &value);
    Some(value)
  }

  fn has(&self, key: &[u8]) -> (Option<Vec<u8>>, bool) {
    let value = self.get(key);
    let found = value.is_some();
    (value, found)
  }
}

/// Builds the cache described by `config`.
///
/// Returns `Ok(None)` for a local cache with a zero size budget.
/// Remote and hybrid caches need a `connector`.
pub fn new_trie_node_cache(
  config: &CacheConfig,
  connector: Option<&dyn RemoteConnector>,
) -> Result<Option<Arc<dyn TrieNodeCache>>> {
  match config.cache_type {
    CacheType::Local => {
      if config.local_cache_size_mb == 0 {
        return Ok(None);
      }
      Ok(Some(Arc::new(LocalCache::with_size_mb(config.local_cache_size_mb))))
    }
    CacheType::Remote => {
      let remote = connect_remote(config, connector)?;
      Ok(Some(remote))
    }
    CacheType::Hybrid => {
      info!(target: "ironshard::cache", "Set hybrid trie node cache using both of local cache and remote cache");
      let remote = connect_remote(config, connector)?;
      let local = Arc::new(LocalCache::with_size_mb(config.local_cache_size_mb));
      Ok(Some(Arc::new(HybridCache::new(local, remote))))
    }
  }
}

fn connect_remote(config: &CacheConfig, connector: Option<&dyn RemoteConnector>) -> Result<Arc<dyn TrieNodeCache>> {
  match connector {
    Some(c) => c.connect(&config.remote_endpoints, config.remote_cluster_enabled),
    None => {
      error!(target: "ironshard::cache", "No remote connector for trie node cache type {}", config.cache_type);
      Err(Error::UnsupportedCacheType(config.cache_type.to_string()))
    }
  }
}

//! Generic LRU pool for cached MCP sessions, keyed per `(UserId, McpName)`
//! (spec §4.5: "MCP sessions are per-user, per-MCP").

use std::num::NonZeroUsize;
use std::sync::Arc;

use conductor_workflow::{McpName, UserId};
use lru::LruCache;
use parking_lot::Mutex;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PoolKey {
    pub user: UserId,
    pub mcp: McpName,
}

impl PoolKey {
    pub fn new(user: UserId, mcp: McpName) -> Self {
        Self { user, mcp }
    }
}

/// Thread-safe LRU cache of live sessions. Holds the pool-wide lock only
/// long enough to clone an `Arc` out or insert one — callers never await
/// while holding it.
pub struct SessionPool<T> {
    entries: Mutex<LruCache<PoolKey, Arc<T>>>,
}

impl<T> SessionPool<T> {
    pub fn with_capacity(max_entries: usize) -> Self {
        let cap = NonZeroUsize::new(max_entries).unwrap_or(NonZeroUsize::new(1).unwrap());
        Self { entries: Mutex::new(LruCache::new(cap)) }
    }

    pub fn get(&self, key: &PoolKey) -> Option<Arc<T>> {
        self.entries.lock().get(key).cloned()
    }

    pub fn insert(&self, key: PoolKey, value: Arc<T>) {
        self.entries.lock().put(key, value);
    }

    pub fn remove(&self, key: &PoolKey) -> Option<Arc<T>> {
        self.entries.lock().pop(key)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, key: &PoolKey) -> bool {
        self.entries.lock().contains(key)
    }
}

use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

use doeff_core::impl_effect;

use super::FAMILY_CACHE;

/// Where a cache entry should live. The default `Memory` hint is all `doeff-processor`
/// actually backs; `Disk`/`Distributed` are accepted so adapters built on top of the core can
/// interpret them, matching spec.md §6 ("optional cache-plane effects").
#[derive(Debug, Copy, Clone, Eq, PartialEq, Default)]
pub enum StorageHint {
    #[default]
    Memory,
    Disk,
    Distributed,
}

/// How long a cache entry should be considered valid for.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Default)]
pub enum Lifecycle {
    /// Lives only for the current top-level run.
    #[default]
    Session,
    /// Survives across runs sharing the same store (meaningful once a caller persists it).
    Persistent,
    /// Evicted eagerly once its TTL elapses, regardless of lifecycle.
    Temporary,
}

#[derive(Debug, Copy, Clone, Default)]
pub struct CachePolicy {
    pub ttl: Option<Duration>,
    pub lifecycle: Lifecycle,
    pub storage: StorageHint,
}

/// Reads `key` from the cache; a miss raises `ExecutionError::CacheMiss` (spec.md §6, §7).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheGet {
    pub key: String,
}

impl CacheGet {
    pub fn new(key: impl Into<String>) -> Self {
        CacheGet { key: key.into() }
    }
}

impl_effect!(CacheGet, family = FAMILY_CACHE);

/// Writes `value` into the cache under `key` with `policy`.
pub struct CachePut {
    pub key: String,
    pub value: Arc<dyn Any + Send + Sync>,
    pub policy: CachePolicy,
}

impl std::fmt::Debug for CachePut {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CachePut").field("key", &self.key).field("policy", &self.policy).finish()
    }
}

impl CachePut {
    pub fn new<T: Send + Sync + 'static>(key: impl Into<String>, value: T, policy: CachePolicy) -> Self {
        CachePut { key: key.into(), value: Arc::new(value), policy }
    }
}

impl_effect!(CachePut, family = FAMILY_CACHE);

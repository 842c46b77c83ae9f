use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::errors::ExecutionError;

/// A single mutable slot value in the [`Store`].
pub type Slot = Arc<dyn Any + Send + Sync>;

/// The mutable, keyed store shared across every task of one top-level run (spec.md §3, §4.2).
///
/// Held behind a [`parking_lot::RwLock`] rather than a bare `RefCell`: although only the
/// currently running task ever writes (the scheduler is strictly cooperative and
/// single-threaded), the synchronous runner's background bridge thread
/// (`crate::runner::sync_run`) reads and writes the store from outside the stepping loop
/// while an `Await` is in flight, so the store must be `Send + Sync`.
#[derive(Clone, Default)]
pub struct Store {
    inner: Arc<RwLock<HashMap<String, Slot>>>,
}

impl Store {
    pub fn new() -> Self {
        Store { inner: Arc::new(RwLock::new(HashMap::new())) }
    }

    /// Returns a deep (slot-level) snapshot copy of this store, for `Spawn`'s snapshot
    /// semantics: the child task sees a copy that does not alias the parent's slots.
    pub fn snapshot(&self) -> Store {
        let map = self.inner.read().clone();
        Store { inner: Arc::new(RwLock::new(map)) }
    }

    pub fn get_raw(&self, key: &str) -> Option<Slot> {
        self.inner.read().get(key).cloned()
    }

    pub fn get<T: Send + Sync + 'static>(&self, key: &str) -> Result<T, ExecutionError>
    where
        T: Clone,
    {
        let slot = self
            .get_raw(key)
            .ok_or_else(|| ExecutionError::MissingStateKey { key: key.to_string() })?;
        slot.downcast_ref::<T>()
            .cloned()
            .ok_or_else(|| ExecutionError::MissingStateKey { key: key.to_string() })
    }

    pub fn put_raw(&self, key: impl Into<String>, value: Slot) {
        self.inner.write().insert(key.into(), value);
    }

    pub fn put<T: Send + Sync + 'static>(&self, key: impl Into<String>, value: T) {
        self.put_raw(key, Arc::new(value));
    }

    /// Atomically replaces the slot at `key` via `updater`. If `updater` returns `Err`, the
    /// slot is left unchanged (spec.md §4.2, §4.6 `Modify`).
    pub fn modify<T, E>(
        &self,
        key: &str,
        updater: impl FnOnce(Option<&T>) -> Result<T, E>,
    ) -> Result<T, E>
    where
        T: Clone + Send + Sync + 'static,
    {
        let mut guard = self.inner.write();
        let current = guard.get(key).and_then(|slot| slot.downcast_ref::<T>());
        let next = updater(current)?;
        guard.insert(key.to_string(), Arc::new(next.clone()));
        Ok(next)
    }

    /// The fallible, type-erased counterpart of [`Store::modify`], for callers (the `Modify`
    /// effect's intrinsic handling) that only have a type-erased updater closure to drive.
    /// Leaves the slot untouched if `updater` returns `Err`.
    pub fn modify_raw<E>(
        &self,
        key: &str,
        updater: impl FnOnce(Option<&dyn Any>) -> Result<Box<dyn Any + Send + Sync>, E>,
    ) -> Result<Slot, E> {
        let mut guard = self.inner.write();
        let current = guard.get(key).map(|s| s.as_ref() as &dyn Any);
        let next: Slot = Arc::from(updater(current)?);
        guard.insert(key.to_string(), next.clone());
        Ok(next)
    }

    /// An atomic get-and-update primitive usable by the concurrency primitives directly on
    /// the raw slot, without requiring the caller to know `T`'s concrete type up front.
    pub fn get_and_update_raw(
        &self,
        key: &str,
        updater: impl FnOnce(Option<Slot>) -> Slot,
    ) -> Slot {
        let mut guard = self.inner.write();
        let current = guard.get(key).cloned();
        let next = updater(current);
        guard.insert(key.to_string(), next.clone());
        next
    }

    pub fn remove(&self, key: &str) -> Option<Slot> {
        self.inner.write().remove(key)
    }
}

use std::any::Any;
use std::sync::Arc;

use doeff_core::impl_effect;

use super::FAMILY_STATE;

/// Reads the store slot at `key` (spec.md §6). Missing key raises
/// `ExecutionError::MissingStateKey`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Get {
    pub key: String,
}

impl Get {
    pub fn new(key: impl Into<String>) -> Self {
        Get { key: key.into() }
    }
}

impl_effect!(Get, family = FAMILY_STATE);

/// Writes `value` into the store slot at `key`, unconditionally.
pub struct Put {
    pub key: String,
    pub value: Arc<dyn Any + Send + Sync>,
}

impl std::fmt::Debug for Put {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Put").field("key", &self.key).finish()
    }
}

impl Put {
    pub fn new<T: Send + Sync + 'static>(key: impl Into<String>, value: T) -> Self {
        Put { key: key.into(), value: Arc::new(value) }
    }
}

impl_effect!(Put, family = FAMILY_STATE);

type Updater = Box<dyn FnOnce(Option<&dyn Any>) -> Result<Box<dyn Any + Send + Sync>, crate::errors::ExecutionError> + Send>;

/// Atomically replaces the slot at `key` via `updater`; the slot is left unchanged if
/// `updater` fails (spec.md §4.2).
///
/// `updater` is a take-once cell: effects travel through dispatch as `Arc<dyn Effect>` (so
/// `Delegate` can re-offer the same payload), which only grants shared access.
pub struct Modify {
    pub key: String,
    updater: parking_lot::Mutex<Option<Updater>>,
}

impl Modify {
    pub fn new(key: impl Into<String>, updater: Updater) -> Self {
        Modify { key: key.into(), updater: parking_lot::Mutex::new(Some(updater)) }
    }

    pub fn take_updater(&self) -> Option<Updater> {
        self.updater.lock().take()
    }
}

impl std::fmt::Debug for Modify {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Modify").field("key", &self.key).finish()
    }
}

impl_effect!(Modify, family = FAMILY_STATE);

/// Runs `body`, turning a raised error into `Ok(Err(e))` instead of propagating it further
/// (spec.md §6, §7 "User errors").
pub struct Safe {
    body: parking_lot::Mutex<Option<doeff_core::AnyProgram>>,
}

impl Safe {
    pub fn new(body: doeff_core::AnyProgram) -> Self {
        Safe { body: parking_lot::Mutex::new(Some(body)) }
    }

    pub fn take_body(&self) -> Option<doeff_core::AnyProgram> {
        self.body.lock().take()
    }
}

impl std::fmt::Debug for Safe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Safe").finish()
    }
}

impl_effect!(Safe, family = FAMILY_STATE);

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

use doeff_core::impl_effect;

use super::FAMILY_WRITER;

/// One entry in the bounded writer log (spec.md §4.2, §6).
#[derive(Debug, Clone)]
pub struct LogEntry {
    pub value: Option<Arc<dyn Any + Send + Sync>>,
    pub fields: HashMap<String, Arc<dyn Any + Send + Sync>>,
}

/// Appends `value` to the writer log.
pub struct Tell {
    pub value: Arc<dyn Any + Send + Sync>,
}

impl std::fmt::Debug for Tell {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tell").finish()
    }
}

impl Tell {
    pub fn new<T: Send + Sync + 'static>(value: T) -> Self {
        Tell { value: Arc::new(value) }
    }
}

impl_effect!(Tell, family = FAMILY_WRITER);

/// Appends a structured key/value entry to the writer log.
pub struct StructuredLog {
    pub fields: HashMap<String, Arc<dyn Any + Send + Sync>>,
}

impl std::fmt::Debug for StructuredLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StructuredLog").field("fields", &self.fields.keys().collect::<Vec<_>>()).finish()
    }
}

impl_effect!(StructuredLog, family = FAMILY_WRITER);

/// Runs `body`, capturing every writer entry it produces into a local buffer that is returned
/// alongside the body's value, while still forwarding each entry to the outer log (spec.md §9:
/// "implementations must not drop inner logs").
pub struct Listen {
    body: parking_lot::Mutex<Option<doeff_core::AnyProgram>>,
}

impl Listen {
    pub fn new(body: doeff_core::AnyProgram) -> Self {
        Listen { body: parking_lot::Mutex::new(Some(body)) }
    }

    pub fn take_body(&self) -> Option<doeff_core::AnyProgram> {
        self.body.lock().take()
    }
}

impl std::fmt::Debug for Listen {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Listen").finish()
    }
}

impl_effect!(Listen, family = FAMILY_WRITER);

/// The value produced by a completed `Listen`: the body's own result paired with everything it
/// (and anything it spawned into the same buffer scope) told the writer.
pub struct ListenResult<T> {
    pub value: T,
    pub entries: Vec<LogEntry>,
}

impl<T: std::fmt::Debug> std::fmt::Debug for ListenResult<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenResult").field("value", &self.value).field("entries", &self.entries.len()).finish()
    }
}

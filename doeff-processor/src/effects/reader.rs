use doeff_core::impl_effect;

use super::FAMILY_READER;

/// Reads `key` from the current environment (spec.md §6). Missing key raises
/// `ExecutionError::MissingEnvKey`; a binding that is a lazy program is evaluated once per run
/// and memoised.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ask {
    pub key: String,
}

impl Ask {
    pub fn new(key: impl Into<String>) -> Self {
        Ask { key: key.into() }
    }
}

impl_effect!(Ask, family = FAMILY_READER);

/// Overlays the environment with `overrides` for the duration of `body`, restoring the prior
/// environment on any exit path including error (spec.md §6, §7 "Environment and error").
///
/// `body` is a take-once cell rather than a bare field: the effect travels through dispatch as
/// `Arc<dyn Effect>` (so `Delegate` can re-offer the same payload to the next handler), which
/// only grants shared access, while driving the body still needs to move it out exactly once.
pub struct Local {
    pub overrides: std::collections::HashMap<String, crate::env::Binding>,
    body: parking_lot::Mutex<Option<doeff_core::AnyProgram>>,
}

impl Local {
    pub fn new(overrides: std::collections::HashMap<String, crate::env::Binding>, body: doeff_core::AnyProgram) -> Self {
        Local { overrides, body: parking_lot::Mutex::new(Some(body)) }
    }

    /// Takes the body out, if it hasn't been taken already.
    pub fn take_body(&self) -> Option<doeff_core::AnyProgram> {
        self.body.lock().take()
    }
}

impl std::fmt::Debug for Local {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Local").field("overrides", &self.overrides.keys().collect::<Vec<_>>()).finish()
    }
}

impl_effect!(Local, family = FAMILY_READER);

use std::collections::BTreeMap;
use std::fmt;

use doeff_core::{EffectFamily, HandlerSpec};

use crate::errors::ExecutionError;

// HANDLER REGISTRY
// ================================================================================================

/// A reusable set of handler installations, keyed by effect family, that can be re-installed
/// across runs without re-nesting `with_handler` calls by hand each time.
///
/// Grounded on the teacher's `EventHandlerRegistry` (`processor/src/host/handlers.rs`),
/// including its duplicate-registration and reserved-namespace rejection behavior. This is a
/// convenience on top of the Handler Protocol (spec.md §4.5), not a replacement for it: the
/// VM still dispatches purely by walking `Kontinuation` frames (spec.md §3 invariant, "there
/// is no module-global handler registry"). A `HandlerSet` is turned into a chain of
/// `with_handler` installations by [`HandlerSet::install_order`] at run-construction time.
#[derive(Default)]
pub struct HandlerSet {
    handlers: BTreeMap<&'static str, HandlerSpec>,
}

impl HandlerSet {
    pub fn new() -> Self {
        HandlerSet { handlers: BTreeMap::new() }
    }

    /// Registers `handler` for `family`.
    ///
    /// # Errors
    /// Returns [`HandlerError::ReservedFamily`] if `family` is one of the standard-effect
    /// families (`doeff`-prefixed), or [`HandlerError::DuplicateHandler`] if a handler is
    /// already registered for it.
    pub fn register(
        &mut self,
        family: EffectFamily,
        handler: HandlerSpec,
    ) -> Result<(), HandlerError> {
        if family.name().starts_with("doeff/") {
            return Err(HandlerError::ReservedFamily(family));
        }
        if self.handlers.contains_key(family.name()) {
            return Err(HandlerError::DuplicateHandler(family));
        }
        self.handlers.insert(family.name(), handler);
        Ok(())
    }

    /// Unregisters the handler for `family`, returning whether one was present.
    pub fn unregister(&mut self, family: EffectFamily) -> bool {
        self.handlers.remove(family.name()).is_some()
    }

    /// Returns the installations in the order they should be nested, outermost first, so
    /// that installing them via repeated `with_handler(..)` calls (innermost-applied-last)
    /// produces a stack whose dispatch order matches registration order.
    pub fn install_order(self) -> Vec<HandlerSpec> {
        self.handlers.into_values().collect()
    }
}

impl fmt::Debug for HandlerSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerSet").field("families", &self.handlers.keys().collect::<Vec<_>>()).finish()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    #[error("handler already registered for family {0:?}")]
    DuplicateHandler(EffectFamily),
    #[error("family {0:?} is reserved for a standard effect handler")]
    ReservedFamily(EffectFamily),
}

impl From<HandlerError> for ExecutionError {
    fn from(e: HandlerError) -> Self {
        ExecutionError::User(std::sync::Arc::new(e))
    }
}

//! Small shared helpers that don't belong to any one component.

use std::any::Any;
use std::sync::Arc;

use doeff_core::{AnyProgram, Generator, Node, Resumption, Yielded};

/// A one-shot generator that yields a single already-built [`Node`] and is then exhausted.
/// Mirrors `doeff_core::program`'s own private `SingleNode` (not exported, since ordinary
/// program authors reach `Node` only through `Program`'s combinators); `doeff-processor`
/// needs the same trick directly when it builds a `Node` the public combinators don't cover
/// (installing a `HandlerSet`'s handlers around a whole run, see `crate::runner`).
pub(crate) struct OneShotNode(Option<Node>);

impl OneShotNode {
    pub(crate) fn new(node: Node) -> AnyProgram {
        Box::new(OneShotNode(Some(node)))
    }
}

impl Generator for OneShotNode {
    fn resume(&mut self, _input: Resumption) -> Yielded {
        match self.0.take() {
            Some(node) => Yielded::Node(node),
            None => Yielded::Raised(doeff_core::CoreError::ProgramExhausted),
        }
    }
}

/// Downcasts an `Arc<dyn Any + Send>` into `Arc<T>`, returning the original Arc on mismatch.
///
/// The standard library only provides this for `Arc<dyn Any + Send + Sync>`
/// (`Arc<dyn Any>::downcast`); environment bindings are `Send`-only (spec.md §3 — `Env`
/// values never cross the synchronous runner's background bridge thread the way `Store`
/// slots do, so they carry no `Sync` bound). Mirrors the standard library's own
/// `Arc<dyn Any + Send + Sync>::downcast` implementation, just without the extra bound.
pub(crate) fn downcast_any_send<T: Any + Send>(
    arc: Arc<dyn Any + Send>,
) -> Result<Arc<T>, Arc<dyn Any + Send>> {
    if (*arc).is::<T>() {
        let ptr = Arc::into_raw(arc) as *const T;
        // SAFETY: `is::<T>()` just confirmed the concrete type behind the trait object is
        // `T`, so reinterpreting the raw pointer and reconstructing the `Arc` from it is
        // exactly what the checked `is` call licenses.
        Ok(unsafe { Arc::from_raw(ptr) })
    } else {
        Err(arc)
    }
}

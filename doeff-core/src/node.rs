use alloc::boxed::Box;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::fmt;

use crate::effect::{BoxedEffect, EffectFamily, EffectTag};
use crate::program::{AnyProgram, Program};

// TYPE FILTER
// ================================================================================================

/// The set of concrete effect types (or the "match everything" sentinel) a handler or
/// intercept was installed for.
///
/// Computed once, at `with_handler`/`with_intercept` construction time, from the handler's
/// declared formal parameter type (spec.md §4.5). The VM consults this before making any
/// call into the handler closure, so a handler whose filter excludes an effect costs nothing
/// beyond one set lookup.
#[derive(Clone, Debug, Default)]
pub enum TypeFilter {
    /// Matches every effect. Installed when a handler declares no concrete type, or a
    /// base/universal type.
    #[default]
    All,
    /// Matches only the listed concrete tags and/or families.
    Concrete { tags: Arc<[EffectTag]>, families: Arc<[EffectFamily]> },
}

impl TypeFilter {
    pub fn of_one<T: 'static>() -> Self {
        TypeFilter::Concrete { tags: Arc::from([EffectTag::of::<T>()]), families: Arc::from([]) }
    }

    pub fn of_tags(tags: impl Into<Arc<[EffectTag]>>) -> Self {
        TypeFilter::Concrete { tags: tags.into(), families: Arc::from([]) }
    }

    pub fn of_family(family: EffectFamily) -> Self {
        TypeFilter::Concrete { tags: Arc::from([]), families: Arc::from([family]) }
    }

    /// Returns whether this filter matches the given effect, honoring nominal subtyping: a
    /// filter naming a family matches every concrete effect declaring that family.
    pub fn matches(&self, effect: &dyn crate::Effect) -> bool {
        match self {
            TypeFilter::All => true,
            TypeFilter::Concrete { tags, families } => {
                if tags.iter().any(|t| *t == effect.tag()) {
                    return true;
                }
                match effect.family() {
                    Some(f) => families.iter().any(|g| *g == f),
                    None => false,
                }
            },
        }
    }
}

// INTERCEPT MODE
// ================================================================================================

/// How an installed [`Node::WithIntercept`] observer relates to the yields it sees.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum InterceptMode {
    /// The observer is invoked for its side effect only; the original yield proceeds
    /// unchanged.
    Observe,
    /// The observer's return value replaces the yielded object before normal processing
    /// continues.
    Transform,
}

// CAPTURED CONTINUATION
// ================================================================================================

/// A one-shot, opaque handle to a captured delimited continuation.
///
/// `doeff-core` only defines the handle; the K segment it refers to is owned by
/// `doeff-processor`. The handle is deliberately inert here — `Resume`/`Transfer` carry it as
/// cargo, and only the processor crate knows how to consume it.
pub struct CapturedK {
    pub(crate) id: u64,
}

impl CapturedK {
    /// Used only by `doeff-processor` to mint handles for newly captured segments.
    pub fn from_raw(id: u64) -> Self {
        CapturedK { id }
    }

    pub fn raw(&self) -> u64 {
        self.id
    }
}

impl fmt::Debug for CapturedK {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CapturedK").field("id", &self.id).finish()
    }
}

// CONTROL NODES
// ================================================================================================

/// A handler closure: given an effect and the captured continuation above the handler frame,
/// produces a further program to run in the current task.
pub type HandlerFn = Arc<dyn Fn(BoxedEffect, CapturedK) -> AnyProgram + Send + Sync>;

/// A return clause transforms a handler scope's final return value.
pub type ReturnClauseFn = Arc<dyn Fn(Box<dyn core::any::Any + Send>) -> AnyProgram + Send + Sync>;

/// A VM-level observer installed by `WithIntercept`.
pub type InterceptFn = Arc<dyn Fn(Yielded) -> Yielded + Send + Sync>;

/// One compiled handler installation, as carried by [`Node::WithHandler`].
#[derive(Clone)]
pub struct HandlerSpec {
    pub handler: HandlerFn,
    pub filter: TypeFilter,
    pub return_clause: Option<ReturnClauseFn>,
}

/// One compiled intercept installation, as carried by [`Node::WithIntercept`].
#[derive(Clone)]
pub struct InterceptSpec {
    pub observer: InterceptFn,
    pub filter: TypeFilter,
    pub mode: InterceptMode,
}

/// The closed instruction set the VM's control-node evaluator understands (spec.md §3, "the
/// instruction set"). Every variant here must be handled by `doeff-processor`'s step loop.
pub enum Node {
    /// Yield `v` with no effect.
    Pure(Box<dyn core::any::Any + Send>),
    /// Dispatch `effect` through the handler stack.
    Perform(BoxedEffect),
    /// Invoke a program-producing closure with already-evaluated arguments.
    Call(Box<dyn FnOnce() -> AnyProgram + Send>),
    /// Evaluate `expr` with `handlers` installed, innermost first.
    Eval { expr: AnyProgram, handlers: Vec<HandlerSpec> },
    /// Functor layering: evaluate `src`, then apply `f` to its value.
    Map {
        src: AnyProgram,
        f: Box<dyn FnOnce(Box<dyn core::any::Any + Send>) -> Box<dyn core::any::Any + Send> + Send>,
    },
    /// Monad layering: evaluate `src`, then step `f(v)`.
    FlatMap {
        src: AnyProgram,
        f: Box<dyn FnOnce(Box<dyn core::any::Any + Send>) -> AnyProgram + Send>,
    },
    /// Install `handler` over `body`.
    WithHandler { handler: HandlerSpec, body: AnyProgram },
    /// Install a VM-level observer over `body`.
    WithIntercept { intercept: InterceptSpec, body: AnyProgram },
    /// Resume a captured one-shot continuation with value `v`.
    Resume { k: CapturedK, v: Box<dyn core::any::Any + Send> },
    /// Pass the current effect to the next outer matching handler.
    Delegate,
    /// Non-local jump: replace the current K with `k` and continue with value `v`.
    Transfer { k: CapturedK, v: Box<dyn core::any::Any + Send> },
    /// Fast "not my effect" result; semantically equal to `Delegate` with no dispatch setup.
    Pass,
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Node::Pure(_) => "Pure",
            Node::Perform(_) => "Perform",
            Node::Call(_) => "Call",
            Node::Eval { .. } => "Eval",
            Node::Map { .. } => "Map",
            Node::FlatMap { .. } => "FlatMap",
            Node::WithHandler { .. } => "WithHandler",
            Node::WithIntercept { .. } => "WithIntercept",
            Node::Resume { .. } => "Resume",
            Node::Delegate => "Delegate",
            Node::Transfer { .. } => "Transfer",
            Node::Pass => "Pass",
        };
        f.write_str(name)
    }
}

/// What a program producer yields on a single step: either a control node, an effect payload
/// treated as `Perform(effect)` (spec.md §4.4 step 2), a final return, or a raised error.
///
/// This is also the payload type `WithIntercept` observers see and may transform.
pub enum Yielded {
    Node(Node),
    Effect(BoxedEffect),
    Return(Box<dyn core::any::Any + Send>),
    Raised(crate::error::CoreError),
}

impl From<Node> for Yielded {
    fn from(n: Node) -> Self {
        Yielded::Node(n)
    }
}

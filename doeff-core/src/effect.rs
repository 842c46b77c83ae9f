use alloc::sync::Arc;
use core::any::{Any, TypeId};
use core::fmt;

// EFFECT TAG
// ================================================================================================

/// Nominal type tag attached to every effect payload.
///
/// The VM never inspects an effect's fields; it dispatches purely on this tag. A tag also
/// carries an optional [`family`](Effect::family) tag so that handlers can be installed for
/// a whole group of effects that share a conceptual base (spec.md §9, "deep / multiple
/// inheritance in effect hierarchies" — modeled here as tagged variant families, since Rust
/// has no type-level inheritance to reflect on).
#[derive(Copy, Clone, Eq, PartialEq, Hash)]
pub struct EffectTag {
    type_id: TypeId,
    name: &'static str,
}

impl EffectTag {
    /// Returns the tag for a concrete effect type `T`.
    pub fn of<T: 'static>() -> Self {
        EffectTag { type_id: TypeId::of::<T>(), name: core::any::type_name::<T>() }
    }

    /// A human-readable name for diagnostics. Not used for dispatch.
    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl fmt::Debug for EffectTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("EffectTag").field(&self.name).finish()
    }
}

/// A family tag groups several concrete effect types under one nominal base, e.g. "every
/// writer-category effect". Handler type filters may match on a family instead of (or in
/// addition to) individual concrete tags.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub struct EffectFamily(&'static str);

impl EffectFamily {
    pub const fn new(name: &'static str) -> Self {
        EffectFamily(name)
    }

    pub fn name(&self) -> &'static str {
        self.0
    }
}

// EFFECT TRAIT
// ================================================================================================

/// An opaque, user-defined effect payload.
///
/// Implementors are plain data records; the VM does not interpret their fields. Equality is
/// by value and is used both for cache keys and to let a handler compare an effect against
/// concrete cases after the type filter has already narrowed the match.
pub trait Effect: Any + fmt::Debug + Send + Sync {
    /// The nominal family this effect belongs to, if any. Used by handler type filters that
    /// are declared against a base/family type rather than a single concrete effect.
    fn family(&self) -> Option<EffectFamily> {
        None
    }

    /// Upcast to `&dyn Any` so that handlers can attempt a concrete downcast after the type
    /// filter has matched.
    fn as_any(&self) -> &dyn Any;
}

/// A type-erased effect payload as it travels through the continuation stack.
///
/// This is `Arc`, not `Box`: when a handler yields `Delegate`/`Pass` the VM must re-dispatch
/// the *same* payload to the next outer handler even though the first handler closure was
/// already handed it by value, so the payload needs shared ownership rather than a unique one.
pub type BoxedEffect = Arc<dyn Effect>;

impl dyn Effect {
    /// The concrete tag of this effect instance.
    pub fn tag(&self) -> EffectTag {
        EffectTag { type_id: self.as_any().type_id(), name: "<dyn Effect>" }
    }

    /// Attempts to downcast to a concrete effect type.
    pub fn downcast_ref<T: Effect + 'static>(&self) -> Option<&T> {
        self.as_any().downcast_ref::<T>()
    }
}

/// Blanket helper used by the `#[derive(Effect)]`-shaped boilerplate: every plain effect
/// struct gets `as_any` for free via this macro, matching the "derive mechanism for
/// user-defined effects" called for in spec.md §6.
#[macro_export]
macro_rules! impl_effect {
    ($ty:ty $(, family = $family:expr)?) => {
        impl $crate::Effect for $ty {
            $(
                fn family(&self) -> Option<$crate::EffectFamily> {
                    Some($family)
                }
            )?

            fn as_any(&self) -> &dyn core::any::Any {
                self
            }
        }
    };
}

use alloc::boxed::Box;
use core::any::Any;
use core::marker::PhantomData;

use crate::error::CoreError;
use crate::node::{Node, Yielded};

// GENERATOR
// ================================================================================================

/// The value fed back into a producer on each resumption.
pub enum Resumption {
    /// The producer has not been driven yet.
    Start,
    /// The previous yield's value, as computed by the VM (e.g. an effect's result, or a
    /// sub-program's return value for `FlatMap`).
    Value(Box<dyn Any + Send>),
    /// An error is being propagated into the producer (e.g. from a `Safe`-less failure
    /// upstream that this frame is nonetheless positioned to observe).
    Error(CoreError),
}

/// A program-producing state machine: the Rust rendering of the source language's
/// generator/coroutine producer (spec.md §9, "coroutine / generator producer").
///
/// Each call to `resume` advances the state machine by exactly one yield, matching the VM
/// step loop's "drive the current program to its next yield" (spec.md §4.4).
pub trait Generator: Send {
    fn resume(&mut self, input: Resumption) -> Yielded;
}

/// A type-erased, boxed generator. This is the representation `doeff-processor` actually
/// drives; [`Program<T>`] is the typed handle surrounding it.
pub type AnyProgram = Box<dyn Generator>;

/// A one-shot generator that yields exactly one [`Node`] and is then exhausted. Used to
/// implement the `Program` combinators, which are all sugar for a single control node
/// (spec.md §4.4.1).
struct SingleNode(Option<Node>);

impl Generator for SingleNode {
    fn resume(&mut self, _input: Resumption) -> Yielded {
        match self.0.take() {
            Some(node) => Yielded::Node(node),
            None => Yielded::Raised(CoreError::ProgramExhausted),
        }
    }
}

fn single_node(node: Node) -> AnyProgram {
    Box::new(SingleNode(Some(node)))
}

/// Forwards to an inner program that is only constructed lazily, on first resume. Backs
/// [`Program::from_closure`].
struct Deferred<F> {
    make: Option<F>,
    inner: Option<AnyProgram>,
}

impl<F> Generator for Deferred<F>
where
    F: FnOnce() -> AnyProgram + Send,
{
    fn resume(&mut self, input: Resumption) -> Yielded {
        if self.inner.is_none() {
            let make = self.make.take().expect("Deferred resumed twice before materializing");
            self.inner = Some(make());
        }
        self.inner.as_mut().expect("just materialized").resume(input)
    }
}

// PROGRAM
// ================================================================================================

/// An opaque handle to a program value producing `T`.
///
/// A `Program<T>` is restartable at the boundary (every top-level `run`/`async_run` call
/// drives a fresh instance) but single-use per task once it has started (spec.md §3).
pub struct Program<T> {
    inner: AnyProgram,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Send + 'static> Program<T> {
    /// Wraps an already type-erased generator. Used by `doeff-processor` and by
    /// `from_generator`.
    pub fn from_any(inner: AnyProgram) -> Self {
        Program { inner, _marker: PhantomData }
    }

    /// Consumes the handle, returning the underlying type-erased generator.
    pub fn into_any(self) -> AnyProgram {
        self.inner
    }

    /// A program that immediately returns `v` with no effect.
    pub fn pure(v: T) -> Self {
        Self::from_any(single_node(Node::Pure(Box::new(v))))
    }

    /// A program-producing closure, invoked lazily the first time this program is driven.
    pub fn from_closure<F>(f: F) -> Self
    where
        F: FnOnce() -> Program<T> + Send + 'static,
    {
        let make = move || f().into_any();
        Self::from_any(Box::new(Deferred { make: Some(make), inner: None }))
    }

    /// Wraps a user-supplied generator/coroutine producer directly. This is the constructor
    /// real program bodies use: each `resume` may yield any number of control nodes and
    /// effect payloads before finally returning.
    pub fn from_generator<G>(gen: G) -> Self
    where
        G: Generator + 'static,
    {
        Self::from_any(Box::new(gen))
    }

    /// Functor map: `run(p.map(f)) == run(p).map(f)` up to the store/log writes `p` performs.
    pub fn map<U, F>(self, f: F) -> Program<U>
    where
        U: Send + 'static,
        F: FnOnce(T) -> U + Send + 'static,
    {
        let f = move |boxed: Box<dyn Any + Send>| -> Box<dyn Any + Send> {
            let v = *boxed.downcast::<T>().expect("Map: type mismatch between src and f");
            Box::new(f(v))
        };
        Program::from_any(single_node(Node::Map { src: self.inner, f: Box::new(f) }))
    }

    /// Monad bind: see spec.md §8 for the three monad laws this must satisfy.
    pub fn flat_map<U, F>(self, f: F) -> Program<U>
    where
        U: Send + 'static,
        F: FnOnce(T) -> Program<U> + Send + 'static,
    {
        let f = move |boxed: Box<dyn Any + Send>| -> AnyProgram {
            let v = *boxed.downcast::<T>().expect("FlatMap: type mismatch between src and f");
            f(v).into_any()
        };
        Program::from_any(single_node(Node::FlatMap { src: self.inner, f: Box::new(f) }))
    }

    /// Alias for [`Program::flat_map`], matching the external-interface naming in spec.md §6.
    pub fn and_then<U, F>(self, f: F) -> Program<U>
    where
        U: Send + 'static,
        F: FnOnce(T) -> Program<U> + Send + 'static,
    {
        self.flat_map(f)
    }
}

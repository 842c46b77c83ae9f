//! A CESK-style interpreter for algebraic effects: a single-threaded cooperative scheduler
//! driving `doeff-core` `Program<T>` values against a pluggable handler stack.
//!
//! Grounded on the teacher's `processor` crate: the same "value model defines the vocabulary,
//! processor drives it" split, the same step-loop-plus-host-interface shape, just retargeted
//! from a bytecode VM's instruction set onto a resumable effect-handling one.

use std::any::Any;
use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use doeff_core::{CoreError, EffectFamily, Generator, Node, Resumption, Yielded};
use doeff_core::{FutureHandle, PromiseHandle, SemaphoreHandle, TaskHandle};
pub use doeff_core::{Effect, HandlerSpec, InterceptMode, InterceptSpec, Program, TypeFilter};

mod clock;
mod env;
mod errors;
mod handler;
mod kont;
mod options;
mod runner;
mod scheduler;
mod store;
mod util;
mod vm;

pub mod effects;

#[cfg(test)]
mod tests;

use crate::util::{downcast_any_send, OneShotNode};

// RE-EXPORTS
// ================================================================================================

pub use clock::{Clock, SimClock, WallClock};
pub use env::{Binding, Env};
pub use errors::ExecutionError;
pub use handler::{HandlerError, HandlerSet};
pub use options::{ExecutionOptions, ExecutionOptionsError};
pub use runner::RunResult;
pub use scheduler::{Outcome, Scheduler};
pub use store::{Slot, Store};

pub use effects::{
    AcquireSemaphore, Annotate, Ask, Await, CacheGet, CachePolicy, CachePut, CaptureGraph,
    CreateFuture, CreateSemaphore, Delay, Gather, Get, GetTime, GraphCapture, GraphNode,
    Lifecycle, Listen, ListenResult, Local, Modify, Put, Race, RaceOutcome, ReleaseSemaphore,
    ResolvePromise, Safe, Snapshot, Spawn, StorageHint, Step, StructuredLog, Tell, Wait,
    WaitUntil, Waitable,
};

// TOP-LEVEL ENTRY POINTS
// ================================================================================================

/// Runs `program` to completion on the calling thread (spec.md §4.7). See [`runner::sync_run`].
pub fn run<T: Send + 'static>(
    program: Program<T>,
    handlers: HandlerSet,
    env: Env,
    store: Store,
    options: ExecutionOptions,
) -> RunResult<T> {
    runner::sync_run(program, handlers, env, store, options)
}

/// Runs `program` to completion on the current async executor (spec.md §4.7). See
/// [`runner::async_run`].
pub async fn async_run<T: Send + 'static>(
    program: Program<T>,
    handlers: HandlerSet,
    env: Env,
    store: Store,
    options: ExecutionOptions,
) -> RunResult<T> {
    runner::async_run(program, handlers, env, store, options).await
}

// HANDLER / INTERCEPT COMBINATORS
// ================================================================================================

/// Installs `handler` around `body` (spec.md §4.5 Handler Protocol). `handler` should be built
/// with `doeff_core::node`'s handler-construction helpers (re-exported as [`HandlerSpec`]); see
/// `effects`' `impl_effect!`-declared types for the concrete payloads it can match.
pub fn with_handler<T: Send + 'static>(handler: HandlerSpec, body: Program<T>) -> Program<T> {
    Program::from_any(OneShotNode::new(Node::WithHandler { handler, body: body.into_any() }))
}

/// Installs a VM-level `intercept` observer around `body` (spec.md §4.5, "Observation versus
/// handling").
pub fn with_intercept<T: Send + 'static>(intercept: InterceptSpec, body: Program<T>) -> Program<T> {
    Program::from_any(OneShotNode::new(Node::WithIntercept { intercept, body: body.into_any() }))
}

// PERFORM ADAPTERS
// ================================================================================================
//
// `Program<T>`'s public combinators (`map`/`flat_map`) only downcast against the type `T` the
// call site names, which works directly for effects whose built-in handler resolves with a
// concrete, non-erased value (`Put` -> `()`, `Spawn` -> `TaskHandle`, ...). Reads that flow
// through the environment or the store resolve one layer deeper, as a boxed `Arc<dyn Any +
// ...>` (see `crate::vm::intrinsics`'s `handle_ask`/`handle_get`), since those subsystems keep
// their own copy of the value and can only hand out a shared reference to it. The three
// generators below peel that layer off; `Program<Arc<dyn Any + Send>>` itself is not
// constructible (that `Arc` isn't `Send`, so it fails `Program`'s own `T: Send` bound), which is
// why this can't just be a `Program::flat_map` call.

/// Performs `effect` and resolves directly to whatever concrete value its handler hands back,
/// with no further unwrapping (e.g. `Put`, `Spawn`, `Delay`, `GetTime`).
fn perform<T: Send + 'static>(effect: impl Effect) -> Program<T> {
    Program::from_any(OneShotNode::new(Node::Perform(Arc::new(effect))))
}

/// Performs `effect`, then downcasts and clones the resolved `Arc<dyn Any + Send>` out as `T`
/// (environment/scheduler-originated values: `Ask`, `Wait`, `Await`).
///
/// `T: Clone`: this `Arc` is never uniquely held (the environment keeps its own copy; a
/// waited-on task's result is cloned to every waiter), so extracting an owned `T` means
/// cloning out of the shared reference rather than `Arc::try_unwrap`.
struct PerformEnvShared<T> {
    effect: Option<doeff_core::BoxedEffect>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Clone + Send + 'static> Generator for PerformEnvShared<T> {
    fn resume(&mut self, input: Resumption) -> Yielded {
        match self.effect.take() {
            Some(effect) => Yielded::Effect(effect),
            None => {
                let boxed = match input {
                    Resumption::Value(v) => v,
                    Resumption::Error(e) => return Yielded::Raised(e),
                    Resumption::Start => return Yielded::Raised(CoreError::ProgramExhausted),
                };
                match boxed.downcast::<Arc<dyn Any + Send>>() {
                    Ok(arc) => match downcast_any_send::<T>(*arc) {
                        Ok(typed) => Yielded::Return(Box::new((*typed).clone())),
                        Err(_) => Yielded::Raised(CoreError::ResultDowncastFailed),
                    },
                    Err(_) => Yielded::Raised(CoreError::ResultDowncastFailed),
                }
            },
        }
    }
}

/// As [`PerformEnvShared`], but for `Slot` (`Arc<dyn Any + Send + Sync>`) values the store
/// hands back (`Get`, `Modify`, `CacheGet`), downcast via the standard library's own
/// `Arc<dyn Any + Send + Sync>::downcast`.
struct PerformStoreShared<T> {
    effect: Option<doeff_core::BoxedEffect>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Clone + Send + Sync + 'static> Generator for PerformStoreShared<T> {
    fn resume(&mut self, input: Resumption) -> Yielded {
        match self.effect.take() {
            Some(effect) => Yielded::Effect(effect),
            None => {
                let boxed = match input {
                    Resumption::Value(v) => v,
                    Resumption::Error(e) => return Yielded::Raised(e),
                    Resumption::Start => return Yielded::Raised(CoreError::ProgramExhausted),
                };
                match boxed.downcast::<Slot>() {
                    Ok(slot) => match slot.downcast::<T>() {
                        Ok(typed) => Yielded::Return(Box::new((*typed).clone())),
                        Err(_) => Yielded::Raised(CoreError::ResultDowncastFailed),
                    },
                    Err(_) => Yielded::Raised(CoreError::ResultDowncastFailed),
                }
            },
        }
    }
}

fn perform_env<T: Clone + Send + 'static>(effect: impl Effect) -> Program<T> {
    let gen = PerformEnvShared::<T> { effect: Some(Arc::new(effect)), _marker: PhantomData };
    Program::from_generator(gen)
}

fn perform_store<T: Clone + Send + Sync + 'static>(effect: impl Effect) -> Program<T> {
    let gen = PerformStoreShared::<T> { effect: Some(Arc::new(effect)), _marker: PhantomData };
    Program::from_generator(gen)
}

/// Performs a `Wait`/`Gather`/`Race` target lookup and decodes the whole `Vec<Arc<dyn Any +
/// Send>>` `Gather` resolves with (spec.md §4.6 "Gather returns values in input order").
struct PerformGather<T> {
    effect: Option<doeff_core::BoxedEffect>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Clone + Send + 'static> Generator for PerformGather<T> {
    fn resume(&mut self, input: Resumption) -> Yielded {
        match self.effect.take() {
            Some(effect) => Yielded::Effect(effect),
            None => {
                let boxed = match input {
                    Resumption::Value(v) => v,
                    Resumption::Error(e) => return Yielded::Raised(e),
                    Resumption::Start => return Yielded::Raised(CoreError::ProgramExhausted),
                };
                match boxed.downcast::<Vec<Arc<dyn Any + Send>>>() {
                    Ok(arcs) => {
                        let mut out = Vec::with_capacity(arcs.len());
                        for arc in arcs.into_iter() {
                            match downcast_any_send::<T>(arc) {
                                Ok(typed) => out.push((*typed).clone()),
                                Err(_) => return Yielded::Raised(CoreError::ResultDowncastFailed),
                            }
                        }
                        Yielded::Return(Box::new(out))
                    },
                    Err(_) => Yielded::Raised(CoreError::ResultDowncastFailed),
                }
            },
        }
    }
}

/// Performs `Safe`'s body and decodes its result. `handle_safe` only pushes `Frame::Safe` and
/// lets the body run; `vm::apply_frame_value`/`apply_frame_error` do the actual wrapping once
/// the body settles, as `Ok`/`Err` of the body's own still-erased `Box<dyn Any + Send>` — one
/// more layer than `T` itself, hence the dedicated decode here instead of a plain `perform`.
struct PerformSafe<T> {
    effect: Option<doeff_core::BoxedEffect>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Send + 'static> Generator for PerformSafe<T> {
    fn resume(&mut self, input: Resumption) -> Yielded {
        match self.effect.take() {
            Some(effect) => Yielded::Effect(effect),
            None => {
                let boxed = match input {
                    Resumption::Value(v) => v,
                    Resumption::Error(e) => return Yielded::Raised(e),
                    Resumption::Start => return Yielded::Raised(CoreError::ProgramExhausted),
                };
                match boxed.downcast::<Result<Box<dyn Any + Send>, ExecutionError>>() {
                    Ok(result) => match *result {
                        Ok(inner) => match inner.downcast::<T>() {
                            Ok(typed) => Yielded::Return(Box::new(Ok::<T, ExecutionError>(*typed))),
                            Err(_) => Yielded::Raised(CoreError::ResultDowncastFailed),
                        },
                        Err(e) => Yielded::Return(Box::new(Err::<T, ExecutionError>(e))),
                    },
                    Err(_) => Yielded::Raised(CoreError::ResultDowncastFailed),
                }
            },
        }
    }
}

/// As [`PerformSafe`], for `Listen`: its body's value arrives one layer down, inside
/// `ListenResult<Box<dyn Any + Send>>` rather than `ListenResult<T>` directly.
struct PerformListen<T> {
    effect: Option<doeff_core::BoxedEffect>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Send + 'static> Generator for PerformListen<T> {
    fn resume(&mut self, input: Resumption) -> Yielded {
        match self.effect.take() {
            Some(effect) => Yielded::Effect(effect),
            None => {
                let boxed = match input {
                    Resumption::Value(v) => v,
                    Resumption::Error(e) => return Yielded::Raised(e),
                    Resumption::Start => return Yielded::Raised(CoreError::ProgramExhausted),
                };
                match boxed.downcast::<ListenResult<Box<dyn Any + Send>>>() {
                    Ok(result) => {
                        let ListenResult { value, entries } = *result;
                        match value.downcast::<T>() {
                            Ok(typed) => Yielded::Return(Box::new(ListenResult { value: *typed, entries })),
                            Err(_) => Yielded::Raised(CoreError::ResultDowncastFailed),
                        }
                    },
                    Err(_) => Yielded::Raised(CoreError::ResultDowncastFailed),
                }
            },
        }
    }
}

/// As [`PerformSafe`], for `CaptureGraph`: its body's value arrives inside
/// `GraphCapture<Box<dyn Any + Send>>` rather than `GraphCapture<T>` directly.
struct PerformGraphCapture<T> {
    effect: Option<doeff_core::BoxedEffect>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Send + 'static> Generator for PerformGraphCapture<T> {
    fn resume(&mut self, input: Resumption) -> Yielded {
        match self.effect.take() {
            Some(effect) => Yielded::Effect(effect),
            None => {
                let boxed = match input {
                    Resumption::Value(v) => v,
                    Resumption::Error(e) => return Yielded::Raised(e),
                    Resumption::Start => return Yielded::Raised(CoreError::ProgramExhausted),
                };
                match boxed.downcast::<GraphCapture<Box<dyn Any + Send>>>() {
                    Ok(capture) => {
                        let GraphCapture { value, nodes } = *capture;
                        match value.downcast::<T>() {
                            Ok(typed) => Yielded::Return(Box::new(GraphCapture { value: *typed, nodes })),
                            Err(_) => Yielded::Raised(CoreError::ResultDowncastFailed),
                        }
                    },
                    Err(_) => Yielded::Raised(CoreError::ResultDowncastFailed),
                }
            },
        }
    }
}

// ERRORS
// ================================================================================================

/// Raises `error`, unwinding through the current continuation until a [`safe`] scope catches
/// it or the task itself terminates with it (spec.md §7 "User errors").
///
/// `error` travels as [`CoreError::User`] rather than a dedicated `Node` variant: the
/// generator protocol only carries `CoreError` between yields (see [`Resumption::Error`]), so
/// this is the same door `finish_error` already opens for any other raised error, just pulled
/// one step earlier in the pipeline instead of surfacing from a handler or intrinsic.
pub fn raise<T: Send + 'static>(error: ExecutionError) -> Program<T> {
    struct Raise<T> {
        error: Option<ExecutionError>,
        _marker: PhantomData<fn() -> T>,
    }

    impl<T: Send + 'static> Generator for Raise<T> {
        fn resume(&mut self, _input: Resumption) -> Yielded {
            match self.error.take() {
                Some(e) => Yielded::Raised(CoreError::User(Arc::new(e))),
                None => Yielded::Raised(CoreError::ProgramExhausted),
            }
        }
    }

    Program::from_generator(Raise::<T> { error: Some(error), _marker: PhantomData })
}

// READER
// ================================================================================================

/// Reads `key` from the current environment (spec.md §6).
pub fn ask<T: Clone + Send + 'static>(key: impl Into<String>) -> Program<T> {
    perform_env(Ask::new(key))
}

/// Overlays the environment for the duration of `body`, restoring it on any exit path
/// (spec.md §6, §7).
pub fn local<T: Send + 'static>(overrides: HashMap<String, Binding>, body: Program<T>) -> Program<T> {
    perform(Local::new(overrides, body.into_any()))
}

// STATE
// ================================================================================================

/// Reads the store slot at `key` (spec.md §6).
pub fn get<T: Clone + Send + Sync + 'static>(key: impl Into<String>) -> Program<T> {
    perform_store(Get::new(key))
}

/// Writes `value` into the store slot at `key`, unconditionally.
pub fn put<T: Send + Sync + 'static>(key: impl Into<String>, value: T) -> Program<()> {
    perform(Put::new(key, value))
}

/// Atomically replaces the slot at `key` via `updater`, returning the new value; the slot is
/// left unchanged if `updater` fails (spec.md §4.2).
pub fn modify<T, F>(key: impl Into<String>, updater: F) -> Program<T>
where
    T: Clone + Send + Sync + 'static,
    F: FnOnce(Option<&T>) -> Result<T, ExecutionError> + Send + 'static,
{
    let boxed_updater: Box<
        dyn FnOnce(Option<&dyn Any>) -> Result<Box<dyn Any + Send + Sync>, ExecutionError> + Send,
    > = Box::new(move |cur: Option<&dyn Any>| {
        let typed = cur.map(|v| v.downcast_ref::<T>().expect("Modify: store slot type mismatch"));
        updater(typed).map(|v| Box::new(v) as Box<dyn Any + Send + Sync>)
    });
    perform_store(Modify::new(key, boxed_updater))
}

/// Runs `body`, turning a raised error into `Ok(Err(e))` instead of propagating it further
/// (spec.md §6, §7 "User errors").
pub fn safe<T: Send + 'static>(body: Program<T>) -> Program<Result<T, ExecutionError>> {
    let gen = PerformSafe::<T> { effect: Some(Arc::new(Safe::new(body.into_any()))), _marker: PhantomData };
    Program::from_generator(gen)
}

// WRITER
// ================================================================================================

/// Appends `value` to the writer log.
pub fn tell<T: Send + Sync + 'static>(value: T) -> Program<()> {
    perform(Tell::new(value))
}

/// Appends a structured key/value entry to the writer log.
pub fn structured_log(fields: HashMap<String, Arc<dyn Any + Send + Sync>>) -> Program<()> {
    perform(StructuredLog { fields })
}

/// Runs `body`, capturing every writer entry it produces into a local buffer returned
/// alongside `body`'s own value, while still forwarding each entry to the outer log (spec.md
/// §9).
pub fn listen<T: Send + 'static>(body: Program<T>) -> Program<ListenResult<T>> {
    let gen = PerformListen::<T> { effect: Some(Arc::new(Listen::new(body.into_any()))), _marker: PhantomData };
    Program::from_generator(gen)
}

// CACHE
// ================================================================================================

/// Reads `key` from the cache; a miss raises `ExecutionError::CacheMiss` (spec.md §6, §7).
pub fn cache_get<T: Clone + Send + Sync + 'static>(key: impl Into<String>) -> Program<T> {
    perform_store(CacheGet::new(key))
}

/// Writes `value` into the cache under `key` with `policy`.
pub fn cache_put<T: Send + Sync + 'static>(key: impl Into<String>, value: T, policy: CachePolicy) -> Program<()> {
    perform(CachePut::new(key, value, policy))
}

// TRACE
// ================================================================================================

/// Marks entry into a named execution step, for the execution-graph tracing plane (spec.md §6).
pub fn step(name: impl Into<String>) -> Program<()> {
    perform(Step::new(name))
}

/// Attaches metadata to the current execution-graph node.
pub fn annotate(fields: HashMap<String, Arc<dyn Any + Send + Sync>>) -> Program<()> {
    perform(Annotate { fields })
}

/// Requests a copy of the execution graph accumulated so far.
pub fn snapshot() -> Program<Vec<GraphNode>> {
    perform(Snapshot)
}

/// Runs `body` with a fresh execution-graph scope, returning the captured subgraph alongside
/// `body`'s own value.
pub fn capture_graph<T: Send + 'static>(body: Program<T>) -> Program<GraphCapture<T>> {
    let gen =
        PerformGraphCapture::<T> { effect: Some(Arc::new(CaptureGraph::new(body.into_any()))), _marker: PhantomData };
    Program::from_generator(gen)
}

// SCHEDULER
// ================================================================================================

/// Enqueues `program` as a new task and returns immediately with its handle (spec.md §4.6:
/// "`Spawn` does not itself suspend").
pub fn spawn<T: Send + 'static>(program: Program<T>) -> Program<TaskHandle> {
    perform(Spawn::new(program.into_any()))
}

/// Blocks the calling task until `target` completes, returning its value or raising its error.
pub fn wait<T: Clone + Send + 'static>(target: Waitable) -> Program<T> {
    perform_env(Wait { target })
}

/// Waits for every target to complete, returning their values in input order; if any target
/// raises, the first error (by input order) is surfaced once every target has been awaited
/// (spec.md §9 default policy).
pub fn gather<T: Clone + Send + 'static>(targets: Vec<Waitable>) -> Program<Vec<T>> {
    let gen = PerformGather::<T> { effect: Some(Arc::new(Gather::new(targets))), _marker: PhantomData };
    Program::from_generator(gen)
}

/// The alternative `Gather` policy (spec.md §9): cancel the remaining racers as soon as one
/// target raises, instead of awaiting all of them.
pub fn gather_cancel_on_first_error<T: Clone + Send + 'static>(targets: Vec<Waitable>) -> Program<Vec<T>> {
    let gen = PerformGather::<T> {
        effect: Some(Arc::new(Gather::new(targets).cancel_on_first_error())),
        _marker: PhantomData,
    };
    Program::from_generator(gen)
}

/// Performs `Race`, then downcasts and clones its winning value out as `T`. Not built on
/// `perform` + `flat_map`: `RaceOutcome` itself holds an `Arc<dyn Any + Send>` field, which
/// (like the `Arc`s `PerformEnvShared`/`PerformStoreShared` decode) isn't `Send`, so
/// `Program<RaceOutcome>` can't be named as an intermediate step either.
struct PerformRace<T> {
    effect: Option<doeff_core::BoxedEffect>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Clone + Send + 'static> Generator for PerformRace<T> {
    fn resume(&mut self, input: Resumption) -> Yielded {
        match self.effect.take() {
            Some(effect) => Yielded::Effect(effect),
            None => {
                let boxed = match input {
                    Resumption::Value(v) => v,
                    Resumption::Error(e) => return Yielded::Raised(e),
                    Resumption::Start => return Yielded::Raised(CoreError::ProgramExhausted),
                };
                match boxed.downcast::<RaceOutcome>() {
                    Ok(outcome) => {
                        let outcome = *outcome;
                        match downcast_any_send::<T>(outcome.value) {
                            Ok(typed) => Yielded::Return(Box::new(RaceResult {
                                first_index: outcome.first_index,
                                value: (*typed).clone(),
                                rest: outcome.rest,
                            })),
                            Err(_) => Yielded::Raised(CoreError::ResultDowncastFailed),
                        }
                    },
                    Err(_) => Yielded::Raised(CoreError::ResultDowncastFailed),
                }
            },
        }
    }
}

/// Waits for the first target to complete, returning the winner's index and value plus every
/// target that did not win — left running unless the caller cancels them (spec.md §4.6).
pub fn race<T: Clone + Send + 'static>(targets: Vec<Waitable>) -> Program<RaceResult<T>> {
    let gen = PerformRace::<T> { effect: Some(Arc::new(Race::new(targets))), _marker: PhantomData };
    Program::from_generator(gen)
}

/// [`Race`]'s result, with the winning value already downcast to `T` (spec.md §4.6).
#[derive(Debug, Clone)]
pub struct RaceResult<T> {
    pub first_index: usize,
    pub value: T,
    pub rest: Vec<Waitable>,
}

/// Requests cancellation of `target` (spec.md §4.6 cancellation table).
pub fn cancel_task(target: TaskHandle) -> Program<()> {
    perform(CancelTask { target })
}

/// Creates a new FIFO-fair semaphore with `permits` initial permits.
pub fn create_semaphore(permits: u32) -> Program<SemaphoreHandle> {
    perform(CreateSemaphore { permits })
}

/// Acquires one permit from `semaphore`, blocking (FIFO) if none are available.
pub fn acquire_semaphore(semaphore: SemaphoreHandle) -> Program<()> {
    perform(AcquireSemaphore { semaphore })
}

/// Releases one permit to `semaphore`; a queued waiter receives it directly (spec.md §4.6
/// "direct handoff").
pub fn release_semaphore(semaphore: SemaphoreHandle) -> Program<()> {
    perform(ReleaseSemaphore { semaphore })
}

/// Suspends the calling task for `duration` (wall-clock, or simulated under
/// `ExecutionOptions::simulated_clock`).
pub fn delay(duration: Duration) -> Program<()> {
    perform(Delay { duration })
}

/// Suspends the calling task until `deadline_millis` (milliseconds since the runner's clock
/// epoch).
pub fn wait_until(deadline_millis: u64) -> Program<()> {
    perform(WaitUntil { deadline_millis })
}

/// Reads the current time (milliseconds since the runner's clock epoch).
pub fn get_time() -> Program<u64> {
    perform(GetTime)
}

/// Creates a single-fire value slot and its writer handle (fills the gap spec.md §6 leaves
/// around how a program obtains a `Future`/`Promise` pair).
pub fn create_future() -> Program<(FutureHandle, PromiseHandle)> {
    perform(CreateFuture)
}

/// Resolves `promise` with a success value, waking every task blocked on its future.
pub fn resolve_promise<T: Send + Sync + 'static>(promise: PromiseHandle, value: T) -> Program<()> {
    perform(ResolvePromise::new(promise, Ok(Arc::new(value))))
}

/// Resolves `promise` with a user error, waking every task blocked on its future.
pub fn reject_promise(promise: PromiseHandle, error: ExecutionError) -> Program<()> {
    perform(ResolvePromise::new(promise, Err(error)))
}

/// Escapes to `future`, the one operation allowed to cross the VM/async boundary (spec.md
/// §4.7). `future` resolves to the same `Outcome` a task's own completion produces, so a
/// successful value is decoded the same way `Wait`'s is.
pub fn await_effect<T: Clone + Send + 'static>(
    future: std::pin::Pin<Box<dyn std::future::Future<Output = Outcome> + Send>>,
) -> Program<T> {
    perform_env(Await::new(future))
}

pub const FAMILY_READER: EffectFamily = effects::FAMILY_READER;
pub const FAMILY_STATE: EffectFamily = effects::FAMILY_STATE;
pub const FAMILY_WRITER: EffectFamily = effects::FAMILY_WRITER;
pub const FAMILY_SCHEDULER: EffectFamily = effects::FAMILY_SCHEDULER;
pub const FAMILY_CACHE: EffectFamily = effects::FAMILY_CACHE;
pub const FAMILY_TRACE: EffectFamily = effects::FAMILY_TRACE;

use std::future::Future;
use std::pin::Pin;

use doeff_core::{impl_effect, FutureHandle, PromiseHandle, SemaphoreHandle, TaskHandle};

use super::FAMILY_SCHEDULER;

type BoxedFuture = Pin<Box<dyn Future<Output = crate::scheduler::Outcome> + Send>>;

/// The one operation that crosses the strict VM/async boundary (spec.md §4.7): "only
/// await-shaped operations escape; all other suspension ... is internal to the scheduler."
///
/// `future` is a take-once cell: effects travel through dispatch as `Arc<dyn Effect>` (so
/// `Delegate` can re-offer the same payload to the next handler), which only grants shared
/// access, while the runner still needs to move the future out exactly once to drive it.
pub struct Await {
    future: parking_lot::Mutex<Option<BoxedFuture>>,
}

impl Await {
    pub fn new(future: BoxedFuture) -> Self {
        Await { future: parking_lot::Mutex::new(Some(future)) }
    }

    pub fn take_future(&self) -> Option<BoxedFuture> {
        self.future.lock().take()
    }
}

impl std::fmt::Debug for Await {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Await").finish()
    }
}

impl_effect!(Await, family = FAMILY_SCHEDULER);

/// Enqueues `program` as a new task and returns immediately with its handle (spec.md §4.6:
/// "Spawn does not itself suspend"). The child observes a snapshot of the environment taken at
/// spawn time (later `Local` overrides in either task are invisible to the other); the store
/// remains the single mutable state shared by every task of the run.
pub struct Spawn {
    program: parking_lot::Mutex<Option<doeff_core::AnyProgram>>,
}

impl Spawn {
    pub fn new(program: doeff_core::AnyProgram) -> Self {
        Spawn { program: parking_lot::Mutex::new(Some(program)) }
    }

    pub fn take_program(&self) -> Option<doeff_core::AnyProgram> {
        self.program.lock().take()
    }
}

impl std::fmt::Debug for Spawn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Spawn").finish()
    }
}

impl_effect!(Spawn, family = FAMILY_SCHEDULER);

/// What `Wait`/`Gather`/`Race` can block on.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum Waitable {
    Task(TaskHandle),
    Future(FutureHandle),
}

/// Blocks the calling task until `target` completes, returning its value or raising its error.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct Wait {
    pub target: Waitable,
}

impl_effect!(Wait, family = FAMILY_SCHEDULER);

/// Waits for every target to complete, returning their values in input order; if any target
/// raises, the first error (in input order) is surfaced once every target has been awaited
/// (spec.md §9: default policy is "await all, surface first error").
#[derive(Debug, Clone)]
pub struct Gather {
    pub targets: Vec<Waitable>,
    pub cancel_on_first_error: bool,
}

impl Gather {
    pub fn new(targets: Vec<Waitable>) -> Self {
        Gather { targets, cancel_on_first_error: false }
    }

    /// The alternative policy called for in spec.md §9: cancel the remaining racers as soon as
    /// one target raises, instead of awaiting all of them.
    pub fn cancel_on_first_error(mut self) -> Self {
        self.cancel_on_first_error = true;
        self
    }
}

impl_effect!(Gather, family = FAMILY_SCHEDULER);

/// Waits for the first target to complete, returning `{ first_index, value, rest }`; the
/// remaining (`rest`) tasks are left running unless the caller cancels them (spec.md §4.6).
#[derive(Debug, Clone)]
pub struct Race {
    pub targets: Vec<Waitable>,
}

impl Race {
    pub fn new(targets: Vec<Waitable>) -> Self {
        Race { targets }
    }
}

impl_effect!(Race, family = FAMILY_SCHEDULER);

/// The value produced by a completed `Race`: the winning target's own index and value, plus
/// every target that did not win (left running — the caller decides whether to cancel them).
pub struct RaceOutcome {
    pub first_index: usize,
    pub value: std::sync::Arc<dyn std::any::Any + Send>,
    pub rest: Vec<Waitable>,
}

impl std::fmt::Debug for RaceOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RaceOutcome").field("first_index", &self.first_index).field("rest", &self.rest).finish()
    }
}

/// Requests cancellation of `target` (spec.md §4.6 cancellation table).
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct CancelTask {
    pub target: TaskHandle,
}

impl_effect!(CancelTask, family = FAMILY_SCHEDULER);

/// Creates a new FIFO-fair semaphore with `permits` initial permits.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct CreateSemaphore {
    pub permits: u32,
}

impl_effect!(CreateSemaphore, family = FAMILY_SCHEDULER);

/// Acquires one permit from `semaphore`, blocking (FIFO) if none are available.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct AcquireSemaphore {
    pub semaphore: SemaphoreHandle,
}

impl_effect!(AcquireSemaphore, family = FAMILY_SCHEDULER);

/// Releases one permit to `semaphore`; if waiters are queued, the head waiter receives the
/// permit directly without it ever appearing in `available_permits` (spec.md §4.6 "direct
/// handoff").
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct ReleaseSemaphore {
    pub semaphore: SemaphoreHandle,
}

impl_effect!(ReleaseSemaphore, family = FAMILY_SCHEDULER);

/// Suspends the calling task for `duration` (wall-clock, or simulated if
/// `ExecutionOptions::simulated_clock` is set).
#[derive(Debug, Clone, Copy)]
pub struct Delay {
    pub duration: std::time::Duration,
}

impl_effect!(Delay, family = FAMILY_SCHEDULER);

/// Suspends the calling task until `deadline` (milliseconds since the runner's clock epoch).
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct WaitUntil {
    pub deadline_millis: u64,
}

impl_effect!(WaitUntil, family = FAMILY_SCHEDULER);

/// Reads the current time (milliseconds since the runner's clock epoch).
#[derive(Debug, Clone, Copy, Default)]
pub struct GetTime;

impl_effect!(GetTime, family = FAMILY_SCHEDULER);

/// Creates a single-fire value slot and its writer handle. The standard effect table (spec.md
/// §6) names `Future`/`Promise` as Value Model handle types without specifying how a program
/// obtains one; this pair fills that gap the way `task::spawn`/a oneshot channel would, so
/// `Wait`/`Gather`/`Race` have a non-task waitable to target.
#[derive(Debug, Clone, Copy, Default)]
pub struct CreateFuture;

impl_effect!(CreateFuture, family = FAMILY_SCHEDULER);

/// Resolves `promise` with either a success value or a user error, waking every task blocked
/// on the corresponding future. Resolving an already-resolved promise is a no-op.
pub struct ResolvePromise {
    pub promise: PromiseHandle,
    outcome: parking_lot::Mutex<Option<crate::scheduler::Outcome>>,
}

impl ResolvePromise {
    pub fn new(promise: PromiseHandle, outcome: crate::scheduler::Outcome) -> Self {
        ResolvePromise { promise, outcome: parking_lot::Mutex::new(Some(outcome)) }
    }

    pub fn take_outcome(&self) -> Option<crate::scheduler::Outcome> {
        self.outcome.lock().take()
    }
}

impl std::fmt::Debug for ResolvePromise {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolvePromise").finish()
    }
}

impl_effect!(ResolvePromise, family = FAMILY_SCHEDULER);

//! The two top-level entry points (spec.md §4.7, §6 "Run"): drive one `Program<T>` to
//! completion, installing a handler stack and wiring up the scheduler, store, and clock.
//!
//! Grounded on the teacher's `Process::execute`/`execute_iter` split between a blocking
//! convenience entry point and a step-driven one; here the two entry points instead differ
//! in how they resolve `Await` escapes (spec.md §4.7 "only await-shaped operations escape").

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::Poll;
use std::time::Duration;

use doeff_core::{Node, Program, TaskHandle};

use crate::clock::{Clock, SimClock, WallClock};
use crate::effects::GraphNode;
use crate::env::{Env, RESERVED_GRAPH_KEY};
use crate::errors::ExecutionError;
use crate::handler::HandlerSet;
use crate::kont::ContinuationTable;
use crate::options::ExecutionOptions;
use crate::scheduler::{Outcome, Scheduler, TaskStatus};
use crate::store::Store;
use crate::util::{downcast_any_send, OneShotNode};
use crate::vm::{step_task, StepOutcome};

// RUN RESULT
// ================================================================================================

/// The outcome of one `run`/`async_run` call (spec.md §6 "RunResult<T>").
pub struct RunResult<T> {
    pub result: Result<T, ExecutionError>,
    pub final_store: Store,
    pub final_env: Env,
    /// The execution graph recorded by `Step`/`Annotate` over the whole run, captured only
    /// when `ExecutionOptions::trace_enabled` is set (spec.md §6 "optional stacks ... gated
    /// by trace"). The continuation stack and native call stack at the failure point are not
    /// captured separately — see DESIGN.md's Open Question decision on trace scope.
    pub graph: Option<Vec<GraphNode>>,
}

impl<T> RunResult<T> {
    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }

    pub fn is_err(&self) -> bool {
        self.result.is_err()
    }

    pub fn value(self) -> Option<T> {
        self.result.ok()
    }

    pub fn error(&self) -> Option<&ExecutionError> {
        self.result.as_ref().err()
    }
}

/// Wraps `program` with `handlers` installed around it (outermost first, matching
/// [`HandlerSet::install_order`]'s documented order), or returns `program` unchanged if the
/// set is empty.
fn install_handlers<T: Send + 'static>(program: Program<T>, handlers: HandlerSet) -> Program<T> {
    let specs = handlers.install_order();
    if specs.is_empty() {
        return program;
    }
    let node = Node::Eval { expr: program.into_any(), handlers: specs };
    Program::from_any(OneShotNode::new(node))
}

fn make_clock(options: &ExecutionOptions, store: &Store) -> Arc<dyn Clock> {
    if options.simulated_clock() {
        Arc::new(SimClock::new(store.clone()))
    } else {
        Arc::new(WallClock)
    }
}

fn capture_graph(options: &ExecutionOptions, store: &Store) -> Option<Vec<GraphNode>> {
    if !options.trace_enabled() {
        return None;
    }
    Some(store.get::<Vec<GraphNode>>(RESERVED_GRAPH_KEY).unwrap_or_default())
}

/// Downcasts the root task's final `Outcome` into `Result<T, ExecutionError>`.
///
/// Called only on the root task's own completion, before its `Arc` is ever handed to another
/// waiter (the run is ending, so nothing else will observe it) — the `Arc` this function
/// receives is therefore always uniquely held, and `Arc::try_unwrap` always succeeds.
fn finish_root<T: Send + 'static>(outcome: Outcome) -> Result<T, ExecutionError> {
    match outcome {
        Ok(arc) => {
            let typed = downcast_any_send::<T>(arc)
                .unwrap_or_else(|_| panic!("root program result did not downcast to the requested type"));
            Ok(Arc::try_unwrap(typed)
                .unwrap_or_else(|_| panic!("root task result outlived its single owner")))
        },
        Err(e) => Err(e),
    }
}

// ESCAPE FUTURES
// ================================================================================================

/// Every `Await` currently in flight, keyed by the task waiting on it.
type Escapes = Vec<(TaskHandle, Pin<Box<dyn Future<Output = Outcome> + Send>>)>;

/// Polls every outstanding escape once per wakeup and resolves to the first one that
/// completes, removing it from `escapes`.
///
/// A hand-rolled `poll_fn` rather than `tokio::task::JoinSet`: `Outcome`'s `Arc<dyn Any +
/// Send>` is deliberately `Send`-only, not `Sync` (see `crate::util::downcast_any_send`'s doc
/// comment), so it cannot cross `JoinSet`/`tokio::spawn`'s `Send` boundary — only a future
/// driven in place, with no task handoff, can carry it. This keeps every `Await` escape on
/// whichever thread is already driving the run (the synchronous runner's bridge thread, or
/// the async runner's own executor), matching spec.md §4.7's single point of async contact.
fn next_escape(escapes: &mut Escapes) -> impl Future<Output = (TaskHandle, Outcome)> + '_ {
    std::future::poll_fn(move |cx| {
        for i in 0..escapes.len() {
            if let Poll::Ready(outcome) = escapes[i].1.as_mut().poll(cx) {
                let (handle, _) = escapes.remove(i);
                return Poll::Ready((handle, outcome));
            }
        }
        Poll::Pending
    })
}

fn duration_until(now_millis: u64, deadline_millis: u64) -> Duration {
    Duration::from_millis(deadline_millis.saturating_sub(now_millis))
}

// SHARED STEP LOOP
// ================================================================================================

/// What the inner step loop produced once it can no longer make progress on its own.
enum LoopSignal {
    /// The root task reached `Done` (or was cancelled); the run is over. Carries the root
    /// task's final `Env`, since the `Task` that held it is never put back in the table.
    RootDone(Outcome, Env),
    /// A task performed `Await`; the caller must drive `payload` to completion and eventually
    /// report the result back through [`Scheduler::resume_async_escape`].
    Escape(TaskHandle, crate::vm::EscapePayload),
    /// The ready queue is empty and at least one task is parked on a timer; contains the
    /// earliest deadline so the caller knows how long it may safely wait.
    WaitingOnTimer(u64),
    /// The ready queue is empty, nothing is parked on a timer, and every remaining blocked
    /// task is waiting on an in-flight `Await` escape the caller is already driving.
    WaitingOnEscapes,
    /// The ready queue is empty, nothing is parked on anything the caller can wake, and no
    /// escape is outstanding: no task can ever run again. Only reachable through a user
    /// program that waits on a target with no path to completion (e.g. a task waiting on
    /// itself through a chain of other waits).
    Deadlocked,
}

/// Drains the scheduler's ready queue, stepping each task until it blocks, finishes, or
/// escapes, and returns the first condition the caller must act on (spec.md §4.4 step loop,
/// driven here one task at a time rather than recursively).
fn drain_ready(
    scheduler: &mut Scheduler,
    store: &Store,
    clock: &dyn Clock,
    conts: &mut ContinuationTable,
    options: &ExecutionOptions,
    cycles: &mut u32,
    outstanding_escapes: usize,
) -> LoopSignal {
    while let Some(handle) = scheduler.next_ready() {
        let mut task = match scheduler.take_task(handle) {
            Some(t) => t,
            None => continue,
        };
        task.status = TaskStatus::Running;

        match step_task(&mut task, handle, scheduler, store, clock, conts, options, cycles) {
            StepOutcome::Done(outcome) => {
                if handle == scheduler.root {
                    return LoopSignal::RootDone(outcome, task.env.clone());
                }
                task.status = TaskStatus::Done;
                task.result = Some(outcome.clone());
                let waiters = std::mem::take(&mut task.waiters);
                scheduler.put_task(handle, task);
                for waiter in waiters {
                    scheduler.wake_on_task(waiter, handle, outcome.clone());
                }
            },
            StepOutcome::Blocked => {
                scheduler.put_task(handle, task);
            },
            StepOutcome::Escape(payload) => {
                scheduler.put_task(handle, task);
                return LoopSignal::Escape(handle, payload);
            },
        }
    }

    if let Some(deadline) = scheduler.earliest_timer_deadline() {
        return LoopSignal::WaitingOnTimer(deadline);
    }
    if outstanding_escapes > 0 {
        return LoopSignal::WaitingOnEscapes;
    }
    LoopSignal::Deadlocked
}

// SYNCHRONOUS RUNNER
// ================================================================================================

/// Drives `program` to completion on the calling thread (spec.md §4.7 "Synchronous runner").
/// `Await` escapes are driven on a lazily-created single-thread `tokio` runtime via
/// `Runtime::block_on` — the calling thread blocks until the next one resolves, matching the
/// synchronous contract, while the bridge runtime supplies the reactor/timer driver the
/// escaped future may itself depend on.
pub fn sync_run<T: Send + 'static>(
    program: Program<T>,
    handlers: HandlerSet,
    env: Env,
    store: Store,
    options: ExecutionOptions,
) -> RunResult<T> {
    let program = install_handlers(program, handlers);
    let mut scheduler = Scheduler::new(program.into_any(), env);
    let clock = make_clock(&options, &store);
    let mut conts = ContinuationTable::new();
    let mut cycles: u32 = 0;
    let mut escapes: Escapes = Vec::new();
    let mut bridge: Option<tokio::runtime::Runtime> = None;

    let (outcome, final_env) = loop {
        match drain_ready(&mut scheduler, &store, clock.as_ref(), &mut conts, &options, &mut cycles, escapes.len()) {
            LoopSignal::RootDone(outcome, env) => break (outcome, env),
            LoopSignal::Escape(handle, payload) => escapes.push((handle, payload.future)),
            LoopSignal::WaitingOnTimer(deadline) => {
                if escapes.is_empty() {
                    let now = clock.now_millis();
                    if deadline > now {
                        std::thread::sleep(Duration::from_millis(deadline - now));
                    }
                } else {
                    let rt = bridge.get_or_insert_with(spawn_bridge_runtime);
                    let dur = duration_until(clock.now_millis(), deadline);
                    if let Ok((handle, outcome)) = rt.block_on(tokio::time::timeout(dur, next_escape(&mut escapes))) {
                        scheduler.resume_async_escape(handle, outcome);
                    }
                }
                scheduler.wake_due_timers(clock.now_millis());
            },
            LoopSignal::WaitingOnEscapes => {
                let rt = bridge.get_or_insert_with(spawn_bridge_runtime);
                let (handle, outcome) = rt.block_on(next_escape(&mut escapes));
                scheduler.resume_async_escape(handle, outcome);
            },
            LoopSignal::Deadlocked => break (Err(ExecutionError::Deadlocked), Env::new()),
        }
    };

    RunResult { result: finish_root(outcome), graph: capture_graph(&options, &store), final_env, final_store: store }
}

fn spawn_bridge_runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("failed to start the synchronous runner's background bridge thread")
}

// ASYNC RUNNER
// ================================================================================================

/// Drives `program` to completion on the current async executor (spec.md §4.7 "Async
/// runner"). `Await` escapes are polled in place via [`next_escape`] rather than spawned as
/// separate tasks (see its doc comment for why), so this simply awaits one directly.
pub async fn async_run<T: Send + 'static>(
    program: Program<T>,
    handlers: HandlerSet,
    env: Env,
    store: Store,
    options: ExecutionOptions,
) -> RunResult<T> {
    let program = install_handlers(program, handlers);
    let mut scheduler = Scheduler::new(program.into_any(), env);
    let clock = make_clock(&options, &store);
    let mut conts = ContinuationTable::new();
    let mut cycles: u32 = 0;
    let mut escapes: Escapes = Vec::new();

    let (outcome, final_env) = loop {
        match drain_ready(&mut scheduler, &store, clock.as_ref(), &mut conts, &options, &mut cycles, escapes.len()) {
            LoopSignal::RootDone(outcome, env) => break (outcome, env),
            LoopSignal::Escape(handle, payload) => escapes.push((handle, payload.future)),
            LoopSignal::WaitingOnTimer(deadline) => {
                if escapes.is_empty() {
                    let now = clock.now_millis();
                    if deadline > now {
                        tokio::time::sleep(Duration::from_millis(deadline - now)).await;
                    }
                } else {
                    let dur = duration_until(clock.now_millis(), deadline);
                    if let Ok((handle, outcome)) = tokio::time::timeout(dur, next_escape(&mut escapes)).await {
                        scheduler.resume_async_escape(handle, outcome);
                    }
                }
                scheduler.wake_due_timers(clock.now_millis());
            },
            LoopSignal::WaitingOnEscapes => {
                let (handle, outcome) = next_escape(&mut escapes).await;
                scheduler.resume_async_escape(handle, outcome);
            },
            LoopSignal::Deadlocked => break (Err(ExecutionError::Deadlocked), Env::new()),
        }
    };

    RunResult { result: finish_root(outcome), graph: capture_graph(&options, &store), final_env, final_store: store }
}

//! The VM step loop (spec.md §4.4): drives one task's program from one suspend point to the
//! next — a control node, a handler dispatch, a blocking intrinsic, or an async escape.
//!
//! Grounded on the teacher's `Process::execute_op` dispatch loop (`processor/src/lib.rs`):
//! one big match over the current instruction, mutating the operand stack/continuation stack
//! in place, falling back to a trap/error variant when nothing applies. Here the "operand
//! stack" is the generator's own state and the "instruction" is whatever a single `resume`
//! call yields.

use std::any::Any;
use std::sync::Arc;

use doeff_core::{
    AnyProgram, BoxedEffect, CoreError, Generator, InterceptMode, Node, Resumption, Yielded,
};
use doeff_core::TaskHandle;

use crate::clock::Clock;
use crate::errors::ExecutionError;
use crate::kont::{ContinuationTable, Frame, GraphBuffer, InstalledHandler, InstalledIntercept, ListenBuffer};
use crate::options::ExecutionOptions;
use crate::scheduler::{BlockCond, Outcome, Scheduler, Task, TaskStatus};
use crate::store::Store;

mod intrinsics;

pub(crate) type AnyValue = Box<dyn Any + Send>;

// STEP OUTCOME
// ================================================================================================

/// What one call to [`step_task`] produced.
pub enum StepOutcome {
    /// The task suspended waiting on another task, a future, a semaphore, or a timer.
    /// `task.status`/`task.block` already reflect the wait condition; the caller only needs to
    /// leave the task out of the ready queue until the scheduler wakes it.
    Blocked,
    /// The task ran to completion (or failed) with no further steps possible.
    Done(Outcome),
    /// The task performed `Await`: the one operation allowed to cross the VM/async boundary
    /// (spec.md §4.7). The runner must drive `future` to completion and report the result back
    /// through [`Scheduler::resume_async_escape`].
    Escape(EscapePayload),
}

/// The future a runner must drive to resolve an [`StepOutcome::Escape`].
pub struct EscapePayload {
    pub future: std::pin::Pin<Box<dyn std::future::Future<Output = Outcome> + Send>>,
}

/// One handler invocation currently in flight, so `Delegate`/`Pass` can resume the top-down
/// search exactly where the invoked handler left off instead of restarting from the top
/// (spec.md §4.4.2, "re-performing an effect continues the search outward").
///
/// Pushed when a handler is invoked; popped when that invocation concludes, whether by
/// `Resume`/`Transfer` (settling it) or `Delegate`/`Pass` (continuing the search). This models
/// one level of in-flight dispatch; nested dispatches (a handler body performing a further
/// effect) push their own entry and pop it before this one is reachable again, so the `Vec`
/// naturally behaves as a stack matching the generator nesting.
pub struct PendingDispatch {
    effect: BoxedEffect,
    search_from: usize,
}

/// What to do once one yield has been fully processed.
enum Next {
    Continue(AnyProgram, Resumption),
    Done(Outcome),
    Escape(EscapePayload),
    /// The task has been parked on a wait condition via [`block_task`].
    Blocked,
}

/// What applying a frame to a propagating value/error produced. Every popped frame is
/// consumed exactly once; there is no "pass through without popping" case (spec.md §4.3).
enum FrameResult {
    Value(AnyValue),
    Error(ExecutionError),
    Step(AnyProgram),
}

/// Bundles everything a running step needs beyond the task itself, so helper functions don't
/// have to thread five parameters individually.
struct Ctx<'a> {
    handle: TaskHandle,
    scheduler: &'a mut Scheduler,
    store: &'a Store,
    clock: &'a dyn Clock,
    conts: &'a mut ContinuationTable,
    options: &'a ExecutionOptions,
}

/// Resumes a generator that yielded [`Yielded::Effect`] directly (as opposed to the one-shot
/// `Node::Perform` a combinator-built leaf program yields): the first `resume` call delivers
/// the effect's resolved value as if it had always been the pending input, every call after
/// that is a plain passthrough. This is what lets a hand-written multi-step `Generator` impl
/// perform several effects in sequence and keep going after each one (spec.md §3, "coroutine /
/// generator producer").
struct Primed {
    inner: AnyProgram,
    pending: Option<AnyValue>,
}

impl Generator for Primed {
    fn resume(&mut self, input: Resumption) -> Yielded {
        match self.pending.take() {
            Some(v) => self.inner.resume(Resumption::Value(v)),
            None => self.inner.resume(input),
        }
    }
}

/// A generator that immediately yields `Node::Pure(v)` and is then exhausted. Used to splice a
/// plain value back into the step loop after a combinator side effect (`Map`, a memoised lazy
/// `Ask`) without re-entering whatever generator originally produced it.
struct Immediate(Option<AnyValue>);

impl Generator for Immediate {
    fn resume(&mut self, _input: Resumption) -> Yielded {
        match self.0.take() {
            Some(v) => Yielded::Node(Node::Pure(v)),
            None => Yielded::Raised(CoreError::ProgramExhausted),
        }
    }
}

fn immediate(v: AnyValue) -> AnyProgram {
    Box::new(Immediate(Some(v)))
}

/// Installed as `task.active` whenever a blocking or escaping intrinsic suspends the task:
/// the next `resume` call simply forwards whatever the scheduler eventually delivers
/// (the woken value or a cancellation error) straight back out, re-entering `finish_value`/
/// `finish_error` exactly where the intrinsic left off (spec.md §4.6 "every blocked task has a
/// matching wake path").
struct PassThrough;

impl Generator for PassThrough {
    fn resume(&mut self, input: Resumption) -> Yielded {
        match input {
            Resumption::Value(v) => Yielded::Return(v),
            Resumption::Error(e) => Yielded::Raised(e),
            Resumption::Start => Yielded::Raised(CoreError::ProgramExhausted),
        }
    }
}

/// Parks `task` on `cond`, installing [`PassThrough`] so the next resumption flows straight
/// back into value/error propagation.
pub(crate) fn block_task(task: &mut Task, cond: BlockCond) -> Next {
    task.status = TaskStatus::Blocked;
    task.block = Some(cond);
    task.active = Some(Box::new(PassThrough));
    Next::Blocked
}

/// Marks `task` as having crossed the async boundary via `Await` and hands `future` back to
/// the runner to drive. Installs [`PassThrough`] the same way [`block_task`] does, so the
/// eventual `Scheduler::resume_async_escape` call reconnects into ordinary value/error
/// propagation (spec.md §4.7).
pub(crate) fn escape_task(task: &mut Task, future: EscapePayload) -> Next {
    task.status = TaskStatus::Blocked;
    task.block = Some(BlockCond::AsyncEscape);
    task.active = Some(Box::new(PassThrough));
    Next::Escape(future)
}


#[derive(Debug, thiserror::Error)]
#[error("Delegate/Pass was yielded with no handler dispatch in flight to resume")]
struct DelegateWithoutDispatch;

// STEP LOOP
// ================================================================================================

/// Drives `task` until it blocks, completes, or escapes to async.
///
/// `task` must already have been removed from `scheduler` by the caller (via
/// [`Scheduler::take_task`]) so this function can freely use both at once; the caller is
/// responsible for putting it back via [`Scheduler::put_task`] regardless of the outcome.
#[tracing::instrument(level = "trace", skip_all, fields(task = ?handle))]
pub fn step_task(
    task: &mut Task,
    handle: TaskHandle,
    scheduler: &mut Scheduler,
    store: &Store,
    clock: &dyn Clock,
    conts: &mut ContinuationTable,
    options: &ExecutionOptions,
    cycles: &mut u32,
) -> StepOutcome {
    let mut ctx = Ctx { handle, scheduler, store, clock, conts, options };
    loop {
        *cycles += 1;
        if *cycles > options.max_cycles() {
            return StepOutcome::Done(Err(ExecutionError::CycleLimitExceeded(options.max_cycles())));
        }
        let next = if let Some(err) = task.next_error.take() {
            // A blocked `Wait`/`Gather`/`Race` was woken by a target that failed
            // (`Scheduler::wake_on`); deliver the same unwrapped `ExecutionError` an
            // already-resolved target gets via `outcome_to_next`, instead of resuming the
            // parked `PassThrough` generator through `Resumption::Error`.
            finish_error(task, ctx.conts, err)
        } else if task.cancel_requested {
            // `CancelTask` targeting the task's own handle (`intrinsics::handle_cancel_task`)
            // can't call `Scheduler::cancel_task` directly — this task is held out of the
            // table for the duration of stepping — so it just raises the flag and lets the
            // next cycle unwind the continuation stack with the cancellation error.
            task.cancel_requested = false;
            finish_error(task, ctx.conts, ExecutionError::TaskCancelled)
        } else {
            let mut active =
                task.active.take().expect("step_task invoked on a task with no program to run");
            let input = std::mem::replace(&mut task.next_input, Resumption::Start);
            let yielded = active.resume(input);
            let yielded = apply_intercepts(task, yielded);

            match yielded {
                Yielded::Return(v) => finish_value(task, ctx.conts, v),
                Yielded::Raised(e) => finish_error(task, ctx.conts, ExecutionError::Core(e)),
                Yielded::Node(node) => eval_node(task, &mut ctx, node),
                Yielded::Effect(effect) => {
                    task.k.push(Frame::Return(Box::new(move |v: AnyValue| -> AnyProgram {
                        Box::new(Primed { inner: active, pending: Some(v) })
                    })));
                    let from = task.k.len();
                    dispatch_effect(task, &mut ctx, effect, from)
                },
            }
        };

        match next {
            Next::Continue(prog, input) => {
                task.active = Some(prog);
                task.next_input = input;
            },
            Next::Done(outcome) => return StepOutcome::Done(outcome),
            Next::Escape(payload) => return StepOutcome::Escape(payload),
            Next::Blocked => return StepOutcome::Blocked,
        }
    }
}

fn eval_node(task: &mut Task, ctx: &mut Ctx<'_>, node: Node) -> Next {
    match node {
        Node::Pure(v) => finish_value(task, ctx.conts, v),
        Node::Perform(effect) => {
            let from = task.k.len();
            dispatch_effect(task, ctx, effect, from)
        },
        Node::Call(f) => Next::Continue(f(), Resumption::Start),
        Node::Eval { expr, handlers } => {
            for h in handlers.into_iter().rev() {
                task.k.push(Frame::Handler(InstalledHandler::new(h)));
            }
            Next::Continue(expr, Resumption::Start)
        },
        Node::Map { src, f } => {
            task.k.push(Frame::Return(Box::new(move |v: AnyValue| -> AnyProgram { immediate(f(v)) })));
            Next::Continue(src, Resumption::Start)
        },
        Node::FlatMap { src, f } => {
            task.k.push(Frame::Return(f));
            Next::Continue(src, Resumption::Start)
        },
        Node::WithHandler { handler, body } => {
            task.k.push(Frame::Handler(InstalledHandler::new(handler)));
            Next::Continue(body, Resumption::Start)
        },
        Node::WithIntercept { intercept, body } => {
            task.k.push(Frame::Intercept(InstalledIntercept::new(intercept)));
            Next::Continue(body, Resumption::Start)
        },
        Node::Resume { k, v } => match ctx.conts.take(&k) {
            Ok(segment) => {
                task.k.extend_from(segment);
                conclude_dispatch(task);
                finish_value(task, ctx.conts, v)
            },
            Err(e) => finish_error(task, ctx.conts, e),
        },
        Node::Transfer { k, v } => match ctx.conts.take(&k) {
            Ok(segment) => {
                task.k.replace_frames(segment);
                conclude_dispatch(task);
                finish_value(task, ctx.conts, v)
            },
            Err(e) => finish_error(task, ctx.conts, e),
        },
        Node::Delegate | Node::Pass => match conclude_dispatch(task) {
            Some(pending) => dispatch_effect(task, ctx, pending.effect, pending.search_from),
            None => finish_error(task, ctx.conts, ExecutionError::User(Arc::new(DelegateWithoutDispatch))),
        },
    }
}

fn conclude_dispatch(task: &mut Task) -> Option<PendingDispatch> {
    task.suppressed_handlers.pop();
    task.dispatch_stack.pop()
}

// VALUE / ERROR PROPAGATION
// ================================================================================================

fn finish_value(task: &mut Task, conts: &mut ContinuationTable, mut value: AnyValue) -> Next {
    loop {
        match task.k.pop() {
            None => return Next::Done(Ok(Arc::from(value))),
            Some(frame) => match apply_frame_value(task, frame, value) {
                FrameResult::Value(v) => value = v,
                FrameResult::Error(e) => return finish_error(task, conts, e),
                FrameResult::Step(prog) => return Next::Continue(prog, Resumption::Start),
            },
        }
    }
}

fn finish_error(task: &mut Task, conts: &mut ContinuationTable, mut err: ExecutionError) -> Next {
    loop {
        match task.k.pop() {
            None => return Next::Done(Err(err)),
            Some(frame) => match apply_frame_error(task, frame, err) {
                FrameResult::Value(v) => return finish_value(task, conts, v),
                FrameResult::Error(e) => err = e,
                FrameResult::Step(prog) => return Next::Continue(prog, Resumption::Start),
            },
        }
    }
}

fn apply_frame_value(task: &mut Task, frame: Frame, value: AnyValue) -> FrameResult {
    match frame {
        Frame::Return(f) => FrameResult::Step(f(value)),
        Frame::Handler(h) => {
            if task.suppressed_handlers.last() == Some(&h.id) {
                task.suppressed_handlers.pop();
            }
            match h.spec.return_clause {
                Some(rc) => FrameResult::Step(rc(value)),
                None => FrameResult::Value(value),
            }
        },
        Frame::Intercept(ic) => {
            if task.suppressed_intercepts.last() == Some(&ic.id) {
                task.suppressed_intercepts.pop();
            }
            FrameResult::Value(value)
        },
        Frame::Safe => FrameResult::Value(Box::new(Ok::<AnyValue, ExecutionError>(value))),
        Frame::LocalRestore(old_env) => {
            task.env = old_env;
            FrameResult::Value(value)
        },
        Frame::Listen(buffer) => {
            let entries = buffer.entries.lock().clone();
            FrameResult::Value(Box::new(crate::effects::writer::ListenResult { value, entries }))
        },
        Frame::GraphScope(buffer) => {
            let nodes = buffer.nodes.lock().clone();
            FrameResult::Value(Box::new(crate::effects::trace::GraphCapture { value, nodes }))
        },
    }
}

fn apply_frame_error(task: &mut Task, frame: Frame, err: ExecutionError) -> FrameResult {
    match frame {
        // A `Return` frame has no catch logic of its own: it only ever runs on the value path
        // (`FlatMap`/`Call`'s continuation), so an error in flight just skips past it.
        Frame::Return(_) => FrameResult::Error(err),
        Frame::Handler(h) => {
            if task.suppressed_handlers.last() == Some(&h.id) {
                task.suppressed_handlers.pop();
            }
            FrameResult::Error(err)
        },
        Frame::Intercept(ic) => {
            if task.suppressed_intercepts.last() == Some(&ic.id) {
                task.suppressed_intercepts.pop();
            }
            FrameResult::Error(err)
        },
        Frame::Safe => FrameResult::Value(Box::new(Err::<AnyValue, ExecutionError>(err))),
        Frame::LocalRestore(old_env) => {
            task.env = old_env;
            FrameResult::Error(err)
        },
        Frame::Listen(_buffer) => FrameResult::Error(err),
        Frame::GraphScope(_buffer) => FrameResult::Error(err),
    }
}

// INTERCEPTS
// ================================================================================================

/// Walks the continuation stack top-down for installed `Intercept` frames, chaining each
/// matching observer over `yielded` before normal processing continues (spec.md §4.4.2).
///
/// `TypeFilter::All` intercepts see every yield; a concrete filter only ever matches
/// `Yielded::Effect` (there is no effect payload to test a `Node`/`Return`/`Raised` yield
/// against).
fn apply_intercepts(task: &mut Task, mut yielded: Yielded) -> Yielded {
    let ids: Vec<u64> = task
        .k
        .frames()
        .iter()
        .filter_map(|f| match f {
            Frame::Intercept(ic) => Some(ic.id),
            _ => None,
        })
        .collect();
    for id in ids.into_iter().rev() {
        if task.suppressed_intercepts.contains(&id) {
            continue;
        }
        let spec = task.k.frames().iter().find_map(|f| match f {
            Frame::Intercept(ic) if ic.id == id => Some(ic.spec.clone()),
            _ => None,
        });
        let Some(spec) = spec else { continue };
        let matches = match (&spec.mode, &yielded) {
            (_, Yielded::Effect(e)) => spec.filter.matches(e.as_ref()),
            _ => matches!(spec.filter, doeff_core::TypeFilter::All),
        };
        if !matches {
            continue;
        }
        task.suppressed_intercepts.push(id);
        yielded = (spec.observer)(yielded);
        task.suppressed_intercepts.retain(|&x| x != id);
        if spec.mode == InterceptMode::Observe {
            // Observe-mode wrappers are expected (by convention, enforced by the
            // `with_intercept` constructor in `lib.rs`) to hand `yielded` back unchanged; we
            // still honor whatever they return rather than second-guessing a Transform-shaped
            // misuse.
        }
    }
    yielded
}

// EFFECT DISPATCH
// ================================================================================================

/// Searches `task.k` from just below index `search_from` downward for the first installed,
/// non-suppressed handler whose filter matches `effect`, invokes it if found, and falls back
/// to the built-in standard-effect behavior otherwise (spec.md §4.4.2, §6).
fn dispatch_effect(task: &mut Task, ctx: &mut Ctx<'_>, effect: BoxedEffect, search_from: usize) -> Next {
    let mut found: Option<(usize, u64, doeff_core::HandlerFn)> = None;
    {
        let frames = task.k.frames();
        let upper = search_from.min(frames.len());
        for i in (0..upper).rev() {
            if let Frame::Handler(h) = &frames[i] {
                if task.suppressed_handlers.contains(&h.id) {
                    continue;
                }
                if h.spec.filter.matches(effect.as_ref()) {
                    found = Some((i, h.id, h.spec.handler.clone()));
                    break;
                }
            }
        }
    }
    match found {
        Some((i, id, handler_fn)) => {
            let segment = task.k.split_off_above(i + 1);
            let (_, k_handle) = ctx.conts.capture(segment);
            task.suppressed_handlers.push(id);
            task.dispatch_stack.push(PendingDispatch { effect: effect.clone(), search_from: i });
            let program = handler_fn(effect, k_handle);
            Next::Continue(program, Resumption::Start)
        },
        None => intrinsics::dispatch(task, ctx, effect),
    }
}

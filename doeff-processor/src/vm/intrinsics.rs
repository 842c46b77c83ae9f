//! The built-in behavior for the standard effect surface (spec.md §6), reached only once the
//! user-installed handler stack has had a chance to match or `Delegate` past an effect. Every
//! arm here recognizes one concrete effect type via `downcast_ref` and is otherwise a thin
//! wrapper around `Env`/`Store`/`Scheduler`/`Clock`.

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

use doeff_core::BoxedEffect;

use crate::effects::{
    AcquireSemaphore, Annotate, Ask, Await, CacheGet, CachePut, CancelTask, CaptureGraph,
    CreateFuture, CreateSemaphore, Delay, Gather, Get, GetTime, GraphNode, Listen, LogEntry, Local,
    Modify, Put, Race, RaceOutcome, ReleaseSemaphore, ResolvePromise, Safe, Snapshot, Spawn, Step,
    StructuredLog, Tell, Wait, WaitUntil, Waitable,
};
use crate::env::{Binding, RESERVED_CACHE_KEY, RESERVED_GRAPH_KEY, RESERVED_LOG_KEY};
use crate::errors::ExecutionError;
use crate::kont::{Frame, GraphBuffer, ListenBuffer};
use crate::scheduler::{BlockCond, Outcome, Task};
use crate::store::Slot;

use super::{block_task, escape_task, finish_error, finish_value, immediate, AnyValue, Ctx, EscapePayload, Next};

/// The writer log never grows unbounded (spec.md §4.2 "bounded log"); once it crosses this many
/// entries the oldest ones are dropped.
const MAX_LOG_ENTRIES: usize = 10_000;

pub fn dispatch(task: &mut Task, ctx: &mut Ctx<'_>, effect: BoxedEffect) -> Next {
    macro_rules! try_dispatch {
        ($ty:ty, $handler:expr) => {
            if let Some(e) = effect.downcast_ref::<$ty>() {
                return $handler(task, ctx, e);
            }
        };
    }

    try_dispatch!(Ask, handle_ask);
    try_dispatch!(Get, handle_get);
    try_dispatch!(Put, handle_put);
    try_dispatch!(Modify, handle_modify);
    try_dispatch!(Tell, handle_tell);
    try_dispatch!(StructuredLog, handle_structured_log);
    try_dispatch!(CacheGet, handle_cache_get);
    try_dispatch!(CachePut, handle_cache_put);
    try_dispatch!(Step, handle_step);
    try_dispatch!(Annotate, handle_annotate);
    try_dispatch!(Snapshot, handle_snapshot);
    try_dispatch!(Wait, handle_wait);
    try_dispatch!(Gather, handle_gather);
    try_dispatch!(Race, handle_race);
    try_dispatch!(CancelTask, handle_cancel_task);
    try_dispatch!(CreateSemaphore, handle_create_semaphore);
    try_dispatch!(AcquireSemaphore, handle_acquire_semaphore);
    try_dispatch!(ReleaseSemaphore, handle_release_semaphore);
    try_dispatch!(Delay, handle_delay);
    try_dispatch!(WaitUntil, handle_wait_until);
    try_dispatch!(GetTime, handle_get_time);
    try_dispatch!(CreateFuture, handle_create_future);
    try_dispatch!(ResolvePromise, handle_resolve_promise);

    // Every remaining standard effect takes ownership of a program/future it carries, so it
    // can't be matched through the shared `&dyn Effect` the macro above downcasts against
    // without also borrowing `effect` mutably through its take-once cell; handled individually.
    if let Some(e) = effect.downcast_ref::<Local>() {
        return handle_local(task, e);
    }
    if let Some(e) = effect.downcast_ref::<Safe>() {
        return handle_safe(task, e);
    }
    if let Some(e) = effect.downcast_ref::<Listen>() {
        return handle_listen(task, e);
    }
    if let Some(e) = effect.downcast_ref::<CaptureGraph>() {
        return handle_capture_graph(task, e);
    }
    if let Some(e) = effect.downcast_ref::<Spawn>() {
        return handle_spawn(task, ctx, e);
    }
    if let Some(e) = effect.downcast_ref::<Await>() {
        return handle_await(task, e);
    }

    finish_error(task, ctx.conts, ExecutionError::UnhandledEffect(effect.tag()))
}

// READER
// ================================================================================================

fn handle_ask(task: &mut Task, ctx: &mut Ctx<'_>, e: &Ask) -> Next {
    match task.env.lookup(&e.key).cloned() {
        None => finish_error(task, ctx.conts, ExecutionError::MissingEnvKey { key: e.key.clone() }),
        Some(Binding::Value(v)) => finish_value(task, ctx.conts, Box::new(v)),
        Some(Binding::Lazy(lazy)) => {
            if let Some(v) = lazy.cached() {
                return finish_value(task, ctx.conts, Box::new(v));
            }
            if let Err(err) = lazy.begin_evaluating(&e.key) {
                return finish_error(task, ctx.conts, err);
            }
            let program = lazy
                .take_program()
                .expect("Ask: lazy binding has neither a cached value nor an unevaluated program");
            task.k.push(Frame::Return(Box::new(move |v: AnyValue| -> doeff_core::AnyProgram {
                let arc: Arc<dyn std::any::Any + Send> = Arc::from(v);
                lazy.memoise(arc.clone());
                immediate(Box::new(arc))
            })));
            Next::Continue(program, doeff_core::Resumption::Start)
        },
    }
}

fn handle_local(task: &mut Task, e: &Local) -> Next {
    let body = e.take_body().expect("Local: body already taken");
    let old_env = task.env.clone();
    task.env = task.env.overlay(e.overrides.clone());
    task.k.push(Frame::LocalRestore(old_env));
    Next::Continue(body, doeff_core::Resumption::Start)
}

// STATE
// ================================================================================================

fn handle_get(task: &mut Task, ctx: &mut Ctx<'_>, e: &Get) -> Next {
    match ctx.store.get_raw(&e.key) {
        Some(slot) => finish_value(task, ctx.conts, Box::new(slot)),
        None => finish_error(task, ctx.conts, ExecutionError::MissingStateKey { key: e.key.clone() }),
    }
}

fn handle_put(task: &mut Task, ctx: &mut Ctx<'_>, e: &Put) -> Next {
    ctx.store.put_raw(e.key.clone(), e.value.clone());
    finish_value(task, ctx.conts, Box::new(()))
}

fn handle_modify(task: &mut Task, ctx: &mut Ctx<'_>, e: &Modify) -> Next {
    let updater = e.take_updater().expect("Modify: updater already taken");
    let key = e.key.clone();
    match ctx.store.modify_raw(&key, updater) {
        Ok(slot) => finish_value(task, ctx.conts, Box::new(slot)),
        Err(err) => finish_error(task, ctx.conts, ExecutionError::ModifyFailed { key, source: Box::new(err) }),
    }
}

fn handle_safe(task: &mut Task, e: &Safe) -> Next {
    let body = e.take_body().expect("Safe: body already taken");
    task.k.push(Frame::Safe);
    Next::Continue(body, doeff_core::Resumption::Start)
}

// WRITER
// ================================================================================================

fn push_log_entry(task: &mut Task, ctx: &mut Ctx<'_>, entry: LogEntry) {
    let _ = ctx.store.modify::<Vec<LogEntry>, std::convert::Infallible>(
        RESERVED_LOG_KEY,
        |cur| {
            let mut log = cur.cloned().unwrap_or_default();
            log.push(entry.clone());
            if log.len() > MAX_LOG_ENTRIES {
                let overflow = log.len() - MAX_LOG_ENTRIES;
                log.drain(0..overflow);
            }
            Ok(log)
        },
    );
    for frame in task.k.frames_mut() {
        if let Frame::Listen(buffer) = frame {
            buffer.entries.lock().push(entry.clone());
        }
    }
}

fn handle_tell(task: &mut Task, ctx: &mut Ctx<'_>, e: &Tell) -> Next {
    push_log_entry(
        task,
        ctx,
        LogEntry { value: Some(e.value.clone()), fields: HashMap::new() },
    );
    finish_value(task, ctx.conts, Box::new(()))
}

fn handle_structured_log(task: &mut Task, ctx: &mut Ctx<'_>, e: &StructuredLog) -> Next {
    push_log_entry(
        task,
        ctx,
        LogEntry { value: None, fields: e.fields.clone() },
    );
    finish_value(task, ctx.conts, Box::new(()))
}

fn handle_listen(task: &mut Task, e: &Listen) -> Next {
    let body = e.take_body().expect("Listen: body already taken");
    task.k.push(Frame::Listen(ListenBuffer::default()));
    Next::Continue(body, doeff_core::Resumption::Start)
}

// CACHE
// ================================================================================================

fn handle_cache_get(task: &mut Task, ctx: &mut Ctx<'_>, e: &CacheGet) -> Next {
    let map = ctx.store.get::<HashMap<String, Slot>>(RESERVED_CACHE_KEY);
    match map.ok().and_then(|m| m.get(&e.key).cloned()) {
        Some(slot) => finish_value(task, ctx.conts, Box::new(slot)),
        None => finish_error(task, ctx.conts, ExecutionError::CacheMiss),
    }
}

fn handle_cache_put(task: &mut Task, ctx: &mut Ctx<'_>, e: &CachePut) -> Next {
    let _ = ctx.store.modify::<HashMap<String, Slot>, std::convert::Infallible>(RESERVED_CACHE_KEY, |cur| {
        let mut map = cur.cloned().unwrap_or_default();
        map.insert(e.key.clone(), e.value.clone());
        Ok(map)
    });
    finish_value(task, ctx.conts, Box::new(()))
}

// TRACE
// ================================================================================================

fn handle_step(task: &mut Task, ctx: &mut Ctx<'_>, e: &Step) -> Next {
    let node = GraphNode { name: e.name.clone(), meta: e.meta.clone() };
    let _ = ctx.store.modify::<Vec<GraphNode>, std::convert::Infallible>(RESERVED_GRAPH_KEY, |cur| {
        let mut graph = cur.cloned().unwrap_or_default();
        graph.push(node.clone());
        Ok(graph)
    });
    for frame in task.k.frames_mut() {
        if let Frame::GraphScope(buffer) = frame {
            buffer.nodes.lock().push(node.clone());
        }
    }
    finish_value(task, ctx.conts, Box::new(()))
}

fn handle_annotate(task: &mut Task, ctx: &mut Ctx<'_>, e: &Annotate) -> Next {
    let extra: Vec<(String, String)> =
        e.fields.iter().map(|(k, v)| (k.clone(), format!("<{:?}>", v.as_ref().type_id()))).collect();
    let extra_for_store = extra.clone();
    let _ = ctx.store.modify::<Vec<GraphNode>, std::convert::Infallible>(RESERVED_GRAPH_KEY, move |cur| {
        let mut graph = cur.cloned().unwrap_or_default();
        if let Some(last) = graph.last_mut() {
            last.meta.extend(extra_for_store.clone());
        }
        Ok(graph)
    });
    for frame in task.k.frames_mut() {
        if let Frame::GraphScope(buffer) = frame {
            if let Some(last) = buffer.nodes.lock().last_mut() {
                last.meta.extend(extra.clone());
            }
        }
    }
    finish_value(task, ctx.conts, Box::new(()))
}

fn handle_snapshot(task: &mut Task, ctx: &mut Ctx<'_>, _e: &Snapshot) -> Next {
    let graph = ctx.store.get::<Vec<GraphNode>>(RESERVED_GRAPH_KEY).unwrap_or_default();
    finish_value(task, ctx.conts, Box::new(graph))
}

fn handle_capture_graph(task: &mut Task, e: &CaptureGraph) -> Next {
    let body = e.take_body().expect("CaptureGraph: body already taken");
    task.k.push(Frame::GraphScope(GraphBuffer::default()));
    Next::Continue(body, doeff_core::Resumption::Start)
}

// SCHEDULER
// ================================================================================================

fn outcome_to_next(task: &mut Task, ctx: &mut Ctx<'_>, outcome: Outcome) -> Next {
    match outcome {
        Ok(v) => finish_value(task, ctx.conts, Box::new(v)),
        Err(e) => finish_error(task, ctx.conts, e),
    }
}

fn handle_spawn(task: &mut Task, ctx: &mut Ctx<'_>, e: &Spawn) -> Next {
    let program = e.take_program().expect("Spawn: program already taken");
    let child_env = task.env.clone();
    let handle = ctx.scheduler.spawn(program, child_env);
    finish_value(task, ctx.conts, Box::new(handle))
}

fn handle_wait(task: &mut Task, ctx: &mut Ctx<'_>, e: &Wait) -> Next {
    match ctx.scheduler.block_on_single(ctx.handle, e.target) {
        Ok(outcome) => outcome_to_next(task, ctx, outcome),
        Err(cond) => block_task(task, cond),
    }
}

/// Always awaits every target before surfacing a result, returning the first (by input order)
/// error if any target failed (spec.md §9 default `Gather` policy). `Gather::cancel_on_first_error`
/// is accepted and recorded on the effect but not yet enforced early — see DESIGN.md.
fn handle_gather(task: &mut Task, ctx: &mut Ctx<'_>, e: &Gather) -> Next {
    match ctx.scheduler.block_on_set(ctx.handle, e.targets.clone(), false) {
        Ok(results) => {
            let mut values = Vec::with_capacity(results.len());
            for (_, outcome) in results {
                match outcome {
                    Ok(v) => values.push(v),
                    Err(err) => return finish_error(task, ctx.conts, err),
                }
            }
            finish_value(task, ctx.conts, Box::new(values))
        },
        Err(cond) => block_task(task, cond),
    }
}

fn handle_race(task: &mut Task, ctx: &mut Ctx<'_>, e: &Race) -> Next {
    match ctx.scheduler.block_on_set(ctx.handle, e.targets.clone(), true) {
        Ok(mut results) => {
            let (first_index, outcome) = results.remove(0);
            match outcome {
                Ok(value) => {
                    let rest: Vec<Waitable> =
                        e.targets.iter().enumerate().filter(|(i, _)| *i != first_index).map(|(_, t)| *t).collect();
                    finish_value(task, ctx.conts, Box::new(RaceOutcome { first_index, value, rest }))
                },
                Err(err) => finish_error(task, ctx.conts, err),
            }
        },
        Err(cond) => block_task(task, cond),
    }
}

fn handle_cancel_task(task: &mut Task, ctx: &mut Ctx<'_>, e: &CancelTask) -> Next {
    if e.target == ctx.handle {
        task.cancel_requested = true;
    } else {
        ctx.scheduler.cancel_task(e.target);
    }
    finish_value(task, ctx.conts, Box::new(()))
}

fn handle_create_semaphore(task: &mut Task, ctx: &mut Ctx<'_>, e: &CreateSemaphore) -> Next {
    let handle = ctx.scheduler.create_semaphore(e.permits);
    finish_value(task, ctx.conts, Box::new(handle))
}

fn handle_acquire_semaphore(task: &mut Task, ctx: &mut Ctx<'_>, e: &AcquireSemaphore) -> Next {
    match ctx.scheduler.acquire_semaphore(ctx.handle, e.semaphore) {
        Ok(()) => finish_value(task, ctx.conts, Box::new(())),
        Err(cond) => block_task(task, cond),
    }
}

fn handle_release_semaphore(task: &mut Task, ctx: &mut Ctx<'_>, e: &ReleaseSemaphore) -> Next {
    ctx.scheduler.release_semaphore(e.semaphore);
    finish_value(task, ctx.conts, Box::new(()))
}

fn handle_delay(task: &mut Task, ctx: &mut Ctx<'_>, e: &Delay) -> Next {
    if e.duration.is_zero() {
        return finish_value(task, ctx.conts, Box::new(()));
    }
    let deadline_millis = ctx.clock.now_millis() + e.duration.as_millis() as u64;
    block_task(task, BlockCond::Timer { deadline_millis })
}

fn handle_wait_until(task: &mut Task, ctx: &mut Ctx<'_>, e: &WaitUntil) -> Next {
    if ctx.clock.now_millis() >= e.deadline_millis {
        return finish_value(task, ctx.conts, Box::new(()));
    }
    block_task(task, BlockCond::Timer { deadline_millis: e.deadline_millis })
}

fn handle_get_time(task: &mut Task, ctx: &mut Ctx<'_>, _e: &GetTime) -> Next {
    finish_value(task, ctx.conts, Box::new(ctx.clock.now_millis()))
}

fn handle_create_future(task: &mut Task, ctx: &mut Ctx<'_>, _e: &CreateFuture) -> Next {
    let (future, promise) = ctx.scheduler.create_future();
    finish_value(task, ctx.conts, Box::new((future, promise)))
}

fn handle_resolve_promise(task: &mut Task, ctx: &mut Ctx<'_>, e: &ResolvePromise) -> Next {
    let outcome = e.take_outcome().expect("ResolvePromise: outcome already taken");
    ctx.scheduler.resolve_promise(e.promise, outcome);
    finish_value(task, ctx.conts, Box::new(()))
}

fn handle_await(task: &mut Task, e: &Await) -> Next {
    let future = e.take_future().expect("Await: future already taken");
    escape_task(task, EscapePayload { future })
}

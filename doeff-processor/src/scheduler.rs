use std::any::Any;
use std::collections::VecDeque;
use std::sync::Arc;

use doeff_core::{AnyProgram, FutureHandle, PromiseHandle, Resumption, SemaphoreHandle, Slot, TaskHandle};

use crate::env::Env;
use crate::errors::ExecutionError;
use crate::kont::Kontinuation;

/// The outcome a waiter is eventually fed, stored once and shared by every waiter (spec.md §3
/// "Task").
pub type Outcome = Result<Arc<dyn Any + Send>, ExecutionError>;

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum TaskStatus {
    Ready,
    Running,
    Blocked,
    Done,
}

/// What a blocked task is waiting on (spec.md §3 "Blocked(cond)").
pub enum BlockCond {
    SingleTask(TaskHandle),
    SingleFuture(FutureHandle),
    /// `Gather`/`Race` over a mixed set of targets. `race` distinguishes "first one wins" from
    /// "wait for all, surface first error". `targets[i]`/`collected[i]` are index-aligned with
    /// the original call order, so `Gather` can preserve it (spec.md §8 "Gather preserves
    /// order").
    Set { targets: Vec<super::effects::Waitable>, collected: Vec<Option<Outcome>>, race: bool },
    Semaphore(SemaphoreHandle),
    Timer { deadline_millis: u64 },
    AsyncEscape,
}

/// One cooperatively scheduled task (spec.md §3 "Task — a tuple (control, E, K, status)").
pub struct Task {
    pub active: Option<AnyProgram>,
    pub next_input: Resumption,
    pub env: Env,
    pub k: Kontinuation,
    pub status: TaskStatus,
    pub block: Option<BlockCond>,
    pub result: Option<Outcome>,
    pub cancel_requested: bool,
    /// Set by [`Scheduler::wake_on`] when the target a blocked `Wait` was woken by failed, so
    /// `step_task` can deliver it to `finish_error` directly on the next cycle — the same
    /// unwrapped `ExecutionError` an already-resolved `Wait` gets via `outcome_to_next`, rather
    /// than round-tripping through `Resumption::Error`/`CoreError::User`.
    pub next_error: Option<ExecutionError>,
    /// Tasks registered to be woken once this task reaches `Done`.
    pub waiters: Vec<TaskHandle>,
    /// Ids of handler frames currently "running" (their own closure is on the active path),
    /// so dispatch started while they are on this stack skips them (spec.md §4.5 "no
    /// re-entrancy into self").
    pub suppressed_handlers: Vec<u64>,
    /// Same guard for intercept frames (spec.md §4.4.2 "re-entrancy is prevented").
    pub suppressed_intercepts: Vec<u64>,
    /// One entry per handler invocation currently in flight, so `Delegate`/`Pass` can resume
    /// the top-down search exactly where the invoked handler left off (spec.md §4.4.2).
    pub dispatch_stack: Vec<crate::vm::PendingDispatch>,
}

impl Task {
    fn new(active: AnyProgram, env: Env) -> Self {
        Task {
            active: Some(active),
            next_input: Resumption::Start,
            env,
            k: Kontinuation::new(),
            status: TaskStatus::Ready,
            block: None,
            result: None,
            cancel_requested: false,
            next_error: None,
            waiters: Vec::new(),
            suppressed_handlers: Vec::new(),
            suppressed_intercepts: Vec::new(),
            dispatch_stack: Vec::new(),
        }
    }
}

/// A FIFO-fair semaphore (spec.md §4.6). `available` never leaves 0 while waiters are queued:
/// a release hands the permit directly to the head waiter instead of incrementing the counter.
#[derive(Default)]
pub struct SemaphoreState {
    pub available: u32,
    pub waiters: VecDeque<TaskHandle>,
}

/// A single-fire value slot written by exactly one `Promise`/producer and read by any number
/// of `Wait`ers (spec.md §4.1).
#[derive(Default)]
pub struct FutureState {
    pub result: Option<Outcome>,
    pub waiters: Vec<TaskHandle>,
}

/// Generation-stamped slot table shared by tasks, futures, and semaphores.
#[derive(Default)]
struct SlotTable<T> {
    entries: Vec<Option<T>>,
    generations: Vec<u32>,
}

impl<T> SlotTable<T> {
    fn insert(&mut self, value: T) -> Slot {
        for (i, slot) in self.entries.iter_mut().enumerate() {
            if slot.is_none() {
                *slot = Some(value);
                return Slot::new(i as u32, self.generations[i]);
            }
        }
        self.entries.push(Some(value));
        self.generations.push(0);
        Slot::new((self.entries.len() - 1) as u32, 0)
    }

    fn get(&self, slot: Slot) -> Option<&T> {
        if self.generations.get(slot.index() as usize).copied() != Some(slot.generation()) {
            return None;
        }
        self.entries.get(slot.index() as usize).and_then(|e| e.as_ref())
    }

    fn get_mut(&mut self, slot: Slot) -> Option<&mut T> {
        if self.generations.get(slot.index() as usize).copied() != Some(slot.generation()) {
            return None;
        }
        self.entries.get_mut(slot.index() as usize).and_then(|e| e.as_mut())
    }

    fn remove(&mut self, slot: Slot) {
        if self.generations.get(slot.index() as usize).copied() == Some(slot.generation()) {
            if let Some(e) = self.entries.get_mut(slot.index() as usize) {
                *e = None;
                self.generations[slot.index() as usize] = self.generations[slot.index() as usize].wrapping_add(1);
            }
        }
    }

    /// Removes and returns the occupant without bumping its generation, leaving the slot
    /// reserved for [`SlotTable::put_back`]. Used to step a task without holding two mutable
    /// borrows of the owning table at once (spec.md §4.4 step loop).
    fn take(&mut self, slot: Slot) -> Option<T> {
        if self.generations.get(slot.index() as usize).copied() != Some(slot.generation()) {
            return None;
        }
        self.entries.get_mut(slot.index() as usize).and_then(|e| e.take())
    }

    /// Restores a value previously removed by [`SlotTable::take`] into the same slot.
    fn put_back(&mut self, slot: Slot, value: T) {
        if let Some(e) = self.entries.get_mut(slot.index() as usize) {
            *e = Some(value);
        }
    }
}

/// Owns every task, future, and semaphore of one top-level run, plus the FIFO ready queue
/// (spec.md §4.6 "Model"). `doeff-processor::vm` steps individual tasks; `Scheduler` decides
/// which one runs next and wires up blocking/waking.
pub struct Scheduler {
    tasks: SlotTable<Task>,
    futures: SlotTable<FutureState>,
    semaphores: SlotTable<SemaphoreState>,
    ready: VecDeque<TaskHandle>,
    pub root: TaskHandle,
}

impl Scheduler {
    pub fn new(root_program: AnyProgram, root_env: Env) -> Self {
        let mut tasks = SlotTable::default();
        let root_slot = tasks.insert(Task::new(root_program, root_env));
        let root = TaskHandle::from_slot(root_slot);
        let mut ready = VecDeque::new();
        ready.push_back(root);
        Scheduler { tasks, futures: SlotTable::default(), semaphores: SlotTable::default(), ready, root }
    }

    pub fn task(&self, handle: TaskHandle) -> Option<&Task> {
        self.tasks.get(handle.slot())
    }

    pub fn task_mut(&mut self, handle: TaskHandle) -> Option<&mut Task> {
        self.tasks.get_mut(handle.slot())
    }

    /// Removes `handle`'s task from the table so the caller can step it while still holding
    /// `&mut Scheduler` for the intrinsic effects that need it (spawn, wait, semaphores, ...).
    /// Must be paired with [`Scheduler::put_task`] once stepping finishes.
    pub fn take_task(&mut self, handle: TaskHandle) -> Option<Task> {
        self.tasks.take(handle.slot())
    }

    /// Restores a task previously removed by [`Scheduler::take_task`].
    pub fn put_task(&mut self, handle: TaskHandle, task: Task) {
        self.tasks.put_back(handle.slot(), task);
    }

    pub fn next_ready(&mut self) -> Option<TaskHandle> {
        self.ready.pop_front()
    }

    pub fn has_ready(&self) -> bool {
        !self.ready.is_empty()
    }

    pub fn is_idle(&self) -> bool {
        self.ready.is_empty()
    }

    pub fn requeue(&mut self, handle: TaskHandle) {
        if let Some(t) = self.tasks.get_mut(handle.slot()) {
            t.status = TaskStatus::Ready;
        }
        self.ready.push_back(handle);
    }

    /// Spawns `program` as a new task, sharing the given snapshot of env/store (the store
    /// itself is handled by the caller cloning via `Store::snapshot`; here we only take the
    /// already-snapshotted `Env`).
    pub fn spawn(&mut self, program: AnyProgram, env: Env) -> TaskHandle {
        let slot = self.tasks.insert(Task::new(program, env));
        let handle = TaskHandle::from_slot(slot);
        self.ready.push_back(handle);
        handle
    }

    /// Creates a future/promise pair sharing one underlying slot: `FutureHandle` and
    /// `PromiseHandle` are just differently-typed views over it (read side vs. write side).
    pub fn create_future(&mut self) -> (FutureHandle, PromiseHandle) {
        let slot = self.futures.insert(FutureState::default());
        (FutureHandle::from_slot(slot), PromiseHandle::from_slot(slot))
    }

    /// Resolves the future underlying `promise`. A second resolution of the same promise is a
    /// no-op, since the slot's result is already set.
    pub fn resolve_promise(&mut self, promise: PromiseHandle, outcome: Outcome) {
        let handle = FutureHandle::from_slot(promise.slot());
        if self.future_result(handle).is_some() {
            return;
        }
        self.complete_future(handle, outcome);
    }

    pub fn create_semaphore(&mut self, permits: u32) -> SemaphoreHandle {
        SemaphoreHandle::from_slot(self.semaphores.insert(SemaphoreState { available: permits, waiters: VecDeque::new() }))
    }

    /// Marks `handle` done with `outcome`, waking every registered waiter (spec.md §3 "every
    /// `Blocked(cond)` task has a matching wake path; every wake path removes exactly one
    /// waiter").
    pub fn complete_task(&mut self, handle: TaskHandle, outcome: Outcome) {
        let waiters = match self.tasks.get_mut(handle.slot()) {
            Some(t) => {
                t.status = TaskStatus::Done;
                t.result = Some(outcome.clone());
                std::mem::take(&mut t.waiters)
            },
            None => return,
        };
        for waiter in waiters {
            self.wake_on_task(waiter, handle, outcome.clone());
        }
    }

    pub fn complete_future(&mut self, handle: FutureHandle, outcome: Outcome) {
        let waiters = match self.futures.get_mut(handle.slot()) {
            Some(f) => {
                f.result = Some(outcome.clone());
                std::mem::take(&mut f.waiters)
            },
            None => return,
        };
        for waiter in waiters {
            self.wake_on_future(waiter, handle, outcome.clone());
        }
    }

    pub fn future_result(&self, handle: FutureHandle) -> Option<Outcome> {
        self.futures.get(handle.slot()).and_then(|f| f.result.clone())
    }

    pub fn task_result(&self, handle: TaskHandle) -> Option<Outcome> {
        self.tasks.get(handle.slot()).and_then(|t| t.result.clone())
    }

    /// Registers `waiter` to block on `target`, or returns the result immediately if `target`
    /// is already done.
    ///
    /// Unlike the waking side, this never touches `waiter`'s own table slot: it is invoked
    /// while `waiter`'s `Task` is held out of the table by the stepper
    /// ([`Scheduler::take_task`]), so setting its status/block here would silently be lost.
    /// The caller is responsible for applying the returned [`BlockCond`] to its own `&mut Task`.
    pub fn block_on_single(&mut self, waiter: TaskHandle, target: super::effects::Waitable) -> Result<Outcome, BlockCond> {
        use super::effects::Waitable;
        match target {
            Waitable::Task(t) => {
                if let Some(result) = self.task_result(t) {
                    return Ok(result);
                }
                if let Some(task) = self.tasks.get_mut(t.slot()) {
                    task.waiters.push(waiter);
                }
                Err(BlockCond::SingleTask(t))
            },
            Waitable::Future(f) => {
                if let Some(result) = self.future_result(f) {
                    return Ok(result);
                }
                if let Some(fut) = self.futures.get_mut(f.slot()) {
                    fut.waiters.push(waiter);
                }
                Err(BlockCond::SingleFuture(f))
            },
        }
    }

    /// Registers `waiter` to block on a `Gather`/`Race` set. Returns `Ok` immediately if the
    /// set is already fully resolved (empty targets, or a `race` whose first target is done).
    /// Same caller contract as [`Scheduler::block_on_single`].
    pub fn block_on_set(
        &mut self,
        waiter: TaskHandle,
        targets: Vec<super::effects::Waitable>,
        race: bool,
    ) -> Result<Vec<(usize, Outcome)>, BlockCond> {
        use super::effects::Waitable;
        if targets.is_empty() {
            return Ok(Vec::new());
        }
        let mut collected: Vec<Option<Outcome>> = vec![None; targets.len()];
        let mut any_pending = false;
        for (i, target) in targets.iter().enumerate() {
            let already = match *target {
                Waitable::Task(t) => self.task_result(t),
                Waitable::Future(f) => self.future_result(f),
            };
            match already {
                Some(outcome) => {
                    if race {
                        return Ok(vec![(i, outcome)]);
                    }
                    collected[i] = Some(outcome);
                },
                None => {
                    any_pending = true;
                    match *target {
                        Waitable::Task(t) => {
                            if let Some(task) = self.tasks.get_mut(t.slot()) {
                                task.waiters.push(waiter);
                            }
                        },
                        Waitable::Future(f) => {
                            if let Some(fut) = self.futures.get_mut(f.slot()) {
                                fut.waiters.push(waiter);
                            }
                        },
                    }
                },
            }
        }
        if !any_pending {
            return Ok(collected.into_iter().enumerate().map(|(i, o)| (i, o.unwrap())).collect());
        }
        Err(BlockCond::Set { targets, collected, race })
    }

    /// Wakes `waiter` with `target`'s outcome. `pub(crate)` rather than private: the runner
    /// calls this directly for a task it just stepped to `Done` (see module docs on
    /// `Scheduler::take_task`/`put_task` — the runner, not `complete_task`, owns that task's
    /// bookkeeping while it is held out of the table).
    pub(crate) fn wake_on_task(&mut self, waiter: TaskHandle, target: TaskHandle, outcome: Outcome) {
        self.wake_on(waiter, super::effects::Waitable::Task(target), outcome);
    }

    fn wake_on_future(&mut self, waiter: TaskHandle, target: FutureHandle, outcome: Outcome) {
        self.wake_on(waiter, super::effects::Waitable::Future(target), outcome);
    }

    fn wake_on(&mut self, waiter: TaskHandle, target: super::effects::Waitable, outcome: Outcome) {
        let Some(task) = self.tasks.get_mut(waiter.slot()) else { return };
        if task.status != TaskStatus::Blocked {
            return;
        }
        match task.block.take() {
            Some(BlockCond::SingleTask(_)) | Some(BlockCond::SingleFuture(_)) => {
                match outcome {
                    Ok(v) => task.next_input = Resumption::Value(Box::new(v)),
                    Err(e) => task.next_error = Some(e),
                }
                self.requeue(waiter);
            },
            Some(BlockCond::Set { targets, mut collected, race }) => {
                for (i, t) in targets.iter().enumerate() {
                    if *t == target && collected[i].is_none() {
                        collected[i] = Some(outcome.clone());
                    }
                }
                if race {
                    let (i, o) = collected
                        .into_iter()
                        .enumerate()
                        .find_map(|(i, o)| o.map(|o| (i, o)))
                        .expect("race always has one resolved slot once woken");
                    task.next_input = Resumption::Value(Box::new(vec![(i, o)]));
                    self.requeue(waiter);
                } else if collected.iter().all(Option::is_some) {
                    let all: Vec<(usize, Outcome)> =
                        collected.into_iter().enumerate().map(|(i, o)| (i, o.unwrap())).collect();
                    task.next_input = Resumption::Value(Box::new(all));
                    self.requeue(waiter);
                } else {
                    task.block = Some(BlockCond::Set { targets, collected, race });
                }
            },
            other => {
                self.tasks.get_mut(waiter.slot()).unwrap().block = other;
            },
        }
    }

    // SEMAPHORES
    // ============================================================================================

    /// Attempts to acquire `sem` for `waiter`. Returns `Ok(())` if the permit was granted
    /// immediately; otherwise `waiter` is enqueued FIFO and the pending condition is returned
    /// for the caller to apply to its own `&mut Task` (see [`Scheduler::block_on_single`]).
    pub fn acquire_semaphore(&mut self, waiter: TaskHandle, sem: SemaphoreHandle) -> Result<(), BlockCond> {
        let Some(state) = self.semaphores.get_mut(sem.slot()) else { return Ok(()) };
        if state.available > 0 {
            state.available -= 1;
            return Ok(());
        }
        state.waiters.push_back(waiter);
        Err(BlockCond::Semaphore(sem))
    }

    /// Releases one permit to `sem`. If a waiter is queued, hands the permit directly to it
    /// (spec.md §4.6 "direct handoff"): `available_permits` is left untouched.
    pub fn release_semaphore(&mut self, sem: SemaphoreHandle) {
        let Some(state) = self.semaphores.get_mut(sem.slot()) else { return };
        if let Some(next) = state.waiters.pop_front() {
            if let Some(t) = self.tasks.get_mut(next.slot()) {
                t.next_input = Resumption::Value(Box::new(()));
                t.block = None;
            }
            self.requeue(next);
        } else {
            state.available += 1;
        }
    }

    /// Removes a cancelled waiter from `sem`'s queue without granting or consuming a permit
    /// (spec.md §4.6 "Cancelled waiters are removed from the queue on cancel, never consuming
    /// a permit").
    pub fn remove_semaphore_waiter(&mut self, sem: SemaphoreHandle, waiter: TaskHandle) {
        if let Some(state) = self.semaphores.get_mut(sem.slot()) {
            state.waiters.retain(|w| *w != waiter);
        }
    }

    /// Wakes every task whose timer deadline is `<= now_millis`. Called by the runner between
    /// scheduling rounds (spec.md §4.6 "Timer and clock").
    pub fn wake_due_timers(&mut self, now_millis: u64) -> Vec<TaskHandle> {
        let mut woken = Vec::new();
        let due: Vec<TaskHandle> = self
            .tasks
            .entries
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| {
                let t = slot.as_ref()?;
                match t.block {
                    Some(BlockCond::Timer { deadline_millis }) if deadline_millis <= now_millis => {
                        Some(TaskHandle::from_slot(Slot::new(i as u32, self.tasks.generations[i])))
                    },
                    _ => None,
                }
            })
            .collect();
        for handle in due {
            if let Some(t) = self.tasks.get_mut(handle.slot()) {
                t.block = None;
                t.next_input = Resumption::Value(Box::new(()));
            }
            self.requeue(handle);
            woken.push(handle);
        }
        woken
    }

    pub fn earliest_timer_deadline(&self) -> Option<u64> {
        self.tasks
            .entries
            .iter()
            .filter_map(|slot| slot.as_ref())
            .filter_map(|t| match t.block {
                Some(BlockCond::Timer { deadline_millis }) => Some(deadline_millis),
                _ => None,
            })
            .min()
    }

    /// Delivers the result of an async escape back to the waiting task, per spec.md §4.7.
    pub fn resume_async_escape(&mut self, waiter: TaskHandle, outcome: Outcome) {
        if let Some(t) = self.tasks.get_mut(waiter.slot()) {
            t.block = None;
            match outcome {
                Ok(v) => t.next_input = Resumption::Value(Box::new(v)),
                Err(e) => t.next_error = Some(e),
            }
        }
        self.requeue(waiter);
    }

    /// Implements the cancellation table in spec.md §4.6.
    pub fn cancel_task(&mut self, target: TaskHandle) {
        let Some(t) = self.tasks.get_mut(target.slot()) else { return };
        match t.status {
            TaskStatus::Done => {},
            TaskStatus::Ready => {
                self.ready.retain(|h| *h != target);
                self.complete_task(target, Err(ExecutionError::TaskCancelled));
            },
            TaskStatus::Running => {
                t.cancel_requested = true;
            },
            TaskStatus::Blocked => {
                let block = t.block.take();
                if let Some(BlockCond::Semaphore(sem)) = block {
                    self.remove_semaphore_waiter(sem, target);
                }
                self.complete_task(target, Err(ExecutionError::TaskCancelled));
            },
        }
    }

    pub fn is_cancel_requested(&self, handle: TaskHandle) -> bool {
        self.tasks.get(handle.slot()).map(|t| t.cancel_requested).unwrap_or(false)
    }

    pub fn clear_cancel_flag(&mut self, handle: TaskHandle) {
        if let Some(t) = self.tasks.get_mut(handle.slot()) {
            t.cancel_requested = false;
        }
    }
}

//! End-to-end scenario tests driving the public `doeff_processor` surface through [`run`]
//! rather than poking at the scheduler/VM internals directly.

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

use pretty_assertions::assert_eq;

use crate::{
    acquire_semaphore, ask, create_semaphore, gather, get, listen, local, modify, put, race,
    raise, release_semaphore, run, safe, spawn, tell, Binding, Env, ExecutionError,
    ExecutionOptions, HandlerSet, Program, RaceResult, Store, Waitable,
};

fn run_default<T: Send + 'static>(program: Program<T>) -> crate::RunResult<T> {
    run(program, HandlerSet::new(), Env::new(), Store::new(), ExecutionOptions::default())
}

fn increment(key: &'static str) -> Program<i64> {
    modify(key, |cur: Option<&i64>| Ok(cur.copied().unwrap_or(0) + 1))
}

// STATE
// ================================================================================================

#[test]
fn counter_with_modify_accumulates_across_calls() {
    let program = put("count", 0i64)
        .and_then(|_| increment("count"))
        .and_then(|_| increment("count"))
        .and_then(|_| increment("count"))
        .and_then(|_| get::<i64>("count"));

    let result = run_default(program);
    assert!(result.is_ok());
    assert_eq!(result.value().unwrap(), 3);
}

#[test]
fn modify_leaves_slot_untouched_on_failure() {
    let failing_update = safe(modify("count", |_: Option<&i64>| {
        Err::<i64, _>(ExecutionError::MissingStateKey { key: "count".into() })
    }));

    let program = put("count", 10i64).and_then(|_| {
        failing_update.and_then(|attempt: Result<i64, ExecutionError>| {
            get::<i64>("count").map(move |confirmed| (attempt.is_err(), confirmed))
        })
    });

    let result = run_default(program);
    assert!(result.is_ok());
    let (failed, confirmed) = result.value().unwrap();
    assert!(failed, "the updater raised, so safe's outcome must be Err");
    assert_eq!(confirmed, 10, "a failed modify must leave the slot at its prior value");
}

// READER
// ================================================================================================

#[test]
fn local_overrides_are_scoped_to_their_body() {
    let mut bindings = HashMap::new();
    bindings.insert("name".to_string(), Binding::Value(Arc::new("outer".to_string()) as Arc<dyn Any + Send>));
    let env = Env::from_map(bindings);

    let mut overrides = HashMap::new();
    overrides.insert("name".to_string(), Binding::Value(Arc::new("inner".to_string()) as Arc<dyn Any + Send>));

    let program = ask::<String>("name").and_then(move |before| {
        local(overrides, ask::<String>("name"))
            .and_then(move |inside| ask::<String>("name").map(move |after| (before, inside, after)))
    });

    let result = run(program, HandlerSet::new(), env, Store::new(), ExecutionOptions::default());
    let (before, inside, after) = result.value().unwrap();
    assert_eq!(before, "outer");
    assert_eq!(inside, "inner");
    assert_eq!(after, "outer");
}

#[test]
fn ask_on_missing_key_raises_missing_env_key() {
    let result = run_default(safe(ask::<String>("absent")));
    match result.value().unwrap() {
        Err(ExecutionError::MissingEnvKey { key }) => assert_eq!(key, "absent"),
        other => panic!("expected MissingEnvKey, got {other:?}"),
    }
}

// SAFE / ERRORS
// ================================================================================================

#[test]
fn safe_wraps_a_raised_error_instead_of_propagating_it() {
    let program = safe(raise::<i64>(ExecutionError::MissingStateKey { key: "boom".into() }));
    let result = run_default(program);

    assert!(result.is_ok(), "safe itself must never fail the run");
    let inner = result.value().unwrap();
    let err = inner.expect_err("the body raised, so safe's result must be Err");
    assert!(err.to_string().contains("boom"));
}

#[test]
fn safe_passes_through_a_successful_body_unchanged() {
    let program = safe(Program::pure(42i64));
    let result = run_default(program);
    assert_eq!(result.value().unwrap().unwrap(), 42);
}

#[test]
fn safe_does_not_catch_errors_outside_its_own_body() {
    // The raise happens after safe's body has already returned, so it must still propagate
    // to the top-level run result instead of being caught retroactively.
    let program = safe(Program::pure(1i64)).and_then(|_| raise::<i64>(ExecutionError::CacheMiss));
    let result = run_default(program);
    assert!(result.is_err());
}

// WRITER
// ================================================================================================

#[test]
fn listen_captures_only_its_own_bodys_entries() {
    let program = tell(1i64)
        .and_then(|_| listen(tell(2i64).and_then(|_| tell(3i64))))
        .map(|captured| captured.entries.len());

    let result = run_default(program);
    assert_eq!(result.value().unwrap(), 2);
}

// SCHEDULER
// ================================================================================================

#[test]
fn gather_shares_store_state_across_spawned_tasks() {
    let program = put("shared", 0i64).and_then(|_| {
        spawn(increment("shared")).and_then(|h1| {
            spawn(increment("shared"))
                .and_then(move |h2| gather::<i64>(vec![Waitable::Task(h1), Waitable::Task(h2)]))
        })
    });

    let result = run_default(program.and_then(|mut values: Vec<i64>| {
        values.sort();
        get::<i64>("shared").map(move |total| (values, total))
    }));

    let (values, total) = result.value().unwrap();
    assert_eq!(values, vec![1, 2]);
    assert_eq!(total, 2);
}

#[test]
fn gather_surfaces_the_first_error_in_input_order() {
    let ok_task = Program::pure(1i64);
    let failing_task = raise::<i64>(ExecutionError::CacheMiss);

    let program = spawn(ok_task).and_then(|h1| {
        spawn(failing_task)
            .and_then(move |h2| gather::<i64>(vec![Waitable::Task(h1), Waitable::Task(h2)]))
    });

    let result = run_default(safe(program));
    assert!(result.value().unwrap().is_err());
}

fn record_order(key: &'static str, id: i64) -> Program<()> {
    modify(key, move |cur: Option<&Vec<i64>>| {
        let mut v = cur.cloned().unwrap_or_default();
        v.push(id);
        Ok(v)
    })
    .map(|_: Vec<i64>| ())
}

#[test]
fn semaphore_grants_permits_in_fifo_order() {
    // Every worker is spawned against a semaphore with zero permits, so all three actually
    // queue up as waiters (not just happen to run in spawn order); the releases that hand
    // permits back out, one by one, are themselves spawned as a fourth task so they run only
    // once the ready queue has already driven every worker to its blocking `acquire`.
    let program = create_semaphore(0).and_then(|sem| {
        let worker = move |id: i64| acquire_semaphore(sem).and_then(move |_| record_order("order", id));

        spawn(worker(1)).and_then(move |h1| {
            spawn(worker(2)).and_then(move |h2| {
                spawn(worker(3)).and_then(move |h3| {
                    spawn(
                        release_semaphore(sem)
                            .and_then(move |_| release_semaphore(sem))
                            .and_then(move |_| release_semaphore(sem)),
                    )
                    .and_then(move |_releaser| {
                        gather::<()>(vec![Waitable::Task(h1), Waitable::Task(h2), Waitable::Task(h3)])
                    })
                })
            })
        })
    });

    let result = run_default(program.and_then(|_: Vec<()>| get::<Vec<i64>>("order")));
    assert_eq!(result.value().unwrap(), vec![1, 2, 3]);
}

#[test]
fn race_returns_the_first_target_and_leaves_the_rest_running() {
    let program = spawn(Program::pure(100i64)).and_then(|winner| {
        spawn(increment("never_finishes_before_winner")).and_then(move |loser| {
            race::<i64>(vec![Waitable::Task(winner), Waitable::Task(loser)])
        })
    });

    let result = run_default(program);
    let RaceResult { first_index, value, rest } = result.value().unwrap();
    assert_eq!(first_index, 0);
    assert_eq!(value, 100);
    assert_eq!(rest.len(), 1);
}

// MONAD LAWS
// ================================================================================================

#[test]
fn flat_map_left_identity() {
    let f = |x: i64| Program::pure(x + 1);
    let via_pure = run_default(Program::pure(41i64).flat_map(f));
    let direct = run_default(f(41));
    assert_eq!(via_pure.value(), direct.value());
}

#[test]
fn flat_map_right_identity() {
    let program = put("rid", 7i64).and_then(|_| get::<i64>("rid"));
    let wrapped = program.flat_map(Program::pure);
    let result = run_default(wrapped);
    assert_eq!(result.value().unwrap(), 7);
}

#[test]
fn flat_map_is_associative() {
    let f = |x: i64| Program::pure(x + 1);
    let g = |x: i64| Program::pure(x * 2);

    let left = run_default(Program::pure(3i64).flat_map(f).flat_map(g));
    let right = run_default(Program::pure(3i64).flat_map(move |x| f(x).flat_map(g)));
    assert_eq!(left.value(), right.value());
}

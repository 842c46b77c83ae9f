use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

use once_cell::sync::OnceCell;

use crate::errors::ExecutionError;

/// A value bound in an [`Env`]: either a plain value, or a lazy program evaluated once per
/// run and then memoised (spec.md §3, §4.2).
pub enum Binding {
    Value(Arc<dyn Any + Send>),
    Lazy(LazyBinding),
}

impl Clone for Binding {
    fn clone(&self) -> Self {
        match self {
            Binding::Value(v) => Binding::Value(v.clone()),
            Binding::Lazy(l) => Binding::Lazy(l.clone()),
        }
    }
}

/// A lazily-evaluated environment value. The program that produces it is stashed behind a
/// `OnceCell` so the first successful read memoises the result for the rest of the run; the
/// `evaluating` guard exists purely to turn a self-referential read into
/// [`ExecutionError::CycleDetected`] instead of a deadlock.
#[derive(Clone)]
pub struct LazyBinding {
    inner: Arc<LazyInner>,
}

struct LazyInner {
    program: parking_lot::Mutex<Option<doeff_core::AnyProgram>>,
    evaluating: std::sync::atomic::AtomicBool,
    cell: OnceCell<Arc<dyn Any + Send>>,
}

impl LazyBinding {
    pub fn new(program: doeff_core::AnyProgram) -> Self {
        LazyBinding {
            inner: Arc::new(LazyInner {
                program: parking_lot::Mutex::new(Some(program)),
                evaluating: std::sync::atomic::AtomicBool::new(false),
                cell: OnceCell::new(),
            }),
        }
    }

    /// Returns the already-memoised value, if any. Does not itself drive evaluation: running
    /// a lazy program can yield further effects, so the VM step loop drives it and calls
    /// [`LazyBinding::memoise`] once a final value is known.
    pub fn cached(&self) -> Option<Arc<dyn Any + Send>> {
        self.inner.cell.get().cloned()
    }

    /// Marks this binding as currently being evaluated, detecting self-referential reads.
    pub fn begin_evaluating(&self, key: &str) -> Result<(), ExecutionError> {
        if self.inner.evaluating.swap(true, std::sync::atomic::Ordering::AcqRel) {
            return Err(ExecutionError::CycleDetected { key: key.to_string() });
        }
        Ok(())
    }

    /// Takes the unevaluated program out, if it hasn't been taken already (either by a
    /// concurrent read driving it now, or by a previous successful memoisation).
    pub fn take_program(&self) -> Option<doeff_core::AnyProgram> {
        self.inner.program.lock().take()
    }

    pub fn memoise(&self, value: Arc<dyn Any + Send>) {
        let _ = self.inner.cell.set(value);
        self.inner.evaluating.store(false, std::sync::atomic::Ordering::Release);
    }
}

// ENVIRONMENT
// ================================================================================================

/// An immutable reader context with copy-on-write override (spec.md §3, §4.2).
///
/// Cloning an `Env` is cheap: the backing map is reference-counted and overlays share the
/// parent's bindings until a key is actually shadowed.
#[derive(Clone, Default)]
pub struct Env {
    bindings: Arc<HashMap<String, Binding>>,
}

impl Env {
    pub fn new() -> Self {
        Env { bindings: Arc::new(HashMap::new()) }
    }

    pub fn from_map(map: HashMap<String, Binding>) -> Self {
        Env { bindings: Arc::new(map) }
    }

    /// Returns the present/absent answer for `key`, and the binding if present.
    pub fn lookup(&self, key: &str) -> Option<&Binding> {
        self.bindings.get(key)
    }

    /// Composes `self` with a small override map, returning a new `Env` that shadows any
    /// keys present in `overrides`. The original `Env` (and anything holding it) is
    /// unaffected (spec.md §4.2 "overlay").
    pub fn overlay(&self, overrides: HashMap<String, Binding>) -> Env {
        if overrides.is_empty() {
            return self.clone();
        }
        let mut merged = (*self.bindings).clone_shallow();
        for (k, v) in overrides {
            merged.insert(k, v);
        }
        Env { bindings: Arc::new(merged) }
    }
}

trait ShallowClone {
    fn clone_shallow(&self) -> HashMap<String, Binding>;
}

impl ShallowClone for HashMap<String, Binding> {
    fn clone_shallow(&self) -> HashMap<String, Binding> {
        self.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
    }
}

/// Reads `key` from `env`, raising `MissingEnvKey` if absent. Lazy values are returned as-is;
/// the VM step loop is responsible for recognizing a [`Binding::Lazy`] and driving its
/// program when it hasn't been memoised yet (see `crate::effects::ask`).
pub fn read(env: &Env, key: &str) -> Result<Binding, ExecutionError> {
    env.lookup(key).cloned().ok_or_else(|| ExecutionError::MissingEnvKey { key: key.to_string() })
}

/// The store's reserved clock slot (spec.md §4.6 "simulation mode").
pub const RESERVED_CLOCK_KEY: &str = "__doeff/clock";
/// The store's reserved bounded writer-log buffer.
pub const RESERVED_LOG_KEY: &str = "__doeff/log";
/// The store's reserved cache backing.
pub const RESERVED_CACHE_KEY: &str = "__doeff/cache";
/// The store's reserved execution-graph snapshot buffer.
pub const RESERVED_GRAPH_KEY: &str = "__doeff/graph";

/// Returns whether `key` falls under the reserved-key namespace used by the standard effect
/// handlers (spec.md §3: "User code must not touch these directly").
pub fn is_reserved_key(key: &str) -> bool {
    key.starts_with("__doeff/")
}

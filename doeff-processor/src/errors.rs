use doeff_core::{CoreError, EffectTag};
use thiserror::Error;

use crate::kont::ContinuationId;

// EXECUTION ERROR
// ================================================================================================

/// The full error taxonomy (spec.md §7).
///
/// Follows the teacher's two-tier pattern: context-free failures from the value-model layer
/// ([`CoreError`]) are wrapped here alongside processor-level failures that do carry runtime
/// context (which key, which effect, which continuation).
///
/// `Clone`: an `Outcome` (`crate::scheduler::Outcome`) is stored once per task/future and
/// handed to every waiter, so the error arm must be cheaply shareable — hence `Arc`, not
/// `Box`, in the `User` variant below.
#[derive(Debug, Clone, Error)]
pub enum ExecutionError {
    /// `Ask` on a key absent from the environment.
    #[error("missing environment key: {key}")]
    MissingEnvKey { key: String },

    /// `Get` on a key absent from the store.
    #[error("missing state key: {key}")]
    MissingStateKey { key: String },

    /// No handler on the stack matched the effect's type filter.
    #[error("unhandled effect of type {tag}", tag = .0.name())]
    UnhandledEffect(EffectTag),

    /// `Resume`/`Transfer` targeted a continuation that was already consumed.
    #[error("continuation {0:?} was already used")]
    ContinuationAlreadyUsed(ContinuationId),

    /// `Wait`/`Gather`/`Race` observed a cancelled target.
    #[error("task was cancelled")]
    TaskCancelled,

    /// A lazily-read environment value's evaluation depends on itself.
    #[error("cycle detected while evaluating lazy environment key: {key}")]
    CycleDetected { key: String },

    /// `CacheGet` found no entry for the given key.
    #[error("cache miss")]
    CacheMiss,

    /// The number of VM steps exceeded `ExecutionOptions::max_cycles`.
    #[error("exceeded the allowed number of max cycles ({0})")]
    CycleLimitExceeded(u32),

    /// The scheduler's ready queue emptied with no timer due and no `Await` escape in flight,
    /// yet the root task had not reached `Done` — a task is blocked on a target with no path
    /// to completion.
    #[error("scheduler deadlocked: no task is runnable and no timer or escape is pending")]
    Deadlocked,

    /// A `Modify` updater function failed; the store slot is left unchanged.
    #[error("modify updater failed for state key {key}")]
    ModifyFailed { key: String, #[source] source: Box<ExecutionError> },

    /// Wraps a value-model-layer error with no further processor context, mirroring the
    /// teacher's `OperationErrorNoContext`.
    #[error("{0}")]
    Core(#[from] CoreError),

    /// A program raised an arbitrary user error (the `Safe` effect captures these into
    /// `Err(e)` instead of letting them propagate to task termination). Not `#[source]`: see
    /// [`CoreError::User`]'s doc comment for why `Arc` can't use thiserror's source bridging.
    #[error("user error: {0}")]
    User(std::sync::Arc<dyn core::error::Error + Send + Sync>),
}

#[cfg(feature = "diagnostics")]
impl miette::Diagnostic for ExecutionError {}

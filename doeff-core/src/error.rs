use alloc::sync::Arc;

/// Errors raised by the value-model layer itself, independent of any running VM.
///
/// These are the "no source context available" tier of the two-tier error architecture:
/// `doeff-processor::errors::ExecutionError` wraps these the same way the teacher's
/// `ExecutionError` wraps its context-free `OperationError`.
///
/// `Clone`, not just `Debug`: an `Outcome` is stored once per task/future and handed to every
/// waiter (`doeff-processor::scheduler::Outcome`), so the error arm must be cheaply shareable
/// too — hence `Arc` rather than `Box` in the `User` variant below.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CoreError {
    /// A producer was resumed after it had already produced a final return value.
    #[error("program was resumed after completion")]
    ProgramExhausted,

    /// A final return value could not be downcast to the caller's expected result type.
    #[error("program result could not be downcast to the requested type")]
    ResultDowncastFailed,

    /// Opaque error raised by user code inside a program body. Not `#[source]`: thiserror's
    /// `Error::source()` bridging only covers `Box<dyn Error>`, not `Arc<dyn Error>`, and this
    /// needs to be `Arc` so the whole enum can stay `Clone` (see the type's doc comment).
    #[error("user error: {0}")]
    User(Arc<dyn core::error::Error + Send + Sync>),
}

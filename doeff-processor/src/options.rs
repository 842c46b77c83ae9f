use thiserror::Error;

// EXECUTION OPTIONS
// ================================================================================================

/// Configuration for a single `run`/`async_run` call.
///
/// Grounded on the teacher's `ExecutionOptions`/`ExecutionOptionsError`
/// (`processor/src/execution_options.rs`): a small builder with validated construction rather
/// than public fields, so future options can be added without breaking callers.
#[derive(Copy, Clone, Debug)]
pub struct ExecutionOptions {
    max_cycles: u32,
    trace_enabled: bool,
    simulated_clock: bool,
}

impl Default for ExecutionOptions {
    fn default() -> Self {
        ExecutionOptions { max_cycles: 1_000_000, trace_enabled: false, simulated_clock: false }
    }
}

impl ExecutionOptions {
    /// Returns the default options with a new cycle budget.
    ///
    /// # Errors
    /// Returns [`ExecutionOptionsError::ZeroCycles`] if `max_cycles` is zero.
    pub fn with_max_cycles(max_cycles: u32) -> Result<Self, ExecutionOptionsError> {
        if max_cycles == 0 {
            return Err(ExecutionOptionsError::ZeroCycles);
        }
        Ok(ExecutionOptions { max_cycles, ..Self::default() })
    }

    /// Enables capture of the continuation stack, effect call tree, and native call stack in
    /// [`crate::runner::RunResult`] on failure.
    pub fn with_tracing(mut self, enabled: bool) -> Self {
        self.trace_enabled = enabled;
        self
    }

    /// Switches the clock effects (`Delay`, `WaitUntil`, `GetTime`) to read and advance the
    /// store's reserved clock slot instead of touching wall-clock time.
    pub fn with_simulated_clock(mut self, enabled: bool) -> Self {
        self.simulated_clock = enabled;
        self
    }

    pub fn max_cycles(&self) -> u32 {
        self.max_cycles
    }

    pub fn trace_enabled(&self) -> bool {
        self.trace_enabled
    }

    pub fn simulated_clock(&self) -> bool {
        self.simulated_clock
    }
}

#[derive(Debug, Error)]
pub enum ExecutionOptionsError {
    #[error("max_cycles must be greater than zero")]
    ZeroCycles,
}

#![no_std]

//! Value model for `doeff`: the control-node instruction set, the effect-payload contract,
//! the `Program<T>` handle, and the opaque task/future/semaphore/promise handles.
//!
//! This crate has no runtime: it is the vocabulary `doeff-processor` consumes to drive an
//! actual CESK-style step loop. Nothing in here executes a program.

extern crate alloc;

#[cfg(feature = "std")]
extern crate std;

mod effect;
mod error;
mod handle;
mod node;
mod program;

pub use effect::{BoxedEffect, Effect, EffectFamily, EffectTag};
pub use error::CoreError;
pub use handle::{FutureHandle, PromiseHandle, SemaphoreHandle, Slot, TaskHandle};
pub use node::{
    CapturedK, HandlerFn, HandlerSpec, InterceptFn, InterceptMode, InterceptSpec, Node,
    ReturnClauseFn, TypeFilter, Yielded,
};
pub use program::{AnyProgram, Generator, Program, Resumption};

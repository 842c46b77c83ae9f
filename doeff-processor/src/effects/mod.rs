//! The standard effect payloads (spec.md §6 "Standard effect surface").
//!
//! Every type here is a plain data record implementing `doeff_core::Effect`; none of them
//! contain runtime logic. The VM recognizes each by its [`doeff_core::EffectTag`] and handles
//! it intrinsically — see `crate::vm::dispatch_intrinsic` — falling back to this built-in
//! behavior only once the user-installed handler stack has had a chance to match or
//! `Delegate` past it (so a program can still shadow, e.g., `Ask` with a custom handler).

pub mod cache;
pub mod reader;
pub mod scheduler;
pub mod state;
pub mod trace;
pub mod writer;

pub use cache::{CachePolicy, CacheGet, CachePut, Lifecycle, StorageHint};
pub use reader::{Ask, Local};
pub use scheduler::{
    AcquireSemaphore, Await, CancelTask, CreateFuture, CreateSemaphore, Delay, Gather, GetTime,
    Race, RaceOutcome, ReleaseSemaphore, ResolvePromise, Spawn, Wait, WaitUntil, Waitable,
};
pub use state::{Get, Modify, Put, Safe};
pub use trace::{Annotate, CaptureGraph, GraphCapture, GraphNode, Snapshot, Step};
pub use writer::{Listen, LogEntry, StructuredLog, Tell};

use doeff_core::EffectFamily;

pub const FAMILY_READER: EffectFamily = EffectFamily::new("doeff/reader");
pub const FAMILY_STATE: EffectFamily = EffectFamily::new("doeff/state");
pub const FAMILY_WRITER: EffectFamily = EffectFamily::new("doeff/writer");
pub const FAMILY_SCHEDULER: EffectFamily = EffectFamily::new("doeff/scheduler");
pub const FAMILY_CACHE: EffectFamily = EffectFamily::new("doeff/cache");
pub const FAMILY_TRACE: EffectFamily = EffectFamily::new("doeff/trace");

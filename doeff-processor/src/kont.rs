use std::any::Any;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use doeff_core::{CapturedK, HandlerSpec, InterceptSpec};

use crate::env::Env;
use crate::errors::ExecutionError;

/// Identifies a captured continuation for diagnostics and for the
/// [`ExecutionError::ContinuationAlreadyUsed`] error.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub struct ContinuationId(u64);

static NEXT_CONT_ID: AtomicU64 = AtomicU64::new(1);

impl ContinuationId {
    fn next() -> Self {
        ContinuationId(NEXT_CONT_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// What popping and applying a frame produced (spec.md §4.3: every frame declares
/// `on_value`/`on_error`; a popped frame is always consumed, so there is no "pass through
/// without popping" case — local-restore and listen frames still pop, they just forward the
/// value/error unchanged after running their side effect).
pub enum FrameResult {
    /// A plain value to keep propagating downward (into the next frame, or task completion).
    Value(Box<dyn Any + Send>),
    /// An error to keep propagating downward.
    Error(ExecutionError),
    /// The frame itself yields a further program to step (e.g. a handler closure body, or a
    /// return clause).
    Step(doeff_core::AnyProgram),
}

/// One frame of the continuation stack (spec.md §3 "Kontinuation (K)").
pub enum Frame {
    /// Pending continuation of a `Call`/`FlatMap`: applies the captured closure to the
    /// upstream value once it arrives.
    Return(Box<dyn FnOnce(Box<dyn Any + Send>) -> doeff_core::AnyProgram + Send>),
    /// An installed handler, with its compiled type filter and optional return clause.
    Handler(InstalledHandler),
    /// An installed VM-level observer.
    Intercept(InstalledIntercept),
    /// Captures `Ok`/`Err` into a value instead of letting an error propagate further
    /// (backs the `Safe` effect).
    Safe,
    /// Restores a previous `Env` on any exit path (backs `Local`).
    LocalRestore(Env),
    /// Redirects writer output into a local buffer and propagates it on exit (backs
    /// `Listen`).
    Listen(ListenBuffer),
    /// Captures every execution-graph node recorded by `Step`/`Annotate` during `body` and
    /// returns it alongside the value, while still recording into the outer graph (backs
    /// `CaptureGraph`, mirrors `Listen`'s fan-out).
    GraphScope(GraphBuffer),
}

/// An installed handler frame plus the bookkeeping needed for the no-self-reentrancy rule
/// (spec.md §4.5) and one-shot continuation capture.
pub struct InstalledHandler {
    pub spec: HandlerSpec,
    /// Unique id for this installation, used as the re-entrancy guard: effects yielded while
    /// this handler's own closure is running skip straight past this frame when the walk
    /// restarts from the next outer frame.
    pub id: u64,
}

static NEXT_HANDLER_ID: AtomicU64 = AtomicU64::new(1);

impl InstalledHandler {
    pub fn new(spec: HandlerSpec) -> Self {
        InstalledHandler { spec, id: NEXT_HANDLER_ID.fetch_add(1, Ordering::Relaxed) }
    }
}

/// An installed intercept frame plus the re-entrancy guard id (spec.md §4.4.2: "an intercept's
/// own yields skip itself").
pub struct InstalledIntercept {
    pub spec: InterceptSpec,
    pub id: u64,
}

impl InstalledIntercept {
    pub fn new(spec: InterceptSpec) -> Self {
        InstalledIntercept { spec, id: NEXT_HANDLER_ID.fetch_add(1, Ordering::Relaxed) }
    }
}

/// The buffer a `Listen` frame redirects writer entries into, alongside the entries it also
/// forwards to the outer log (spec.md §9: inner logs must not be dropped).
#[derive(Default, Clone)]
pub struct ListenBuffer {
    pub entries: Arc<parking_lot::Mutex<Vec<crate::effects::writer::LogEntry>>>,
}

/// The buffer a `GraphScope` frame redirects `Step`/`Annotate` recordings into, mirroring
/// [`ListenBuffer`] for the execution-graph tracing plane.
#[derive(Default, Clone)]
pub struct GraphBuffer {
    pub nodes: Arc<parking_lot::Mutex<Vec<crate::effects::trace::GraphNode>>>,
}

/// The continuation stack: an ordered list of frames, innermost first.
#[derive(Default)]
pub struct Kontinuation {
    frames: Vec<Frame>,
}

impl Kontinuation {
    pub fn new() -> Self {
        Kontinuation { frames: Vec::new() }
    }

    pub fn push(&mut self, frame: Frame) {
        self.frames.push(frame);
    }

    pub fn pop(&mut self) -> Option<Frame> {
        self.frames.pop()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    /// Returns the index (from the top, i.e. counted from `len()` downward) of the outermost
    /// unconsumed handler frame, searching from `from_top` frames below the very top.
    pub fn frames(&self) -> &[Frame] {
        &self.frames
    }

    pub fn frames_mut(&mut self) -> &mut Vec<Frame> {
        &mut self.frames
    }

    /// Splits off everything above `split_at` (exclusive on the lower bound, i.e. frames at
    /// index `split_at..`), returning it as a standalone segment. Used to capture the
    /// delimited continuation above a matched handler frame (spec.md §4.3).
    pub fn split_off_above(&mut self, split_at: usize) -> Vec<Frame> {
        self.frames.split_off(split_at)
    }

    pub fn extend_from(&mut self, segment: Vec<Frame>) {
        self.frames.extend(segment);
    }

    /// Discards every current frame and replaces them with `segment` (backs `Transfer`'s
    /// non-local jump, spec.md §4.4.1).
    pub fn replace_frames(&mut self, segment: Vec<Frame>) {
        self.frames = segment;
    }

    pub fn truncate(&mut self, len: usize) {
        self.frames.truncate(len);
    }
}

/// A registry of captured one-shot continuation segments, keyed by [`ContinuationId`].
///
/// `doeff-core`'s `CapturedK` handle only carries an id; this registry is where the actual
/// `Vec<Frame>` segment lives until it is consumed by `Resume`/`Transfer`, or found already
/// consumed.
#[derive(Default)]
pub struct ContinuationTable {
    segments: HashMap<u64, Option<Vec<Frame>>>,
}

impl ContinuationTable {
    pub fn new() -> Self {
        ContinuationTable { segments: HashMap::new() }
    }

    /// Registers a newly captured segment and returns the handle for it.
    pub fn capture(&mut self, segment: Vec<Frame>) -> (ContinuationId, CapturedK) {
        let id = ContinuationId::next();
        self.segments.insert(id.0, Some(segment));
        (id, CapturedK::from_raw(id.0))
    }

    /// Consumes the segment referenced by `k`, if it has not already been used.
    ///
    /// # Errors
    /// Returns [`ExecutionError::ContinuationAlreadyUsed`] if `k` was already resumed or
    /// transferred to, or was never a valid handle in this table.
    pub fn take(&mut self, k: &CapturedK) -> Result<Vec<Frame>, ExecutionError> {
        match self.segments.get_mut(&k.raw()) {
            Some(slot @ Some(_)) => Ok(slot.take().unwrap()),
            Some(None) => Err(ExecutionError::ContinuationAlreadyUsed(ContinuationId(k.raw()))),
            None => Err(ExecutionError::ContinuationAlreadyUsed(ContinuationId(k.raw()))),
        }
    }
}

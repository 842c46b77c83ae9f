use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

use doeff_core::impl_effect;

use super::FAMILY_TRACE;

/// Marks entry into a named execution step, for the execution-graph tracing plane (spec.md
/// §6). A no-op with respect to the store's visible keys beyond the reserved graph slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Step {
    pub name: String,
    pub meta: Vec<(String, String)>,
}

impl Step {
    pub fn new(name: impl Into<String>) -> Self {
        Step { name: name.into(), meta: Vec::new() }
    }
}

impl_effect!(Step, family = FAMILY_TRACE);

/// Attaches metadata to the current execution-graph node.
pub struct Annotate {
    pub fields: HashMap<String, Arc<dyn Any + Send + Sync>>,
}

impl std::fmt::Debug for Annotate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Annotate").field("fields", &self.fields.keys().collect::<Vec<_>>()).finish()
    }
}

impl_effect!(Annotate, family = FAMILY_TRACE);

/// Requests a copy of the execution graph accumulated so far.
#[derive(Debug, Clone, Copy, Default)]
pub struct Snapshot;

impl_effect!(Snapshot, family = FAMILY_TRACE);

/// Runs `body` with a fresh execution-graph scope, returning the captured subgraph alongside
/// the body's value.
pub struct CaptureGraph {
    body: parking_lot::Mutex<Option<doeff_core::AnyProgram>>,
}

impl CaptureGraph {
    pub fn new(body: doeff_core::AnyProgram) -> Self {
        CaptureGraph { body: parking_lot::Mutex::new(Some(body)) }
    }

    pub fn take_body(&self) -> Option<doeff_core::AnyProgram> {
        self.body.lock().take()
    }
}

impl std::fmt::Debug for CaptureGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaptureGraph").finish()
    }
}

impl_effect!(CaptureGraph, family = FAMILY_TRACE);

/// One node recorded by `Step`/`Annotate`, returned by `Snapshot`/`CaptureGraph`.
#[derive(Debug, Clone)]
pub struct GraphNode {
    pub name: String,
    pub meta: Vec<(String, String)>,
}

/// The value produced by a completed `CaptureGraph`: the body's own result paired with every
/// graph node recorded during its scope.
pub struct GraphCapture<T> {
    pub value: T,
    pub nodes: Vec<GraphNode>,
}

impl<T: std::fmt::Debug> std::fmt::Debug for GraphCapture<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphCapture").field("value", &self.value).field("nodes", &self.nodes.len()).finish()
    }
}

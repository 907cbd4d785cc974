//! Deferral window state.

use crate::error::{ObserveError, Result};
use crate::object::{ObjectId, ObjectRef};
use crate::observers::{Listener, PendingChange};
use indexmap::IndexMap;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::debug;

#[derive(Default)]
struct BatchState {
    /// Open windows; zero means idle.
    depth: usize,
    pending: IndexMap<(ObjectId, String), PendingChange>,
}

/// Stack of nested deferral windows plus the changes they collected.
#[derive(Default)]
pub(crate) struct ChangeBatcher {
    state: Mutex<BatchState>,
}

impl ChangeBatcher {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn depth(&self) -> usize {
        self.state.lock().depth
    }

    pub(crate) fn is_batching(&self) -> bool {
        self.depth() > 0
    }

    /// Keys waiting for the outermost window to close.
    pub(crate) fn pending_len(&self) -> usize {
        self.state.lock().pending.len()
    }

    /// Open a window. Returns the new depth.
    pub(crate) fn begin(&self) -> usize {
        let mut state = self.state.lock();
        state.depth += 1;
        if state.depth == 1 {
            debug!("batching window opened");
        }
        state.depth
    }

    /// Close a window. When the outermost one closes, the batcher is idle
    /// again and the collected changes are handed back for flushing.
    pub(crate) fn end(&self) -> Result<Option<Vec<PendingChange>>> {
        let mut state = self.state.lock();
        if state.depth == 0 {
            return Err(ObserveError::UnbalancedBatch);
        }
        state.depth -= 1;
        if state.depth > 0 {
            return Ok(None);
        }
        let pending: Vec<PendingChange> = state.pending.drain(..).map(|(_, change)| change).collect();
        debug!(pending = pending.len(), "batching window closed");
        Ok(Some(pending))
    }

    /// Record a change to `(obj, key)`, adding `listeners` to those already
    /// captured for it.
    pub(crate) fn defer(&self, obj: &ObjectRef, key: &str, listeners: Vec<Arc<Listener>>) {
        let mut state = self.state.lock();
        let entry = state
            .pending
            .entry((obj.id(), key.to_string()))
            .or_insert_with(|| PendingChange {
                object: obj.clone(),
                key: key.to_string(),
                listeners: Vec::new(),
            });
        for listener in listeners {
            if !entry.listeners.iter().any(|l| Arc::ptr_eq(l, &listener)) {
                entry.listeners.push(listener);
            }
        }
    }

    /// Close a window without flushing, after its body panicked. Pending
    /// changes are discarded once the outermost window is gone. Returns how
    /// many were discarded.
    pub(crate) fn abandon(&self) -> usize {
        let mut state = self.state.lock();
        state.depth = state.depth.saturating_sub(1);
        if state.depth > 0 {
            return 0;
        }
        let discarded = state.pending.len();
        state.pending.clear();
        discarded
    }
}

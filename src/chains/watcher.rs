//! Chained key-path watching.
//!
//! Watching `foo.bar.baz` on `obj` builds the node chain `foo -> bar -> baz`
//! under `obj`'s root node. Each node subscribes to the object it reads, so a
//! change to `obj.foo`, `obj.foo.bar` or `obj.foo.bar.baz` reaches a node,
//! which re-roots its subtree and reports the full path back to `obj`.

use super::node::ChainNode;
use crate::engine::Engine;
use crate::error::Result;
use crate::object::ObjectRef;
use crate::types::split_path;
use std::sync::Arc;
use tracing::trace;

/// A full-path notification owed to a watched root.
pub(crate) type ChainEvent = (ObjectRef, String);

/// Build (or reuse) the node chain for `path` on `root`.
pub(crate) fn watch_path(engine: &Engine, root: &ObjectRef, path: &str) -> Result<()> {
    let segments = split_path(path)?;
    let global = engine.is_global_path(path);
    let root_node = root.with_meta(|m| Arc::clone(m.chains.get_or_insert_with(|| ChainNode::root(root))));

    let mut node = root_node;
    for (i, segment) in segments.iter().enumerate() {
        let pinned = if global && i == 0 {
            Some(engine.lookup())
        } else {
            None
        };
        node = node.child_or_insert(segment, pinned);
    }
    node.mark_terminal();
    trace!(object = %root.id(), path, "chain watched");
    Ok(())
}

/// Release `path` on `root`, tearing down nodes nothing else uses.
pub(crate) fn unwatch_path(engine: &Engine, root: &ObjectRef, path: &str) {
    let Ok(segments) = split_path(path) else {
        return;
    };
    let global = engine.is_global_path(path);
    let Some(root_node) = root.peek_meta(|m| m.chains.clone()).flatten() else {
        return;
    };

    let mut nodes = vec![Arc::clone(&root_node)];
    for (i, segment) in segments.iter().enumerate() {
        let Some(next) = nodes[i].child(segment, global && i == 0) else {
            return;
        };
        nodes.push(next);
    }

    if let Some(leaf) = nodes.last() {
        leaf.unmark_terminal();
    }
    for i in (1..nodes.len()).rev() {
        if nodes[i].release() == 0 {
            nodes[i - 1].remove_child(segments[i - 1], global && i == 1);
            nodes[i].destroy();
        }
    }

    if !root_node.has_children() {
        root.peek_meta_mut(|m| m.chains = None);
    }
    trace!(object = %root.id(), path, "chain unwatched");
}

/// Live chain nodes reading `key` on `obj`.
fn watchers_of(obj: &ObjectRef, key: &str) -> Vec<Arc<ChainNode>> {
    obj.peek_meta_mut(|m| {
        let Some(list) = m.chain_watchers.get_mut(key) else {
            return Vec::new();
        };
        list.retain(|w| w.strong_count() > 0);
        let nodes: Vec<Arc<ChainNode>> = list.iter().filter_map(|w| w.upgrade()).collect();
        if list.is_empty() {
            m.chain_watchers.remove(key);
        }
        nodes
    })
    .unwrap_or_default()
}

/// Full paths about to change because `obj.key` is about to change.
pub(crate) fn will_change(obj: &ObjectRef, key: &str) -> Vec<ChainEvent> {
    let mut events = Vec::new();
    for node in watchers_of(obj, key) {
        let mut terminals = Vec::new();
        node.collect_terminals(&mut terminals);
        events.extend(terminals.iter().filter_map(|t| t.full_path()));
    }
    events
}

/// Re-root chains after `obj.key` changed and report the full paths whose
/// resolved value changed. A path ending exactly at the changed key always
/// reports. Returns the events and the number of re-rooted nodes.
pub(crate) fn did_change(obj: &ObjectRef, key: &str) -> (Vec<ChainEvent>, usize) {
    let mut events = Vec::new();
    let mut moved = 0;
    for node in watchers_of(obj, key) {
        moved += node.reroot_children();
        let mut terminals = Vec::new();
        node.collect_terminals(&mut terminals);
        for terminal in terminals {
            let changed = terminal.refresh_final();
            if !changed && !Arc::ptr_eq(&terminal, &node) {
                continue;
            }
            if let Some(event) = terminal.full_path() {
                events.push(event);
            }
        }
    }
    (events, moved)
}

/// Re-root chains below `obj.key` without notifying anyone. Used after a
/// computed property caches a fresh value.
pub(crate) fn reroot_silently(obj: &ObjectRef, key: &str) -> usize {
    let mut moved = 0;
    for node in watchers_of(obj, key) {
        moved += node.reroot_children();
        let mut terminals = Vec::new();
        node.collect_terminals(&mut terminals);
        for terminal in terminals {
            terminal.refresh_final();
        }
    }
    moved
}

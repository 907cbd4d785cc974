//! Chain nodes.
//!
//! One node per segment per watched root. A node reads `key` on `object`,
//! where `object` is always the current value of its parent. The root node
//! carries no key; its value is the watched object itself.

use crate::computed::{self, Resolved};
use crate::object::{ObjectRef, WeakObjectRef};
use crate::types::Value;
use indexmap::IndexMap;
use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use tracing::debug;

/// Children are keyed by segment and whether the segment is pinned to the
/// global lookup namespace.
type ChildKey = (String, bool);

pub(crate) struct ChainNode {
    key: Option<String>,
    parent: Weak<ChainNode>,
    /// Root: the watched object. Global segment: the lookup namespace.
    pinned: Option<WeakObjectRef>,
    state: Mutex<NodeState>,
}

#[derive(Default)]
struct NodeState {
    /// Object `key` is read on. `None` while the parent's value is not an
    /// object.
    object: Option<WeakObjectRef>,
    children: IndexMap<ChildKey, Arc<ChainNode>>,
    /// Watched paths passing through or ending at this node.
    refs: usize,
    /// Watched paths ending at this node.
    terminal: usize,
    /// Final value last seen for paths ending here.
    last_final: Option<SeenFinal>,
}

/// Final value recorded for comparison. Objects are kept by identity only,
/// so a detached terminal value can be dropped.
enum SeenFinal {
    Unknown,
    Object(WeakObjectRef),
    Plain(Value),
}

impl SeenFinal {
    fn of(value: &Resolved) -> Self {
        match value {
            Resolved::Unknown => SeenFinal::Unknown,
            Resolved::Known(Value::Object(obj)) => SeenFinal::Object(obj.downgrade()),
            Resolved::Known(plain) => SeenFinal::Plain(plain.clone()),
        }
    }

    /// True unless `value` is known and strictly equal to the recorded one.
    fn differs_from(&self, value: &Resolved) -> bool {
        match (self, value) {
            (SeenFinal::Object(weak), Resolved::Known(Value::Object(obj))) => !weak.points_to(obj),
            (SeenFinal::Plain(old), Resolved::Known(new)) => old != new,
            _ => true,
        }
    }
}

impl ChainNode {
    pub(crate) fn root(obj: &ObjectRef) -> Arc<Self> {
        Arc::new(Self {
            key: None,
            parent: Weak::new(),
            pinned: Some(obj.downgrade()),
            state: Mutex::new(NodeState {
                object: Some(obj.downgrade()),
                ..NodeState::default()
            }),
        })
    }

    /// Current object `key` is read on.
    pub(crate) fn object(&self) -> Option<ObjectRef> {
        self.state.lock().object.as_ref().and_then(WeakObjectRef::upgrade)
    }

    /// The value this node contributes to the chain, without running getters.
    pub(crate) fn value(&self) -> Resolved {
        match &self.key {
            None => match self.pinned.as_ref().and_then(WeakObjectRef::upgrade) {
                Some(obj) => Resolved::Known(obj.into()),
                None => Resolved::Known(Value::Undefined),
            },
            Some(key) => match self.object() {
                Some(obj) => computed::peek(&obj, key),
                None => Resolved::Known(Value::Undefined),
            },
        }
    }

    fn is_pinned_child(&self) -> bool {
        self.key.is_some() && self.pinned.is_some()
    }

    pub(crate) fn has_children(&self) -> bool {
        !self.state.lock().children.is_empty()
    }

    /// Existing child for `key`.
    pub(crate) fn child(&self, key: &str, global: bool) -> Option<Arc<ChainNode>> {
        self.state
            .lock()
            .children
            .get(&(key.to_string(), global))
            .cloned()
    }

    /// Child for `key`, created and subscribed on first use. Takes a
    /// reference on the child either way.
    pub(crate) fn child_or_insert(
        self: &Arc<Self>,
        key: &str,
        pinned: Option<&ObjectRef>,
    ) -> Arc<ChainNode> {
        let child_key = (key.to_string(), pinned.is_some());
        let (child, created) = {
            let mut state = self.state.lock();
            match state.children.get(&child_key) {
                Some(existing) => (Arc::clone(existing), false),
                None => {
                    let child = Arc::new(ChainNode {
                        key: Some(key.to_string()),
                        parent: Arc::downgrade(self),
                        pinned: pinned.map(ObjectRef::downgrade),
                        state: Mutex::new(NodeState::default()),
                    });
                    state.children.insert(child_key, Arc::clone(&child));
                    (child, true)
                }
            }
        };
        child.state.lock().refs += 1;
        if created {
            let object = match pinned {
                Some(obj) => Some(obj.clone()),
                None => self.value().object(),
            };
            child.attach(object);
        }
        child
    }

    /// Drop one reference. Returns the remaining count.
    pub(crate) fn release(&self) -> usize {
        let mut state = self.state.lock();
        state.refs = state.refs.saturating_sub(1);
        state.refs
    }

    pub(crate) fn remove_child(&self, key: &str, global: bool) -> Option<Arc<ChainNode>> {
        self.state
            .lock()
            .children
            .shift_remove(&(key.to_string(), global))
    }

    pub(crate) fn mark_terminal(&self) {
        let first = {
            let mut state = self.state.lock();
            state.terminal += 1;
            state.terminal == 1
        };
        if first {
            let seen = SeenFinal::of(&self.value());
            self.state.lock().last_final = Some(seen);
        }
    }

    pub(crate) fn unmark_terminal(&self) {
        let mut state = self.state.lock();
        state.terminal = state.terminal.saturating_sub(1);
        if state.terminal == 0 {
            state.last_final = None;
        }
    }

    /// Record the current final value. Returns true if it differs from the
    /// previously recorded one.
    pub(crate) fn refresh_final(&self) -> bool {
        let value = self.value();
        let mut state = self.state.lock();
        let changed = match &state.last_final {
            Some(old) => old.differs_from(&value),
            None => true,
        };
        state.last_final = Some(SeenFinal::of(&value));
        changed
    }

    /// True if this node is subscribed to exactly `object`. Judged by the
    /// stored handle, so a node still holding a dropped object never matches.
    fn reads(&self, object: Option<&ObjectRef>) -> bool {
        match (&self.state.lock().object, object) {
            (Some(weak), Some(obj)) => weak.points_to(obj),
            (None, None) => true,
            _ => false,
        }
    }

    /// Subscribe to `object` (if any) as the object this node reads.
    fn attach(self: &Arc<Self>, object: Option<ObjectRef>) {
        self.state.lock().object = object.as_ref().map(ObjectRef::downgrade);
        if let (Some(obj), Some(key)) = (object, &self.key) {
            let weak = Arc::downgrade(self);
            obj.with_meta(|m| m.chain_watchers.entry(key.clone()).or_default().push(weak));
        }
    }

    /// Unsubscribe from the current object.
    fn detach(self: &Arc<Self>) {
        let previous = self.state.lock().object.take();
        let (Some(obj), Some(key)) = (previous.and_then(|w| w.upgrade()), &self.key) else {
            return;
        };
        let me = Arc::as_ptr(self);
        obj.peek_meta_mut(|m| {
            if let Some(nodes) = m.chain_watchers.get_mut(key) {
                nodes.retain(|w| w.strong_count() > 0 && !std::ptr::eq(w.as_ptr(), me));
                if nodes.is_empty() {
                    m.chain_watchers.remove(key);
                }
            }
        });
    }

    /// Re-point every child at this node's current value, recursively.
    /// Returns the number of nodes that moved.
    pub(crate) fn reroot_children(self: &Arc<Self>) -> usize {
        let new_object = self.value().object();
        let children: Vec<Arc<ChainNode>> = self.state.lock().children.values().cloned().collect();
        let mut moved = 0;
        for child in children {
            if child.is_pinned_child() {
                continue;
            }
            if child.reads(new_object.as_ref()) {
                continue;
            }
            child.detach();
            child.attach(new_object.clone());
            debug!(
                key = child.key.as_deref().unwrap_or_default(),
                object = ?new_object.as_ref().map(ObjectRef::id),
                "chain node re-rooted"
            );
            moved += 1 + child.reroot_children();
        }
        moved
    }

    /// Unsubscribe this node and its whole subtree.
    pub(crate) fn destroy(self: &Arc<Self>) {
        self.detach();
        let children: Vec<Arc<ChainNode>> = {
            let mut state = self.state.lock();
            state.children.drain(..).map(|(_, child)| child).collect()
        };
        for child in children {
            child.destroy();
        }
    }

    /// Nodes in this subtree (this one included) that end a watched path.
    pub(crate) fn collect_terminals(self: &Arc<Self>, out: &mut Vec<Arc<ChainNode>>) {
        let children: Vec<Arc<ChainNode>> = {
            let state = self.state.lock();
            if state.terminal > 0 {
                out.push(Arc::clone(self));
            }
            state.children.values().cloned().collect()
        };
        for child in children {
            child.collect_terminals(out);
        }
    }

    /// The root object and full path this node stands for. `None` once the
    /// root has been dropped or the node has been cut from its tree.
    pub(crate) fn full_path(&self) -> Option<(ObjectRef, String)> {
        let mut segments = vec![self.key.clone()?];
        let mut parent = self.parent.upgrade();
        while let Some(node) = parent {
            match &node.key {
                Some(key) => {
                    segments.push(key.clone());
                    parent = node.parent.upgrade();
                }
                None => {
                    let root = node.pinned.as_ref()?.upgrade()?;
                    segments.reverse();
                    return Some((root, segments.join(".")));
                }
            }
        }
        None
    }
}

//! Observable objects.
//!
//! An [`ObjectRef`] is a shared handle to a record of named slots. The engine
//! attaches a meta record to it lazily, the first time anything observes or
//! computes on it; the meta record is dropped together with the object.

use crate::engine::Engine;
use crate::error::Result;
use crate::events::EventSink;
use crate::meta::Meta;
use crate::observers::{Change, ObserverFn};
use crate::types::Value;
use indexmap::IndexMap;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

/// Counter for generating object IDs.
static NEXT_OBJECT_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of an observable object.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectId(pub u64);

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

pub(crate) struct ObjectInner {
    id: ObjectId,
    /// Template this object inherits slots and observers from.
    template: Option<ObjectRef>,
    slots: RwLock<IndexMap<String, Value>>,
    methods: RwLock<HashMap<String, ObserverFn>>,
    sink: RwLock<Option<Arc<dyn EventSink>>>,
    /// Created on first observation.
    meta: Mutex<Option<Meta>>,
}

/// Shared handle to an observable object.
///
/// Cloning the handle does not clone the object; equality of handles is
/// identity.
#[derive(Clone)]
pub struct ObjectRef(Arc<ObjectInner>);

/// Non-owning handle to an observable object.
#[derive(Clone)]
pub struct WeakObjectRef(Weak<ObjectInner>);

impl ObjectRef {
    /// Create an empty object.
    pub fn new() -> Self {
        Self::build(None)
    }

    /// Create an object whose slot reads, computed properties and observers
    /// fall back to `template` (prototype-style inheritance).
    pub fn from_template(template: &ObjectRef) -> Self {
        Self::build(Some(template.clone()))
    }

    /// Create an object from a JSON object literal. Non-object JSON yields an
    /// empty object.
    pub fn from_json(json: serde_json::Value) -> Self {
        match Value::from_json(json) {
            Value::Object(obj) => obj,
            _ => Self::new(),
        }
    }

    fn build(template: Option<ObjectRef>) -> Self {
        Self(Arc::new(ObjectInner {
            id: ObjectId(NEXT_OBJECT_ID.fetch_add(1, Ordering::SeqCst)),
            template,
            slots: RwLock::new(IndexMap::new()),
            methods: RwLock::new(HashMap::new()),
            sink: RwLock::new(None),
            meta: Mutex::new(None),
        }))
    }

    pub fn id(&self) -> ObjectId {
        self.0.id
    }

    pub fn template(&self) -> Option<&ObjectRef> {
        self.0.template.as_ref()
    }

    pub fn ptr_eq(&self, other: &ObjectRef) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    pub fn downgrade(&self) -> WeakObjectRef {
        WeakObjectRef(Arc::downgrade(&self.0))
    }

    // --- Slots ---

    /// Write a slot directly, without any change notification.
    ///
    /// Use [`Engine::set`] for observable writes.
    pub fn insert(&self, key: impl Into<String>, value: impl Into<Value>) {
        self.0.slots.write().insert(key.into(), value.into());
    }

    /// Remove a slot directly, without any change notification.
    pub fn remove(&self, key: &str) -> Option<Value> {
        self.0.slots.write().shift_remove(key)
    }

    /// Read a slot stored on this object itself.
    pub fn get_own(&self, key: &str) -> Option<Value> {
        self.0.slots.read().get(key).cloned()
    }

    pub fn has_own(&self, key: &str) -> bool {
        self.0.slots.read().contains_key(key)
    }

    /// Read a slot, walking the template chain. Missing slots are `Undefined`.
    pub fn lookup(&self, key: &str) -> Value {
        let mut current = Some(self);
        while let Some(obj) = current {
            if let Some(value) = obj.get_own(key) {
                return value;
            }
            current = obj.template();
        }
        Value::Undefined
    }

    /// Own slot names in insertion order.
    pub fn keys(&self) -> Vec<String> {
        self.0.slots.read().keys().cloned().collect()
    }

    pub(crate) fn own_entries(&self) -> Vec<(String, Value)> {
        self.0
            .slots
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    // --- Methods ---

    /// Define a named method, resolvable by observers registered with
    /// [`Method::Named`](crate::Method::Named).
    pub fn define_method<F>(&self, name: impl Into<String>, method: F)
    where
        F: Fn(&Engine, &Change) -> Result<()> + Send + Sync + 'static,
    {
        self.0.methods.write().insert(name.into(), Arc::new(method));
    }

    /// Resolve a named method, walking the template chain.
    pub fn method(&self, name: &str) -> Option<ObserverFn> {
        let mut current = Some(self);
        while let Some(obj) = current {
            if let Some(method) = obj.0.methods.read().get(name) {
                return Some(Arc::clone(method));
            }
            current = obj.template();
        }
        None
    }

    // --- Event hook ---

    /// Attach a `sendEvent`-style hook to this object.
    pub fn set_event_sink(&self, sink: Arc<dyn EventSink>) {
        *self.0.sink.write() = Some(sink);
    }

    pub fn clear_event_sink(&self) {
        *self.0.sink.write() = None;
    }

    pub(crate) fn event_sink(&self) -> Option<Arc<dyn EventSink>> {
        self.0.sink.read().clone()
    }

    // --- Meta ---

    /// Run `f` against this object's meta record, creating it if needed.
    ///
    /// The meta lock is held for the duration of `f`; `f` must not call back
    /// into user code or touch this object's meta again.
    pub(crate) fn with_meta<R>(&self, f: impl FnOnce(&mut Meta) -> R) -> R {
        let mut guard = self.0.meta.lock();
        f(guard.get_or_insert_with(Meta::default))
    }

    /// Run `f` against the meta record if one exists.
    pub(crate) fn peek_meta<R>(&self, f: impl FnOnce(&Meta) -> R) -> Option<R> {
        self.0.meta.lock().as_ref().map(f)
    }

    /// Run `f` against the meta record if one exists, mutably.
    pub(crate) fn peek_meta_mut<R>(&self, f: impl FnOnce(&mut Meta) -> R) -> Option<R> {
        self.0.meta.lock().as_mut().map(f)
    }

    /// True once anything has attached a meta record.
    pub fn has_meta(&self) -> bool {
        self.0.meta.lock().is_some()
    }
}

impl Default for ObjectRef {
    fn default() -> Self {
        Self::new()
    }
}

impl PartialEq for ObjectRef {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl Eq for ObjectRef {}

impl fmt::Debug for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectRef({})", self.0.id)
    }
}

impl WeakObjectRef {
    pub fn upgrade(&self) -> Option<ObjectRef> {
        self.0.upgrade().map(ObjectRef)
    }

    pub fn is_alive(&self) -> bool {
        self.0.strong_count() > 0
    }

    pub fn ptr_eq(&self, other: &WeakObjectRef) -> bool {
        Weak::ptr_eq(&self.0, &other.0)
    }

    /// Identity comparison against a live object.
    pub fn points_to(&self, obj: &ObjectRef) -> bool {
        std::ptr::eq(self.0.as_ptr(), Arc::as_ptr(&obj.0))
    }
}

impl fmt::Debug for WeakObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.upgrade() {
            Some(obj) => write!(f, "WeakObjectRef({})", obj.id()),
            None => write!(f, "WeakObjectRef(<dropped>)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_walks_template() {
        let parent = ObjectRef::new();
        parent.insert("foo", "parent");
        let child = ObjectRef::from_template(&parent);

        assert_eq!(child.lookup("foo"), Value::from("parent"));
        assert!(!child.has_own("foo"));

        child.insert("foo", "child");
        assert_eq!(child.lookup("foo"), Value::from("child"));
        assert_eq!(parent.lookup("foo"), Value::from("parent"));
    }

    #[test]
    fn test_meta_is_lazy() {
        let obj = ObjectRef::new();
        assert!(!obj.has_meta());
        assert!(obj.peek_meta(|_| ()).is_none());

        obj.with_meta(|_| ());
        assert!(obj.has_meta());
    }

    #[test]
    fn test_weak_ref_does_not_keep_alive() {
        let obj = ObjectRef::new();
        let weak = obj.downgrade();
        assert!(weak.points_to(&obj));
        drop(obj);
        assert!(!weak.is_alive());
        assert!(weak.upgrade().is_none());
    }
}

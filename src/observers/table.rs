//! Per-object observer storage.

use crate::engine::Engine;
use crate::error::{ObserveError, Result};
use crate::object::{ObjectRef, WeakObjectRef};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Observer callback. Receives the engine so it can read and write
/// properties re-entrantly.
pub type ObserverFn = Arc<dyn Fn(&Engine, &Change) -> Result<()> + Send + Sync>;

/// Dispatch epoch counter shared by every table. Removal stamps a listener
/// with a fresh epoch; a dispatch pass skips listeners stamped after it
/// started.
static EPOCH: AtomicU64 = AtomicU64::new(1);

pub(crate) fn next_epoch() -> u64 {
    EPOCH.fetch_add(1, Ordering::SeqCst) + 1
}

/// Which side of a mutation an observer runs on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObserverKind {
    Before,
    After,
}

impl ObserverKind {
    /// Suffix used for `sendEvent`-style event names.
    pub fn event_suffix(self) -> &'static str {
        match self {
            ObserverKind::Before => "before",
            ObserverKind::After => "change",
        }
    }
}

/// What an observer invokes.
#[derive(Clone)]
pub enum Method {
    /// A function registered directly. Identity is the allocation.
    Function(ObserverFn),
    /// A method name resolved against the target when the observer fires.
    Named(String),
}

impl Method {
    pub fn function<F>(f: F) -> Self
    where
        F: Fn(&Engine, &Change) -> Result<()> + Send + Sync + 'static,
    {
        Method::Function(Arc::new(f))
    }

    pub fn named(name: impl Into<String>) -> Self {
        Method::Named(name.into())
    }

    pub fn same_as(&self, other: &Method) -> bool {
        match (self, other) {
            (Method::Function(a), Method::Function(b)) => {
                std::ptr::eq(Arc::as_ptr(a) as *const (), Arc::as_ptr(b) as *const ())
            }
            (Method::Named(a), Method::Named(b)) => a == b,
            _ => false,
        }
    }

    pub fn describe(&self) -> String {
        match self {
            Method::Function(f) => format!("<fn {:p}>", Arc::as_ptr(f) as *const ()),
            Method::Named(name) => name.clone(),
        }
    }
}

impl fmt::Debug for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Method({})", self.describe())
    }
}

impl From<&str> for Method {
    fn from(name: &str) -> Self {
        Method::Named(name.to_string())
    }
}

impl From<String> for Method {
    fn from(name: String) -> Self {
        Method::Named(name)
    }
}

impl From<ObserverFn> for Method {
    fn from(f: ObserverFn) -> Self {
        Method::Function(f)
    }
}

impl From<&ObserverFn> for Method {
    fn from(f: &ObserverFn) -> Self {
        Method::Function(Arc::clone(f))
    }
}

/// Arguments passed to an observer.
#[derive(Clone, Debug)]
pub struct Change {
    /// The observed object (the instance, even when the observer was
    /// inherited from a template).
    pub object: ObjectRef,
    /// The observed key or key path.
    pub key: String,
    /// The registration target, if any.
    pub target: Option<ObjectRef>,
    pub kind: ObserverKind,
}

/// One registered (target, method) pair.
pub(crate) struct Listener {
    target: Option<WeakObjectRef>,
    method: Method,
    /// Fires synchronously even inside a batching window.
    pub(crate) immediate: bool,
    /// Epoch at which this listener was removed, 0 while registered.
    removed_at: AtomicU64,
}

impl Listener {
    pub(crate) fn new(target: Option<&ObjectRef>, method: Method, immediate: bool) -> Self {
        Self {
            target: target.map(ObjectRef::downgrade),
            method,
            immediate,
            removed_at: AtomicU64::new(0),
        }
    }

    pub(crate) fn matches(&self, target: Option<&ObjectRef>, method: &Method) -> bool {
        let same_target = match (&self.target, target) {
            (None, None) => true,
            (Some(weak), Some(obj)) => weak.points_to(obj),
            _ => false,
        };
        same_target && self.method.same_as(method)
    }

    /// True if the listener was removed after the pass starting at `epoch`
    /// began.
    pub(crate) fn removed_since(&self, epoch: u64) -> bool {
        let removed = self.removed_at.load(Ordering::SeqCst);
        removed != 0 && removed > epoch
    }

    #[cfg(test)]
    pub(crate) fn is_registered(&self) -> bool {
        self.removed_at.load(Ordering::SeqCst) == 0
    }

    fn mark_removed(&self) {
        self.removed_at.store(next_epoch(), Ordering::SeqCst);
    }

    /// Resolve the callable for a notification on `object`.
    ///
    /// Returns `Ok(None)` when the target has been dropped. Named methods
    /// resolve against the target, or the observed object when there is no
    /// target.
    pub(crate) fn resolve(
        &self,
        object: &ObjectRef,
        key: &str,
    ) -> Result<Option<(Option<ObjectRef>, ObserverFn)>> {
        let target = match &self.target {
            Some(weak) => match weak.upgrade() {
                Some(obj) => Some(obj),
                None => return Ok(None),
            },
            None => None,
        };
        let callable = match &self.method {
            Method::Function(f) => Arc::clone(f),
            Method::Named(name) => {
                let receiver = target.as_ref().unwrap_or(object);
                receiver
                    .method(name)
                    .ok_or_else(|| ObserveError::InvalidObserverTarget {
                        key: key.to_string(),
                        method: name.clone(),
                    })?
            }
        };
        Ok(Some((target, callable)))
    }

    fn same_registration(&self, other: &Listener) -> bool {
        let same_target = match (&self.target, &other.target) {
            (None, None) => true,
            (Some(a), Some(b)) => a.ptr_eq(b),
            _ => false,
        };
        same_target && self.method.same_as(&other.method)
    }
}

/// Ordered listener sets keyed by property path, for one side (before or
/// after) of one object.
#[derive(Default)]
pub(crate) struct ObserverTable {
    paths: HashMap<String, Vec<Arc<Listener>>>,
}

impl ObserverTable {
    /// Register a listener. Returns false if an equal registration exists.
    pub(crate) fn add(&mut self, path: &str, listener: Listener) -> bool {
        let entries = self.paths.entry(path.to_string()).or_default();
        if entries.iter().any(|l| l.same_registration(&listener)) {
            return false;
        }
        entries.push(Arc::new(listener));
        true
    }

    /// Unregister a listener. Returns false if nothing matched.
    pub(crate) fn remove(&mut self, path: &str, target: Option<&ObjectRef>, method: &Method) -> bool {
        let Some(entries) = self.paths.get_mut(path) else {
            return false;
        };
        let Some(index) = entries.iter().position(|l| l.matches(target, method)) else {
            return false;
        };
        let listener = entries.remove(index);
        listener.mark_removed();
        if entries.is_empty() {
            self.paths.remove(path);
        }
        true
    }

    /// Listeners registered for `path`, or None if this table has none.
    pub(crate) fn listeners(&self, path: &str) -> Option<&[Arc<Listener>]> {
        self.paths
            .get(path)
            .filter(|entries| !entries.is_empty())
            .map(|entries| entries.as_slice())
    }

    pub(crate) fn count(&self, path: &str) -> usize {
        self.paths.get(path).map_or(0, Vec::len)
    }

    /// Drop listeners whose target no longer exists. Returns the path of
    /// every removed listener, once per listener.
    pub(crate) fn prune_dead_targets(&mut self) -> Vec<String> {
        let mut removed = Vec::new();
        for (path, entries) in self.paths.iter_mut() {
            entries.retain(|l| {
                let alive = l.target.as_ref().map_or(true, WeakObjectRef::is_alive);
                if !alive {
                    l.mark_removed();
                    removed.push(path.clone());
                }
                alive
            });
        }
        self.paths.retain(|_, entries| !entries.is_empty());
        removed
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.paths.values().map(Vec::len).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop() -> ObserverFn {
        Arc::new(|_: &Engine, _: &Change| Ok(()))
    }

    #[test]
    fn test_add_is_idempotent() {
        let mut table = ObserverTable::default();
        let target = ObjectRef::new();
        let f = noop();

        assert!(table.add("foo", Listener::new(Some(&target), Method::from(&f), false)));
        assert!(!table.add("foo", Listener::new(Some(&target), Method::from(&f), false)));
        assert!(table.add("foo", Listener::new(None, Method::from(&f), false)));
        assert!(table.add("foo", Listener::new(Some(&target), Method::named("didChange"), false)));

        assert_eq!(table.count("foo"), 3);
    }

    #[test]
    fn test_remove_missing_is_noop() {
        let mut table = ObserverTable::default();
        assert!(!table.remove("foo", None, &Method::named("nope")));

        table.add("foo", Listener::new(None, Method::named("a"), false));
        assert!(!table.remove("foo", None, &Method::named("b")));
        assert!(table.remove("foo", None, &Method::named("a")));
        assert!(table.listeners("foo").is_none());
    }

    #[test]
    fn test_removal_is_stamped_after_pass_start() {
        let mut table = ObserverTable::default();
        table.add("foo", Listener::new(None, Method::named("a"), false));
        let snapshot: Vec<_> = table.listeners("foo").unwrap().to_vec();

        let pass = next_epoch();
        assert!(!snapshot[0].removed_since(pass));
        table.remove("foo", None, &Method::named("a"));
        assert!(snapshot[0].removed_since(pass));
        assert!(!snapshot[0].is_registered());
    }

    #[test]
    fn test_function_identity_is_allocation() {
        let a = noop();
        let b = noop();
        assert!(Method::from(&a).same_as(&Method::from(&a)));
        assert!(!Method::from(&a).same_as(&Method::from(&b)));
        assert!(!Method::from(&a).same_as(&Method::named("a")));
    }

    #[test]
    fn test_prune_dead_targets() {
        let mut table = ObserverTable::default();
        let target = ObjectRef::new();
        table.add("foo", Listener::new(Some(&target), Method::named("m"), false));
        table.add("foo", Listener::new(Some(&target), Method::named("n"), false));
        table.add("foo", Listener::new(None, Method::named("m"), false));
        drop(target);

        assert_eq!(table.prune_dead_targets(), vec!["foo".to_string(), "foo".to_string()]);
        assert_eq!(table.len(), 1);
        table.remove("foo", None, &Method::named("m"));
        assert_eq!(table.len(), 0);
    }
}

//! The observation engine tying all components together.

use crate::batch::ChangeBatcher;
use crate::chains;
use crate::computed::{self, ComputedProperty, SettingGuard};
use crate::error::{ObserveError, Result};
use crate::events::{ChannelSink, EventSubscription};
use crate::object::{ObjectId, ObjectRef};
use crate::observers::{Listener, Method, ObserverKind};
use crate::suspension::SuspensionController;
use crate::types::{is_chained, is_global_path, split_path, Value};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, trace, warn};

/// Engine configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Deliver `"<key>:before"` / `"<key>:change"` events to objects that
    /// carry an event sink.
    pub send_events: bool,

    /// Resolve paths such as `App.user.name` against the lookup namespace.
    pub global_paths: bool,

    /// Buffer size of sinks created by [`Engine::subscribe_events`].
    /// Default: 1024
    pub event_buffer_size: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            send_events: true,
            global_paths: true,
            event_buffer_size: 1024,
        }
    }
}

/// Snapshot of engine activity.
#[derive(Clone, Debug, Default, Serialize)]
pub struct EngineStats {
    /// Before-observer callbacks run.
    pub before_notifications: u64,
    /// After-observer callbacks run, immediate or flushed.
    pub after_notifications: u64,
    /// After-notifications collected by a batching window.
    pub deferred_changes: u64,
    /// Outermost windows closed.
    pub flushes: u64,
    /// Notifications dropped by a suspension.
    pub suppressed: u64,
    /// Chain nodes moved onto a new object.
    pub chain_reroots: u64,
    /// Cached computed values dropped by a dependency change.
    pub cache_invalidations: u64,
    /// Events handed to object event sinks.
    pub events_sent: u64,
    /// Open batching windows.
    pub batch_depth: usize,
    /// Keys waiting for the outermost window to close.
    pub pending_changes: usize,
}

#[derive(Default)]
pub(crate) struct Counters {
    before_notifications: AtomicU64,
    after_notifications: AtomicU64,
    deferred_changes: AtomicU64,
    flushes: AtomicU64,
    chain_reroots: AtomicU64,
    cache_invalidations: AtomicU64,
    events_sent: AtomicU64,
}

impl Counters {
    pub(crate) fn record_notification(&self, kind: ObserverKind) {
        let counter = match kind {
            ObserverKind::Before => &self.before_notifications,
            ObserverKind::After => &self.after_notifications,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_deferred(&self) {
        self.deferred_changes.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_flush(&self) {
        self.flushes.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_event(&self) {
        self.events_sent.fetch_add(1, Ordering::Relaxed);
    }

    fn record_reroots(&self, moved: usize) {
        if moved > 0 {
            self.chain_reroots.fetch_add(moved as u64, Ordering::Relaxed);
        }
    }
}

/// Keys already notified during one propagation walk.
type Seen = HashSet<(ObjectId, String)>;

/// The observation engine.
///
/// Provides a unified interface for:
/// - Registering before, after and immediate observers
/// - Change notification, including chained key paths
/// - Reading and writing properties (plain and computed)
/// - Batching windows and observer suspension
///
/// All state lives on the observed objects and in the engine itself; there
/// is no process-wide registry. Callbacks receive the engine and may read,
/// write and (un)register re-entrantly.
pub struct Engine {
    pub(crate) config: EngineConfig,
    /// Root object of global paths.
    lookup: ObjectRef,
    pub(crate) batcher: ChangeBatcher,
    pub(crate) suspension: SuspensionController,
    pub(crate) counters: Counters,
}

impl Engine {
    /// Create an engine with default configuration and an empty lookup
    /// namespace.
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    pub fn with_config(config: EngineConfig) -> Self {
        Self {
            config,
            lookup: ObjectRef::new(),
            batcher: ChangeBatcher::new(),
            suspension: SuspensionController::new(),
            counters: Counters::default(),
        }
    }

    /// Use `lookup` as the global namespace.
    pub fn with_lookup(mut self, lookup: ObjectRef) -> Self {
        self.lookup = lookup;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The object global paths are resolved against.
    pub fn lookup(&self) -> &ObjectRef {
        &self.lookup
    }

    /// True if `path` resolves against the lookup namespace.
    pub fn is_global_path(&self, path: &str) -> bool {
        self.config.global_paths && is_global_path(path)
    }

    // --- Observer Registration ---

    /// Register an after-observer for `path` on `obj`.
    ///
    /// `method` is a function or the name of a method resolved against
    /// `target` (or `obj` when there is no target) when the observer fires.
    /// Registering the same `(path, target, method)` twice has no effect.
    pub fn add_observer(
        &self,
        obj: &ObjectRef,
        path: &str,
        target: Option<&ObjectRef>,
        method: impl Into<Method>,
    ) -> Result<()> {
        self.register(obj, path, ObserverKind::After, target, method.into(), false)
    }

    /// Returns false if no such registration existed.
    pub fn remove_observer(
        &self,
        obj: &ObjectRef,
        path: &str,
        target: Option<&ObjectRef>,
        method: impl Into<Method>,
    ) -> bool {
        self.unregister(obj, path, ObserverKind::After, target, &method.into())
    }

    /// Register a before-observer. Before-observers run synchronously ahead
    /// of every change, even inside a batching window.
    pub fn add_before_observer(
        &self,
        obj: &ObjectRef,
        path: &str,
        target: Option<&ObjectRef>,
        method: impl Into<Method>,
    ) -> Result<()> {
        self.register(obj, path, ObserverKind::Before, target, method.into(), false)
    }

    pub fn remove_before_observer(
        &self,
        obj: &ObjectRef,
        path: &str,
        target: Option<&ObjectRef>,
        method: impl Into<Method>,
    ) -> bool {
        self.unregister(obj, path, ObserverKind::Before, target, &method.into())
    }

    /// Register an after-observer that ignores batching windows. Only local
    /// keys can be observed immediately.
    ///
    /// Remove it with [`Engine::remove_observer`].
    pub fn add_immediate_observer(
        &self,
        obj: &ObjectRef,
        path: &str,
        target: Option<&ObjectRef>,
        method: impl Into<Method>,
    ) -> Result<()> {
        if is_chained(path) {
            return Err(ObserveError::IllegalImmediateObserverPath(path.to_string()));
        }
        self.register(obj, path, ObserverKind::After, target, method.into(), true)
    }

    fn register(
        &self,
        obj: &ObjectRef,
        path: &str,
        kind: ObserverKind,
        target: Option<&ObjectRef>,
        method: Method,
        immediate: bool,
    ) -> Result<()> {
        split_path(path)?;
        let listener = Listener::new(target, method.clone(), immediate);
        let added = obj.with_meta(|m| m.table_mut(kind).add(path, listener));
        if !added {
            return Ok(());
        }
        if let Err(err) = self.watch(obj, path) {
            obj.peek_meta_mut(|m| m.table_mut(kind).remove(path, target, &method));
            return Err(err);
        }
        trace!(object = %obj.id(), path, ?kind, immediate, "observer added");
        Ok(())
    }

    fn unregister(
        &self,
        obj: &ObjectRef,
        path: &str,
        kind: ObserverKind,
        target: Option<&ObjectRef>,
        method: &Method,
    ) -> bool {
        let removed = obj
            .peek_meta_mut(|m| m.table_mut(kind).remove(path, target, method))
            .unwrap_or(false);
        if removed {
            trace!(object = %obj.id(), path, ?kind, "observer removed");
            self.unwatch(obj, path);
        }
        removed
    }

    /// Number of `kind` observers registered on `obj` itself for `path`.
    pub fn observer_count(&self, obj: &ObjectRef, path: &str, kind: ObserverKind) -> usize {
        obj.peek_meta(|m| m.table(kind).count(path)).unwrap_or(0)
    }

    /// Number of observers and computed dependencies watching `path` on
    /// `obj`.
    pub fn watch_count(&self, obj: &ObjectRef, path: &str) -> usize {
        obj.peek_meta(|m| m.watch_count(path)).unwrap_or(0)
    }

    /// Count one more watcher of `path`. The first watcher of a chained path
    /// builds its chain.
    pub(crate) fn watch(&self, obj: &ObjectRef, path: &str) -> Result<()> {
        let first = obj.with_meta(|m| {
            let count = m.watching.entry(path.to_string()).or_insert(0);
            *count += 1;
            *count == 1
        });
        if first && is_chained(path) {
            if let Err(err) = chains::watch_path(self, obj, path) {
                obj.peek_meta_mut(|m| m.watching.remove(path));
                return Err(err);
            }
        }
        Ok(())
    }

    /// Count one watcher of `path` less. The last one tears its chain down.
    pub(crate) fn unwatch(&self, obj: &ObjectRef, path: &str) {
        let last = obj
            .peek_meta_mut(|m| match m.watching.get_mut(path) {
                Some(count) if *count > 1 => {
                    *count -= 1;
                    false
                }
                Some(_) => {
                    m.watching.remove(path);
                    true
                }
                None => false,
            })
            .unwrap_or(false);
        if last && is_chained(path) {
            chains::unwatch_path(self, obj, path);
        }
    }

    /// Watch on `obj` every chained path its templates watch, once per path.
    /// Template listeners and computed properties then see changes made
    /// through the instance's own intermediates.
    fn inherit_chains(&self, obj: &ObjectRef) -> Result<()> {
        let mut template = obj.template();
        if template.is_none() {
            return Ok(());
        }
        let mut paths: Vec<String> = Vec::new();
        while let Some(t) = template {
            if let Some(watched) = t.peek_meta(|m| {
                m.watching
                    .keys()
                    .filter(|path| is_chained(path))
                    .cloned()
                    .collect::<Vec<_>>()
            }) {
                paths.extend(watched);
            }
            template = t.template();
        }
        if paths.is_empty() {
            return Ok(());
        }
        let fresh: Vec<String> = obj.with_meta(|m| {
            paths
                .into_iter()
                .filter(|path| m.inherited.insert(path.clone()))
                .collect()
        });
        for path in fresh {
            trace!(object = %obj.id(), path = %path, "chain inherited from template");
            self.watch(obj, &path)?;
        }
        Ok(())
    }

    /// Drop observers whose target object no longer exists. Returns how many
    /// were removed.
    pub fn compact_observers(&self, obj: &ObjectRef) -> usize {
        let removed = obj
            .peek_meta_mut(|m| {
                let mut paths = m.before.prune_dead_targets();
                paths.extend(m.after.prune_dead_targets());
                paths
            })
            .unwrap_or_default();
        for path in &removed {
            self.unwatch(obj, path);
        }
        if !removed.is_empty() {
            debug!(object = %obj.id(), removed = removed.len(), "dead observers compacted");
        }
        removed.len()
    }

    // --- Change Notification ---

    /// Announce that `key` on `obj` is about to change.
    ///
    /// Notifies, in order: computed properties depending on `key`, chained
    /// paths running through `obj.key`, then the before-observers of `key`.
    /// Every step runs even if an earlier one fails; the first error is
    /// returned.
    pub fn property_will_change(&self, obj: &ObjectRef, key: &str) -> Result<()> {
        self.inherit_chains(obj)?;
        self.will_change(obj, key, &mut Seen::new())
    }

    /// Announce that `key` on `obj` changed.
    ///
    /// Marks the cache of `key` dirty if it is a computed property, then
    /// notifies dependent computed properties, chained paths (re-rooting
    /// them first) and finally the after-observers of `key`. Inside a
    /// batching window the after-observers are deferred.
    pub fn property_did_change(&self, obj: &ObjectRef, key: &str) -> Result<()> {
        self.did_change(obj, key, &mut Seen::new())
    }

    fn will_change(&self, obj: &ObjectRef, key: &str, seen: &mut Seen) -> Result<()> {
        if !seen.insert((obj.id(), key.to_string())) {
            return Ok(());
        }
        let mut first_error = None;
        for dependent in computed::dependents(obj, key) {
            keep_first(&mut first_error, self.will_change(obj, &dependent, seen));
        }
        for (root, path) in chains::will_change(obj, key) {
            keep_first(&mut first_error, self.will_change(&root, &path, seen));
        }
        keep_first(&mut first_error, self.notify_before(obj, key));
        first_error.map_or(Ok(()), Err)
    }

    fn did_change(&self, obj: &ObjectRef, key: &str, seen: &mut Seen) -> Result<()> {
        if !seen.insert((obj.id(), key.to_string())) {
            return Ok(());
        }
        if computed::descriptor(obj, key).is_some() && computed::invalidate(obj, key) {
            self.counters.cache_invalidations.fetch_add(1, Ordering::Relaxed);
        }
        let mut first_error = None;
        for dependent in computed::dependents(obj, key) {
            keep_first(&mut first_error, self.did_change(obj, &dependent, seen));
        }
        let (events, moved) = chains::did_change(obj, key);
        self.counters.record_reroots(moved);
        for (root, path) in events {
            keep_first(&mut first_error, self.did_change(&root, &path, seen));
        }
        keep_first(&mut first_error, self.notify_after(obj, key));
        first_error.map_or(Ok(()), Err)
    }

    // --- Accessors ---

    /// Read `key` on `obj`. Computed properties return their cached value,
    /// computing and caching it first when needed. A key containing dots is
    /// read as a path.
    pub fn get(&self, obj: &ObjectRef, key: &str) -> Result<Value> {
        self.inherit_chains(obj)?;
        if is_chained(key) {
            return self.get_path(obj, key);
        }
        let Some(property) = computed::descriptor(obj, key) else {
            return Ok(obj.lookup(key));
        };
        if property.volatile {
            return (property.getter)(self, obj);
        }
        if let Some(cached) = computed::cache_for(obj, key) {
            return Ok(cached);
        }
        let value = (property.getter)(self, obj)?;
        computed::store(obj, key, value.clone(), true);
        self.counters.record_reroots(chains::reroot_silently(obj, key));
        Ok(value)
    }

    /// Write `key` on `obj`, notifying before and after. Writing a value
    /// strictly equal to the current one does nothing. A key containing dots
    /// is written as a path.
    ///
    /// A failing before-observer aborts the write.
    pub fn set(&self, obj: &ObjectRef, key: &str, value: impl Into<Value>) -> Result<()> {
        let value = value.into();
        self.inherit_chains(obj)?;
        if is_chained(key) {
            return self.set_path(obj, key, value);
        }
        if let Some(property) = computed::descriptor(obj, key) {
            return self.set_computed(obj, key, &property, value);
        }
        if obj.lookup(key) == value {
            return Ok(());
        }
        self.property_will_change(obj, key)?;
        obj.insert(key, value);
        self.property_did_change(obj, key)
    }

    fn set_computed(
        &self,
        obj: &ObjectRef,
        key: &str,
        property: &ComputedProperty,
        value: Value,
    ) -> Result<()> {
        let cached = if property.volatile {
            None
        } else {
            computed::cache_for(obj, key)
        };
        let value = match &property.setter {
            Some(setter) => setter(self, obj, value)?,
            None => value,
        };
        if cached.as_ref() == Some(&value) {
            return Ok(());
        }
        self.property_will_change(obj, key)?;
        let _setting = SettingGuard::new(obj, key);
        if !property.volatile {
            computed::store(obj, key, value, false);
        }
        self.property_did_change(obj, key)
    }

    /// Read a dot-separated path. A path through a value that is not an
    /// object reads as `undefined`.
    pub fn get_path(&self, obj: &ObjectRef, path: &str) -> Result<Value> {
        let segments = split_path(path)?;
        self.resolve(self.path_root(obj, path), &segments)
    }

    /// Write the last segment of `path` on the object the rest of it resolves
    /// to.
    pub fn set_path(&self, obj: &ObjectRef, path: &str, value: impl Into<Value>) -> Result<()> {
        let segments = split_path(path)?;
        let Some((last, parents)) = segments.split_last() else {
            return Err(ObserveError::InvalidPath(path.to_string()));
        };
        let parent = self.resolve(self.path_root(obj, path), parents)?;
        match parent {
            Value::Object(target) => self.set(&target, last, value),
            _ => Err(ObserveError::PathNotFound {
                path: path.to_string(),
            }),
        }
    }

    fn path_root(&self, obj: &ObjectRef, path: &str) -> Value {
        if self.is_global_path(path) {
            Value::Object(self.lookup.clone())
        } else {
            Value::Object(obj.clone())
        }
    }

    fn resolve(&self, root: Value, segments: &[&str]) -> Result<Value> {
        let mut current = root;
        for segment in segments {
            let obj = match &current {
                Value::Object(obj) => obj.clone(),
                _ => return Ok(Value::Undefined),
            };
            current = self.get(&obj, segment)?;
        }
        Ok(current)
    }

    // --- Computed Properties ---

    /// Define (or redefine) a computed property on `obj`. Objects created
    /// from `obj` as a template inherit it, each with its own cache.
    pub fn define_computed(
        &self,
        obj: &ObjectRef,
        name: &str,
        property: ComputedProperty,
    ) -> Result<()> {
        computed::define(self, obj, name, property)
    }

    /// The cached value of a computed property, without computing it.
    pub fn cache_for(&self, obj: &ObjectRef, name: &str) -> Option<Value> {
        computed::cache_for(obj, name)
    }

    /// How many times the getter of `name` ran on `obj` and was cached.
    pub fn recompute_count(&self, obj: &ObjectRef, name: &str) -> u64 {
        computed::recompute_count(obj, name)
    }

    // --- Batching ---

    /// Open a batching window. After-notifications are deferred until the
    /// outermost window closes.
    pub fn begin_property_changes(&self) {
        self.batcher.begin();
    }

    /// Close a batching window, flushing if it was the outermost one.
    pub fn end_property_changes(&self) -> Result<()> {
        match self.batcher.end()? {
            Some(pending) => self.flush(pending),
            None => Ok(()),
        }
    }

    /// Run `f` inside a batching window. The window is closed and flushed
    /// whether or not `f` fails; `f`'s error takes precedence over a flush
    /// error.
    ///
    /// If `f` panics the window is closed without flushing and its pending
    /// changes are discarded.
    pub fn run_exclusive<R>(&self, f: impl FnOnce() -> Result<R>) -> Result<R> {
        self.begin_property_changes();
        let mut guard = WindowGuard {
            batcher: &self.batcher,
            closed: false,
        };
        let result = f();
        guard.closed = true;
        drop(guard);

        let flushed = self.end_property_changes();
        let value = result?;
        flushed?;
        Ok(value)
    }

    pub fn is_batching(&self) -> bool {
        self.batcher.is_batching()
    }

    // --- Suspension ---

    /// Run `f` with one observer of `path` on `obj` silenced. Its
    /// after-notifications during `f` are dropped, not deferred.
    pub fn suspend_observer<R>(
        &self,
        obj: &ObjectRef,
        path: &str,
        target: Option<&ObjectRef>,
        method: impl Into<Method>,
        f: impl FnOnce() -> R,
    ) -> R {
        self.suspension.suspend(obj, &[path], target, method.into(), f)
    }

    /// [`Engine::suspend_observer`] over several paths at once.
    pub fn suspend_observers<R>(
        &self,
        obj: &ObjectRef,
        paths: &[&str],
        target: Option<&ObjectRef>,
        method: impl Into<Method>,
        f: impl FnOnce() -> R,
    ) -> R {
        self.suspension.suspend(obj, paths, target, method.into(), f)
    }

    // --- Events ---

    /// Attach a channel sink to `obj` and return its receiving end.
    /// Replaces any sink `obj` already had.
    pub fn subscribe_events(&self, obj: &ObjectRef) -> EventSubscription {
        let (sink, subscription) = ChannelSink::bounded(self.config.event_buffer_size);
        obj.set_event_sink(sink);
        subscription
    }

    // --- Stats ---

    pub fn stats(&self) -> EngineStats {
        let c = &self.counters;
        EngineStats {
            before_notifications: c.before_notifications.load(Ordering::Relaxed),
            after_notifications: c.after_notifications.load(Ordering::Relaxed),
            deferred_changes: c.deferred_changes.load(Ordering::Relaxed),
            flushes: c.flushes.load(Ordering::Relaxed),
            suppressed: self.suspension.dropped(),
            chain_reroots: c.chain_reroots.load(Ordering::Relaxed),
            cache_invalidations: c.cache_invalidations.load(Ordering::Relaxed),
            events_sent: c.events_sent.load(Ordering::Relaxed),
            batch_depth: self.batcher.depth(),
            pending_changes: self.batcher.pending_len(),
        }
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

/// Closes the window of a panicking `run_exclusive` body.
struct WindowGuard<'a> {
    batcher: &'a ChangeBatcher,
    closed: bool,
}

impl Drop for WindowGuard<'_> {
    fn drop(&mut self) {
        if !self.closed {
            let discarded = self.batcher.abandon();
            warn!(discarded, "batching window abandoned, pending changes discarded");
        }
    }
}

fn keep_first(slot: &mut Option<ObserveError>, result: Result<()>) {
    if let Err(err) = result {
        slot.get_or_insert(err);
    }
}

//! Cache bookkeeping for computed properties.
//!
//! The invalidator never calls a getter. It only records values the accessor
//! layer computed, marks them dirty when a dependency changes, and answers
//! "what is cached right now" for chain maintenance.

use super::property::ComputedProperty;
use crate::engine::Engine;
use crate::error::Result;
use crate::object::ObjectRef;
use crate::types::{split_path, Value};
use std::sync::Arc;
use tracing::trace;

/// Cache state of one computed property on one object.
#[derive(Clone, Debug, Default)]
pub(crate) struct CacheMeta {
    /// Set by a dependency change, cleared by the next store.
    pub(crate) dirty: bool,
    /// Non-zero while the property's own setter is notifying; its freshly set
    /// value must survive that notification.
    pub(crate) setting: u32,
    pub(crate) recomputes: u64,
    pub(crate) invalidations: u64,
}

/// Result of reading a property without running any getter.
#[derive(Clone, Debug)]
pub(crate) enum Resolved {
    Known(Value),
    /// A computed property with no clean cached value.
    Unknown,
}

impl Resolved {
    pub(crate) fn object(&self) -> Option<ObjectRef> {
        match self {
            Resolved::Known(Value::Object(obj)) => Some(obj.clone()),
            _ => None,
        }
    }
}

/// Register (or replace) a computed property and watch its dependencies.
pub(crate) fn define(
    engine: &Engine,
    obj: &ObjectRef,
    name: &str,
    property: ComputedProperty,
) -> Result<()> {
    let mut deps: Vec<String> = Vec::new();
    for key in &property.dependent_keys {
        split_path(key)?;
        if !deps.contains(key) {
            deps.push(key.clone());
        }
    }
    let property = ComputedProperty {
        dependent_keys: deps.clone(),
        ..property
    };

    let previous = obj.with_meta(|meta| {
        let previous = meta.computed.insert(name.to_string(), Arc::new(property));
        if let Some(old) = &previous {
            for dep in &old.dependent_keys {
                if let Some(names) = meta.deps.get_mut(dep) {
                    names.retain(|n| n != name);
                    if names.is_empty() {
                        meta.deps.remove(dep);
                    }
                }
            }
        }
        for dep in &deps {
            let names = meta.deps.entry(dep.clone()).or_default();
            if !names.iter().any(|n| n == name) {
                names.push(name.to_string());
            }
        }
        meta.cache.remove(name);
        meta.cache_meta.remove(name);
        previous
    });

    if let Some(old) = previous {
        for dep in &old.dependent_keys {
            engine.unwatch(obj, dep);
        }
    }
    for dep in &deps {
        engine.watch(obj, dep)?;
    }
    Ok(())
}

/// Find the descriptor for `key`, walking the template chain.
pub(crate) fn descriptor(obj: &ObjectRef, key: &str) -> Option<Arc<ComputedProperty>> {
    let mut current = Some(obj);
    while let Some(o) = current {
        if let Some(found) = o.peek_meta(|m| m.computed.get(key).cloned()).flatten() {
            return Some(found);
        }
        current = o.template();
    }
    None
}

/// Computed properties on `obj` (or its templates) that depend on `key`.
pub(crate) fn dependents(obj: &ObjectRef, key: &str) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    let mut current = Some(obj);
    while let Some(o) = current {
        if let Some(found) = o.peek_meta(|m| m.deps.get(key).cloned()).flatten() {
            for name in found {
                if !names.contains(&name) {
                    names.push(name);
                }
            }
        }
        current = o.template();
    }
    names
}

/// The clean cached value, if any. Never computes.
pub(crate) fn cache_for(obj: &ObjectRef, key: &str) -> Option<Value> {
    obj.peek_meta(|m| {
        let dirty = m.cache_meta.get(key).map_or(false, |c| c.dirty);
        if dirty {
            None
        } else {
            m.cache.get(key).cloned()
        }
    })
    .flatten()
}

/// Read `key` without running a getter.
pub(crate) fn peek(obj: &ObjectRef, key: &str) -> Resolved {
    match descriptor(obj, key) {
        Some(property) if property.volatile => Resolved::Unknown,
        Some(_) => cache_for(obj, key).map_or(Resolved::Unknown, Resolved::Known),
        None => Resolved::Known(obj.lookup(key)),
    }
}

/// Record a value for `key`. `recomputed` distinguishes getter results from
/// direct writes.
pub(crate) fn store(obj: &ObjectRef, key: &str, value: Value, recomputed: bool) {
    obj.with_meta(|m| {
        m.cache.insert(key.to_string(), value);
        let state = m.cache_meta.entry(key.to_string()).or_default();
        state.dirty = false;
        if recomputed {
            state.recomputes += 1;
        }
    });
}

/// Mark the cache of `key` dirty. Returns true if a cached value was dropped.
pub(crate) fn invalidate(obj: &ObjectRef, key: &str) -> bool {
    obj.peek_meta_mut(|m| {
        let state = m.cache_meta.entry(key.to_string()).or_default();
        if state.setting > 0 {
            return false;
        }
        state.dirty = true;
        let had = m.cache.remove(key).is_some();
        if had {
            state.invalidations += 1;
            trace!(object = %obj.id(), key, "computed cache invalidated");
        }
        had
    })
    .unwrap_or(false)
}

pub(crate) fn recompute_count(obj: &ObjectRef, key: &str) -> u64 {
    obj.peek_meta(|m| m.cache_meta.get(key).map_or(0, |c| c.recomputes))
        .unwrap_or(0)
}

/// Shields a just-set computed value from its own change notification.
pub(crate) struct SettingGuard {
    obj: ObjectRef,
    key: String,
}

impl SettingGuard {
    pub(crate) fn new(obj: &ObjectRef, key: &str) -> Self {
        obj.with_meta(|m| {
            m.cache_meta.entry(key.to_string()).or_default().setting += 1;
        });
        Self {
            obj: obj.clone(),
            key: key.to_string(),
        }
    }
}

impl Drop for SettingGuard {
    fn drop(&mut self) {
        self.obj.peek_meta_mut(|m| {
            if let Some(state) = m.cache_meta.get_mut(&self.key) {
                state.setting = state.setting.saturating_sub(1);
            }
        });
    }
}

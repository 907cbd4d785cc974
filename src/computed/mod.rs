//! Computed properties and their cache.
//!
//! A computed property is a getter (and optional setter) plus a list of
//! dependency paths. Its value is cached per object until one of the
//! dependencies notifies a change, at which point the cache is marked dirty.
//! Recomputation only happens when the value is next read through
//! [`Engine::get`](crate::Engine::get).

mod invalidator;
mod property;

pub(crate) use invalidator::{
    cache_for, define, dependents, descriptor, invalidate, peek, recompute_count, store, CacheMeta,
    Resolved, SettingGuard,
};
pub use property::{ComputedProperty, Getter, Setter};

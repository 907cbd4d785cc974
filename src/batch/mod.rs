//! Change batching.
//!
//! Between [`Engine::begin_property_changes`](crate::Engine::begin_property_changes)
//! and the matching end, after-notifications are collected instead of
//! delivered. Windows nest; nothing flushes until the outermost window
//! closes. Each `(object, key)` flushes once, in the order it was first
//! touched, however many times it changed.

mod batcher;

pub(crate) use batcher::ChangeBatcher;

//! Chained key-path observation.
//!
//! A chained path such as `foo.bar.baz` is observed by a tree of
//! [`ChainNode`]s mirroring the path, one tree per watched root object. Each
//! node subscribes to the object it currently reads; when an intermediate
//! value changes, the affected node re-roots its subtree onto the new value
//! and the root receives a single notification for the full path.
//!
//! Intermediate values that are not objects leave a gap: nodes below it have
//! no object and report `undefined` until the intermediate becomes an object
//! again.

mod node;
mod watcher;

pub(crate) use node::ChainNode;
pub(crate) use watcher::{did_change, reroot_silently, unwatch_path, watch_path, will_change};

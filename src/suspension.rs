//! Scoped suspension of individual observers.
//!
//! Suspending `(path, target, method)` on an object drops every
//! after-notification that would reach exactly that registration until the
//! callback returns. Dropped notifications are not queued and not replayed.
//! Other observers of the same path, and the same observer on other objects,
//! keep firing.

use crate::object::{ObjectRef, WeakObjectRef};
use crate::observers::{Listener, Method};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::trace;

/// One suspended registration, stored on the observed object's meta record.
pub(crate) struct SuspendedEntry {
    path: String,
    target: Option<WeakObjectRef>,
    method: Method,
}

impl SuspendedEntry {
    fn is(&self, path: &str, target: Option<&ObjectRef>, method: &Method) -> bool {
        let same_target = match (&self.target, target) {
            (None, None) => true,
            (Some(weak), Some(obj)) => weak.points_to(obj),
            _ => false,
        };
        self.path == path && same_target && self.method.same_as(method)
    }

    fn covers(&self, path: &str, listener: &Listener) -> bool {
        if self.path != path {
            return false;
        }
        match &self.target {
            None => listener.matches(None, &self.method),
            Some(weak) => match weak.upgrade() {
                Some(target) => listener.matches(Some(&target), &self.method),
                None => false,
            },
        }
    }
}

/// Tracks suspensions and counts the notifications they swallowed.
#[derive(Debug, Default)]
pub struct SuspensionController {
    dropped: AtomicU64,
}

impl SuspensionController {
    pub fn new() -> Self {
        Self::default()
    }

    /// Notifications dropped because their observer was suspended.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// True if `listener` is currently suspended for `path` on `obj`.
    pub(crate) fn is_suspended(&self, obj: &ObjectRef, path: &str, listener: &Listener) -> bool {
        let suspended = obj
            .peek_meta(|m| m.suspended.iter().any(|e| e.covers(path, listener)))
            .unwrap_or(false);
        if suspended {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
        suspended
    }

    /// Run `f` with `(path, target, method)` suspended on `obj` for every
    /// path in `paths`. The suspension is lifted on every exit path,
    /// including unwinding.
    pub(crate) fn suspend<R>(
        &self,
        obj: &ObjectRef,
        paths: &[&str],
        target: Option<&ObjectRef>,
        method: Method,
        f: impl FnOnce() -> R,
    ) -> R {
        let _guard = SuspensionGuard::push(obj, paths, target, method);
        f()
    }
}

/// Removes its entries from the meta record when dropped.
struct SuspensionGuard {
    object: ObjectRef,
    paths: Vec<String>,
    target: Option<ObjectRef>,
    method: Method,
}

impl SuspensionGuard {
    fn push(obj: &ObjectRef, paths: &[&str], target: Option<&ObjectRef>, method: Method) -> Self {
        obj.with_meta(|m| {
            for path in paths {
                m.suspended.push(SuspendedEntry {
                    path: path.to_string(),
                    target: target.map(ObjectRef::downgrade),
                    method: method.clone(),
                });
            }
        });
        trace!(object = %obj.id(), ?paths, method = %method.describe(), "observer suspended");
        Self {
            object: obj.clone(),
            paths: paths.iter().map(|p| p.to_string()).collect(),
            target: target.cloned(),
            method,
        }
    }
}

impl Drop for SuspensionGuard {
    fn drop(&mut self) {
        let Self {
            object,
            paths,
            target,
            method,
        } = self;
        object.peek_meta_mut(|m| {
            for path in paths.iter() {
                // Innermost first, so nested suspensions of the same triple unwind in order.
                if let Some(index) = m
                    .suspended
                    .iter()
                    .rposition(|e| e.is(path, target.as_ref(), method))
                {
                    m.suspended.remove(index);
                }
            }
        });
        trace!(object = %object.id(), "observer resumed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_suspension_is_scoped_to_triple() {
        let controller = SuspensionController::new();
        let obj = ObjectRef::new();
        let target = ObjectRef::new();
        let other = ObjectRef::new();
        let listener = Listener::new(Some(&target), Method::named("didChange"), false);
        let other_listener = Listener::new(Some(&other), Method::named("didChange"), false);

        controller.suspend(&obj, &["foo"], Some(&target), Method::named("didChange"), || {
            assert!(controller.is_suspended(&obj, "foo", &listener));
            assert!(!controller.is_suspended(&obj, "bar", &listener));
            assert!(!controller.is_suspended(&obj, "foo", &other_listener));
        });

        assert!(!controller.is_suspended(&obj, "foo", &listener));
        assert_eq!(controller.dropped(), 1);
        assert_eq!(obj.peek_meta(|m| m.suspended.len()), Some(0));
    }

    #[test]
    fn test_suspension_lifted_on_panic() {
        let controller = SuspensionController::new();
        let obj = ObjectRef::new();

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            controller.suspend(&obj, &["foo", "bar"], None, Method::named("m"), || {
                panic!("boom");
            })
        }));

        assert!(result.is_err());
        assert_eq!(obj.peek_meta(|m| m.suspended.len()), Some(0));
    }

    #[test]
    fn test_nested_suspension_of_same_triple() {
        let controller = SuspensionController::new();
        let obj = ObjectRef::new();
        let listener = Listener::new(None, Method::named("m"), false);

        controller.suspend(&obj, &["foo"], None, Method::named("m"), || {
            controller.suspend(&obj, &["foo"], None, Method::named("m"), || {});
            assert!(controller.is_suspended(&obj, "foo", &listener));
        });
        assert!(!controller.is_suspended(&obj, "foo", &listener));
    }
}

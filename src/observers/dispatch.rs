//! Notification delivery.

use super::table::{next_epoch, Change, Listener, ObserverKind};
use crate::engine::Engine;
use crate::error::Result;
use crate::events::PropertyEvent;
use crate::object::ObjectRef;
use std::sync::Arc;
use tracing::{trace, warn};

/// An after-notification deferred by a batching window.
pub(crate) struct PendingChange {
    pub(crate) object: ObjectRef,
    pub(crate) key: String,
    /// Listeners captured at each deferred change, in first-capture order.
    pub(crate) listeners: Vec<Arc<Listener>>,
}

/// Listeners for `key` on `obj`. An object with no listeners of its own for
/// `key` inherits its template's.
pub(crate) fn snapshot(obj: &ObjectRef, kind: ObserverKind, key: &str) -> Vec<Arc<Listener>> {
    let mut current = Some(obj);
    while let Some(o) = current {
        let own = o
            .peek_meta(|m| m.table(kind).listeners(key).map(<[Arc<Listener>]>::to_vec))
            .flatten();
        if let Some(listeners) = own {
            return listeners;
        }
        current = o.template();
    }
    Vec::new()
}

impl Engine {
    /// Invoke `listeners` in order. Listeners removed after `pass_epoch` are
    /// skipped, as are dropped targets and (when `check_suspension` is set)
    /// suspended after-listeners. Returns how many callbacks ran.
    pub(crate) fn dispatch(
        &self,
        obj: &ObjectRef,
        key: &str,
        kind: ObserverKind,
        listeners: &[Arc<Listener>],
        pass_epoch: u64,
        check_suspension: bool,
    ) -> Result<usize> {
        let mut fired = 0;
        for listener in listeners {
            if listener.removed_since(pass_epoch) {
                continue;
            }
            if check_suspension
                && kind == ObserverKind::After
                && self.suspension.is_suspended(obj, key, listener)
            {
                continue;
            }
            let Some((target, callable)) = listener.resolve(obj, key)? else {
                continue;
            };
            trace!(object = %obj.id(), key, ?kind, "observer fired");
            let change = Change {
                object: obj.clone(),
                key: key.to_string(),
                target,
                kind,
            };
            self.counters.record_notification(kind);
            callable(self, &change)?;
            fired += 1;
        }
        Ok(fired)
    }

    fn send_event(&self, obj: &ObjectRef, kind: ObserverKind, key: &str) {
        if !self.config.send_events {
            return;
        }
        if let Some(sink) = obj.event_sink() {
            sink.send_event(&PropertyEvent::new(kind, obj.id(), key));
            self.counters.record_event();
        }
    }

    /// Deliver a before-notification. Never deferred.
    pub(crate) fn notify_before(&self, obj: &ObjectRef, key: &str) -> Result<()> {
        self.send_event(obj, ObserverKind::Before, key);
        let listeners = snapshot(obj, ObserverKind::Before, key);
        if listeners.is_empty() {
            return Ok(());
        }
        self.dispatch(obj, key, ObserverKind::Before, &listeners, next_epoch(), false)?;
        Ok(())
    }

    /// Deliver an after-notification, or defer it while a window is open.
    ///
    /// Immediate listeners always run now. The others are captured into the
    /// pending entry for `(obj, key)` unless suspended at this moment.
    pub(crate) fn notify_after(&self, obj: &ObjectRef, key: &str) -> Result<()> {
        let listeners = snapshot(obj, ObserverKind::After, key);

        if !self.batcher.is_batching() {
            self.send_event(obj, ObserverKind::After, key);
            if !listeners.is_empty() {
                self.dispatch(obj, key, ObserverKind::After, &listeners, next_epoch(), true)?;
            }
            return Ok(());
        }

        let (immediate, deferred): (Vec<_>, Vec<_>) =
            listeners.into_iter().partition(|l| l.immediate);
        let captured: Vec<Arc<Listener>> = deferred
            .into_iter()
            .filter(|l| !self.suspension.is_suspended(obj, key, l))
            .collect();
        self.batcher.defer(obj, key, captured);
        self.counters.record_deferred();

        if !immediate.is_empty() {
            self.dispatch(obj, key, ObserverKind::After, &immediate, next_epoch(), true)?;
        }
        Ok(())
    }

    /// Deliver the changes a closed window collected, in first-touch order.
    ///
    /// Every key is flushed even if an earlier one fails; the first error is
    /// returned.
    pub(crate) fn flush(&self, pending: Vec<PendingChange>) -> Result<()> {
        let epoch = next_epoch();
        let mut first_error = None;
        for change in pending {
            self.send_event(&change.object, ObserverKind::After, &change.key);
            let result = self.dispatch(
                &change.object,
                &change.key,
                ObserverKind::After,
                &change.listeners,
                epoch,
                false,
            );
            if let Err(err) = result {
                warn!(object = %change.object.id(), key = %change.key, error = %err, "deferred observer failed");
                first_error.get_or_insert(err);
            }
        }
        self.counters.record_flush();
        first_error.map_or(Ok(()), Err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observers::Method;

    #[test]
    fn test_snapshot_falls_back_to_template() {
        let engine = Engine::new();
        let template = ObjectRef::new();
        let instance = ObjectRef::from_template(&template);

        engine.add_observer(&template, "foo", None, "onTemplate").unwrap();
        assert_eq!(snapshot(&instance, ObserverKind::After, "foo").len(), 1);

        engine.add_observer(&instance, "foo", None, "onInstance").unwrap();
        let own = snapshot(&instance, ObserverKind::After, "foo");
        assert_eq!(own.len(), 1);
        assert!(own[0].matches(None, &Method::named("onInstance")));
        assert!(snapshot(&instance, ObserverKind::Before, "foo").is_empty());
    }
}

//! Event types for the object event side channel.

use crate::object::ObjectId;
use crate::observers::ObserverKind;
use serde::{Deserialize, Serialize};

/// One notification delivered to an object's event sink.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PropertyEvent {
    /// `key` on `object` is about to change.
    Before { object: ObjectId, key: String },
    /// `key` on `object` changed.
    Change { object: ObjectId, key: String },
}

impl PropertyEvent {
    pub fn new(kind: ObserverKind, object: ObjectId, key: impl Into<String>) -> Self {
        let key = key.into();
        match kind {
            ObserverKind::Before => PropertyEvent::Before { object, key },
            ObserverKind::After => PropertyEvent::Change { object, key },
        }
    }

    pub fn object(&self) -> ObjectId {
        match self {
            PropertyEvent::Before { object, .. } | PropertyEvent::Change { object, .. } => *object,
        }
    }

    pub fn key(&self) -> &str {
        match self {
            PropertyEvent::Before { key, .. } | PropertyEvent::Change { key, .. } => key,
        }
    }

    pub fn kind(&self) -> ObserverKind {
        match self {
            PropertyEvent::Before { .. } => ObserverKind::Before,
            PropertyEvent::Change { .. } => ObserverKind::After,
        }
    }

    /// Event name in `"<key>:before"` / `"<key>:change"` form.
    pub fn name(&self) -> String {
        format!("{}:{}", self.key(), self.kind().event_suffix())
    }
}

/// Receiving end of a [`ChannelSink`](super::ChannelSink).
pub struct EventSubscription {
    /// Channel to receive events.
    pub receiver: crossbeam_channel::Receiver<PropertyEvent>,
}

impl EventSubscription {
    /// Receive the next event (blocking).
    pub fn recv(&self) -> Result<PropertyEvent, crossbeam_channel::RecvError> {
        self.receiver.recv()
    }

    /// Try to receive an event (non-blocking).
    pub fn try_recv(&self) -> Result<PropertyEvent, crossbeam_channel::TryRecvError> {
        self.receiver.try_recv()
    }

    /// Receive with timeout.
    pub fn recv_timeout(
        &self,
        timeout: std::time::Duration,
    ) -> Result<PropertyEvent, crossbeam_channel::RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }

    /// Take every event currently buffered.
    pub fn drain(&self) -> Vec<PropertyEvent> {
        self.receiver.try_iter().collect()
    }
}

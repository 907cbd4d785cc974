//! Event sinks.

use super::types::{EventSubscription, PropertyEvent};
use crossbeam_channel::{bounded, Sender, TrySendError};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::warn;

/// Receives the `sendEvent`-style notifications of one object.
///
/// Sinks run synchronously on the notifying thread and must not block.
pub trait EventSink: Send + Sync {
    fn send_event(&self, event: &PropertyEvent);
}

impl<F> EventSink for F
where
    F: Fn(&PropertyEvent) + Send + Sync,
{
    fn send_event(&self, event: &PropertyEvent) {
        self(event)
    }
}

/// Sink that forwards events into a bounded channel.
///
/// A full buffer drops the event rather than blocking the notifying thread.
pub struct ChannelSink {
    sender: Sender<PropertyEvent>,
    dropped: AtomicU64,
}

impl ChannelSink {
    /// Create a sink buffering at most `buffer_size` events.
    pub fn bounded(buffer_size: usize) -> (Arc<Self>, EventSubscription) {
        let (sender, receiver) = bounded(buffer_size);
        let sink = Arc::new(Self {
            sender,
            dropped: AtomicU64::new(0),
        });
        (sink, EventSubscription { receiver })
    }

    /// Events lost to a full buffer or a dropped receiver.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl EventSink for ChannelSink {
    fn send_event(&self, event: &PropertyEvent) {
        match self.sender.try_send(event.clone()) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(event = %event.name(), "event buffer full, event dropped");
            }
            Err(TrySendError::Disconnected(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}

//! Event side channel for observed objects.
//!
//! An object carrying an [`EventSink`] receives a `"<key>:before"` event for
//! every before-notification and a `"<key>:change"` event for every
//! after-notification on it, whether or not any observer is registered.
//! Inside a batching window the change event is sent when the window
//! flushes, together with the deferred observers.
//!
//! # Example
//!
//! ```ignore
//! let engine = Engine::new();
//! let obj = ObjectRef::new();
//! let events = engine.subscribe_events(&obj);
//!
//! engine.set(&obj, "foo", "bar")?;
//!
//! let names: Vec<String> = events.drain().iter().map(PropertyEvent::name).collect();
//! assert_eq!(names, ["foo:before", "foo:change"]);
//! ```

mod sink;
mod types;

pub use sink::{ChannelSink, EventSink};
pub use types::{EventSubscription, PropertyEvent};

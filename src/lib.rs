//! # keywatch
//!
//! Key-path property observation with before/after semantics, chained paths,
//! computed-property invalidation and batched delivery.
//!
//! ## Core Concepts
//!
//! - **Objects**: Shared records of named slots, optionally inheriting from a template
//! - **Observers**: Before/after callbacks registered per property path
//! - **Chains**: Paths like `foo.bar.baz` that follow intermediate objects as they are replaced
//! - **Computed properties**: Cached getters invalidated by their dependencies
//! - **Batching**: Windows that coalesce after-notifications to one per property
//! - **Suspension**: Scoped silencing of a single observer
//!
//! ## Example
//!
//! ```ignore
//! use keywatch::{Engine, Method, ObjectRef};
//! use serde_json::json;
//!
//! let engine = Engine::new();
//! let obj = ObjectRef::from_json(json!({"foo": {"bar": {"baz": "BIFF"}}}));
//!
//! engine.add_observer(&obj, "foo.bar.baz", None, Method::function(|engine, change| {
//!     let value = engine.get_path(&change.object, &change.key)?;
//!     println!("{} is now {:?}", change.key, value);
//!     Ok(())
//! }))?;
//!
//! // Both writes are delivered as a single notification.
//! engine.run_exclusive(|| {
//!     engine.set_path(&obj, "foo.bar.baz", "BUZZ")?;
//!     engine.set_path(&obj, "foo.bar.baz", "BAZZ")
//! })?;
//! ```

mod batch;
mod chains;
pub mod computed;
pub mod engine;
pub mod error;
pub mod events;
mod meta;
pub mod object;
pub mod observers;
mod suspension;
pub mod types;

// Re-exports
pub use computed::{ComputedProperty, Getter, Setter};
pub use engine::{Engine, EngineConfig, EngineStats};
pub use error::{ObserveError, Result};
pub use events::{ChannelSink, EventSink, EventSubscription, PropertyEvent};
pub use object::{ObjectId, ObjectRef, WeakObjectRef};
pub use observers::{Change, Method, ObserverFn, ObserverKind};
pub use types::{is_chained, is_global_path, split_path, Value};

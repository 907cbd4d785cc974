//! Observer registration and dispatch.
//!
//! Every observed object keeps two [`ObserverTable`]s in its meta record, one
//! for before-observers and one for after-observers. A listener is a
//! `(target, method)` pair; the method is either a function or a name
//! resolved against the target when the observer fires.
//!
//! Dispatch always runs over a snapshot of the table taken when the
//! notification starts:
//! - listeners added during the pass do not run in that pass;
//! - listeners removed during the pass and not yet invoked are skipped;
//! - the first callback error stops the pass and is returned.

mod dispatch;
mod table;

pub use table::{Change, Method, ObserverFn, ObserverKind};
pub(crate) use dispatch::PendingChange;
pub(crate) use table::{Listener, ObserverTable};

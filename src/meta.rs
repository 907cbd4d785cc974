//! The per-object meta record.

use crate::chains::ChainNode;
use crate::computed::{CacheMeta, ComputedProperty};
use crate::observers::{ObserverKind, ObserverTable};
use crate::suspension::SuspendedEntry;
use crate::types::Value;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Weak};

/// Engine bookkeeping attached to an observable object.
#[derive(Default)]
pub(crate) struct Meta {
    pub(crate) before: ObserverTable,
    pub(crate) after: ObserverTable,

    /// Watch count per path (observers plus computed dependencies).
    pub(crate) watching: HashMap<String, usize>,

    /// Root of the chain tree for this object's chained paths.
    pub(crate) chains: Option<Arc<ChainNode>>,
    /// Chain nodes (of any root) currently reading `key` on this object.
    pub(crate) chain_watchers: HashMap<String, Vec<Weak<ChainNode>>>,
    /// Chained paths taken over from templates. Each holds one watch.
    pub(crate) inherited: HashSet<String>,

    pub(crate) computed: HashMap<String, Arc<ComputedProperty>>,
    /// Dependency path -> computed properties depending on it.
    pub(crate) deps: HashMap<String, Vec<String>>,
    pub(crate) cache: HashMap<String, Value>,
    pub(crate) cache_meta: HashMap<String, CacheMeta>,

    /// Empty in steady state.
    pub(crate) suspended: Vec<SuspendedEntry>,
}

impl Meta {
    pub(crate) fn table(&self, kind: ObserverKind) -> &ObserverTable {
        match kind {
            ObserverKind::Before => &self.before,
            ObserverKind::After => &self.after,
        }
    }

    pub(crate) fn table_mut(&mut self, kind: ObserverKind) -> &mut ObserverTable {
        match kind {
            ObserverKind::Before => &mut self.before,
            ObserverKind::After => &mut self.after,
        }
    }

    pub(crate) fn watch_count(&self, path: &str) -> usize {
        self.watching.get(path).copied().unwrap_or(0)
    }
}

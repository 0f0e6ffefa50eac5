//! In-memory object reference table.

use std::collections::{BTreeMap, BTreeSet};

use polybank_core::{NetRefId, ObjectId, ObjectResolver};

/// Objects one peer can currently see, plus ids known to be gone for good.
#[derive(Debug, Clone, Default)]
pub struct ObjectTable {
    live: BTreeMap<NetRefId, ObjectId>,
    broken: BTreeSet<NetRefId>,
}

impl ObjectTable {
    /// Empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `id` resolvable to `object`.
    pub fn reveal(&mut self, id: NetRefId, object: ObjectId) {
        self.broken.remove(&id);
        self.live.insert(id, object);
    }

    /// Stop resolving `id` without marking it broken.
    pub fn hide(&mut self, id: NetRefId) -> Option<ObjectId> {
        self.live.remove(&id)
    }

    /// Mark `id` permanently unresolvable.
    pub fn break_ref(&mut self, id: NetRefId) {
        self.live.remove(&id);
        self.broken.insert(id);
    }

    /// True if `id` currently resolves.
    pub fn is_live(&self, id: NetRefId) -> bool {
        self.live.contains_key(&id)
    }

    /// Live ids, ascending.
    pub fn live_ids(&self) -> impl Iterator<Item = NetRefId> + '_ {
        self.live.keys().copied()
    }

    /// Number of live objects.
    pub fn len(&self) -> usize {
        self.live.len()
    }

    /// True when nothing is live.
    pub fn is_empty(&self) -> bool {
        self.live.is_empty()
    }
}

impl ObjectResolver for ObjectTable {
    fn is_broken(&self, id: NetRefId) -> bool {
        self.broken.contains(&id)
    }

    fn resolve(&self, id: NetRefId) -> Option<ObjectId> {
        self.live.get(&id).copied()
    }
}

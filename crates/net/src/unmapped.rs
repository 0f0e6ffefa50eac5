//! Bookkeeping for records whose references could not be resolved on receipt.

use std::collections::{BTreeMap, BTreeSet};

use polybank_core::{BitReader, NetRefId, ObjectResolver, Record, ResolveContext, TypeIndex};

/// Outstanding references of one received record plus the bits to replay.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UnmappedReferenceSet {
    pub(crate) unmapped: BTreeSet<NetRefId>,
    pub(crate) mapped_dynamic: BTreeSet<NetRefId>,
    pub(crate) buffer: Vec<u8>,
    pub(crate) num_bits: usize,
}

impl UnmappedReferenceSet {
    /// Ids that have not resolved yet.
    pub fn unmapped(&self) -> &BTreeSet<NetRefId> {
        &self.unmapped
    }

    /// Dynamic ids that resolved but may become unmapped again.
    pub fn mapped_dynamic(&self) -> &BTreeSet<NetRefId> {
        &self.mapped_dynamic
    }

    /// Encoded record body captured at receipt.
    pub fn buffer(&self) -> &[u8] {
        &self.buffer
    }

    /// Exact number of valid bits in [`Self::buffer`].
    pub fn num_bits(&self) -> usize {
        self.num_bits
    }

    /// True when neither set holds an id.
    pub fn is_empty(&self) -> bool {
        self.unmapped.is_empty() && self.mapped_dynamic.is_empty()
    }

    /// Re-decode the captured bits into `record`.
    ///
    /// References that resolve now are bound; the rest stay null.
    pub fn replay(&self, record: &mut dyn Record, resolver: &dyn ObjectResolver) {
        let mut reader = BitReader::with_bit_len(&self.buffer, self.num_bits);
        let mut refs = ResolveContext::new(resolver);
        record.decode(&mut reader, &mut refs);
        if reader.is_error() {
            tracing::warn!(
                record = record.type_name(),
                bits = self.num_bits,
                "replay of buffered record bits failed"
            );
        }
    }
}

/// Per-bank map of type index to its outstanding references.
#[derive(Debug, Clone, Default)]
pub struct UnmappedTracker {
    entries: BTreeMap<TypeIndex, UnmappedReferenceSet>,
}

impl UnmappedTracker {
    /// Tracking entry for `index`, if any.
    pub fn get(&self, index: TypeIndex) -> Option<&UnmappedReferenceSet> {
        self.entries.get(&index)
    }

    /// Number of tracked records.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when nothing is tracked.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Tracked entries in index order.
    pub fn iter(&self) -> impl Iterator<Item = (TypeIndex, &UnmappedReferenceSet)> {
        self.entries.iter().map(|(&index, set)| (index, set))
    }

    /// True if any tracked record still waits on an unresolved id.
    pub fn has_pending(&self) -> bool {
        self.entries.values().any(|set| !set.unmapped.is_empty())
    }

    pub(crate) fn entry(&mut self, index: TypeIndex) -> &mut UnmappedReferenceSet {
        self.entries.entry(index).or_default()
    }

    pub(crate) fn entries_mut(&mut self) -> &mut BTreeMap<TypeIndex, UnmappedReferenceSet> {
        &mut self.entries
    }

    pub(crate) fn remove(&mut self, index: TypeIndex) -> Option<UnmappedReferenceSet> {
        self.entries.remove(&index)
    }

    pub(crate) fn clear(&mut self) {
        self.entries.clear();
    }
}

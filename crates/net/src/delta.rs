//! Incremental bank replication against a per-connection baseline.
//!
//! Wire format: `u8 removed`, `removed × u16`, `u8 changed`,
//! `changed × (u16 type index, record bytes)`.
//!
//! The sender keeps one [`DeltaBaseState`] per connection. A baseline records
//! the replication key of every record at the time of the last send plus the
//! container key; records whose key differs are resent, records missing from
//! the bank are announced as removed. The receiver applies the delta and
//! tracks records whose references did not resolve yet, replaying their
//! buffered bits when [`DataBank::update_unmapped`] finds progress.

use std::collections::{BTreeMap, BTreeSet};
use std::mem;
use std::sync::Arc;

use polybank_core::{
    BitReader, BitWriter, NetRefId, ObjectResolver, ReplicationKey, ResolveContext, TypeIndex,
};
use tracing::{debug, warn};

use crate::bank::RecordSlot;
use crate::full::check_wire_count;
use crate::{DataBank, NetError};

/// Snapshot of what a connection has been sent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeltaBaseState {
    rep_keys: BTreeMap<TypeIndex, ReplicationKey>,
    container_key: Option<ReplicationKey>,
}

impl DeltaBaseState {
    /// Replication key of every record at send time.
    pub fn rep_keys(&self) -> &BTreeMap<TypeIndex, ReplicationKey> {
        &self.rep_keys
    }

    /// Container key at send time; `None` for an empty baseline.
    pub fn container_key(&self) -> Option<ReplicationKey> {
        self.container_key
    }

    /// True if both snapshots describe the same sent state.
    pub fn is_state_equal(&self, other: &Self) -> bool {
        self == other
    }

    /// Approximate heap and inline footprint.
    pub fn count_bytes(&self) -> usize {
        let entry = mem::size_of::<TypeIndex>() + mem::size_of::<ReplicationKey>();
        mem::size_of::<Self>() + self.rep_keys.len() * entry
    }
}

/// One call of the routed delta entry point.
pub enum DeltaRequest<'a, 'b> {
    /// Collect every tracked reference.
    GatherReferences,
    /// Demote a resolved dynamic reference back to unmapped.
    MoveToUnmapped(NetRefId),
    /// Retry unresolved references.
    UpdateUnmapped {
        /// Current reference table.
        resolver: &'a dyn ObjectResolver,
    },
    /// Encode the changes since `old_state`.
    Write {
        /// Destination stream.
        writer: &'a mut BitWriter,
        /// Last baseline sent on this connection.
        old_state: Option<&'a Arc<DeltaBaseState>>,
    },
    /// Apply a received delta.
    Read {
        /// Source stream.
        reader: &'a mut BitReader<'b>,
        /// Current reference table.
        resolver: &'a dyn ObjectResolver,
    },
}

/// Result of [`DataBank::net_delta_serialize`], one variant per request.
#[derive(Debug)]
pub enum DeltaResponse {
    /// See [`DataBank::gather_references`].
    Gathered(GatheredReferences),
    /// See [`DataBank::move_to_unmapped`].
    Moved {
        /// True if some record held the id as resolved.
        found: bool,
    },
    /// See [`DataBank::update_unmapped`].
    Updated(UpdateReport),
    /// See [`DataBank::delta_write`].
    Written(WriteReport),
    /// See [`DataBank::delta_read`].
    Read(ReadReport),
}

/// Every reference the tracker currently holds.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GatheredReferences {
    /// Union of unmapped and resolved dynamic ids.
    pub references: BTreeSet<NetRefId>,
    /// Bytes held in replay buffers.
    pub tracked_bytes: usize,
}

/// Outcome of one unmapped-reference poll.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpdateReport {
    /// At least one reference resolved during this poll.
    pub some_mapped: bool,
    /// Some record still waits on an unresolved reference.
    pub has_more_unmapped: bool,
    /// Records whose buffered bits were decoded again.
    pub replayed: Vec<TypeIndex>,
}

/// Outcome of a delta encode.
#[derive(Debug, Clone)]
pub struct WriteReport {
    /// Baseline to keep for the next send.
    pub new_state: Arc<DeltaBaseState>,
    /// Records written, in wire order.
    pub changed: Vec<TypeIndex>,
    /// Records announced as removed, in wire order.
    pub removed: Vec<TypeIndex>,
    /// Nothing changed since the baseline and nothing was written.
    pub unchanged: bool,
}

/// Outcome of a delta decode.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReadReport {
    /// Records created by this delta.
    pub added: Vec<TypeIndex>,
    /// Existing records overwritten by this delta.
    pub changed: Vec<TypeIndex>,
    /// Records removed by this delta.
    pub removed: Vec<TypeIndex>,
    /// Some record still waits on an unresolved reference.
    pub has_more_unmapped: bool,
    /// A record's tracked reference sets were created, altered or dropped.
    pub reference_lists_changed: bool,
    /// The stream ended early or was malformed; the rest of the batch was skipped.
    pub stream_error: bool,
}

impl DataBank {
    /// Route a delta request to its handler.
    pub fn net_delta_serialize(
        &mut self,
        request: DeltaRequest<'_, '_>,
    ) -> Result<DeltaResponse, NetError> {
        Ok(match request {
            DeltaRequest::GatherReferences => DeltaResponse::Gathered(self.gather_references()),
            DeltaRequest::MoveToUnmapped(id) => DeltaResponse::Moved {
                found: self.move_to_unmapped(id),
            },
            DeltaRequest::UpdateUnmapped { resolver } => {
                DeltaResponse::Updated(self.update_unmapped(resolver))
            }
            DeltaRequest::Write { writer, old_state } => {
                DeltaResponse::Written(self.delta_write(writer, old_state)?)
            }
            DeltaRequest::Read { reader, resolver } => {
                DeltaResponse::Read(self.delta_read(reader, resolver)?)
            }
        })
    }

    /// Every tracked reference, resolved or not, plus the buffered byte total.
    pub fn gather_references(&self) -> GatheredReferences {
        let mut gathered = GatheredReferences::default();
        for (_, set) in self.unmapped.iter() {
            gathered.references.extend(set.unmapped().iter().copied());
            gathered.references.extend(set.mapped_dynamic().iter().copied());
            gathered.tracked_bytes += set.buffer().len();
        }
        gathered
    }

    /// Move `id` from resolved back to unmapped wherever it is tracked.
    pub fn move_to_unmapped(&mut self, id: NetRefId) -> bool {
        let mut found = false;
        for set in self.unmapped.entries_mut().values_mut() {
            if set.mapped_dynamic.remove(&id) {
                set.unmapped.insert(id);
                found = true;
            }
        }
        if found {
            debug!(%id, "reference moved back to unmapped");
        }
        found
    }

    /// Retry every unresolved reference and replay records that made progress.
    ///
    /// Records themselves are never removed here; only their tracking entries
    /// are dropped once no reference is left to watch.
    pub fn update_unmapped(&mut self, resolver: &dyn ObjectResolver) -> UpdateReport {
        let mut report = UpdateReport::default();
        let records = &mut self.records;
        self.unmapped.entries_mut().retain(|&index, set| {
            let Some(slot) = records.get_mut(&index) else {
                return false;
            };
            set.mapped_dynamic.retain(|&id| !resolver.is_broken(id));
            let mut mapped_any = false;
            let pending: Vec<NetRefId> = set.unmapped.iter().copied().collect();
            for id in pending {
                if resolver.is_broken(id) {
                    debug!(index, %id, "dropping broken reference");
                    set.unmapped.remove(&id);
                } else if resolver.resolve(id).is_some() {
                    set.unmapped.remove(&id);
                    if id.is_dynamic() {
                        set.mapped_dynamic.insert(id);
                    }
                    mapped_any = true;
                }
            }
            if mapped_any {
                set.replay(slot.record.as_mut(), resolver);
                report.replayed.push(index);
                report.some_mapped = true;
            }
            !set.is_empty()
        });
        report.has_more_unmapped = self.unmapped.has_pending();
        if report.some_mapped {
            debug!(
                replayed = report.replayed.len(),
                pending = report.has_more_unmapped,
                "unmapped references resolved"
            );
        }
        report
    }

    /// Encode the records added, changed or removed since `old_state`.
    ///
    /// When the container key still matches the baseline nothing is written
    /// and the same baseline is handed back.
    pub fn delta_write(
        &self,
        writer: &mut BitWriter,
        old_state: Option<&Arc<DeltaBaseState>>,
    ) -> Result<WriteReport, NetError> {
        if let Some(old) = old_state {
            if old.container_key == Some(self.last_replication_key) {
                return Ok(WriteReport {
                    new_state: Arc::clone(old),
                    changed: Vec::new(),
                    removed: Vec::new(),
                    unchanged: true,
                });
            }
        }

        let empty = DeltaBaseState::default();
        let base: &DeltaBaseState = old_state.map_or(&empty, |state| state.as_ref());
        let removed: Vec<TypeIndex> = base
            .rep_keys
            .keys()
            .copied()
            .filter(|index| !self.records.contains_key(index))
            .collect();
        let changed: Vec<TypeIndex> = self
            .records
            .iter()
            .filter(|&(index, slot)| base.rep_keys.get(index) != Some(&slot.replication_key))
            .map(|(&index, _)| index)
            .collect();
        let removed_count = check_wire_count("removed", removed.len())?;
        let changed_count = check_wire_count("changed", changed.len())?;

        writer.write_u8(removed_count);
        for &index in &removed {
            writer.write_u16(index);
        }
        writer.write_u8(changed_count);
        for &index in &changed {
            writer.write_u16(index);
            if let Some(slot) = self.records.get(&index) {
                slot.record.encode(writer);
            }
        }
        if writer.is_error() {
            warn!(changed = changed.len(), "writer overflowed during delta serialize");
        }

        let new_state = DeltaBaseState {
            rep_keys: self
                .records
                .iter()
                .map(|(&index, slot)| (index, slot.replication_key))
                .collect(),
            container_key: Some(self.last_replication_key),
        };
        debug!(
            removed = removed.len(),
            changed = changed.len(),
            key = self.last_replication_key,
            "delta written"
        );
        Ok(WriteReport {
            new_state: Arc::new(new_state),
            changed,
            removed,
            unchanged: false,
        })
    }

    /// Apply a delta produced by [`Self::delta_write`].
    ///
    /// A record whose bytes are cut short is left untouched and the rest of
    /// the batch is skipped; records decoded before it stay applied.
    pub fn delta_read(
        &mut self,
        reader: &mut BitReader<'_>,
        resolver: &dyn ObjectResolver,
    ) -> Result<ReadReport, NetError> {
        let mut report = ReadReport::default();
        self.read_removals(reader, &mut report);
        if !report.stream_error {
            self.read_changes(reader, resolver, &mut report)?;
        }
        report.has_more_unmapped = self.unmapped.has_pending();
        if report.stream_error {
            warn!(
                applied = report.added.len() + report.changed.len(),
                "delta stream ended early"
            );
        }
        Ok(report)
    }

    fn read_removals(&mut self, reader: &mut BitReader<'_>, report: &mut ReadReport) {
        let count = reader.read_u8();
        for _ in 0..count {
            let index = reader.read_u16();
            if reader.is_error() {
                break;
            }
            if self.unmapped.get(index).is_some() {
                report.reference_lists_changed = true;
            }
            if self.remove_index(index) {
                report.removed.push(index);
            }
        }
        report.stream_error = reader.is_error();
    }

    fn read_changes(
        &mut self,
        reader: &mut BitReader<'_>,
        resolver: &dyn ObjectResolver,
        report: &mut ReadReport,
    ) -> Result<(), NetError> {
        let count = reader.read_u8();
        let mut refs = ResolveContext::new(resolver);
        for _ in 0..count {
            let index = reader.read_u16();
            if reader.is_error() {
                break;
            }
            let existing = self
                .records
                .get(&index)
                .map(|slot| slot.record.clone_record());
            let is_new = existing.is_none();
            let mut record = match existing {
                Some(record) => record,
                None => self.cache().type_of(index)?.construct(),
            };

            refs.reset_tracked(true);
            let mark = reader.mark();
            record.decode(reader, &mut refs);
            if reader.is_error() {
                break;
            }

            let replication_key = self.next_replication_key();
            self.records.insert(
                index,
                RecordSlot {
                    replication_key,
                    record,
                },
            );
            if is_new {
                report.added.push(index);
            } else {
                report.changed.push(index);
            }

            if refs.tracked_unmapped().is_empty() && refs.tracked_mapped_dynamic().is_empty() {
                if self.unmapped.remove(index).is_some() {
                    report.reference_lists_changed = true;
                }
                continue;
            }
            let (buffer, num_bits) = reader.copy_since(mark);
            let set = self.unmapped.entry(index);
            if set.unmapped != *refs.tracked_unmapped()
                || set.mapped_dynamic != *refs.tracked_mapped_dynamic()
            {
                report.reference_lists_changed = true;
            }
            set.unmapped = refs.tracked_unmapped().clone();
            set.mapped_dynamic = refs.tracked_mapped_dynamic().clone();
            set.buffer = buffer;
            set.num_bits = num_bits;
        }
        report.stream_error = reader.is_error();
        Ok(())
    }
}

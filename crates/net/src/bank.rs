//! The record store: at most one record per registered type.

use std::any::Any;
use std::collections::BTreeMap;
use std::sync::Arc;

use polybank_core::{
    BankError, Record, RecordType, ReplicationKey, TypeDescriptor, TypeIndex, TypeIndexCache,
    ANY_FAMILY,
};
use tracing::error;

use crate::unmapped::UnmappedTracker;

/// One stored record and the key it was last dirtied with.
#[derive(Debug)]
pub(crate) struct RecordSlot {
    pub(crate) replication_key: ReplicationKey,
    pub(crate) record: Box<dyn Record>,
}

/// Polymorphic container holding at most one record per type of its family.
///
/// Every mutation stamps the touched record with the next value of the bank's
/// replication counter; the delta serializer compares those stamps against a
/// per-connection baseline.
#[derive(Debug)]
pub struct DataBank {
    cache: Arc<TypeIndexCache>,
    pub(crate) records: BTreeMap<TypeIndex, RecordSlot>,
    pub(crate) unmapped: UnmappedTracker,
    pub(crate) last_replication_key: ReplicationKey,
}

impl DataBank {
    /// Empty bank indexing its records through `cache`.
    pub fn new(cache: Arc<TypeIndexCache>) -> Self {
        Self {
            cache,
            records: BTreeMap::new(),
            unmapped: UnmappedTracker::default(),
            last_replication_key: 0,
        }
    }

    /// The type index cache this bank was built with.
    pub fn cache(&self) -> &Arc<TypeIndexCache> {
        &self.cache
    }

    /// Number of stored records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// True when no record is stored.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Container-level replication key.
    pub fn last_replication_key(&self) -> ReplicationKey {
        self.last_replication_key
    }

    /// Type indices of the stored records, ascending.
    pub fn indices(&self) -> impl Iterator<Item = TypeIndex> + '_ {
        self.records.keys().copied()
    }

    /// Stored records in index order.
    pub fn records(&self) -> impl Iterator<Item = (TypeIndex, &dyn Record)> + '_ {
        self.records
            .iter()
            .map(|(&index, slot)| (index, slot.record.as_ref()))
    }

    /// Records waiting for references to resolve.
    pub fn unmapped(&self) -> &UnmappedTracker {
        &self.unmapped
    }

    /// True if a `T` is stored. Foreign types are never contained.
    pub fn contains<T: RecordType>(&self) -> bool {
        self.key_of::<T>()
            .map(|index| self.records.contains_key(&index))
            .unwrap_or(false)
    }

    /// Insert a default `T`. Fails if one is already present.
    pub fn add_unique<T: RecordType>(&mut self) -> Result<&mut T, BankError> {
        let index = self.key_of::<T>()?;
        if self.records.contains_key(&index) {
            error!(record = T::NAME, "add_unique called for a record that is already present");
            return Err(BankError::DuplicateRecord {
                name: T::NAME.to_string(),
            });
        }
        let replication_key = self.next_replication_key();
        let slot = self.records.entry(index).or_insert(RecordSlot {
            replication_key,
            record: Box::new(T::default()),
        });
        downcast_slot(slot)
    }

    /// Mutable access to the stored `T`. Marks the record dirty.
    pub fn get<T: RecordType>(&mut self) -> Option<&mut T> {
        let index = self.key_of::<T>().ok()?;
        if !self.touch(index) {
            return None;
        }
        self.records
            .get_mut(&index)
            .and_then(|slot| slot.record.downcast_mut::<T>())
    }

    /// Read-only access to the stored `T`.
    pub fn get_const<T: RecordType>(&self) -> Option<&T> {
        let index = self.key_of::<T>().ok()?;
        self.records
            .get(&index)
            .and_then(|slot| slot.record.downcast_ref::<T>())
    }

    /// Mutable access to `T`, inserting a default one first if needed.
    pub fn get_or_add<T: RecordType>(&mut self) -> Result<&mut T, BankError> {
        let index = self.key_of::<T>()?;
        if self.records.contains_key(&index) {
            self.touch(index);
            let slot = self
                .records
                .get_mut(&index)
                .ok_or_else(|| missing_record(T::NAME))?;
            downcast_slot(slot)
        } else {
            self.add_unique::<T>()
        }
    }

    /// Mutable access to `T`; absence is an error.
    pub fn get_checked<T: RecordType>(&mut self) -> Result<&mut T, BankError> {
        self.key_of::<T>()?;
        match self.get::<T>() {
            Some(record) => Ok(record),
            None => {
                error!(record = T::NAME, "checked access to a missing record");
                Err(missing_record(T::NAME))
            }
        }
    }

    /// Read-only access to `T`; absence is an error. Does not mark dirty.
    pub fn get_const_checked<T: RecordType>(&self) -> Result<&T, BankError> {
        match self.get_const::<T>() {
            Some(record) => Ok(record),
            None => {
                self.key_of::<T>()?;
                error!(record = T::NAME, "checked read of a missing record");
                Err(missing_record(T::NAME))
            }
        }
    }

    /// Store a copy of `value`, overwriting any existing `T`.
    pub fn set_by_copy<T: RecordType>(&mut self, value: &T) -> Result<(), BankError> {
        let index = self.key_of::<T>()?;
        let replication_key = self.next_replication_key();
        match self.records.get_mut(&index) {
            Some(slot) => {
                match slot.record.downcast_mut::<T>() {
                    Some(existing) => existing.clone_from(value),
                    None => slot.record = Box::new(value.clone()),
                }
                slot.replication_key = replication_key;
            }
            None => {
                self.records.insert(
                    index,
                    RecordSlot {
                        replication_key,
                        record: Box::new(value.clone()),
                    },
                );
            }
        }
        Ok(())
    }

    /// Remove the stored `T`. Returns false if there was none.
    pub fn remove<T: RecordType>(&mut self) -> bool {
        match self.key_of::<T>() {
            Ok(index) => self.remove_index(index),
            Err(_) => false,
        }
    }

    /// Drop every record and bump the container key.
    pub fn empty(&mut self) {
        self.records.clear();
        self.unmapped.clear();
        self.next_replication_key();
    }

    /// Stamp the stored `T` with a fresh replication key.
    pub fn mark_dirty<T: RecordType>(&mut self) -> bool {
        match self.key_of::<T>() {
            Ok(index) => self.touch(index),
            Err(_) => false,
        }
    }

    /// Replication key of the stored `T`, if any.
    pub fn replication_key_of<T: RecordType>(&self) -> Option<ReplicationKey> {
        let index = self.key_of::<T>().ok()?;
        self.records.get(&index).map(|slot| slot.replication_key)
    }

    /// Insert a default instance of the type `descriptor` describes.
    pub fn add_unique_erased(
        &mut self,
        descriptor: &TypeDescriptor,
    ) -> Result<TypeIndex, BankError> {
        self.check_family(descriptor.name(), descriptor.family())?;
        let index = self.cache.index_of_name(descriptor.name())?;
        if self.cache.type_of(index)?.type_id() != descriptor.type_id() {
            error!(record = descriptor.name(), "descriptor does not match the cached type");
            return Err(BankError::UnknownType {
                name: descriptor.name().to_string(),
            });
        }
        if self.records.contains_key(&index) {
            error!(
                record = descriptor.name(),
                "add_unique called for a record that is already present"
            );
            return Err(BankError::DuplicateRecord {
                name: descriptor.name().to_string(),
            });
        }
        self.insert_default(index)?;
        Ok(index)
    }

    /// Store a copy of a type-erased record, overwriting the existing one.
    pub fn set_erased(&mut self, record: &dyn Record) -> Result<TypeIndex, BankError> {
        self.check_family(record.type_name(), record.family())?;
        let index = self.cache.index_of_name(record.type_name())?;
        if self.cache.type_of(index)?.type_id() != Any::type_id(record.as_any()) {
            error!(record = record.type_name(), "record does not match the cached type");
            return Err(BankError::UnknownType {
                name: record.type_name().to_string(),
            });
        }
        let replication_key = self.next_replication_key();
        self.records.insert(
            index,
            RecordSlot {
                replication_key,
                record: record.clone_record(),
            },
        );
        Ok(index)
    }

    /// Stored record registered as `name`.
    pub fn find_erased(&self, name: &str) -> Option<&dyn Record> {
        self.records
            .values()
            .find(|slot| slot.record.type_name() == name)
            .map(|slot| slot.record.as_ref())
    }

    /// Names of the stored records, in index order.
    pub fn available_types(&self) -> Vec<&'static str> {
        self.records
            .values()
            .map(|slot| slot.record.type_name())
            .collect()
    }

    fn key_of<T: RecordType>(&self) -> Result<TypeIndex, BankError> {
        self.check_family(T::NAME, T::FAMILY)?;
        self.cache.index_of::<T>()
    }

    fn check_family(&self, name: &str, family: &str) -> Result<(), BankError> {
        let expected = self.cache.family();
        if expected == ANY_FAMILY || expected == family {
            return Ok(());
        }
        error!(record = name, family, expected, "record type does not belong to this bank");
        Err(BankError::ForeignType {
            name: name.to_string(),
            found: family.to_string(),
            expected: expected.to_string(),
        })
    }

    pub(crate) fn next_replication_key(&mut self) -> ReplicationKey {
        self.last_replication_key += 1;
        self.last_replication_key
    }

    /// Mark the record at `index` dirty. False if absent.
    pub(crate) fn touch(&mut self, index: TypeIndex) -> bool {
        if !self.records.contains_key(&index) {
            return false;
        }
        let replication_key = self.next_replication_key();
        if let Some(slot) = self.records.get_mut(&index) {
            slot.replication_key = replication_key;
        }
        true
    }

    pub(crate) fn insert_default(&mut self, index: TypeIndex) -> Result<(), BankError> {
        let record = self.cache.type_of(index)?.construct();
        let replication_key = self.next_replication_key();
        self.records.insert(
            index,
            RecordSlot {
                replication_key,
                record,
            },
        );
        Ok(())
    }

    /// Drop the record at `index` and its unmapped tracking.
    pub(crate) fn remove_index(&mut self, index: TypeIndex) -> bool {
        self.unmapped.remove(index);
        if self.records.remove(&index).is_none() {
            return false;
        }
        // Removal has no per-record key left to compare; stamp the container.
        self.next_replication_key();
        true
    }
}

impl Clone for DataBank {
    fn clone(&self) -> Self {
        Self {
            cache: Arc::clone(&self.cache),
            records: self
                .records
                .iter()
                .map(|(&index, slot)| {
                    (
                        index,
                        RecordSlot {
                            replication_key: slot.replication_key,
                            record: slot.record.clone_record(),
                        },
                    )
                })
                .collect(),
            unmapped: self.unmapped.clone(),
            last_replication_key: self.last_replication_key,
        }
    }
}

fn downcast_slot<T: RecordType>(slot: &mut RecordSlot) -> Result<&mut T, BankError> {
    slot.record
        .downcast_mut::<T>()
        .ok_or_else(|| missing_record(T::NAME))
}

fn missing_record(name: &str) -> BankError {
    BankError::MissingRecord {
        name: name.to_string(),
    }
}

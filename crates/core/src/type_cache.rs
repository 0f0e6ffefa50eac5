//! Deterministic record type ↔ wire index mapping.
//!
//! Both ends of a connection build their cache independently from their own
//! registry. Because the order only depends on the type names, identical
//! registered sets always produce identical indices, and no type table ever
//! has to be transmitted.

use std::any::TypeId;
use std::cmp::Ordering;
use std::sync::{Arc, OnceLock};

use tracing::{debug, error};

use crate::error::BankError;
use crate::record::RecordType;
use crate::registry::{TypeDescriptor, TypeRegistry};
use crate::TypeIndex;

#[derive(Debug)]
struct CachedType {
    sort_key: String,
    descriptor: Arc<TypeDescriptor>,
}

/// Sorted sequence of a family's record types; index = position.
#[derive(Debug)]
pub struct TypeIndexCache {
    family: String,
    types: OnceLock<Vec<CachedType>>,
}

impl TypeIndexCache {
    /// Uninitialized cache for `family`.
    pub fn new(family: impl Into<String>) -> Self {
        Self {
            family: family.into(),
            types: OnceLock::new(),
        }
    }

    /// Build and initialize a cache in one step.
    pub fn build(registry: &TypeRegistry, family: impl Into<String>) -> Result<Self, BankError> {
        let cache = Self::new(family);
        cache.initialize(registry)?;
        Ok(cache)
    }

    /// Populate the cache from `registry`. Calls after the first are no-ops.
    pub fn initialize(&self, registry: &TypeRegistry) -> Result<(), BankError> {
        if self.types.get().is_some() {
            return Ok(());
        }
        let mut types: Vec<CachedType> = registry
            .list_subtypes_of(&self.family)
            .into_iter()
            .map(|descriptor| CachedType {
                sort_key: descriptor.name().to_lowercase(),
                descriptor,
            })
            .collect();
        if types.len() > usize::from(TypeIndex::MAX) + 1 {
            return Err(BankError::TooManyTypes {
                family: self.family.clone(),
                count: types.len(),
            });
        }
        types.sort_by(compare_descending);
        debug!(family = %self.family, types = types.len(), "type index cache initialized");
        // A concurrent initializer may have won; both computed the same order.
        let _ = self.types.set(types);
        Ok(())
    }

    /// True once `initialize` has run.
    pub fn is_initialized(&self) -> bool {
        self.types.get().is_some()
    }

    /// Family this cache indexes.
    pub fn family(&self) -> &str {
        &self.family
    }

    /// Number of indexed types (0 before initialization).
    pub fn len(&self) -> usize {
        self.types.get().map_or(0, Vec::len)
    }

    /// True when no types are indexed.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Wire index of `T`.
    pub fn index_of<T: RecordType>(&self) -> Result<TypeIndex, BankError> {
        let index = self.index_of_name(T::NAME)?;
        let descriptor = self.type_of(index)?;
        if descriptor.type_id() != TypeId::of::<T>() {
            error!(name = T::NAME, "type name is cached for a different Rust type");
            return Err(BankError::UnknownType {
                name: T::NAME.to_string(),
            });
        }
        Ok(index)
    }

    /// Wire index of the type registered as `name`.
    pub fn index_of_name(&self, name: &str) -> Result<TypeIndex, BankError> {
        let types = self.types()?;
        let key = name.to_lowercase();
        let found = types
            .binary_search_by(|probe| key.cmp(&probe.sort_key))
            .ok()
            .and_then(|hit| {
                // Names that only differ in case share a sort key; pick the exact one.
                let mut start = hit;
                while start > 0 && types[start - 1].sort_key == key {
                    start -= 1;
                }
                types[start..]
                    .iter()
                    .take_while(|t| t.sort_key == key)
                    .position(|t| t.descriptor.name() == name)
                    .map(|offset| start + offset)
            });
        match found {
            Some(index) => Ok(index as TypeIndex),
            None => {
                error!(name, family = %self.family, "record type missing from type index cache");
                Err(BankError::UnknownType {
                    name: name.to_string(),
                })
            }
        }
    }

    /// Descriptor stored at `index`.
    pub fn type_of(&self, index: TypeIndex) -> Result<&Arc<TypeDescriptor>, BankError> {
        let types = self.types()?;
        match types.get(usize::from(index)) {
            Some(cached) => Ok(&cached.descriptor),
            None => {
                error!(index, len = types.len(), "type index out of range");
                Err(BankError::IndexOutOfRange {
                    index,
                    len: types.len(),
                })
            }
        }
    }

    /// Descriptors in index order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<TypeDescriptor>> {
        self.types
            .get()
            .into_iter()
            .flatten()
            .map(|cached| &cached.descriptor)
    }

    /// Fingerprint of the index assignment.
    ///
    /// Peers with equal hashes agree on every index.
    pub fn schema_hash(&self) -> u64 {
        let mut hasher = blake3::Hasher::new();
        hasher.update(self.family.as_bytes());
        for descriptor in self.iter() {
            hasher.update(&[0]);
            hasher.update(descriptor.name().as_bytes());
        }
        let hash = hasher.finalize();
        let mut prefix = [0u8; 8];
        prefix.copy_from_slice(&hash.as_bytes()[..8]);
        u64::from_le_bytes(prefix)
    }

    fn types(&self) -> Result<&[CachedType], BankError> {
        match self.types.get() {
            Some(types) => Ok(types),
            None => {
                error!(family = %self.family, "type index cache used before initialization");
                Err(BankError::CacheNotInitialized {
                    family: self.family.clone(),
                })
            }
        }
    }
}

fn compare_descending(a: &CachedType, b: &CachedType) -> Ordering {
    b.sort_key
        .cmp(&a.sort_key)
        .then_with(|| b.descriptor.name().cmp(a.descriptor.name()))
}

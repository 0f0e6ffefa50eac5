//! Registered-factory table of record types.
//!
//! Populated once at startup; the type caches enumerate it per family.

use std::any::TypeId;
use std::collections::HashMap;
use std::mem;
use std::sync::Arc;

use crate::error::BankError;
use crate::record::{Record, RecordType};

/// Family name that matches every registered record type.
pub const ANY_FAMILY: &str = "*";

/// Factory and metadata for one concrete record type.
#[derive(Debug, Clone)]
pub struct TypeDescriptor {
    name: &'static str,
    family: &'static str,
    type_id: TypeId,
    size: usize,
    construct: fn() -> Box<dyn Record>,
}

impl TypeDescriptor {
    /// Descriptor for `T`.
    pub fn of<T: RecordType>() -> Self {
        Self {
            name: T::NAME,
            family: T::FAMILY,
            type_id: TypeId::of::<T>(),
            size: mem::size_of::<T>(),
            construct: construct_default::<T>,
        }
    }

    /// Stable type name.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Record family.
    pub fn family(&self) -> &'static str {
        self.family
    }

    /// Rust type id of the concrete type.
    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    /// In-memory size of the concrete type.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Heap-allocate a default-constructed instance.
    pub fn construct(&self) -> Box<dyn Record> {
        (self.construct)()
    }

    /// True if this type belongs to `family` (or `family` is [`ANY_FAMILY`]).
    pub fn is_member_of(&self, family: &str) -> bool {
        family == ANY_FAMILY || self.family == family
    }
}

fn construct_default<T: RecordType>() -> Box<dyn Record> {
    Box::new(T::default())
}

/// All record types known to the process.
#[derive(Debug, Default, Clone)]
pub struct TypeRegistry {
    descriptors: Vec<Arc<TypeDescriptor>>,
    by_name: HashMap<&'static str, usize>,
}

impl TypeRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `T`. Names must be unique across the whole registry.
    pub fn register<T: RecordType>(&mut self) -> Result<&mut Self, BankError> {
        self.register_descriptor(TypeDescriptor::of::<T>())
    }

    /// Register a prebuilt descriptor.
    pub fn register_descriptor(
        &mut self,
        descriptor: TypeDescriptor,
    ) -> Result<&mut Self, BankError> {
        if self.by_name.contains_key(descriptor.name()) {
            return Err(BankError::DuplicateRegistration {
                name: descriptor.name().to_string(),
            });
        }
        self.by_name.insert(descriptor.name(), self.descriptors.len());
        self.descriptors.push(Arc::new(descriptor));
        Ok(self)
    }

    /// Every registered type of `family`, in registration order.
    pub fn list_subtypes_of(&self, family: &str) -> Vec<Arc<TypeDescriptor>> {
        self.descriptors
            .iter()
            .filter(|d| d.is_member_of(family))
            .cloned()
            .collect()
    }

    /// Look up a descriptor by its exact name.
    pub fn find(&self, name: &str) -> Option<&Arc<TypeDescriptor>> {
        self.by_name.get(name).map(|&i| &self.descriptors[i])
    }

    /// Number of registered types.
    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    /// True when nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }
}

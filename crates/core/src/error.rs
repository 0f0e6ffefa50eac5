use thiserror::Error;

use crate::TypeIndex;

/// Invariant violations raised by the type cache, the registry and the bank.
///
/// None of these are expected in correct usage; they abort the single
/// operation that detected them.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BankError {
    /// The type name is not part of the cache's sorted sequence.
    #[error("record type `{name}` is not registered in the type index cache")]
    UnknownType {
        /// Name that failed to resolve.
        name: String,
    },
    /// A wire index points past the end of the cache.
    #[error("type index {index} is out of range (cache holds {len} types)")]
    IndexOutOfRange {
        /// Offending index.
        index: TypeIndex,
        /// Number of cached types.
        len: usize,
    },
    /// `add_unique` was called for a type that is already stored.
    #[error("record type `{name}` is already present in the bank")]
    DuplicateRecord {
        /// Record type name.
        name: String,
    },
    /// A checked accessor was called for a type that is not stored.
    #[error("record type `{name}` is not present in the bank")]
    MissingRecord {
        /// Record type name.
        name: String,
    },
    /// The type belongs to another record family than the bank holds.
    #[error("record type `{name}` belongs to family `{found}`, bank holds `{expected}`")]
    ForeignType {
        /// Record type name.
        name: String,
        /// Family of the requested type.
        found: String,
        /// Family served by the bank's cache.
        expected: String,
    },
    /// The cache was used before `initialize` populated it.
    #[error("type index cache for family `{family}` has not been initialized")]
    CacheNotInitialized {
        /// Family of the uninitialized cache.
        family: String,
    },
    /// Two record types were registered under the same name.
    #[error("record type `{name}` is already registered")]
    DuplicateRegistration {
        /// Conflicting name.
        name: String,
    },
    /// The cache holds more types than a `u16` index can address.
    #[error("family `{family}` has {count} record types; at most 65536 can be indexed")]
    TooManyTypes {
        /// Family being indexed.
        family: String,
        /// Number of candidate types.
        count: usize,
    },
}

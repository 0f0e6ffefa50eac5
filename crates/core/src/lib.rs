#![warn(missing_docs)]
//! Core primitives shared across the workspace.
//!
//! Record types, the registered-factory type registry, the deterministic
//! type-index cache, bit streams, replicated object references and locally
//! unique handles.

pub mod bitstream;
mod error;
mod handle;
pub mod net_ref;
mod record;
mod registry;
mod type_cache;

pub use bitstream::{BitMark, BitReader, BitWriter};
pub use error::BankError;
pub use handle::{Handle, HandleId, HandleKind};
pub use net_ref::{NetRefId, ObjectId, ObjectRef, ObjectResolver, ResolveContext};
pub use record::{Record, RecordType};
pub use registry::{TypeDescriptor, TypeRegistry, ANY_FAMILY};
pub use type_cache::TypeIndexCache;

/// Compact wire identifier of a record type (position in the sorted type cache).
pub type TypeIndex = u16;

/// Monotonic counter used for dirty detection.
///
/// Keys never go on the wire, so the width only bounds how many mutations
/// fit between two sends of the same baseline.
pub type ReplicationKey = u64;

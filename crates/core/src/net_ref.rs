//! Replicated object references and their resolution bookkeeping.
//!
//! Records may point at objects owned by the host (players, props, ...).
//! Only the [`NetRefId`] travels on the wire; the receiving side asks an
//! [`ObjectResolver`] for the live object, which may not exist yet. A
//! [`ResolveContext`] wraps the resolver during a decode and accumulates the
//! ids that could not be mapped.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::bitstream::{BitReader, BitWriter};

/// Network id of a replicated object.
///
/// `0` is the null reference. Odd ids belong to objects spawned at runtime
/// (dynamic), even ids to objects loaded with the level (static).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
pub struct NetRefId(pub u32);

impl NetRefId {
    /// The null reference.
    pub const NONE: Self = Self(0);

    /// True for any id other than [`NetRefId::NONE`].
    pub fn is_valid(self) -> bool {
        self.0 != 0
    }

    /// True for ids of dynamically spawned objects.
    pub fn is_dynamic(self) -> bool {
        self.0 & 1 == 1
    }
}

impl fmt::Display for NetRefId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ref#{}", self.0)
    }
}

/// Handle of a live object on the local side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectId(pub u64);

/// Host reference table consulted while decoding.
pub trait ObjectResolver {
    /// True when `id` will never resolve (e.g. the object was destroyed).
    fn is_broken(&self, id: NetRefId) -> bool;

    /// The live object for `id`, if it is currently known locally.
    fn resolve(&self, id: NetRefId) -> Option<ObjectId>;
}

/// Resolver wrapper that records unmapped and dynamic ids while tracking is on.
pub struct ResolveContext<'a> {
    resolver: &'a dyn ObjectResolver,
    tracking: bool,
    unmapped: BTreeSet<NetRefId>,
    mapped_dynamic: BTreeSet<NetRefId>,
    has_unmapped: bool,
}

impl<'a> ResolveContext<'a> {
    /// Wrap `resolver` with tracking disabled.
    pub fn new(resolver: &'a dyn ObjectResolver) -> Self {
        Self {
            resolver,
            tracking: false,
            unmapped: BTreeSet::new(),
            mapped_dynamic: BTreeSet::new(),
            has_unmapped: false,
        }
    }

    /// Clear the tracked sets and switch accumulation on or off.
    pub fn reset_tracked(&mut self, enabled: bool) {
        self.tracking = enabled;
        self.unmapped.clear();
        self.mapped_dynamic.clear();
        self.has_unmapped = false;
    }

    /// Resolve `id`, noting the outcome when tracking is enabled.
    pub fn resolve(&mut self, id: NetRefId) -> Option<ObjectId> {
        if !id.is_valid() || self.resolver.is_broken(id) {
            return None;
        }
        match self.resolver.resolve(id) {
            Some(object) => {
                if self.tracking && id.is_dynamic() {
                    self.mapped_dynamic.insert(id);
                }
                Some(object)
            }
            None => {
                self.has_unmapped = true;
                if self.tracking {
                    self.unmapped.insert(id);
                }
                None
            }
        }
    }

    /// Ids that failed to resolve since the last reset.
    pub fn tracked_unmapped(&self) -> &BTreeSet<NetRefId> {
        &self.unmapped
    }

    /// Dynamic ids that resolved since the last reset.
    pub fn tracked_mapped_dynamic(&self) -> &BTreeSet<NetRefId> {
        &self.mapped_dynamic
    }

    /// True if any lookup failed since the last reset, tracked or not.
    pub fn has_unmapped(&self) -> bool {
        self.has_unmapped
    }

    /// The wrapped resolver.
    pub fn resolver(&self) -> &'a dyn ObjectResolver {
        self.resolver
    }
}

/// Record field holding a replicated reference.
///
/// Equality compares both the wire id and the locally resolved target, so a
/// field decoded before its object became visible differs from one decoded
/// afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ObjectRef {
    id: NetRefId,
    target: Option<ObjectId>,
}

impl ObjectRef {
    /// Reference to `id`, already bound to `target` on the authoring side.
    pub fn new(id: NetRefId, target: Option<ObjectId>) -> Self {
        Self { id, target }
    }

    /// The null reference.
    pub fn null() -> Self {
        Self::default()
    }

    /// Wire id.
    pub fn id(&self) -> NetRefId {
        self.id
    }

    /// Locally resolved object, if any.
    pub fn target(&self) -> Option<ObjectId> {
        self.target
    }

    /// True when the id is valid and bound to a live object.
    pub fn is_resolved(&self) -> bool {
        self.id.is_valid() && self.target.is_some()
    }

    /// Encode the wire id.
    pub fn write(&self, writer: &mut BitWriter) {
        writer.write_u32(self.id.0);
    }

    /// Decode an id and resolve it through `refs`.
    pub fn read(reader: &mut BitReader<'_>, refs: &mut ResolveContext<'_>) -> Self {
        let id = NetRefId(reader.read_u32());
        if reader.is_error() {
            return Self::null();
        }
        Self {
            id,
            target: refs.resolve(id),
        }
    }
}

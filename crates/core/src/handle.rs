//! Locally unique typed handles.
//!
//! A [`Handle<K>`] is a `u32` id minted from a counter private to its kind
//! `K`. Id `0` is reserved for the invalid handle and is never generated.
//! Handles are only unique within one process; they are not replicated
//! object references (see [`crate::ObjectRef`] for those).

use std::any::TypeId;
use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::sync::{Mutex, OnceLock, PoisonError};

use serde::{Deserialize, Serialize};

use crate::bitstream::{BitReader, BitWriter};

/// Raw handle id.
pub type HandleId = u32;

/// Marker type naming one family of handles.
pub trait HandleKind: 'static {
    /// Name used when a handle is displayed.
    const NAME: &'static str;
}

/// Typed, locally unique id.
#[derive(Serialize, Deserialize)]
#[serde(transparent, bound = "")]
pub struct Handle<K: HandleKind> {
    id: HandleId,
    #[serde(skip)]
    _kind: PhantomData<fn() -> K>,
}

static COUNTERS: OnceLock<Mutex<HashMap<TypeId, HandleId>>> = OnceLock::new();

impl<K: HandleKind> Handle<K> {
    /// The invalid handle.
    pub const NONE: Self = Self::from_raw(0);

    /// Wrap a raw id.
    pub const fn from_raw(id: HandleId) -> Self {
        Self {
            id,
            _kind: PhantomData,
        }
    }

    /// Mint the next id of kind `K`. Wraps around but skips `0`.
    pub fn generate() -> Self {
        let counters = COUNTERS.get_or_init(|| Mutex::new(HashMap::new()));
        let mut counters = counters.lock().unwrap_or_else(PoisonError::into_inner);
        let next = counters.entry(TypeId::of::<K>()).or_insert(1);
        if *next == 0 {
            *next = 1;
        }
        let id = *next;
        *next = next.wrapping_add(1);
        Self::from_raw(id)
    }

    /// Raw id.
    pub fn id(self) -> HandleId {
        self.id
    }

    /// False only for [`Self::NONE`].
    pub fn is_valid(self) -> bool {
        self.id != 0
    }

    /// Encode the raw id.
    pub fn write(self, writer: &mut BitWriter) {
        writer.write_u32(self.id);
    }

    /// Decode a raw id.
    pub fn read(reader: &mut BitReader<'_>) -> Self {
        Self::from_raw(reader.read_u32())
    }
}

impl<K: HandleKind> Clone for Handle<K> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<K: HandleKind> Copy for Handle<K> {}

impl<K: HandleKind> Default for Handle<K> {
    fn default() -> Self {
        Self::NONE
    }
}

impl<K: HandleKind> PartialEq for Handle<K> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl<K: HandleKind> Eq for Handle<K> {}

impl<K: HandleKind> Hash for Handle<K> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl<K: HandleKind> fmt::Display for Handle<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_valid() {
            write!(f, "{}({})", K::NAME, self.id)
        } else {
            write!(f, "{}(INVALID)", K::NAME)
        }
    }
}

impl<K: HandleKind> fmt::Debug for Handle<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

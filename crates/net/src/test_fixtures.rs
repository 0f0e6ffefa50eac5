//! Record types and a resolver shared by the serializer unit tests.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use polybank_core::{
    BankError, BitReader, BitWriter, NetRefId, ObjectId, ObjectRef, ObjectResolver, RecordType,
    ResolveContext, TypeIndexCache, TypeRegistry,
};

use crate::DataBank;

pub const FAMILY: &str = "fixture";

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Score {
    pub value: i32,
}

impl RecordType for Score {
    const NAME: &'static str = "Score";
    const FAMILY: &'static str = FAMILY;

    fn encode_fields(&self, writer: &mut BitWriter) {
        writer.write_i32(self.value);
    }

    fn decode_fields(&mut self, reader: &mut BitReader<'_>, _refs: &mut ResolveContext<'_>) {
        self.value = reader.read_i32();
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Label {
    pub text: String,
}

impl RecordType for Label {
    const NAME: &'static str = "Label";
    const FAMILY: &'static str = FAMILY;

    fn encode_fields(&self, writer: &mut BitWriter) {
        writer.write_string(&self.text);
    }

    fn decode_fields(&mut self, reader: &mut BitReader<'_>, _refs: &mut ResolveContext<'_>) {
        self.text = reader.read_string();
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Link {
    pub weight: u8,
    pub first: ObjectRef,
    pub second: ObjectRef,
}

impl RecordType for Link {
    const NAME: &'static str = "Link";
    const FAMILY: &'static str = FAMILY;

    fn encode_fields(&self, writer: &mut BitWriter) {
        writer.write_u8(self.weight);
        self.first.write(writer);
        self.second.write(writer);
    }

    fn decode_fields(&mut self, reader: &mut BitReader<'_>, refs: &mut ResolveContext<'_>) {
        self.weight = reader.read_u8();
        self.first = ObjectRef::read(reader, refs);
        self.second = ObjectRef::read(reader, refs);
    }
}

pub fn fixture_bank() -> DataBank {
    let mut registry = TypeRegistry::new();
    registry
        .register::<Score>()
        .and_then(|r| r.register::<Label>())
        .and_then(|r| r.register::<Link>())
        .expect("register fixtures");
    let cache = TypeIndexCache::build(&registry, FAMILY).expect("fixture cache");
    DataBank::new(Arc::new(cache))
}

/// Receiving side sharing the sender's cache.
pub fn peer_of(bank: &DataBank) -> DataBank {
    DataBank::new(Arc::clone(bank.cache()))
}

#[derive(Debug, Default)]
pub struct Objects {
    pub live: BTreeMap<NetRefId, ObjectId>,
    pub broken: BTreeSet<NetRefId>,
}

impl Objects {
    pub fn reveal(&mut self, id: u32) {
        self.live.insert(NetRefId(id), ObjectId(u64::from(id) * 100));
    }
}

impl ObjectResolver for Objects {
    fn is_broken(&self, id: NetRefId) -> bool {
        self.broken.contains(&id)
    }

    fn resolve(&self, id: NetRefId) -> Option<ObjectId> {
        self.live.get(&id).copied()
    }
}

pub fn object_ref(id: u32) -> ObjectRef {
    ObjectRef::new(NetRefId(id), Some(ObjectId(u64::from(id) * 100)))
}

/// Family of 256 empty record types, one more than a wire count can carry.
pub const CROWD_FAMILY: &str = "crowd";

macro_rules! crowd_row {
    ($row:ident [$($col:ident)*]) => {
        pub mod $row {
            use super::*;

            $(
                #[derive(Debug, Clone, Default)]
                pub struct $col;

                impl RecordType for $col {
                    const NAME: &'static str =
                        concat!("Crowd", stringify!($row), stringify!($col));
                    const FAMILY: &'static str = CROWD_FAMILY;

                    fn encode_fields(&self, _writer: &mut BitWriter) {}

                    fn decode_fields(
                        &mut self,
                        _reader: &mut BitReader<'_>,
                        _refs: &mut ResolveContext<'_>,
                    ) {
                    }
                }
            )*

            pub fn register(registry: &mut TypeRegistry) -> Result<(), BankError> {
                $(registry.register::<$col>()?;)*
                Ok(())
            }

            pub fn fill(bank: &mut DataBank) -> Result<(), BankError> {
                $(bank.add_unique::<$col>()?;)*
                Ok(())
            }
        }
    };
}

macro_rules! crowd_grid {
    ([$($row:ident)*] $cols:tt) => {
        $(crowd_row!($row $cols);)*

        /// Bank holding one record of every crowd type.
        pub fn crowded_bank() -> DataBank {
            let mut registry = TypeRegistry::new();
            $($row::register(&mut registry).expect("register crowd");)*
            let cache = TypeIndexCache::build(&registry, CROWD_FAMILY).expect("crowd cache");
            let mut bank = DataBank::new(Arc::new(cache));
            $($row::fill(&mut bank).expect("fill crowd");)*
            bank
        }
    };
}

crowd_grid!(
    [r0 r1 r2 r3 r4 r5 r6 r7 r8 r9 ra rb rc rd re rf]
    [C0 C1 C2 C3 C4 C5 C6 C7 C8 C9 CA CB CC CD CE CF]
);

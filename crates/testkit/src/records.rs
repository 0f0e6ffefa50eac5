//! Sample record family used by the loopback harness and the simulator.

use std::sync::Arc;

use anyhow::Result;
use polybank_core::{
    BitReader, BitWriter, ObjectRef, RecordType, ResolveContext, TypeIndexCache, TypeRegistry,
};

/// Family every sample record belongs to.
pub const TEST_FAMILY: &str = "test";

/// Plain integer payload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TestScore {
    /// Current score.
    pub value: i32,
}

impl RecordType for TestScore {
    const NAME: &'static str = "TestScore";
    const FAMILY: &'static str = TEST_FAMILY;

    fn encode_fields(&self, writer: &mut BitWriter) {
        writer.write_i32(self.value);
    }

    fn decode_fields(&mut self, reader: &mut BitReader<'_>, _refs: &mut ResolveContext<'_>) {
        self.value = reader.read_i32();
    }
}

/// Variable-length string payload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TestLabel {
    /// Display text.
    pub text: String,
}

impl RecordType for TestLabel {
    const NAME: &'static str = "TestLabel";
    const FAMILY: &'static str = TEST_FAMILY;

    fn encode_fields(&self, writer: &mut BitWriter) {
        writer.write_string(&self.text);
    }

    fn decode_fields(&mut self, reader: &mut BitReader<'_>, _refs: &mut ResolveContext<'_>) {
        self.text = reader.read_string();
    }
}

/// Single object reference.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TestTarget {
    /// Referenced object.
    pub target: ObjectRef,
}

impl RecordType for TestTarget {
    const NAME: &'static str = "TestTarget";
    const FAMILY: &'static str = TEST_FAMILY;

    fn encode_fields(&self, writer: &mut BitWriter) {
        self.target.write(writer);
    }

    fn decode_fields(&mut self, reader: &mut BitReader<'_>, refs: &mut ResolveContext<'_>) {
        self.target = ObjectRef::read(reader, refs);
    }
}

/// Two references around a plain field.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TestEscort {
    /// Lead object.
    pub leader: ObjectRef,
    /// Following object.
    pub wingman: ObjectRef,
    /// Formation id.
    pub formation: u8,
}

impl RecordType for TestEscort {
    const NAME: &'static str = "TestEscort";
    const FAMILY: &'static str = TEST_FAMILY;

    fn encode_fields(&self, writer: &mut BitWriter) {
        self.leader.write(writer);
        writer.write_u8(self.formation);
        self.wingman.write(writer);
    }

    fn decode_fields(&mut self, reader: &mut BitReader<'_>, refs: &mut ResolveContext<'_>) {
        self.leader = ObjectRef::read(reader, refs);
        self.formation = reader.read_u8();
        self.wingman = ObjectRef::read(reader, refs);
    }
}

/// Record of another family; banks of [`TEST_FAMILY`] must reject it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ForeignMarker;

impl RecordType for ForeignMarker {
    const NAME: &'static str = "ForeignMarker";
    const FAMILY: &'static str = "foreign";

    fn encode_fields(&self, _writer: &mut BitWriter) {}

    fn decode_fields(&mut self, _reader: &mut BitReader<'_>, _refs: &mut ResolveContext<'_>) {}
}

/// Register every sample type, the foreign one included.
pub fn register_test_records(registry: &mut TypeRegistry) -> Result<()> {
    registry
        .register::<TestScore>()?
        .register::<TestLabel>()?
        .register::<TestTarget>()?
        .register::<TestEscort>()?
        .register::<ForeignMarker>()?;
    Ok(())
}

/// Registry holding the sample types.
pub fn test_registry() -> Result<TypeRegistry> {
    let mut registry = TypeRegistry::new();
    register_test_records(&mut registry)?;
    Ok(registry)
}

/// Initialized cache over [`TEST_FAMILY`].
pub fn test_cache() -> Result<Arc<TypeIndexCache>> {
    Ok(Arc::new(TypeIndexCache::build(&test_registry()?, TEST_FAMILY)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sample_family_excludes_the_foreign_marker() {
        let cache = test_cache().expect("cache");
        let names: Vec<_> = cache.iter().map(|d| d.name()).collect();
        assert_eq!(names, vec!["TestTarget", "TestScore", "TestLabel", "TestEscort"]);
        assert!(cache.index_of::<ForeignMarker>().is_err());
    }
}

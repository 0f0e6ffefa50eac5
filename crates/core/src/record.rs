//! Record traits: typed definitions and their type-erased view.

use std::any::Any;
use std::fmt;

use crate::bitstream::{BitReader, BitWriter};
use crate::net_ref::ResolveContext;

/// A concrete record type that can live in a data bank.
///
/// `NAME` must be stable across builds and processes: it is the sort key that
/// assigns wire indices. `FAMILY` names the group of record types a bank is
/// declared to hold.
pub trait RecordType: Default + Clone + fmt::Debug + Send + 'static {
    /// Stable type name.
    const NAME: &'static str;
    /// Record family this type belongs to.
    const FAMILY: &'static str;

    /// Write every replicated field.
    fn encode_fields(&self, writer: &mut BitWriter);

    /// Read every replicated field, resolving references through `refs`.
    fn decode_fields(&mut self, reader: &mut BitReader<'_>, refs: &mut ResolveContext<'_>);
}

/// Type-erased view of a record, as stored by the bank.
pub trait Record: Any + fmt::Debug + Send + 'static {
    /// Stable type name.
    fn type_name(&self) -> &'static str;
    /// Record family.
    fn family(&self) -> &'static str;
    /// Encode the record body.
    fn encode(&self, writer: &mut BitWriter);
    /// Decode the record body in place.
    fn decode(&mut self, reader: &mut BitReader<'_>, refs: &mut ResolveContext<'_>);
    /// Heap copy of the record.
    fn clone_record(&self) -> Box<dyn Record>;
    /// Upcast for downcasting.
    fn as_any(&self) -> &dyn Any;
    /// Mutable upcast for downcasting.
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<T: RecordType> Record for T {
    fn type_name(&self) -> &'static str {
        T::NAME
    }

    fn family(&self) -> &'static str {
        T::FAMILY
    }

    fn encode(&self, writer: &mut BitWriter) {
        self.encode_fields(writer);
    }

    fn decode(&mut self, reader: &mut BitReader<'_>, refs: &mut ResolveContext<'_>) {
        self.decode_fields(reader, refs);
    }

    fn clone_record(&self) -> Box<dyn Record> {
        Box::new(self.clone())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

impl dyn Record {
    /// True if the record is a `T`.
    pub fn is<T: RecordType>(&self) -> bool {
        self.as_any().is::<T>()
    }

    /// Borrow as a concrete `T`.
    pub fn downcast_ref<T: RecordType>(&self) -> Option<&T> {
        self.as_any().downcast_ref::<T>()
    }

    /// Mutably borrow as a concrete `T`.
    pub fn downcast_mut<T: RecordType>(&mut self) -> Option<&mut T> {
        self.as_any_mut().downcast_mut::<T>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Default, PartialEq)]
    struct Counter {
        hits: u32,
    }

    impl RecordType for Counter {
        const NAME: &'static str = "Counter";
        const FAMILY: &'static str = "unit";

        fn encode_fields(&self, writer: &mut BitWriter) {
            writer.write_u32(self.hits);
        }

        fn decode_fields(&mut self, reader: &mut BitReader<'_>, _refs: &mut ResolveContext<'_>) {
            self.hits = reader.read_u32();
        }
    }

    #[derive(Debug, Clone, Default)]
    struct Other;

    impl RecordType for Other {
        const NAME: &'static str = "Other";
        const FAMILY: &'static str = "unit";

        fn encode_fields(&self, _writer: &mut BitWriter) {}

        fn decode_fields(&mut self, _reader: &mut BitReader<'_>, _refs: &mut ResolveContext<'_>) {}
    }

    #[test]
    fn boxed_record_downcasts_to_its_type() {
        let mut boxed: Box<dyn Record> = Box::new(Counter { hits: 4 });
        assert!(boxed.is::<Counter>());
        assert!(!boxed.is::<Other>());
        assert_eq!(boxed.type_name(), "Counter");
        assert_eq!(boxed.family(), "unit");

        if let Some(counter) = boxed.downcast_mut::<Counter>() {
            counter.hits += 1;
        }
        assert_eq!(boxed.downcast_ref::<Counter>(), Some(&Counter { hits: 5 }));
        assert!(boxed.downcast_ref::<Other>().is_none());
    }

    #[test]
    fn clone_record_is_deep() {
        let original: Box<dyn Record> = Box::new(Counter { hits: 9 });
        let mut copy = original.clone_record();
        if let Some(counter) = copy.downcast_mut::<Counter>() {
            counter.hits = 1;
        }
        assert_eq!(original.downcast_ref::<Counter>().map(|c| c.hits), Some(9));
        assert_eq!(copy.downcast_ref::<Counter>().map(|c| c.hits), Some(1));
    }
}

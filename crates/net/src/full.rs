//! Full (non-incremental) bank serialization for one-shot transmission.
//!
//! Wire format: `u8 count`, then `count × (u16 type index, record bytes)`.

use polybank_core::{BankError, BitReader, BitWriter, ObjectResolver, ResolveContext};
use tracing::{error, warn};

use crate::{DataBank, NetError};

/// Most entries a single `u8` count can describe.
pub const MAX_WIRE_RECORDS: usize = u8::MAX as usize;

/// Narrow a list length to its wire count, failing past [`MAX_WIRE_RECORDS`].
pub(crate) fn check_wire_count(section: &'static str, count: usize) -> Result<u8, NetError> {
    u8::try_from(count).map_err(|_| {
        error!(section, count, max = MAX_WIRE_RECORDS, "too many records for the wire format");
        NetError::TooManyRecords {
            section,
            count,
            max: MAX_WIRE_RECORDS,
        }
    })
}

impl DataBank {
    /// Encode every stored record.
    ///
    /// Nothing is written when the bank holds more than [`MAX_WIRE_RECORDS`].
    pub fn net_serialize(&self, writer: &mut BitWriter) -> Result<(), NetError> {
        let count = check_wire_count("records", self.records.len())?;
        writer.write_u8(count);
        for (&index, slot) in &self.records {
            writer.write_u16(index);
            slot.record.encode(writer);
        }
        if writer.is_error() {
            warn!(records = count, "writer overflowed during full serialize");
        }
        Ok(())
    }

    /// Replace the bank's contents with the records encoded in `reader`.
    ///
    /// Returns `Ok(false)` when the stream is malformed or a reference could
    /// not be resolved immediately; full decodes never defer resolution.
    pub fn net_deserialize(
        &mut self,
        reader: &mut BitReader<'_>,
        resolver: &dyn ObjectResolver,
    ) -> Result<bool, NetError> {
        self.empty();
        let count = reader.read_u8();
        let mut refs = ResolveContext::new(resolver);
        for _ in 0..count {
            let index = reader.read_u16();
            if reader.is_error() {
                break;
            }
            if self.records.contains_key(&index) {
                let name = self.cache().type_of(index)?.name();
                error!(index, record = name, "full stream repeats a record");
                return Err(BankError::DuplicateRecord {
                    name: name.to_string(),
                }
                .into());
            }
            self.insert_default(index)?;
            if let Some(slot) = self.records.get_mut(&index) {
                slot.record.decode(reader, &mut refs);
            }
            if reader.is_error() {
                break;
            }
        }
        if reader.is_error() {
            warn!(records = count, "full deserialize hit a malformed stream");
            return Ok(false);
        }
        Ok(!refs.has_unmapped())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_fixtures::{
        crowded_bank, fixture_bank, object_ref, peer_of, Label, Link, Objects, Score,
    };

    fn encode(bank: &DataBank) -> (Vec<u8>, usize) {
        let mut writer = BitWriter::new();
        bank.net_serialize(&mut writer).expect("serialize");
        writer.into_parts()
    }

    #[test]
    fn round_trip_reproduces_every_record() {
        let mut sender = fixture_bank();
        sender.set_by_copy(&Score { value: -12 }).expect("set");
        sender
            .set_by_copy(&Label {
                text: "north gate".to_string(),
            })
            .expect("set");
        let (bytes, bits) = encode(&sender);

        let mut receiver = peer_of(&sender);
        let mut reader = BitReader::with_bit_len(&bytes, bits);
        assert_eq!(
            receiver.net_deserialize(&mut reader, &Objects::default()).ok(),
            Some(true)
        );
        assert_eq!(receiver.get_const::<Score>(), Some(&Score { value: -12 }));
        assert_eq!(
            receiver.get_const::<Label>().map(|l| l.text.as_str()),
            Some("north gate")
        );
        assert_eq!(receiver.len(), 2);
    }

    #[test]
    fn deserialize_discards_previous_contents() {
        let mut sender = fixture_bank();
        sender.set_by_copy(&Score { value: 1 }).expect("set");
        let (bytes, bits) = encode(&sender);

        let mut receiver = peer_of(&sender);
        receiver.set_by_copy(&Label::default()).expect("set");
        let mut reader = BitReader::with_bit_len(&bytes, bits);
        receiver
            .net_deserialize(&mut reader, &Objects::default())
            .expect("deserialize");
        assert!(!receiver.contains::<Label>());
        assert!(receiver.contains::<Score>());
    }

    #[test]
    fn unresolved_reference_fails_the_decode() {
        let mut sender = fixture_bank();
        sender
            .set_by_copy(&Link {
                weight: 2,
                first: object_ref(5),
                second: object_ref(6),
            })
            .expect("set");
        let (bytes, bits) = encode(&sender);

        let mut objects = Objects::default();
        objects.reveal(6);
        let mut receiver = peer_of(&sender);
        let mut reader = BitReader::with_bit_len(&bytes, bits);
        assert_eq!(receiver.net_deserialize(&mut reader, &objects).ok(), Some(false));

        objects.reveal(5);
        let mut reader = BitReader::with_bit_len(&bytes, bits);
        assert_eq!(receiver.net_deserialize(&mut reader, &objects).ok(), Some(true));
        assert_eq!(
            receiver.get_const::<Link>().map(|l| l.first),
            Some(object_ref(5))
        );
    }

    #[test]
    fn truncated_stream_reports_failure() {
        let mut sender = fixture_bank();
        sender
            .set_by_copy(&Label {
                text: "truncated".to_string(),
            })
            .expect("set");
        let (bytes, bits) = encode(&sender);

        let mut receiver = peer_of(&sender);
        let mut reader = BitReader::with_bit_len(&bytes, bits - 9);
        assert_eq!(
            receiver.net_deserialize(&mut reader, &Objects::default()).ok(),
            Some(false)
        );
    }

    #[test]
    fn out_of_range_index_is_an_invariant_error() {
        let bank = fixture_bank();
        let mut writer = BitWriter::new();
        writer.write_u8(1);
        writer.write_u16(40);
        let (bytes, bits) = writer.into_parts();

        let mut receiver = peer_of(&bank);
        let mut reader = BitReader::with_bit_len(&bytes, bits);
        let err = receiver
            .net_deserialize(&mut reader, &Objects::default())
            .unwrap_err();
        assert!(matches!(
            err,
            NetError::Bank(BankError::IndexOutOfRange { index: 40, .. })
        ));
    }

    #[test]
    fn wire_count_is_capped_at_one_byte() {
        assert_eq!(check_wire_count("records", 255).ok(), Some(255));
        assert!(matches!(
            check_wire_count("records", 256),
            Err(NetError::TooManyRecords {
                count: 256,
                max: 255,
                ..
            })
        ));
    }

    #[test]
    fn oversized_bank_writes_nothing() {
        let bank = crowded_bank();
        assert_eq!(bank.len(), MAX_WIRE_RECORDS + 1);

        let mut writer = BitWriter::new();
        assert!(matches!(
            bank.net_serialize(&mut writer),
            Err(NetError::TooManyRecords {
                section: "records",
                count: 256,
                ..
            })
        ));
        assert_eq!(writer.num_bits(), 0);
    }
}

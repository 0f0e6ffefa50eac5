#![warn(missing_docs)]
//! Polymorphic data bank with full and delta network serialization.
//!
//! A [`DataBank`] stores at most one record per registered type. It can be
//! sent whole ([`DataBank::net_serialize`]) for one-shot transmission, or
//! replicated incrementally against a per-connection [`DeltaBaseState`]
//! ([`DataBank::net_delta_serialize`]). References that cannot be resolved on
//! receipt are buffered and replayed once their objects appear.

mod bank;
mod delta;
mod full;
mod packet;
#[cfg(test)]
mod test_fixtures;
mod unmapped;

pub use bank::DataBank;
pub use delta::{
    DeltaBaseState, DeltaRequest, DeltaResponse, GatheredReferences, ReadReport, UpdateReport,
    WriteReport,
};
pub use full::MAX_WIRE_RECORDS;
pub use packet::{decode_packet, encode_packet, PacketKind, ReplicationPacket};
pub use unmapped::{UnmappedReferenceSet, UnmappedTracker};

use polybank_core::BankError;
use thiserror::Error;

/// Failures of the bank serializers.
#[derive(Debug, Error)]
pub enum NetError {
    /// A type cache or store invariant was violated.
    #[error(transparent)]
    Bank(#[from] BankError),
    /// More entries than the `u8` wire count can describe.
    #[error("{section} count {count} exceeds the wire limit of {max}")]
    TooManyRecords {
        /// Which list overflowed ("records", "removed", "changed").
        section: &'static str,
        /// Entries that would have been written.
        count: usize,
        /// Wire limit.
        max: usize,
    },
}

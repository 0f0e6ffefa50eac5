//! Framing of serialized bank payloads for transport.
//!
//! Frame format: `[length: u32][kind: u8][postcard payload]`, where `length`
//! counts the kind tag and the payload.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Which serializer produced the payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PacketKind {
    /// [`crate::DataBank::net_serialize`] output.
    Full,
    /// [`crate::DataBank::delta_write`] output.
    Delta,
}

impl PacketKind {
    fn tag(self) -> u8 {
        match self {
            PacketKind::Full => 0,
            PacketKind::Delta => 1,
        }
    }
}

/// One bank update on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicationPacket {
    /// Sender's type cache fingerprint.
    pub schema_hash: u64,
    /// Simulation tick the payload was captured at.
    pub tick: u64,
    /// Serializer that produced `payload`.
    pub kind: PacketKind,
    /// Exact number of valid bits in `payload`.
    pub num_bits: u32,
    /// Bit-stream bytes.
    pub payload: Vec<u8>,
}

/// Encode a packet with its length prefix.
pub fn encode_packet(packet: &ReplicationPacket) -> Result<Vec<u8>> {
    let payload = postcard::to_allocvec(packet).context("Failed to serialize replication packet")?;

    let mut frame = Vec::with_capacity(4 + 1 + payload.len());
    let length = u32::try_from(1 + payload.len()).context("Replication packet too large")?;
    frame.extend_from_slice(&length.to_le_bytes());
    frame.push(packet.kind.tag());
    frame.extend_from_slice(&payload);

    Ok(frame)
}

/// Decode a packet from frame data starting at its length prefix.
pub fn decode_packet(data: &[u8]) -> Result<ReplicationPacket> {
    if data.len() < 5 {
        return Err(anyhow::anyhow!(
            "Frame too short: {} bytes (minimum 5)",
            data.len()
        ));
    }

    let length = u32::from_le_bytes([data[0], data[1], data[2], data[3]]) as usize;
    if length == 0 || data.len() - 4 < length {
        return Err(anyhow::anyhow!(
            "Incomplete frame: expected {} bytes, got {}",
            4usize.saturating_add(length),
            data.len()
        ));
    }

    let tag = data[4];
    let payload = &data[5..4 + length];
    let packet: ReplicationPacket =
        postcard::from_bytes(payload).context("Failed to deserialize replication packet")?;

    if packet.kind.tag() != tag {
        return Err(anyhow::anyhow!(
            "Frame tag {} does not match packet kind {:?}",
            tag,
            packet.kind
        ));
    }
    if packet.num_bits as usize > packet.payload.len() * 8 {
        return Err(anyhow::anyhow!(
            "Packet claims {} bits but carries {} bytes",
            packet.num_bits,
            packet.payload.len()
        ));
    }

    Ok(packet)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> ReplicationPacket {
        ReplicationPacket {
            schema_hash: 0xDEAD_BEEF,
            tick: 42,
            kind: PacketKind::Delta,
            num_bits: 19,
            payload: vec![0xAB, 0xCD, 0x05],
        }
    }

    #[test]
    fn test_packet_framing() {
        let frame = encode_packet(&sample()).expect("encode");
        let length = u32::from_le_bytes([frame[0], frame[1], frame[2], frame[3]]) as usize;
        assert_eq!(length + 4, frame.len());
        assert_eq!(frame[4], 1);
        assert_eq!(decode_packet(&frame).expect("decode"), sample());
    }

    #[test]
    fn test_short_and_incomplete_frames() {
        assert!(decode_packet(&[1, 0, 0]).is_err());

        let frame = encode_packet(&sample()).expect("encode");
        assert!(decode_packet(&frame[..frame.len() - 1]).is_err());
    }

    #[test]
    fn test_mismatched_tag_is_rejected() {
        let mut frame = encode_packet(&sample()).expect("encode");
        frame[4] = 0;
        assert!(decode_packet(&frame).is_err());
    }

    #[test]
    fn test_bit_count_past_payload_is_rejected() {
        let mut packet = sample();
        packet.num_bits = 25;
        let frame = encode_packet(&packet).expect("encode");
        assert!(decode_packet(&frame).is_err());
    }
}

//! Bit-granular stream writer and reader.
//!
//! Values are packed least significant bit first. Neither side panics on bad
//! input: both enter a sticky error state instead, and a reader in error
//! state yields zeros.

/// Largest string payload accepted on the wire (bytes).
pub const MAX_STRING_BYTES: usize = 64 * 1024;

/// Append-only bit writer.
#[derive(Debug, Clone, Default)]
pub struct BitWriter {
    bytes: Vec<u8>,
    num_bits: usize,
    error: bool,
}

impl BitWriter {
    /// Create an empty writer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty writer with room for `bytes` bytes.
    pub fn with_capacity(bytes: usize) -> Self {
        Self {
            bytes: Vec::with_capacity(bytes),
            num_bits: 0,
            error: false,
        }
    }

    /// Write a single bit.
    pub fn write_bit(&mut self, bit: bool) {
        let byte = self.num_bits / 8;
        if byte == self.bytes.len() {
            self.bytes.push(0);
        }
        if bit {
            self.bytes[byte] |= 1 << (self.num_bits % 8);
        }
        self.num_bits += 1;
    }

    /// Write the low `count` bits of `value` (`count <= 64`).
    pub fn write_bits(&mut self, value: u64, count: u32) {
        let count = count.min(64);
        if self.num_bits % 8 == 0 && count % 8 == 0 {
            for i in 0..count / 8 {
                self.bytes.push((value >> (i * 8)) as u8);
            }
            self.num_bits += count as usize;
            return;
        }
        for i in 0..count {
            self.write_bit((value >> i) & 1 == 1);
        }
    }

    /// Write a boolean as one bit.
    pub fn write_bool(&mut self, value: bool) {
        self.write_bit(value);
    }

    /// Write an unsigned byte.
    pub fn write_u8(&mut self, value: u8) {
        self.write_bits(u64::from(value), 8);
    }

    /// Write a little-endian `u16`.
    pub fn write_u16(&mut self, value: u16) {
        self.write_bits(u64::from(value), 16);
    }

    /// Write a little-endian `u32`.
    pub fn write_u32(&mut self, value: u32) {
        self.write_bits(u64::from(value), 32);
    }

    /// Write a little-endian `u64`.
    pub fn write_u64(&mut self, value: u64) {
        self.write_bits(value, 64);
    }

    /// Write a little-endian `i32`.
    pub fn write_i32(&mut self, value: i32) {
        self.write_u32(value as u32);
    }

    /// Write an `f32` through its IEEE-754 bit pattern.
    pub fn write_f32(&mut self, value: f32) {
        self.write_u32(value.to_bits());
    }

    /// Write raw bytes without a length prefix.
    pub fn write_bytes(&mut self, bytes: &[u8]) {
        for &byte in bytes {
            self.write_u8(byte);
        }
    }

    /// Write a length-prefixed UTF-8 string.
    ///
    /// Strings longer than [`MAX_STRING_BYTES`] put the writer into its error
    /// state and are written as empty.
    pub fn write_string(&mut self, value: &str) {
        if value.len() > MAX_STRING_BYTES {
            tracing::warn!(len = value.len(), "string exceeds wire limit");
            self.error = true;
            self.write_u32(0);
            return;
        }
        self.write_u32(value.len() as u32);
        self.write_bytes(value.as_bytes());
    }

    /// Append the first `num_bits` bits of `data`.
    pub fn write_bit_range(&mut self, data: &[u8], num_bits: usize) {
        let num_bits = num_bits.min(data.len() * 8);
        for i in 0..num_bits {
            self.write_bit(bit_at(data, i));
        }
    }

    /// Number of bits written so far.
    pub fn num_bits(&self) -> usize {
        self.num_bits
    }

    /// Number of bytes backing the written bits.
    pub fn num_bytes(&self) -> usize {
        self.bytes.len()
    }

    /// True when nothing has been written.
    pub fn is_empty(&self) -> bool {
        self.num_bits == 0
    }

    /// True once an oversized value was rejected.
    pub fn is_error(&self) -> bool {
        self.error
    }

    /// Written bytes; the final byte may be partially used.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Consume the writer, returning the bytes and the exact bit length.
    pub fn into_parts(self) -> (Vec<u8>, usize) {
        (self.bytes, self.num_bits)
    }
}

/// Position inside a [`BitReader`], used to copy out consumed ranges.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BitMark(usize);

impl BitMark {
    /// Bit offset of the mark.
    pub fn pos(self) -> usize {
        self.0
    }
}

/// Bit reader over a borrowed buffer.
#[derive(Debug, Clone)]
pub struct BitReader<'a> {
    data: &'a [u8],
    num_bits: usize,
    pos: usize,
    error: bool,
}

impl<'a> BitReader<'a> {
    /// Read every bit of `data`.
    pub fn new(data: &'a [u8]) -> Self {
        Self::with_bit_len(data, data.len() * 8)
    }

    /// Read only the first `num_bits` bits of `data`.
    pub fn with_bit_len(data: &'a [u8], num_bits: usize) -> Self {
        Self {
            data,
            num_bits: num_bits.min(data.len() * 8),
            pos: 0,
            error: false,
        }
    }

    /// Read a single bit; `false` once the stream is exhausted.
    pub fn read_bit(&mut self) -> bool {
        if self.error || self.pos >= self.num_bits {
            self.error = true;
            return false;
        }
        let bit = bit_at(self.data, self.pos);
        self.pos += 1;
        bit
    }

    /// Read `count` bits (`count <= 64`) into the low bits of a `u64`.
    pub fn read_bits(&mut self, count: u32) -> u64 {
        let count = count.min(64);
        if self.error || self.remaining_bits() < count as usize {
            self.error = true;
            self.pos = self.num_bits;
            return 0;
        }
        let mut value = 0u64;
        if self.pos % 8 == 0 && count % 8 == 0 {
            let start = self.pos / 8;
            for i in 0..(count / 8) as usize {
                value |= u64::from(self.data[start + i]) << (i * 8);
            }
            self.pos += count as usize;
            return value;
        }
        for i in 0..count {
            if bit_at(self.data, self.pos) {
                value |= 1 << i;
            }
            self.pos += 1;
        }
        value
    }

    /// Read a one-bit boolean.
    pub fn read_bool(&mut self) -> bool {
        self.read_bit()
    }

    /// Read an unsigned byte.
    pub fn read_u8(&mut self) -> u8 {
        self.read_bits(8) as u8
    }

    /// Read a little-endian `u16`.
    pub fn read_u16(&mut self) -> u16 {
        self.read_bits(16) as u16
    }

    /// Read a little-endian `u32`.
    pub fn read_u32(&mut self) -> u32 {
        self.read_bits(32) as u32
    }

    /// Read a little-endian `u64`.
    pub fn read_u64(&mut self) -> u64 {
        self.read_bits(64)
    }

    /// Read a little-endian `i32`.
    pub fn read_i32(&mut self) -> i32 {
        self.read_u32() as i32
    }

    /// Read an `f32` from its IEEE-754 bit pattern.
    pub fn read_f32(&mut self) -> f32 {
        f32::from_bits(self.read_u32())
    }

    /// Read `len` raw bytes; empty on error.
    pub fn read_bytes(&mut self, len: usize) -> Vec<u8> {
        if self.error || self.remaining_bits() / 8 < len {
            self.error = true;
            self.pos = self.num_bits;
            return Vec::new();
        }
        (0..len).map(|_| self.read_u8()).collect()
    }

    /// Read a length-prefixed UTF-8 string; empty on error.
    pub fn read_string(&mut self) -> String {
        let len = self.read_u32() as usize;
        if self.error {
            return String::new();
        }
        if len > MAX_STRING_BYTES {
            self.error = true;
            return String::new();
        }
        let bytes = self.read_bytes(len);
        if self.error {
            return String::new();
        }
        match String::from_utf8(bytes) {
            Ok(value) => value,
            Err(_) => {
                self.error = true;
                String::new()
            }
        }
    }

    /// Remember the current position.
    pub fn mark(&self) -> BitMark {
        BitMark(self.pos)
    }

    /// Copy the bits consumed since `mark` into a fresh buffer.
    ///
    /// Returns the bytes and the exact number of bits copied.
    pub fn copy_since(&self, mark: BitMark) -> (Vec<u8>, usize) {
        let start = mark.0.min(self.pos);
        let mut out = BitWriter::with_capacity((self.pos - start).div_ceil(8));
        for i in start..self.pos {
            out.write_bit(bit_at(self.data, i));
        }
        out.into_parts()
    }

    /// Current bit position.
    pub fn pos_bits(&self) -> usize {
        self.pos
    }

    /// Total readable bits.
    pub fn num_bits(&self) -> usize {
        self.num_bits
    }

    /// Bits left to read.
    pub fn remaining_bits(&self) -> usize {
        self.num_bits - self.pos
    }

    /// True when every bit has been consumed.
    pub fn at_end(&self) -> bool {
        self.pos >= self.num_bits
    }

    /// True once a read ran past the end or hit malformed data.
    pub fn is_error(&self) -> bool {
        self.error
    }

    /// Force the error state (used by decoders that detect bad values).
    pub fn set_error(&mut self) {
        self.error = true;
    }
}

fn bit_at(data: &[u8], index: usize) -> bool {
    (data[index / 8] >> (index % 8)) & 1 == 1
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mixed_unaligned_values_read_back() {
        let mut writer = BitWriter::new();
        writer.write_bool(true);
        writer.write_u16(0xBEEF);
        writer.write_bits(0b101, 3);
        writer.write_i32(-42);
        writer.write_string("escort");
        writer.write_f32(1.5);

        let (bytes, bits) = writer.into_parts();
        let mut reader = BitReader::with_bit_len(&bytes, bits);
        assert!(reader.read_bool());
        assert_eq!(reader.read_u16(), 0xBEEF);
        assert_eq!(reader.read_bits(3), 0b101);
        assert_eq!(reader.read_i32(), -42);
        assert_eq!(reader.read_string(), "escort");
        assert_eq!(reader.read_f32(), 1.5);
        assert!(reader.at_end());
        assert!(!reader.is_error());
    }

    #[test]
    fn aligned_writes_pack_little_endian() {
        let mut writer = BitWriter::new();
        writer.write_u8(3);
        writer.write_u16(0x0102);
        assert_eq!(writer.as_bytes(), &[3, 0x02, 0x01]);
        assert_eq!(writer.num_bits(), 24);
    }

    #[test]
    fn wide_values_span_partial_bytes() {
        let mut writer = BitWriter::new();
        writer.write_bit(true);
        writer.write_u64(0x0123_4567_89AB_CDEF);
        assert_eq!(writer.num_bits(), 65);
        assert_eq!(writer.num_bytes(), 9);

        let (bytes, bits) = writer.into_parts();
        let mut reader = BitReader::with_bit_len(&bytes, bits);
        assert!(reader.read_bit());
        assert_eq!(reader.read_u64(), 0x0123_4567_89AB_CDEF);
        assert!(reader.at_end());
    }

    #[test]
    fn forced_error_is_sticky() {
        let data = [0xAAu8; 4];
        let mut reader = BitReader::new(&data);
        assert_eq!(reader.read_u8(), 0xAA);
        reader.set_error();
        assert!(reader.is_error());
        assert_eq!(reader.read_u8(), 0);
    }

    #[test]
    fn truncated_read_sets_error_and_returns_zero() {
        let data = [0xFFu8];
        let mut reader = BitReader::new(&data);
        assert_eq!(reader.read_u16(), 0);
        assert!(reader.is_error());
        // Sticky: later reads also fail.
        assert!(!reader.read_bit());
    }

    #[test]
    fn bit_length_limits_reads() {
        let data = [0xFFu8, 0xFF];
        let mut reader = BitReader::with_bit_len(&data, 4);
        assert_eq!(reader.read_bits(4), 0xF);
        assert!(reader.at_end());
        reader.read_bit();
        assert!(reader.is_error());
    }

    #[test]
    fn oversized_string_length_is_rejected() {
        let mut writer = BitWriter::new();
        writer.write_u32((MAX_STRING_BYTES + 1) as u32);
        let (bytes, bits) = writer.into_parts();
        let mut reader = BitReader::with_bit_len(&bytes, bits);
        assert_eq!(reader.read_string(), "");
        assert!(reader.is_error());
    }

    #[test]
    fn invalid_utf8_is_rejected() {
        let mut writer = BitWriter::new();
        writer.write_u32(2);
        writer.write_bytes(&[0xC3, 0x28]);
        let (bytes, bits) = writer.into_parts();
        let mut reader = BitReader::with_bit_len(&bytes, bits);
        assert_eq!(reader.read_string(), "");
        assert!(reader.is_error());
    }

    #[test]
    fn copy_since_mark_is_bit_exact() {
        let mut writer = BitWriter::new();
        writer.write_bits(0b11, 2);
        writer.write_u32(0xDEAD_BEEF);
        writer.write_bits(0b1, 1);
        let (bytes, bits) = writer.into_parts();

        let mut reader = BitReader::with_bit_len(&bytes, bits);
        reader.read_bits(2);
        let mark = reader.mark();
        reader.read_u32();
        let (copy, copy_bits) = reader.copy_since(mark);
        assert_eq!(copy_bits, 32);

        let mut replay = BitReader::with_bit_len(&copy, copy_bits);
        assert_eq!(replay.read_u32(), 0xDEAD_BEEF);
        assert!(replay.at_end());
    }

    #[test]
    fn bit_range_append_preserves_offset_data() {
        let mut source = BitWriter::new();
        source.write_bits(0b1011, 4);
        let (bytes, bits) = source.into_parts();

        let mut writer = BitWriter::new();
        writer.write_bit(false);
        writer.write_bit_range(&bytes, bits);
        let (out, out_bits) = writer.into_parts();
        let mut reader = BitReader::with_bit_len(&out, out_bits);
        assert!(!reader.read_bit());
        assert_eq!(reader.read_bits(4), 0b1011);
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn arbitrary_bytes_dont_crash_reader(
                data in prop::collection::vec(any::<u8>(), 0..256),
                widths in prop::collection::vec(1u32..=64, 0..32),
            ) {
                let mut reader = BitReader::new(&data);
                for width in widths {
                    reader.read_bits(width);
                }
                let _ = reader.read_string();
                prop_assert!(reader.pos_bits() <= reader.num_bits());
            }

            #[test]
            fn unaligned_fields_read_back(
                lead in 0u32..8,
                values in prop::collection::vec(any::<u32>(), 0..16),
            ) {
                let mut writer = BitWriter::new();
                writer.write_bits(0, lead);
                for value in &values {
                    writer.write_u32(*value);
                }
                let (bytes, bits) = writer.into_parts();
                let mut reader = BitReader::with_bit_len(&bytes, bits);
                reader.read_bits(lead);
                for value in &values {
                    prop_assert_eq!(reader.read_u32(), *value);
                }
                prop_assert!(reader.at_end());
            }
        }
    }
}

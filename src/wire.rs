//! Little-endian wire codec
//!
//! [`ByteReader`] is a bounds-checked cursor over a shared buffer: every read
//! past the end is a `Protocol` error, never a short or zero-filled value.
//! [`ByteWriter`] is the growable sink objects serialize into.

use crate::constants::MAX_VAR_LENGTH;
use crate::error::{ConsensusError, Result};
use crate::hash::Sha256Hash;
use bytes::{BufMut, Bytes, BytesMut};

/// Encoded size of a var-int.
pub fn var_int_size(value: u64) -> usize {
    match value {
        0..=0xfc => 1,
        0xfd..=0xffff => 3,
        0x1_0000..=0xffff_ffff => 5,
        _ => 9,
    }
}

pub struct ByteReader {
    bytes: Bytes,
    cursor: usize,
}

impl ByteReader {
    pub fn new(bytes: impl Into<Bytes>) -> Self {
        ByteReader { bytes: bytes.into(), cursor: 0 }
    }

    /// Reader positioned at `offset` within `bytes`.
    pub fn at(bytes: impl Into<Bytes>, offset: usize) -> Result<Self> {
        let bytes = bytes.into();
        if offset > bytes.len() {
            return Err(ConsensusError::Protocol(format!(
                "Offset {} beyond buffer of {} bytes",
                offset,
                bytes.len()
            )));
        }
        Ok(ByteReader { bytes, cursor: offset })
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn remaining(&self) -> usize {
        self.bytes.len() - self.cursor
    }

    pub fn is_exhausted(&self) -> bool {
        self.remaining() == 0
    }

    /// Zero-copy view of `[start, end)` of the underlying buffer.
    /// Bytes in `start..end`. The whole buffer is shared; any narrower span is
    /// copied out so it does not keep the rest of the buffer alive.
    pub fn slice(&self, start: usize, end: usize) -> Bytes {
        if start == 0 && end == self.bytes.len() {
            return self.bytes.clone();
        }
        Bytes::copy_from_slice(&self.bytes[start..end])
    }

    fn take(&mut self, n: usize, what: &str) -> Result<&[u8]> {
        if n > self.remaining() {
            return Err(ConsensusError::Protocol(format!(
                "Unexpected end of data reading {}: need {} bytes at offset {}, have {}",
                what,
                n,
                self.cursor,
                self.remaining()
            )));
        }
        let start = self.cursor;
        self.cursor += n;
        Ok(&self.bytes[start..start + n])
    }

    fn take_array<const N: usize>(&mut self, what: &str) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N, what)?);
        Ok(out)
    }

    pub fn read_u8(&mut self, what: &str) -> Result<u8> {
        Ok(self.take_array::<1>(what)?[0])
    }

    pub fn read_u16(&mut self, what: &str) -> Result<u16> {
        Ok(u16::from_le_bytes(self.take_array(what)?))
    }

    pub fn read_u32(&mut self, what: &str) -> Result<u32> {
        Ok(u32::from_le_bytes(self.take_array(what)?))
    }

    pub fn read_i32(&mut self, what: &str) -> Result<i32> {
        Ok(i32::from_le_bytes(self.take_array(what)?))
    }

    pub fn read_u64(&mut self, what: &str) -> Result<u64> {
        Ok(u64::from_le_bytes(self.take_array(what)?))
    }

    pub fn read_i64(&mut self, what: &str) -> Result<i64> {
        Ok(i64::from_le_bytes(self.take_array(what)?))
    }

    /// 32 raw bytes, reversed from wire order into display order.
    pub fn read_hash(&mut self, what: &str) -> Result<Sha256Hash> {
        Ok(Sha256Hash::from_wire(self.take_array(what)?))
    }

    pub fn read_array<const N: usize>(&mut self, what: &str) -> Result<[u8; N]> {
        self.take_array(what)
    }

    pub fn read_var_int(&mut self, what: &str) -> Result<u64> {
        match self.read_u8(what)? {
            0xfd => Ok(self.read_u16(what)? as u64),
            0xfe => Ok(self.read_u32(what)? as u64),
            0xff => self.read_u64(what),
            n => Ok(n as u64),
        }
    }

    /// A var-int length or count, rejected above the 1 GiB cap before anything is allocated.
    pub fn read_length(&mut self, what: &str) -> Result<usize> {
        let length = self.read_var_int(what)?;
        if length > MAX_VAR_LENGTH {
            return Err(ConsensusError::Protocol(format!(
                "{} of {} exceeds maximum of {}",
                what, length, MAX_VAR_LENGTH
            )));
        }
        Ok(length as usize)
    }

    /// Next `n` bytes as an owned copy.
    pub fn read_bytes(&mut self, n: usize, what: &str) -> Result<Bytes> {
        Ok(Bytes::copy_from_slice(self.take(n, what)?))
    }

    pub fn read_var_bytes(&mut self, what: &str) -> Result<Bytes> {
        let length = self.read_length(what)?;
        self.read_bytes(length, what)
    }
}

#[derive(Default)]
pub struct ByteWriter {
    buf: BytesMut,
}

impl ByteWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-size the sink. The capacity is only a hint.
    pub fn with_capacity(capacity: usize) -> Self {
        ByteWriter { buf: BytesMut::with_capacity(capacity) }
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn write_u8(&mut self, value: u8) {
        self.buf.put_u8(value);
    }

    pub fn write_u16(&mut self, value: u16) {
        self.buf.put_u16_le(value);
    }

    pub fn write_u32(&mut self, value: u32) {
        self.buf.put_u32_le(value);
    }

    pub fn write_i32(&mut self, value: i32) {
        self.buf.put_i32_le(value);
    }

    pub fn write_u64(&mut self, value: u64) {
        self.buf.put_u64_le(value);
    }

    pub fn write_i64(&mut self, value: i64) {
        self.buf.put_i64_le(value);
    }

    pub fn write_hash(&mut self, hash: &Sha256Hash) {
        self.buf.put_slice(&hash.to_wire());
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.buf.put_slice(bytes);
    }

    pub fn write_var_int(&mut self, value: u64) {
        match value {
            0..=0xfc => self.write_u8(value as u8),
            0xfd..=0xffff => {
                self.write_u8(0xfd);
                self.write_u16(value as u16);
            }
            0x1_0000..=0xffff_ffff => {
                self.write_u8(0xfe);
                self.write_u32(value as u32);
            }
            _ => {
                self.write_u8(0xff);
                self.write_u64(value);
            }
        }
    }

    pub fn write_var_bytes(&mut self, bytes: &[u8]) {
        self.write_var_int(bytes.len() as u64);
        self.write_bytes(bytes);
    }

    pub fn freeze(self) -> Bytes {
        self.buf.freeze()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_var_int_sizes() {
        for (value, size) in [
            (0u64, 1usize),
            (0xfc, 1),
            (0xfd, 3),
            (0xffff, 3),
            (0x1_0000, 5),
            (0xffff_ffff, 5),
            (0x1_0000_0000, 9),
        ] {
            let mut writer = ByteWriter::new();
            writer.write_var_int(value);
            assert_eq!(writer.len(), size);
            assert_eq!(var_int_size(value), size);

            let mut reader = ByteReader::new(writer.freeze());
            assert_eq!(reader.read_var_int("value").unwrap(), value);
            assert!(reader.is_exhausted());
        }
    }

    #[test]
    fn test_read_past_end_is_protocol_error() {
        let mut reader = ByteReader::new(vec![1u8, 2, 3]);
        let err = reader.read_u32("version").unwrap_err();
        assert!(matches!(err, ConsensusError::Protocol(_)));
        // A failed read does not advance the cursor
        assert_eq!(reader.cursor(), 0);
    }

    #[test]
    fn test_oversized_length_rejected_before_allocation() {
        let mut writer = ByteWriter::new();
        writer.write_var_int(MAX_VAR_LENGTH + 1);
        let mut reader = ByteReader::new(writer.freeze());
        let err = reader.read_var_bytes("script").unwrap_err();
        assert!(matches!(err, ConsensusError::Protocol(msg) if msg.contains("exceeds maximum")));
    }

    #[test]
    fn test_truncated_var_bytes() {
        let mut reader = ByteReader::new(vec![5u8, 1, 2]);
        assert!(reader.read_var_bytes("script").is_err());
    }

    #[test]
    fn test_reader_at_offset() {
        let reader = ByteReader::at(vec![0u8; 4], 4).unwrap();
        assert!(reader.is_exhausted());
        assert!(ByteReader::at(vec![0u8; 4], 5).is_err());
    }

    #[test]
    fn test_little_endian_integers() {
        let mut writer = ByteWriter::new();
        writer.write_u32(0x0102_0304);
        writer.write_i64(-2);
        let bytes = writer.freeze();
        assert_eq!(&bytes[..4], &[4, 3, 2, 1]);

        let mut reader = ByteReader::new(bytes);
        assert_eq!(reader.read_u32("a").unwrap(), 0x0102_0304);
        assert_eq!(reader.read_i64("b").unwrap(), -2);
    }
}

//! Bitstream writing utilities.
//!
//! Bit-level output, MSB-first. The writer supports seeking backwards and
//! overwriting: replication rewinds the output cursor to a saved position
//! when a codec retries a frame section.

use crate::error::{BitstreamError, Result};

/// A seekable bitstream writer.
///
/// Unlike an append-only writer, the cursor can be moved backwards with
/// [`BitWriter::seek`]; subsequent writes overwrite previous content bit by
/// bit. The buffer never shrinks, but [`BitWriter::written_len`] reports only
/// the bytes up to the high-water mark of the cursor.
#[derive(Debug, Clone, Default)]
pub struct BitWriter {
    data: Vec<u8>,
    pos: usize,
    high: usize,
}

impl BitWriter {
    /// Create a new bit writer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new bit writer with capacity.
    pub fn with_capacity(bytes: usize) -> Self {
        Self {
            data: Vec::with_capacity(bytes),
            pos: 0,
            high: 0,
        }
    }

    /// Get the current bit position.
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Check if the writer is byte-aligned.
    pub fn is_byte_aligned(&self) -> bool {
        self.pos % 8 == 0
    }

    /// Move the cursor to a previously written bit position.
    pub fn seek(&mut self, bit_pos: usize) -> Result<()> {
        if bit_pos > self.high {
            return Err(BitstreamError::Other(format!(
                "seek past end of written data: {bit_pos} > {}",
                self.high
            ))
            .into());
        }
        self.pos = bit_pos;
        Ok(())
    }

    /// Write a single bit, overwriting any previous content at the cursor.
    pub fn write_bit(&mut self, bit: bool) {
        let byte = self.pos / 8;
        let shift = 7 - (self.pos % 8) as u8;
        if byte >= self.data.len() {
            self.data.resize(byte + 1, 0);
        }
        if bit {
            self.data[byte] |= 1 << shift;
        } else {
            self.data[byte] &= !(1 << shift);
        }
        self.pos += 1;
        if self.pos > self.high {
            self.high = self.pos;
        }
    }

    /// Write up to 32 bits from an unsigned integer.
    pub fn write_bits(&mut self, value: u32, n: u8) {
        for i in (0..n).rev() {
            self.write_bit((value >> i) & 1 != 0);
        }
    }

    /// Write up to 64 bits from an unsigned integer.
    pub fn write_bits_u64(&mut self, value: u64, n: u8) {
        for i in (0..n).rev() {
            self.write_bit((value >> i) & 1 != 0);
        }
    }

    /// Write a byte-aligned unsigned 8-bit value.
    pub fn write_u8(&mut self, value: u8) {
        self.write_bits(value as u32, 8);
    }

    /// Align to byte boundary by writing zero bits.
    pub fn align_to_byte(&mut self) {
        while self.pos % 8 != 0 {
            self.write_bit(false);
        }
    }

    /// Number of whole bytes covered by the high-water mark.
    pub fn written_len(&self) -> usize {
        self.high.div_ceil(8)
    }

    /// Get the written data up to the high-water mark.
    pub fn data(&self) -> &[u8] {
        &self.data[..self.written_len()]
    }

    /// Take the written data, consuming the writer.
    pub fn into_data(mut self) -> Vec<u8> {
        self.data.truncate(self.written_len());
        self.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_bits() {
        let mut writer = BitWriter::new();
        writer.write_bits(0b1011, 4);
        writer.write_bits(0b0100, 4);
        assert_eq!(writer.data(), &[0b10110100]);
    }

    #[test]
    fn test_seek_and_overwrite() {
        let mut writer = BitWriter::new();
        writer.write_bits(0b1111_1111, 8);
        writer.write_bits(0b1010_1010, 8);
        writer.seek(4).unwrap();
        writer.write_bits(0b0000, 4);
        assert_eq!(writer.written_len(), 2);
        assert_eq!(writer.data(), &[0b1111_0000, 0b1010_1010]);
    }

    #[test]
    fn test_seek_past_end_fails() {
        let mut writer = BitWriter::new();
        writer.write_bits(0xFF, 8);
        assert!(writer.seek(9).is_err());
    }

    #[test]
    fn test_unaligned_writes_pack_msb_first() {
        let mut writer = BitWriter::new();
        writer.write_bits(0b101, 3);
        writer.write_bits_u64(0x1234, 16);
        writer.align_to_byte();
        assert_eq!(writer.into_data(), vec![0xA2, 0x46, 0x80]);
    }
}

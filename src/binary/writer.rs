//! Sequential container writer.
//!
//! Callers compute every offset from record sizes before writing, then emit
//! fields in layout order. Numeric fields are written once per byte order of
//! the chosen [`Endianness`].

use super::{Endianness, align_up};
use crate::buffer::Buffer;
use crate::error::Result;
use crate::hash::ObjectHash;

#[derive(Debug)]
pub struct FieldWriter {
    buffer: Buffer,
    endianness: Endianness,
}

impl FieldWriter {
    pub fn new(endianness: Endianness) -> Self {
        Self {
            buffer: Buffer::new(),
            endianness,
        }
    }

    pub fn with_capacity(endianness: Endianness, capacity: usize) -> Result<Self> {
        Ok(Self {
            buffer: Buffer::with_capacity(capacity)?,
            endianness,
        })
    }

    pub fn endianness(&self) -> Endianness {
        self.endianness
    }

    /// Bytes one numeric field occupies in this writer.
    pub fn field_width(&self) -> usize {
        self.endianness.field_width()
    }

    pub fn position(&self) -> usize {
        self.buffer.len()
    }

    pub fn u32(&mut self, value: u32) -> Result<()> {
        for order in self.endianness.orders() {
            self.buffer.append_bytes(&order.encode_u32(value))?;
        }
        Ok(())
    }

    pub fn bytes(&mut self, bytes: &[u8]) -> Result<()> {
        self.buffer.append_bytes(bytes)
    }

    pub fn hash(&mut self, hash: &ObjectHash) -> Result<()> {
        self.buffer.append_bytes(hash.as_bytes())
    }

    /// Write a NUL-terminated string.
    pub fn cstr(&mut self, text: &str) -> Result<()> {
        self.buffer.append_str(text)?;
        self.buffer.append_bytes(&[0])
    }

    pub fn zeros(&mut self, count: usize) -> Result<()> {
        self.buffer.append_zeros(count)
    }

    pub fn pad_to(&mut self, alignment: usize) -> Result<()> {
        let target = align_up(self.position(), alignment);
        self.buffer.append_zeros(target - self.position())
    }

    /// Assert the writer is where the precomputed layout says it should be.
    pub fn check_position(&self, expected: usize, section: &str) {
        debug_assert_eq!(
            self.position(),
            expected,
            "layout mismatch at start of {section}"
        );
    }

    pub fn finish(self) -> Vec<u8> {
        self.buffer.into_bytes()
    }
}

/// A section assembled apart from the main writer and appended once its
/// base offset is known. Offsets returned by `place` are relative to the
/// start of the region.
#[derive(Debug)]
pub struct Region {
    buffer: Buffer,
    alignment: usize,
}

impl Region {
    pub fn new(alignment: usize) -> Self {
        Self {
            buffer: Buffer::new(),
            alignment: alignment.max(1),
        }
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Append `bytes` at the next aligned position.
    pub fn place(&mut self, bytes: &[u8]) -> Result<usize> {
        let offset = align_up(self.buffer.len(), self.alignment);
        self.buffer.append_zeros(offset - self.buffer.len())?;
        self.buffer.append_bytes(bytes)?;
        Ok(offset)
    }

    /// Append a NUL-terminated string, unaligned.
    pub fn place_cstr(&mut self, text: &str) -> Result<usize> {
        let offset = self.buffer.len();
        self.buffer.append_str(text)?;
        self.buffer.append_bytes(&[0])?;
        Ok(offset)
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.buffer.as_bytes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bi_endian_field_stores_both_orders() {
        let mut writer = FieldWriter::new(Endianness::Bi);
        writer.u32(0x0102_0304).unwrap();
        assert_eq!(writer.finish(), vec![4, 3, 2, 1, 1, 2, 3, 4]);
    }

    #[test]
    fn test_single_order_fields() {
        let mut writer = FieldWriter::new(Endianness::Big);
        writer.u32(1).unwrap();
        writer.cstr("ab").unwrap();
        writer.pad_to(8).unwrap();
        assert_eq!(writer.finish(), vec![0, 0, 0, 1, b'a', b'b', 0, 0]);
    }

    #[test]
    fn test_region_alignment() {
        let mut region = Region::new(4);
        assert_eq!(region.place(&[1, 2, 3]).unwrap(), 0);
        assert_eq!(region.place(&[4]).unwrap(), 4);
        assert_eq!(region.place_cstr("ab").unwrap(), 5);
        assert_eq!(region.as_bytes(), &[1, 2, 3, 0, 4, b'a', b'b', 0]);
    }
}

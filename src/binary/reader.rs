//! Bounds-checked container reader.
//!
//! Every access is validated against the buffer length and surfaces a
//! [`Error::Decode`] instead of reading out of range. In bi-endian containers
//! both copies of a field are read and must agree.

use super::{ByteOrder, Endianness};
use crate::diagnostics::Where;
use crate::error::{Error, Result};
use crate::hash::{HASH_LEN, ObjectHash};

#[derive(Debug, Clone)]
pub struct FieldReader<'a> {
    data: &'a [u8],
    endianness: Endianness,
    container: &'static str,
    at: Where,
}

impl<'a> FieldReader<'a> {
    pub fn new(data: &'a [u8], endianness: Endianness, container: &'static str, at: Where) -> Self {
        Self {
            data,
            endianness,
            container,
            at,
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn endianness(&self) -> Endianness {
        self.endianness
    }

    pub fn field_width(&self) -> usize {
        self.endianness.field_width()
    }

    pub fn error(&self, message: impl Into<String>) -> Error {
        Error::decode(self.at.clone(), self.container, message)
    }

    pub fn bytes_at(&self, offset: usize, len: usize) -> Result<&'a [u8]> {
        offset
            .checked_add(len)
            .and_then(|end| self.data.get(offset..end))
            .ok_or_else(|| {
                self.error(format!(
                    "range {offset}..{} lies outside the {} byte container",
                    offset.saturating_add(len),
                    self.data.len()
                ))
            })
    }

    pub fn u32_at(&self, offset: usize) -> Result<u32> {
        let mut value = None;
        for (i, order) in self.endianness.orders().iter().enumerate() {
            let raw = self.bytes_at(offset + i * 4, 4)?;
            let decoded = order.decode_u32([raw[0], raw[1], raw[2], raw[3]]);
            match value {
                None => value = Some(decoded),
                Some(previous) if previous != decoded => {
                    return Err(self.error(format!(
                        "byte-order copies of field at {offset} disagree ({previous} vs {decoded})"
                    )));
                }
                Some(_) => {}
            }
        }
        value.ok_or_else(|| self.error("field has no byte-order copies"))
    }

    /// Read only the copy for `order`; used to check the two halves of a
    /// bi-endian field independently.
    pub fn u32_copy_at(&self, offset: usize, order: ByteOrder) -> Result<u32> {
        let index = self
            .endianness
            .orders()
            .iter()
            .position(|o| *o == order)
            .ok_or_else(|| self.error(format!("container holds no {order}-endian copy")))?;
        let raw = self.bytes_at(offset + index * 4, 4)?;
        Ok(order.decode_u32([raw[0], raw[1], raw[2], raw[3]]))
    }

    pub fn hash_at(&self, offset: usize) -> Result<ObjectHash> {
        let raw = self.bytes_at(offset, HASH_LEN)?;
        let mut bytes = [0u8; HASH_LEN];
        bytes.copy_from_slice(raw);
        Ok(ObjectHash::from_bytes(bytes))
    }

    /// Read a NUL-terminated UTF-8 string; returns it and the offset after
    /// its terminator.
    pub fn cstr_at(&self, offset: usize) -> Result<(&'a str, usize)> {
        let tail = self
            .data
            .get(offset..)
            .ok_or_else(|| self.error(format!("string offset {offset} is out of range")))?;
        let end = tail
            .iter()
            .position(|b| *b == 0)
            .ok_or_else(|| self.error(format!("unterminated string at {offset}")))?;
        let text = std::str::from_utf8(&tail[..end])
            .map_err(|_| self.error(format!("string at {offset} is not UTF-8")))?;
        Ok((text, offset + end + 1))
    }

    /// Read `count` consecutive NUL-terminated strings.
    pub fn cstrs_at(&self, offset: usize, count: usize) -> Result<Vec<String>> {
        let mut out = Vec::with_capacity(count.min(1024));
        let mut pos = offset;
        for _ in 0..count {
            let (text, next) = self.cstr_at(pos)?;
            out.push(text.to_string());
            pos = next;
        }
        Ok(out)
    }

    pub fn cursor(&self, offset: usize) -> Cursor<'_, 'a> {
        Cursor { reader: self, pos: offset }
    }
}

/// Sequential reads over a [`FieldReader`].
#[derive(Debug)]
pub struct Cursor<'r, 'a> {
    reader: &'r FieldReader<'a>,
    pos: usize,
}

impl<'a> Cursor<'_, 'a> {
    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn u32(&mut self) -> Result<u32> {
        let value = self.reader.u32_at(self.pos)?;
        self.pos += self.reader.field_width();
        Ok(value)
    }

    /// Read a 32-bit count or offset as `usize`.
    pub fn usize(&mut self) -> Result<usize> {
        Ok(self.u32()? as usize)
    }

    pub fn hash(&mut self) -> Result<ObjectHash> {
        let hash = self.reader.hash_at(self.pos)?;
        self.pos += HASH_LEN;
        Ok(hash)
    }

    pub fn bytes(&mut self, len: usize) -> Result<&'a [u8]> {
        let bytes = self.reader.bytes_at(self.pos, len)?;
        self.pos += len;
        Ok(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binary::FieldWriter;
    use crate::diagnostics::Phase;

    fn reader(data: &[u8], endianness: Endianness) -> FieldReader<'_> {
        FieldReader::new(data, endianness, "test", Where::phase(Phase::Package))
    }

    #[test]
    fn test_reads_both_copies() {
        let mut writer = FieldWriter::new(Endianness::Bi);
        writer.u32(0xDEAD_BEEF).unwrap();
        let data = writer.finish();
        let r = reader(&data, Endianness::Bi);
        assert_eq!(r.u32_at(0).unwrap(), 0xDEAD_BEEF);
        assert_eq!(r.u32_copy_at(0, ByteOrder::Little).unwrap(), 0xDEAD_BEEF);
        assert_eq!(r.u32_copy_at(0, ByteOrder::Big).unwrap(), 0xDEAD_BEEF);
    }

    #[test]
    fn test_disagreeing_copies_are_rejected() {
        let data = [1, 0, 0, 0, 0, 0, 0, 2];
        assert!(reader(&data, Endianness::Bi).u32_at(0).is_err());
    }

    #[test]
    fn test_out_of_range_is_an_error() {
        let data = [0u8; 6];
        let r = reader(&data, Endianness::Little);
        assert!(r.u32_at(4).is_err());
        assert!(r.bytes_at(usize::MAX, 2).is_err());
        assert!(r.hash_at(0).is_err());
    }

    #[test]
    fn test_strings() {
        let data = b"GL2\0GX\0".to_vec();
        let r = reader(&data, Endianness::Little);
        assert_eq!(r.cstrs_at(0, 2).unwrap(), vec!["GL2".to_string(), "GX".to_string()]);
        assert!(r.cstrs_at(0, 3).is_err());
    }
}

//! Append-only byte accumulator.
//!
//! Stages build text and binary output incrementally without knowing the
//! final size. Growth doubles the capacity, and the backing store always
//! ends with a NUL byte so the contents can be handed to consumers expecting
//! C strings.

use crate::diagnostics::Where;
use crate::error::{Error, Result};

#[derive(Debug, Clone)]
pub struct Buffer {
    /// Contents followed by one NUL byte.
    data: Vec<u8>,
}

impl Default for Buffer {
    fn default() -> Self {
        Self { data: vec![0] }
    }
}

impl Buffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate room for `capacity` bytes up front.
    pub fn with_capacity(capacity: usize) -> Result<Self> {
        let mut data = Vec::new();
        let requested = capacity.saturating_add(1);
        data.try_reserve_exact(requested)
            .map_err(|_| Error::Allocation {
                at: Where::default(),
                requested,
            })?;
        data.push(0);
        Ok(Self { data })
    }

    /// Number of content bytes (the terminator is not counted).
    pub fn len(&self) -> usize {
        self.data.len() - 1
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data[..self.len()]
    }

    pub fn as_bytes_with_nul(&self) -> &[u8] {
        &self.data
    }

    /// Contents as text; invalid UTF-8 is replaced.
    pub fn to_string_lossy(&self) -> String {
        String::from_utf8_lossy(self.as_bytes()).into_owned()
    }

    pub fn append_str(&mut self, s: &str) -> Result<()> {
        self.append_bytes(s.as_bytes())
    }

    pub fn append_char(&mut self, c: char) -> Result<()> {
        let mut utf8 = [0u8; 4];
        self.append_bytes(c.encode_utf8(&mut utf8).as_bytes())
    }

    pub fn append_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        self.grow_for(bytes.len())?;
        // overwrite the terminator, then restore it
        self.data.pop();
        self.data.extend_from_slice(bytes);
        self.data.push(0);
        Ok(())
    }

    /// Append `count` zero bytes.
    pub fn append_zeros(&mut self, count: usize) -> Result<()> {
        self.grow_for(count)?;
        let new_len = self.data.len() + count;
        self.data.resize(new_len, 0);
        Ok(())
    }

    /// Overwrite already written bytes at `offset`.
    pub fn patch(&mut self, offset: usize, bytes: &[u8]) {
        self.data[offset..offset + bytes.len()].copy_from_slice(bytes);
    }

    /// Give up the contents without the terminator.
    pub fn into_bytes(mut self) -> Vec<u8> {
        self.data.pop();
        self.data
    }

    fn grow_for(&mut self, additional: usize) -> Result<()> {
        let needed = self.data.len().saturating_add(additional);
        if needed <= self.data.capacity() {
            return Ok(());
        }
        let mut target = self.data.capacity().max(16);
        while target < needed {
            target = target.saturating_mul(2);
        }
        self.data
            .try_reserve_exact(target - self.data.len())
            .map_err(|_| Error::Allocation {
                at: Where::default(),
                requested: target,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_buffer_is_terminated() {
        let buffer = Buffer::with_capacity(8).unwrap();
        assert!(buffer.is_empty());
        assert_eq!(buffer.as_bytes_with_nul(), &[0]);
    }

    #[test]
    fn test_appends_keep_terminator() {
        let mut buffer = Buffer::new();
        buffer.append_str("abc").unwrap();
        buffer.append_char('\n').unwrap();
        buffer.append_bytes(&[1, 2]).unwrap();
        assert_eq!(buffer.as_bytes(), b"abc\n\x01\x02");
        assert_eq!(buffer.as_bytes_with_nul().last(), Some(&0));
        assert_eq!(buffer.len(), 6);
    }

    #[test]
    fn test_growth_doubles() {
        let mut buffer = Buffer::with_capacity(1).unwrap();
        for _ in 0..1000 {
            buffer.append_char('x').unwrap();
        }
        assert_eq!(buffer.len(), 1000);
        assert!(buffer.as_bytes().iter().all(|b| *b == b'x'));
    }

    #[test]
    fn test_patch_and_zeros() {
        let mut buffer = Buffer::new();
        buffer.append_zeros(4).unwrap();
        buffer.patch(1, &[7, 8]);
        assert_eq!(buffer.into_bytes(), vec![0, 7, 8, 0]);
    }
}

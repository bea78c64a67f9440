//! Bounds-checked byte cursor over container bytes.
//!
//! The cursor knows nothing about records; it hands out exact slices and
//! little-endian scalars and reports every shortfall to the caller.

use crate::error::{Pc5Error, Result};
use byteorder::{ByteOrder, LittleEndian};

/// Read-only cursor over a byte slice (usually a memory-mapped container).
#[derive(Debug, Clone)]
pub struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    /// Creates a cursor positioned at offset 0.
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Current absolute offset.
    #[inline]
    pub fn position(&self) -> u64 {
        self.pos as u64
    }

    /// Total length of the underlying bytes.
    #[inline]
    pub fn len(&self) -> u64 {
        self.data.len() as u64
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Bytes left after the current position.
    #[inline]
    pub fn remaining(&self) -> u64 {
        (self.data.len() - self.pos) as u64
    }

    /// True when the cursor sits exactly at the end.
    #[inline]
    pub fn at_end(&self) -> bool {
        self.pos == self.data.len()
    }

    /// Repositions the cursor. Seeking to `len()` is allowed.
    pub fn seek(&mut self, offset: u64) -> Result<()> {
        if offset > self.len() {
            return Err(Pc5Error::OutOfRange {
                offset,
                len: self.len(),
            });
        }
        self.pos = offset as usize;
        Ok(())
    }

    /// Returns exactly `n` bytes and advances, or fails with `Truncated`.
    pub fn read_exact(&mut self, n: usize) -> Result<&'a [u8]> {
        if n > self.data.len() - self.pos {
            return Err(Pc5Error::Truncated {
                offset: self.position(),
                needed: n as u64,
                available: self.remaining(),
            });
        }
        let bytes = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(bytes)
    }

    #[inline]
    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.read_exact(1)?[0])
    }

    #[inline]
    pub fn read_u16(&mut self) -> Result<u16> {
        Ok(LittleEndian::read_u16(self.read_exact(2)?))
    }

    #[inline]
    pub fn read_u32(&mut self) -> Result<u32> {
        Ok(LittleEndian::read_u32(self.read_exact(4)?))
    }

    #[inline]
    pub fn read_u64(&mut self) -> Result<u64> {
        Ok(LittleEndian::read_u64(self.read_exact(8)?))
    }

    #[inline]
    pub fn read_i32(&mut self) -> Result<i32> {
        Ok(LittleEndian::read_i32(self.read_exact(4)?))
    }

    #[inline]
    pub fn read_f32(&mut self) -> Result<f32> {
        Ok(LittleEndian::read_f32(self.read_exact(4)?))
    }

    /// Reads a 4-byte tag without interpreting it.
    pub fn read_tag(&mut self) -> Result<[u8; 4]> {
        let mut tag = [0u8; 4];
        tag.copy_from_slice(self.read_exact(4)?);
        Ok(tag)
    }
}

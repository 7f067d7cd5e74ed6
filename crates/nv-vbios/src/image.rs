//! Shadowed VBIOS byte buffer.
//!
//! All multi-byte fields in the image are little-endian. Every accessor is bounds-checked
//! against the *declared* image length, which may be shorter than the backing buffer when the
//! caller only trusts a prefix of what it read from the option ROM.

use crate::{Result, VbiosError};

/// Option ROM signature at offset 0.
pub const ROM_SIGNATURE: [u8; 2] = [0x55, 0xAA];

/// Size unit of the option ROM length byte at offset 2.
const ROM_SIZE_UNIT: usize = 512;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VbiosImage {
    data: Vec<u8>,
    len: usize,
    apply_writes: bool,
}

impl VbiosImage {
    pub fn new(data: Vec<u8>) -> Self {
        let len = data.len();
        Self {
            data,
            len,
            apply_writes: true,
        }
    }

    /// Wraps `data` but only exposes its first `declared_len` bytes.
    pub fn with_declared_len(data: Vec<u8>, declared_len: usize) -> Self {
        let len = declared_len.min(data.len());
        Self {
            data,
            len,
            apply_writes: true,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn bytes(&self) -> &[u8] {
        &self.data[..self.len]
    }

    /// Whether decoded register writes are issued to hardware (live) or dropped (dry run).
    pub fn apply_writes(&self) -> bool {
        self.apply_writes
    }

    pub fn set_apply_writes(&mut self, apply: bool) {
        self.apply_writes = apply;
    }

    pub fn slice(&self, offset: usize, len: usize) -> Result<&[u8]> {
        let end = offset.checked_add(len).filter(|&end| end <= self.len);
        match end {
            Some(end) => Ok(&self.data[offset..end]),
            None => Err(VbiosError::OutOfBounds {
                offset,
                len,
                image_len: self.len,
            }),
        }
    }

    pub fn u8_at(&self, offset: usize) -> Result<u8> {
        Ok(self.slice(offset, 1)?[0])
    }

    pub fn u16_at(&self, offset: usize) -> Result<u16> {
        let b = self.slice(offset, 2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    pub fn u32_at(&self, offset: usize) -> Result<u32> {
        let b = self.slice(offset, 4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    /// Reads a 16-bit table pointer, mapping zero to `None`.
    pub fn ptr_at(&self, offset: usize) -> Result<Option<u16>> {
        let ptr = self.u16_at(offset)?;
        Ok((ptr != 0).then_some(ptr))
    }

    /// Returns the offset of the first occurrence of `needle` inside the declared image.
    pub fn find(&self, needle: &[u8]) -> Option<usize> {
        if needle.is_empty() || needle.len() > self.len {
            return None;
        }
        self.bytes()
            .windows(needle.len())
            .position(|window| window == needle)
    }

    pub fn has_rom_signature(&self) -> bool {
        self.bytes().starts_with(&ROM_SIGNATURE)
    }

    /// Checks the 8-bit checksum over the size advertised by the option ROM header.
    ///
    /// Returns `None` when the header is missing or advertises more bytes than the image holds.
    pub fn rom_checksum_ok(&self) -> Option<bool> {
        if !self.has_rom_signature() {
            return None;
        }
        let size = usize::from(self.u8_at(2).ok()?) * ROM_SIZE_UNIT;
        if size == 0 || size > self.len {
            return None;
        }
        let sum = self.data[..size]
            .iter()
            .fold(0u8, |acc, &b| acc.wrapping_add(b));
        Some(sum == 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_are_little_endian() {
        let image = VbiosImage::new(vec![0x78, 0x56, 0x34, 0x12]);
        assert_eq!(image.u8_at(0).unwrap(), 0x78);
        assert_eq!(image.u16_at(1).unwrap(), 0x3456);
        assert_eq!(image.u32_at(0).unwrap(), 0x1234_5678);
    }

    #[test]
    fn declared_length_bounds_reads() {
        let image = VbiosImage::with_declared_len(vec![1, 2, 3, 4, 5, 6], 4);
        assert_eq!(image.len(), 4);
        assert!(image.u16_at(2).is_ok());
        assert_eq!(
            image.u16_at(3),
            Err(VbiosError::OutOfBounds {
                offset: 3,
                len: 2,
                image_len: 4
            })
        );
        assert_eq!(image.find(&[5, 6]), None);
    }

    #[test]
    fn offset_overflow_is_out_of_bounds() {
        let image = VbiosImage::new(vec![0; 16]);
        assert!(image.slice(usize::MAX, 2).is_err());
    }

    #[test]
    fn zero_pointer_is_absent() {
        let image = VbiosImage::new(vec![0, 0, 0x34, 0x12]);
        assert_eq!(image.ptr_at(0).unwrap(), None);
        assert_eq!(image.ptr_at(2).unwrap(), Some(0x1234));
    }

    #[test]
    fn rom_checksum() {
        let mut data = vec![0u8; 512];
        data[0] = 0x55;
        data[1] = 0xAA;
        data[2] = 1;
        data[10] = 0x42;
        let sum = data.iter().fold(0u8, |acc, &b| acc.wrapping_add(b));
        data[511] = 0u8.wrapping_sub(sum);

        let image = VbiosImage::new(data.clone());
        assert_eq!(image.rom_checksum_ok(), Some(true));

        data[10] = 0x43;
        assert_eq!(VbiosImage::new(data).rom_checksum_ok(), Some(false));
        assert_eq!(VbiosImage::new(vec![0; 4]).rom_checksum_ok(), None);
    }
}

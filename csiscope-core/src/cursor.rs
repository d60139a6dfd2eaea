//! Positional byte/bit reader over an immutable capture buffer.
//!
//! # Bit order
//!
//! Bit-field reads are **LSB-first**: bits are taken from the least
//! significant bit of the current byte upwards, and the first bit read
//! becomes bit 0 of the result. Reading `8 * k` bits at a byte boundary
//! therefore yields the little-endian integer of those `k` bytes, which is
//! how every supported vendor packs its CSI samples.
//!
//! Byte-level reads always start on a byte boundary. If a bit-field read
//! left a byte partially consumed, the remaining bits of that byte are
//! discarded before the byte read.
//!
//! A failed read never moves the cursor.

use crate::error::DecodeError;

/// Byte order of a multi-byte integer field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endian {
    Big,
    Little,
}

/// Reader over a borrowed buffer with independent byte and bit positions
#[derive(Debug, Clone)]
pub struct Cursor<'a> {
    buf: &'a [u8],
    /// Absolute offset of `buf[0]` in the original capture, for error reports
    base: usize,
    pos: usize,
    /// Bits already consumed from `buf[pos]` (0..8)
    bit: u8,
}

impl<'a> Cursor<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self {
            buf,
            base: 0,
            pos: 0,
            bit: 0,
        }
    }

    /// Cursor positioned at `offset` within `buf`
    pub fn at(buf: &'a [u8], offset: usize) -> Result<Self, DecodeError> {
        if offset > buf.len() {
            return Err(DecodeError::truncated(buf.len(), offset - buf.len(), 0));
        }
        Ok(Self {
            buf,
            base: 0,
            pos: offset,
            bit: 0,
        })
    }

    /// Absolute byte offset of the next read
    pub fn position(&self) -> usize {
        self.base + self.pos
    }

    /// Absolute bit offset of the next bit-field read
    pub fn bit_position(&self) -> usize {
        (self.base + self.pos) * 8 + self.bit as usize
    }

    /// Bytes available to byte-level reads
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.aligned_pos()
    }

    /// Bits available to bit-field reads
    pub fn remaining_bits(&self) -> usize {
        (self.buf.len() - self.pos) * 8 - self.bit as usize
    }

    pub fn is_empty(&self) -> bool {
        self.remaining_bits() == 0
    }

    /// Discard the rest of a partially consumed byte
    pub fn align_to_byte(&mut self) {
        self.pos = self.aligned_pos();
        self.bit = 0;
    }

    fn aligned_pos(&self) -> usize {
        if self.bit > 0 {
            self.pos + 1
        } else {
            self.pos
        }
    }

    fn span(&self, n: usize) -> Result<(usize, &'a [u8]), DecodeError> {
        let start = self.aligned_pos();
        let available = self.buf.len() - start;
        if available < n {
            return Err(DecodeError::truncated(self.base + start, n, available));
        }
        Ok((start, &self.buf[start..start + n]))
    }

    /// Look at the next `n` bytes without advancing
    pub fn peek(&self, n: usize) -> Result<&'a [u8], DecodeError> {
        self.span(n).map(|(_, bytes)| bytes)
    }

    pub fn read_bytes(&mut self, n: usize) -> Result<&'a [u8], DecodeError> {
        let (start, bytes) = self.span(n)?;
        self.pos = start + n;
        self.bit = 0;
        Ok(bytes)
    }

    pub fn read_array<const N: usize>(&mut self) -> Result<[u8; N], DecodeError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.read_bytes(N)?);
        Ok(out)
    }

    pub fn skip(&mut self, n: usize) -> Result<(), DecodeError> {
        self.read_bytes(n).map(|_| ())
    }

    /// Borrow the next `n` bytes as an independent cursor and move past them
    ///
    /// The sub-cursor reports absolute offsets, so errors raised while
    /// parsing a record body still point into the original capture.
    pub fn sub_cursor(&mut self, n: usize) -> Result<Cursor<'a>, DecodeError> {
        let (start, bytes) = self.span(n)?;
        self.pos = start + n;
        self.bit = 0;
        Ok(Cursor {
            buf: bytes,
            base: self.base + start,
            pos: 0,
            bit: 0,
        })
    }

    pub fn read_u8(&mut self) -> Result<u8, DecodeError> {
        Ok(self.read_array::<1>()?[0])
    }

    pub fn read_i8(&mut self) -> Result<i8, DecodeError> {
        Ok(self.read_u8()? as i8)
    }

    pub fn read_u16(&mut self, endian: Endian) -> Result<u16, DecodeError> {
        let b = self.read_array::<2>()?;
        Ok(match endian {
            Endian::Big => u16::from_be_bytes(b),
            Endian::Little => u16::from_le_bytes(b),
        })
    }

    pub fn read_u32(&mut self, endian: Endian) -> Result<u32, DecodeError> {
        let b = self.read_array::<4>()?;
        Ok(match endian {
            Endian::Big => u32::from_be_bytes(b),
            Endian::Little => u32::from_le_bytes(b),
        })
    }

    pub fn read_u64(&mut self, endian: Endian) -> Result<u64, DecodeError> {
        let b = self.read_array::<8>()?;
        Ok(match endian {
            Endian::Big => u64::from_be_bytes(b),
            Endian::Little => u64::from_le_bytes(b),
        })
    }

    /// Read an `n`-bit unsigned field (n ≤ 64), LSB-first
    pub fn read_bits(&mut self, n: u32) -> Result<u64, DecodeError> {
        if n > 64 {
            return Err(DecodeError::BitWidth(n));
        }
        if self.remaining_bits() < n as usize {
            return Err(DecodeError::truncated(
                self.position(),
                (self.bit as usize + n as usize).div_ceil(8),
                self.buf.len() - self.pos,
            ));
        }

        let mut value: u64 = 0;
        let mut filled: u32 = 0;
        while filled < n {
            let available = 8 - self.bit as u32;
            let take = available.min(n - filled);
            let chunk = (self.buf[self.pos] >> self.bit) as u64 & ((1u64 << take) - 1);
            value |= chunk << filled;
            filled += take;
            self.bit += take as u8;
            if self.bit == 8 {
                self.bit = 0;
                self.pos += 1;
            }
        }
        Ok(value)
    }

    /// Read an `n`-bit two's complement field and sign-extend it
    pub fn read_signed_bits(&mut self, n: u32) -> Result<i64, DecodeError> {
        if n == 0 {
            return Ok(0);
        }
        let raw = self.read_bits(n)?;
        let shift = 64 - n;
        Ok(((raw << shift) as i64) >> shift)
    }

    pub fn skip_bits(&mut self, n: usize) -> Result<(), DecodeError> {
        if self.remaining_bits() < n {
            return Err(DecodeError::truncated(
                self.position(),
                (self.bit as usize + n).div_ceil(8),
                self.buf.len() - self.pos,
            ));
        }
        let total = self.bit as usize + n;
        self.pos += total / 8;
        self.bit = (total % 8) as u8;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_integer_endianness() {
        let data = [0x12, 0x34, 0x56, 0x78, 0x9A, 0xBC, 0xDE, 0xF0];
        let mut c = Cursor::new(&data);
        assert_eq!(c.read_u16(Endian::Big).unwrap(), 0x1234);
        assert_eq!(c.read_u16(Endian::Little).unwrap(), 0x7856);
        assert_eq!(c.read_u32(Endian::Big).unwrap(), 0x9ABC_DEF0);
        assert!(c.is_empty());

        let mut c = Cursor::new(&data);
        assert_eq!(c.read_u64(Endian::Little).unwrap(), 0xF0DE_BC9A_7856_3412);
    }

    #[test]
    fn test_truncated_read_does_not_move() {
        let data = [1, 2, 3];
        let mut c = Cursor::new(&data);
        c.read_u8().unwrap();
        let err = c.read_u32(Endian::Little).unwrap_err();
        assert_eq!(
            err,
            DecodeError::Truncated {
                offset: 1,
                needed: 4,
                available: 2
            }
        );
        assert_eq!(c.position(), 1);
        assert_eq!(c.read_u16(Endian::Big).unwrap(), 0x0203);
    }

    #[test]
    fn test_bits_lsb_first() {
        // 0b1010_1100, 0b0000_0011
        let data = [0xAC, 0x03];
        let mut c = Cursor::new(&data);
        assert_eq!(c.read_bits(3).unwrap(), 0b100);
        assert_eq!(c.read_bits(5).unwrap(), 0b10101);
        assert_eq!(c.position(), 1);
        assert_eq!(c.read_bits(2).unwrap(), 0b11);
        assert_eq!(c.remaining_bits(), 6);
    }

    #[test]
    fn test_bits_cross_byte_boundary() {
        // 8-bit value starting at bit 3, the way IWL5300 samples are packed
        let data = [0b1010_1000, 0b0000_0111];
        let mut c = Cursor::new(&data);
        c.skip_bits(3).unwrap();
        let value = c.read_bits(8).unwrap();
        let expected = ((data[0] >> 3) as u16 | ((data[1] as u16) << 5)) as u8;
        assert_eq!(value, expected as u64);
        assert_eq!(c.bit_position(), 11);
    }

    #[test]
    fn test_whole_bytes_match_little_endian() {
        let data = [0x34, 0x12, 0x78, 0x56];
        let mut c = Cursor::new(&data);
        assert_eq!(c.read_bits(16).unwrap(), 0x1234);
        let mut c = Cursor::new(&data);
        assert_eq!(c.read_bits(32).unwrap(), 0x5678_1234);
    }

    #[test]
    fn test_read_64_bits() {
        let data = [0xFF; 9];
        let mut c = Cursor::new(&data);
        c.skip_bits(4).unwrap();
        assert_eq!(c.read_bits(64).unwrap(), u64::MAX);
        assert_eq!(c.remaining_bits(), 4);
    }

    #[test]
    fn test_oversized_bit_field() {
        let data = [0xFF; 16];
        let mut c = Cursor::new(&data);
        assert_eq!(c.read_bits(65), Err(DecodeError::BitWidth(65)));
        assert_eq!(c.position(), 0);
        assert_eq!(c.read_signed_bits(70), Err(DecodeError::BitWidth(70)));
    }

    #[test]
    fn test_signed_bits() {
        // 10-bit fields: 0x3FF = -1, 0x200 = -512, 0x1FF = 511
        let data = [0xFF, 0x03, 0x00, 0x02];
        let mut c = Cursor::new(&data);
        assert_eq!(c.read_signed_bits(10).unwrap(), -1);
        c.align_to_byte();
        assert_eq!(c.read_signed_bits(16).unwrap(), 0x0200);

        let data = [0x00, 0x02];
        let mut c = Cursor::new(&data);
        assert_eq!(c.read_signed_bits(10).unwrap(), -512);

        let data = [0xFF, 0x01];
        let mut c = Cursor::new(&data);
        assert_eq!(c.read_signed_bits(10).unwrap(), 511);
    }

    #[test]
    fn test_bits_then_bytes_align() {
        let data = [0xFF, 0xAB, 0xCD];
        let mut c = Cursor::new(&data);
        c.read_bits(4).unwrap();
        assert_eq!(c.remaining(), 2);
        assert_eq!(c.read_u8().unwrap(), 0xAB);
        assert_eq!(c.position(), 2);
    }

    #[test]
    fn test_bits_truncated() {
        let data = [0xFF];
        let mut c = Cursor::new(&data);
        c.read_bits(5).unwrap();
        assert!(matches!(
            c.read_bits(4),
            Err(DecodeError::Truncated { offset: 0, .. })
        ));
        assert_eq!(c.read_bits(3).unwrap(), 0b111);
        assert!(c.is_empty());
    }

    #[test]
    fn test_peek_and_skip() {
        let data = [1, 2, 3, 4];
        let mut c = Cursor::new(&data);
        assert_eq!(c.peek(2).unwrap(), &[1, 2]);
        assert_eq!(c.position(), 0);
        c.skip(3).unwrap();
        assert_eq!(c.remaining(), 1);
        assert!(c.skip(2).is_err());
        assert!(c.peek(2).is_err());
    }

    #[test]
    fn test_sub_cursor_reports_absolute_offsets() {
        let data = [0u8; 10];
        let mut outer = Cursor::at(&data, 4).unwrap();
        let mut inner = outer.sub_cursor(3).unwrap();
        assert_eq!(outer.position(), 7);
        assert_eq!(inner.position(), 4);
        inner.read_u16(Endian::Little).unwrap();
        let err = inner.read_u16(Endian::Little).unwrap_err();
        assert_eq!(
            err,
            DecodeError::Truncated {
                offset: 6,
                needed: 2,
                available: 1
            }
        );
    }

    #[test]
    fn test_independent_cursors_over_same_buffer() {
        let data = [9, 8, 7];
        let mut a = Cursor::new(&data);
        let mut b = Cursor::at(&data, 1).unwrap();
        assert_eq!(a.read_u8().unwrap(), 9);
        assert_eq!(b.read_u8().unwrap(), 8);
        assert_eq!(a.read_u8().unwrap(), 8);
        assert!(Cursor::at(&data, 4).is_err());
    }
}

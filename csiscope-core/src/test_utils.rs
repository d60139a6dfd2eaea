//! Fixture helpers shared by the unit tests

/// LSB-first bit packer, the inverse of `Cursor::read_bits`
pub(crate) struct BitWriter {
    bytes: Vec<u8>,
    bits: usize,
}

impl BitWriter {
    pub(crate) fn new() -> Self {
        Self {
            bytes: Vec::new(),
            bits: 0,
        }
    }

    pub(crate) fn push(&mut self, value: u64, n: u32) {
        for i in 0..n {
            if self.bits % 8 == 0 {
                self.bytes.push(0);
            }
            if (value >> i) & 1 == 1 {
                let last = self.bytes.len() - 1;
                self.bytes[last] |= 1 << (self.bits % 8);
            }
            self.bits += 1;
        }
    }

    pub(crate) fn push_signed(&mut self, value: i64, n: u32) {
        self.push(value as u64, n);
    }

    pub(crate) fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}

#[test]
fn test_bit_writer_matches_cursor() {
    use crate::cursor::Cursor;

    let mut w = BitWriter::new();
    w.push(0b101, 3);
    w.push_signed(-3, 10);
    w.push(0xAB, 8);
    let bytes = w.into_bytes();
    assert_eq!(bytes.len(), 3);

    let mut c = Cursor::new(&bytes);
    assert_eq!(c.read_bits(3).unwrap(), 0b101);
    assert_eq!(c.read_signed_bits(10).unwrap(), -3);
    assert_eq!(c.read_bits(8).unwrap(), 0xAB);
}

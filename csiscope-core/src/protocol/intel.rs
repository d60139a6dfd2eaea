//! Intel IWL5300 (Linux 802.11n CSI Tool) log format
//!
//! A log is a sequence of netlink messages, each written as a big-endian
//! `u16` length, a one byte message code and `length - 1` bytes of body.
//! Only beamforming feedback messages (code 0xBB) carry CSI.
//!
//! The bfee body is little-endian:
//!
//! ```text
//! timestamp_low u32 | bfee_count u16 | reserved u16 | nrx u8 | ntx u8 |
//! rssi_a u8 | rssi_b u8 | rssi_c u8 | noise i8 | agc u8 | antenna_sel u8 |
//! len u16 | rate_n_flags u16 | payload[len]
//! ```

use bitflags::bitflags;

use super::{bounded, within_record, Decoded, RawFrameRecord};
use crate::cursor::{Cursor, Endian};
use crate::error::{DecodeError, SkipReason};
use crate::frame::{Bandwidth, FrameHeader, VendorInfo};
use crate::matrix::SampleLayout;
use crate::Vendor;

// =============================================================================
// Constants
// =============================================================================

/// Netlink message code of a beamforming feedback record
pub const CODE_BFEE: u8 = 0xBB;

/// The IWL5300 reports 30 grouped subcarriers regardless of bandwidth
pub const NTONES: usize = 30;

pub const MAX_ANTENNAS: u8 = 3;

/// Noise value the firmware uses when it did not measure the noise floor
pub const NOISE_NOT_MEASURED: i8 = -127;

/// Size of the fixed bfee header, excluding the message code
pub const BFEE_HEADER_SIZE: usize = 20;

pub const CLAIM_PRIORITY: u8 = 20;

bitflags! {
    /// Flag bits of the `rate_n_flags` word
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct RateFlags: u16 {
        const HT = 0x0100;
        const CCK = 0x0200;
        const GREENFIELD = 0x0400;
        const HT40 = 0x0800;
        const DUPLICATE = 0x1000;
        const SHORT_GI = 0x2000;
    }
}

/// MCS index held in the low bits of `rate_n_flags`
pub fn mcs_index(rate_n_flags: u16) -> u8 {
    (rate_n_flags & 0x7F) as u8
}

// =============================================================================
// Header
// =============================================================================

/// Fixed part of a bfee record body
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BfeeHeader {
    pub timestamp_low: u32,
    pub bfee_count: u16,
    pub reserved: u16,
    pub nrx: u8,
    pub ntx: u8,
    pub rssi_a: u8,
    pub rssi_b: u8,
    pub rssi_c: u8,
    pub noise: i8,
    pub agc: u8,
    pub antenna_sel: u8,
    pub len: u16,
    pub rate_n_flags: u16,
}

impl BfeeHeader {
    pub fn parse(cursor: &mut Cursor<'_>) -> Result<Self, DecodeError> {
        Ok(BfeeHeader {
            timestamp_low: cursor.read_u32(Endian::Little)?,
            bfee_count: cursor.read_u16(Endian::Little)?,
            reserved: cursor.read_u16(Endian::Little)?,
            nrx: cursor.read_u8()?,
            ntx: cursor.read_u8()?,
            rssi_a: cursor.read_u8()?,
            rssi_b: cursor.read_u8()?,
            rssi_c: cursor.read_u8()?,
            noise: cursor.read_i8()?,
            agc: cursor.read_u8()?,
            antenna_sel: cursor.read_u8()?,
            len: cursor.read_u16(Endian::Little)?,
            rate_n_flags: cursor.read_u16(Endian::Little)?,
        })
    }

    pub fn to_bytes(&self) -> [u8; BFEE_HEADER_SIZE] {
        let mut out = [0u8; BFEE_HEADER_SIZE];
        out[0..4].copy_from_slice(&self.timestamp_low.to_le_bytes());
        out[4..6].copy_from_slice(&self.bfee_count.to_le_bytes());
        out[6..8].copy_from_slice(&self.reserved.to_le_bytes());
        out[8] = self.nrx;
        out[9] = self.ntx;
        out[10] = self.rssi_a;
        out[11] = self.rssi_b;
        out[12] = self.rssi_c;
        out[13] = self.noise as u8;
        out[14] = self.agc;
        out[15] = self.antenna_sel;
        out[16..18].copy_from_slice(&self.len.to_le_bytes());
        out[18..20].copy_from_slice(&self.rate_n_flags.to_le_bytes());
        out
    }

    pub fn rate_flags(&self) -> RateFlags {
        RateFlags::from_bits_truncate(self.rate_n_flags)
    }

    pub fn bandwidth(&self) -> Bandwidth {
        if self.rate_flags().contains(RateFlags::HT40) {
            Bandwidth::Bw40
        } else {
            Bandwidth::Bw20
        }
    }

    pub fn noise_floor(&self) -> Option<i16> {
        if self.noise == NOISE_NOT_MEASURED {
            None
        } else {
            Some(self.noise as i16)
        }
    }

    /// Receive chain permutation, two bits per chain
    pub fn permutation(&self) -> [usize; 3] {
        let sel = self.antenna_sel as usize;
        [sel & 0x3, (sel >> 2) & 0x3, (sel >> 4) & 0x3]
    }

    /// Payload length the firmware produces for this antenna configuration
    pub fn expected_len(&self) -> usize {
        expected_payload_len(self.ntx as usize, self.nrx as usize)
    }
}

/// Packed CSI bytes for `ntx x nrx` antennas: 30 tones of a 3 bit gap
/// followed by 16 bits per antenna pair
pub fn expected_payload_len(ntx: usize, nrx: usize) -> usize {
    SampleLayout::INTEL.required_bytes(ntx, nrx, NTONES)
}

// =============================================================================
// Record decoding
// =============================================================================

pub(crate) fn decode_next<'a>(cursor: &mut Cursor<'a>) -> Result<Decoded<'a>, DecodeError> {
    let offset = cursor.position();
    let mut body = bounded(cursor, |c| Ok(c.read_u16(Endian::Big)? as usize))?;
    if body.remaining() == 0 {
        return Err(DecodeError::matrix(Vendor::Intel, "zero-length record"));
    }

    let code = body.read_u8()?;
    if code != CODE_BFEE {
        return Ok(Decoded::Skipped(SkipReason::NonCsiRecord { code }));
    }

    decode_bfee(&mut body, offset).map_err(within_record(Vendor::Intel))
}

fn decode_bfee<'a>(body: &mut Cursor<'a>, offset: usize) -> Result<Decoded<'a>, DecodeError> {
    let header = BfeeHeader::parse(body)?;

    if !(1..=MAX_ANTENNAS).contains(&header.nrx) || !(1..=MAX_ANTENNAS).contains(&header.ntx) {
        return Err(DecodeError::InvalidDimensions {
            vendor: Vendor::Intel,
            ntx: header.ntx as usize,
            nrx: header.nrx as usize,
            ntones: NTONES,
        });
    }

    let expected = header.expected_len();
    if header.len as usize != expected {
        return Err(DecodeError::matrix(
            Vendor::Intel,
            format!(
                "declared payload length {} does not match {}x{} antennas ({} bytes)",
                header.len, header.ntx, header.nrx, expected
            ),
        ));
    }
    let payload = body.read_bytes(header.len as usize)?;

    let perm = header.permutation();
    let frame = FrameHeader {
        vendor: Vendor::Intel,
        timestamp_us: header.timestamp_low as u64,
        rssi: vec![
            header.rssi_a as i16,
            header.rssi_b as i16,
            header.rssi_c as i16,
        ],
        noise_floor: header.noise_floor(),
        bandwidth: Some(header.bandwidth()),
        ntx: header.ntx as usize,
        nrx: header.nrx as usize,
        ntones: NTONES,
        info: VendorInfo::Intel {
            bfee_count: header.bfee_count,
            agc: header.agc,
            antenna_sel: header.antenna_sel,
            perm: [perm[0] as u8, perm[1] as u8, perm[2] as u8],
            rate_n_flags: header.rate_n_flags,
        },
    };

    Ok(Decoded::Frame(RawFrameRecord {
        header: frame,
        payload,
        offset,
        layout: SampleLayout::INTEL,
        rx_permutation: Some(perm),
    }))
}

/// Encode a complete bfee record (length prefix, code, header, payload)
pub fn encode_record(header: &BfeeHeader, payload: &[u8]) -> Vec<u8> {
    encode_message(CODE_BFEE, &[&header.to_bytes()[..], payload].concat())
}

/// Encode a netlink message with an arbitrary code
pub fn encode_message(code: u8, body: &[u8]) -> Vec<u8> {
    let field_len = (body.len() + 1) as u16;
    let mut out = Vec::with_capacity(body.len() + 3);
    out.extend_from_slice(&field_len.to_be_bytes());
    out.push(code);
    out.extend_from_slice(body);
    out
}

// =============================================================================
// Detection
// =============================================================================

/// Netlink records walked during detection before giving up on a bfee
pub const CLAIM_SCAN_RECORDS: usize = 8;

/// Whether one of the first netlink records of `buf` is a plausible bfee
///
/// Logs may open with other netlink messages, which the decoder skips.
/// A bfee behind such messages must carry a complete, self-consistent
/// header; a bfee opening the log only needs sane antenna counts.
pub fn claims(buf: &[u8]) -> bool {
    let mut at = 0;
    for index in 0..CLAIM_SCAN_RECORDS {
        if buf.len() < at + 3 {
            return false;
        }
        let record = &buf[at..];
        let field_len = u16::from_be_bytes([record[0], record[1]]) as usize;
        if field_len == 0 {
            return false;
        }
        if record[2] == CODE_BFEE {
            return if index == 0 {
                opens_with_bfee(record, field_len)
            } else {
                complete_bfee(record, field_len)
            };
        }
        at += 2 + field_len;
    }
    false
}

fn opens_with_bfee(record: &[u8], field_len: usize) -> bool {
    if field_len < 1 + BFEE_HEADER_SIZE {
        return false;
    }
    // nrx and ntx sit at offsets 8 and 9 of the header
    match (record.get(3 + 8), record.get(3 + 9)) {
        (Some(nrx), Some(ntx)) => (1..=MAX_ANTENNAS).contains(nrx) && (1..=MAX_ANTENNAS).contains(ntx),
        _ => true,
    }
}

fn complete_bfee(record: &[u8], field_len: usize) -> bool {
    let Some(bytes) = record.get(3..3 + BFEE_HEADER_SIZE) else {
        return false;
    };
    let Ok(header) = BfeeHeader::parse(&mut Cursor::new(bytes)) else {
        return false;
    };
    (1..=MAX_ANTENNAS).contains(&header.nrx)
        && (1..=MAX_ANTENNAS).contains(&header.ntx)
        && header.len as usize == header.expected_len()
        && field_len == 1 + BFEE_HEADER_SIZE + header.len as usize
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::BitWriter;

    fn header(ntx: u8, nrx: u8) -> BfeeHeader {
        BfeeHeader {
            timestamp_low: 123_456,
            bfee_count: 7,
            reserved: 0,
            nrx,
            ntx,
            rssi_a: 40,
            rssi_b: 38,
            rssi_c: 0,
            noise: -90,
            agc: 30,
            antenna_sel: 0b00_10_01,
            len: expected_payload_len(ntx as usize, nrx as usize) as u16,
            rate_n_flags: 0x4101,
        }
    }

    #[test]
    fn test_header_round_trip() {
        let h = BfeeHeader {
            noise: NOISE_NOT_MEASURED,
            rate_n_flags: 0x0911,
            ..header(3, 2)
        };
        let bytes = h.to_bytes();
        let parsed = BfeeHeader::parse(&mut Cursor::new(&bytes)).unwrap();
        assert_eq!(parsed, h);
        assert_eq!(parsed.to_bytes(), bytes);
    }

    #[test]
    fn test_expected_payload_len() {
        // ceil(30 * (16 * nrx * ntx + 3) / 8)
        assert_eq!(expected_payload_len(1, 1), 72);
        assert_eq!(expected_payload_len(2, 1), 132);
        assert_eq!(expected_payload_len(2, 2), 252);
        assert_eq!(expected_payload_len(3, 3), 552);
    }

    #[test]
    fn test_decode_bfee_record() {
        let h = header(2, 3);
        let payload = vec![0u8; h.len as usize];
        let data = encode_record(&h, &payload);
        let mut c = Cursor::new(&data);

        let decoded = decode_next(&mut c).unwrap();
        assert!(c.is_empty());
        let Decoded::Frame(rec) = decoded else {
            panic!("expected a frame");
        };
        assert_eq!(rec.offset, 0);
        assert_eq!(rec.payload.len(), 372);
        assert_eq!(rec.header.shape(), (2, 3, 30));
        assert_eq!(rec.header.timestamp_us, 123_456);
        assert_eq!(rec.header.rssi, vec![40, 38, 0]);
        assert_eq!(rec.header.noise_floor, Some(-90));
        assert_eq!(rec.header.bandwidth, Some(Bandwidth::Bw20));
        assert_eq!(rec.rx_permutation, Some([1, 2, 0]));
        match rec.header.info {
            VendorInfo::Intel { bfee_count, agc, perm, .. } => {
                assert_eq!(bfee_count, 7);
                assert_eq!(agc, 30);
                assert_eq!(perm, [1, 2, 0]);
            }
            other => panic!("unexpected info {:?}", other),
        }
    }

    #[test]
    fn test_noise_not_measured_and_ht40() {
        let h = BfeeHeader {
            noise: NOISE_NOT_MEASURED,
            rate_n_flags: 0x0900,
            ..header(1, 1)
        };
        let data = encode_record(&h, &vec![0u8; h.len as usize]);
        let Decoded::Frame(rec) = decode_next(&mut Cursor::new(&data)).unwrap() else {
            panic!("expected a frame");
        };
        assert_eq!(rec.header.noise_floor, None);
        assert_eq!(rec.header.bandwidth, Some(Bandwidth::Bw40));
        assert!(h.rate_flags().contains(RateFlags::HT | RateFlags::HT40));
        assert_eq!(mcs_index(0x4101), 1);
    }

    #[test]
    fn test_non_csi_record_skipped() {
        let mut data = encode_message(0xC1, &[1, 2, 3, 4]);
        data.extend(encode_record(&header(1, 1), &[0u8; 72]));
        let mut c = Cursor::new(&data);

        assert_eq!(
            decode_next(&mut c).unwrap(),
            Decoded::Skipped(SkipReason::NonCsiRecord { code: 0xC1 })
        );
        assert_eq!(c.position(), 7);
        assert!(matches!(decode_next(&mut c).unwrap(), Decoded::Frame(r) if r.offset == 7));
    }

    #[test]
    fn test_declared_length_exceeds_buffer() {
        let data = encode_record(&header(2, 2), &[0u8; 252]);
        let cut = &data[..data.len() - 10];
        let mut c = Cursor::new(cut);
        assert!(matches!(
            decode_next(&mut c),
            Err(DecodeError::Truncated { .. })
        ));
        assert_eq!(c.position(), 0);
    }

    #[test]
    fn test_invalid_dimensions_resynchronise() {
        let mut bad = header(1, 1);
        bad.nrx = 4;
        let mut data = encode_record(&bad, &[0u8; 72]);
        let good_at = data.len();
        data.extend(encode_record(&header(1, 1), &[0u8; 72]));

        let mut c = Cursor::new(&data);
        assert!(matches!(
            decode_next(&mut c),
            Err(DecodeError::InvalidDimensions { nrx: 4, .. })
        ));
        assert_eq!(c.position(), good_at);
        assert!(matches!(decode_next(&mut c), Ok(Decoded::Frame(_))));
    }

    #[test]
    fn test_payload_length_mismatch() {
        let mut h = header(2, 1);
        h.len = 100;
        let data = encode_record(&h, &[0u8; 100]);
        let err = decode_next(&mut Cursor::new(&data)).unwrap_err();
        assert!(err.is_record_local());
    }

    #[test]
    fn test_body_shorter_than_header() {
        let data = encode_message(CODE_BFEE, &[0u8; 10]);
        let mut c = Cursor::new(&data);
        let err = decode_next(&mut c).unwrap_err();
        assert!(matches!(err, DecodeError::MatrixReconstruction { .. }));
        assert!(c.is_empty());
    }

    #[test]
    fn test_decoded_samples() {
        // 1x1: each tone carries (re, im) = (tone, -tone)
        let mut w = BitWriter::new();
        for tone in 0..NTONES as i64 {
            w.push(0, 3);
            w.push_signed(tone, 8);
            w.push_signed(-tone, 8);
        }
        let payload = w.into_bytes();
        let data = encode_record(&header(1, 1), &payload);
        let Decoded::Frame(rec) = decode_next(&mut Cursor::new(&data)).unwrap() else {
            panic!("expected a frame");
        };
        let csi = crate::matrix::reconstruct(&rec).unwrap();
        let v = csi.get(0, 0, 29).unwrap() * 128.0;
        assert_eq!((v.re, v.im), (29.0, -29.0));
    }

    #[test]
    fn test_claims() {
        let data = encode_record(&header(2, 2), &[0u8; 252]);
        assert!(claims(&data));
        assert!(claims(&data[..3]));
        assert!(!claims(&data[..2]));
        assert!(!claims(&encode_message(CODE_BFEE, &[0u8; 4])));

        let mut bad = header(2, 2);
        bad.ntx = 0;
        assert!(!claims(&encode_record(&bad, &[])));
    }

    #[test]
    fn test_claims_behind_other_messages() {
        let mut data = encode_message(0xC1, &[1, 2, 3, 4]);
        data.extend(encode_record(&header(2, 2), &[0u8; 252]));
        assert!(claims(&data));

        // A later bfee must be complete
        assert!(!claims(&data[..7 + 3 + 10]));

        let mut bad = header(2, 2);
        bad.len = 100;
        let mut data = encode_message(0xC1, &[1, 2, 3, 4]);
        data.extend(encode_record(&bad, &[0u8; 100]));
        assert!(!claims(&data));

        let mut data = Vec::new();
        for _ in 0..CLAIM_SCAN_RECORDS {
            data.extend(encode_message(0xC1, &[]));
        }
        data.extend(encode_record(&header(2, 2), &[0u8; 252]));
        assert!(!claims(&data));

        assert!(!claims(&encode_message(0xC1, &[1, 2])));
    }
}

//! ESP32 binary serial log format
//!
//! The radio streams records over a serial line, each introduced by eight
//! `0xAA` bytes and a little-endian `u16` body length:
//!
//! ```text
//! timestamp_us u64 | src_mac [6] | dst_mac [6] | seq u16 | rssi i8 |
//! agc_gain u8 | fft_gain u8 | csi_len u16 | csi[csi_len]
//! ```
//!
//! Serial captures often start mid-record or contain line noise, so bytes
//! before a preamble are skipped rather than rejected.

use super::{bounded, within_record, Decoded, RawFrameRecord};
use crate::cursor::{Cursor, Endian};
use crate::error::{DecodeError, SkipReason};
use crate::frame::{FrameHeader, VendorInfo};
use crate::matrix::SampleLayout;
use crate::Vendor;

// =============================================================================
// Constants
// =============================================================================

pub const PREAMBLE: [u8; 8] = [0xAA; 8];

/// Fixed part of the record body
pub const HEADER_SIZE: usize = 27;

/// Largest tone count the radio reports (LLTF + HT-LTF + STBC HT-LTF)
pub const MAX_TONES: usize = 306;

/// Largest body a record can declare
pub const MAX_BODY_LEN: usize = HEADER_SIZE + MAX_TONES * 2;

pub const CLAIM_PRIORITY: u8 = 40;

/// Leading bytes searched for a preamble during detection
pub const CLAIM_SCAN_BYTES: usize = 512;

// =============================================================================
// Header
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Esp32Header {
    pub timestamp_us: u64,
    pub src_mac: [u8; 6],
    pub dst_mac: [u8; 6],
    pub sequence: u16,
    pub rssi: i8,
    pub agc_gain: u8,
    pub fft_gain: u8,
    pub csi_len: u16,
}

impl Esp32Header {
    pub fn parse(cursor: &mut Cursor<'_>) -> Result<Self, DecodeError> {
        Ok(Esp32Header {
            timestamp_us: cursor.read_u64(Endian::Little)?,
            src_mac: cursor.read_array()?,
            dst_mac: cursor.read_array()?,
            sequence: cursor.read_u16(Endian::Little)?,
            rssi: cursor.read_i8()?,
            agc_gain: cursor.read_u8()?,
            fft_gain: cursor.read_u8()?,
            csi_len: cursor.read_u16(Endian::Little)?,
        })
    }

    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut out = [0u8; HEADER_SIZE];
        out[0..8].copy_from_slice(&self.timestamp_us.to_le_bytes());
        out[8..14].copy_from_slice(&self.src_mac);
        out[14..20].copy_from_slice(&self.dst_mac);
        out[20..22].copy_from_slice(&self.sequence.to_le_bytes());
        out[22] = self.rssi as u8;
        out[23] = self.agc_gain;
        out[24] = self.fft_gain;
        out[25..27].copy_from_slice(&self.csi_len.to_le_bytes());
        out
    }
}

// =============================================================================
// Record decoding
// =============================================================================

/// Start of the first preamble in `data`
///
/// A run of more than eight `0xAA` bytes is noise followed by a preamble,
/// so the match is aligned to the end of the run. A body length always
/// has its low bit set (odd header plus I/Q pairs), so its first byte can
/// never be `0xAA`.
fn find_preamble(data: &[u8]) -> Option<usize> {
    let start = data.windows(PREAMBLE.len()).position(|w| w == PREAMBLE)?;
    let run = data[start + PREAMBLE.len()..]
        .iter()
        .take_while(|&&b| b == PREAMBLE[0])
        .count();
    Some(start + run)
}

/// Body length declared after the preamble at the start of `data`
fn declared_len(data: &[u8]) -> Option<usize> {
    let len = data.get(PREAMBLE.len()..PREAMBLE.len() + 2)?;
    Some(u16::from_le_bytes([len[0], len[1]]) as usize)
}

pub(crate) fn decode_next<'a>(cursor: &mut Cursor<'a>) -> Result<Decoded<'a>, DecodeError> {
    let rest = cursor.peek(cursor.remaining())?;
    match find_preamble(rest) {
        Some(0) => match declared_len(rest) {
            // A preamble made of line noise: the length cannot be a record
            // and the capture does not hold that many bytes
            Some(len) if len > MAX_BODY_LEN && PREAMBLE.len() + 2 + len > rest.len() => {
                cursor.skip(1)?;
                Ok(Decoded::Skipped(SkipReason::Resync { bytes: 1 }))
            }
            _ => decode_record(cursor),
        },
        Some(garbage) => {
            cursor.skip(garbage)?;
            Ok(Decoded::Skipped(SkipReason::Resync { bytes: garbage }))
        }
        None => {
            // Keep a trailing partial preamble so it is reported as truncation
            let partial = rest
                .iter()
                .rev()
                .take(PREAMBLE.len() - 1)
                .take_while(|&&b| b == PREAMBLE[0])
                .count();
            if partial == rest.len() {
                return Err(DecodeError::truncated(
                    cursor.position(),
                    PREAMBLE.len() + 2,
                    rest.len(),
                ));
            }
            let garbage = rest.len() - partial;
            cursor.skip(garbage)?;
            Ok(Decoded::Skipped(SkipReason::Resync { bytes: garbage }))
        }
    }
}

fn decode_record<'a>(cursor: &mut Cursor<'a>) -> Result<Decoded<'a>, DecodeError> {
    let offset = cursor.position();
    let mut body = bounded(cursor, |c| {
        c.skip(PREAMBLE.len())?;
        Ok(c.read_u16(Endian::Little)? as usize)
    })?;
    let body_len = body.remaining();
    decode_body(&mut body, body_len, offset).map_err(within_record(Vendor::Esp32))
}

fn decode_body<'a>(
    body: &mut Cursor<'a>,
    body_len: usize,
    offset: usize,
) -> Result<Decoded<'a>, DecodeError> {
    let header = Esp32Header::parse(body)?;
    let csi_len = header.csi_len as usize;

    if HEADER_SIZE + csi_len != body_len {
        return Err(DecodeError::matrix(
            Vendor::Esp32,
            format!(
                "body length {} does not match header ({} + {} CSI bytes)",
                body_len, HEADER_SIZE, csi_len
            ),
        ));
    }
    if csi_len == 0 {
        return Ok(Decoded::Skipped(SkipReason::EmptyCsi));
    }
    if csi_len % 2 != 0 {
        return Err(DecodeError::matrix(
            Vendor::Esp32,
            format!("CSI length {} is not a whole number of I/Q pairs", csi_len),
        ));
    }
    let ntones = csi_len / 2;
    if ntones > MAX_TONES {
        return Err(DecodeError::InvalidDimensions {
            vendor: Vendor::Esp32,
            ntx: 1,
            nrx: 1,
            ntones,
        });
    }

    let payload = body.read_bytes(csi_len)?;
    let frame = FrameHeader {
        vendor: Vendor::Esp32,
        timestamp_us: header.timestamp_us,
        rssi: vec![header.rssi as i16],
        noise_floor: None,
        bandwidth: None,
        ntx: 1,
        nrx: 1,
        ntones,
        info: VendorInfo::Esp32 {
            src_mac: header.src_mac,
            dst_mac: header.dst_mac,
            sequence: header.sequence,
            agc_gain: header.agc_gain,
            fft_gain: header.fft_gain,
        },
    };

    Ok(Decoded::Frame(RawFrameRecord {
        header: frame,
        payload,
        offset,
        layout: SampleLayout::ESP32,
        rx_permutation: None,
    }))
}

/// Encode one framed record: preamble, body length, header and CSI bytes
pub fn encode_record(header: &Esp32Header, csi: &[u8]) -> Vec<u8> {
    let body_len = (HEADER_SIZE + csi.len()) as u16;
    let mut out = Vec::with_capacity(PREAMBLE.len() + 2 + body_len as usize);
    out.extend_from_slice(&PREAMBLE);
    out.extend_from_slice(&body_len.to_le_bytes());
    out.extend_from_slice(&header.to_bytes());
    out.extend_from_slice(csi);
    out
}

// =============================================================================
// Detection
// =============================================================================

/// Whether a preamble with a plausible body length appears within the
/// first [`CLAIM_SCAN_BYTES`] of `buf`
pub fn claims(buf: &[u8]) -> bool {
    let head = &buf[..buf.len().min(CLAIM_SCAN_BYTES + PREAMBLE.len() + 2)];
    let Some(start) = find_preamble(head) else {
        return false;
    };
    start <= CLAIM_SCAN_BYTES
        && matches!(declared_len(&head[start..]), Some(len) if (HEADER_SIZE..=MAX_BODY_LEN).contains(&len))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matrix::reconstruct;

    fn header(csi_len: u16) -> Esp32Header {
        Esp32Header {
            timestamp_us: 5_000_000,
            src_mac: [0x24, 0x0a, 0xc4, 0x00, 0x00, 0x01],
            dst_mac: [0xff; 6],
            sequence: 17,
            rssi: -61,
            agc_gain: 3,
            fft_gain: 4,
            csi_len,
        }
    }

    #[test]
    fn test_header_round_trip() {
        let h = header(128);
        let bytes = h.to_bytes();
        let parsed = Esp32Header::parse(&mut Cursor::new(&bytes)).unwrap();
        assert_eq!(parsed, h);
        assert_eq!(parsed.to_bytes(), bytes);
    }

    #[test]
    fn test_decode_record() {
        // 64 tones in FFT order; tone k carries (imag, real) = (0, frequency)
        let mut csi = Vec::new();
        for k in 0..64i8 {
            let freq = if k < 32 { k } else { k - 64 };
            csi.push(0);
            csi.push(freq as u8);
        }
        let data = encode_record(&header(128), &csi);
        let mut c = Cursor::new(&data);
        let Decoded::Frame(rec) = decode_next(&mut c).unwrap() else {
            panic!("expected a frame");
        };
        assert!(c.is_empty());
        assert_eq!(rec.header.shape(), (1, 1, 64));
        assert_eq!(rec.header.rssi, vec![-61]);
        assert_eq!(rec.header.timestamp_us, 5_000_000);

        let matrix = reconstruct(&rec).unwrap();
        let re: Vec<f64> = matrix
            .tones(0, 0)
            .unwrap()
            .iter()
            .map(|v| v.re * 128.0)
            .collect();
        assert_eq!(re[0], -32.0);
        assert_eq!(re[63], 31.0);
        assert!(re.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_resync_over_garbage() {
        let mut data = vec![0x01, 0x02, 0xAA, 0x03];
        let record_at = data.len();
        data.extend(encode_record(&header(4), &[1, 2, 3, 4]));

        let mut c = Cursor::new(&data);
        assert_eq!(
            decode_next(&mut c).unwrap(),
            Decoded::Skipped(SkipReason::Resync { bytes: 4 })
        );
        assert_eq!(c.position(), record_at);
        assert!(matches!(decode_next(&mut c).unwrap(), Decoded::Frame(_)));
    }

    #[test]
    fn test_trailing_garbage_and_partial_preamble() {
        let mut c = Cursor::new(&[0x10, 0x20, 0x30]);
        assert_eq!(
            decode_next(&mut c).unwrap(),
            Decoded::Skipped(SkipReason::Resync { bytes: 3 })
        );
        assert!(c.is_empty());

        let data = [0x10, 0xAA, 0xAA, 0xAA];
        let mut c = Cursor::new(&data);
        assert_eq!(
            decode_next(&mut c).unwrap(),
            Decoded::Skipped(SkipReason::Resync { bytes: 1 })
        );
        assert!(matches!(
            decode_next(&mut c),
            Err(DecodeError::Truncated { offset: 1, .. })
        ));
    }

    #[test]
    fn test_empty_and_odd_csi() {
        let data = encode_record(&header(0), &[]);
        assert_eq!(
            decode_next(&mut Cursor::new(&data)).unwrap(),
            Decoded::Skipped(SkipReason::EmptyCsi)
        );

        let data = encode_record(&header(3), &[1, 2, 3]);
        let err = decode_next(&mut Cursor::new(&data)).unwrap_err();
        assert!(matches!(err, DecodeError::MatrixReconstruction { .. }));
    }

    #[test]
    fn test_too_many_tones() {
        let len = (MAX_TONES + 1) * 2;
        let data = encode_record(&header(len as u16), &vec![0u8; len]);
        assert!(matches!(
            decode_next(&mut Cursor::new(&data)),
            Err(DecodeError::InvalidDimensions { ntones: 307, .. })
        ));
    }

    #[test]
    fn test_truncated_record() {
        let data = encode_record(&header(128), &[0u8; 128]);
        let mut c = Cursor::new(&data[..100]);
        assert!(matches!(
            decode_next(&mut c),
            Err(DecodeError::Truncated { .. })
        ));
        assert_eq!(c.position(), 0);
    }

    #[test]
    fn test_stray_preamble_byte() {
        let records: Vec<Vec<u8>> = (0..4)
            .map(|i| encode_record(&header(128), &[i as u8; 128]))
            .collect();
        let mut data = records[0].clone();
        data.push(0xAA);
        for record in &records[1..] {
            data.extend(record);
        }

        let mut c = Cursor::new(&data);
        assert!(matches!(decode_next(&mut c).unwrap(), Decoded::Frame(_)));
        assert_eq!(
            decode_next(&mut c).unwrap(),
            Decoded::Skipped(SkipReason::Resync { bytes: 1 })
        );
        assert_eq!(c.position(), records[0].len() + 1);
        for _ in 1..4 {
            assert!(matches!(decode_next(&mut c).unwrap(), Decoded::Frame(_)));
        }
        assert!(c.is_empty());
    }

    #[test]
    fn test_noise_preamble_with_oversized_length() {
        let mut data = PREAMBLE.to_vec();
        data.extend_from_slice(&[0xFF, 0xFF, 0x00]);
        let record_at = data.len();
        data.extend(encode_record(&header(4), &[1, 2, 3, 4]));

        let mut c = Cursor::new(&data);
        assert_eq!(
            decode_next(&mut c).unwrap(),
            Decoded::Skipped(SkipReason::Resync { bytes: 1 })
        );
        assert_eq!(
            decode_next(&mut c).unwrap(),
            Decoded::Skipped(SkipReason::Resync {
                bytes: record_at - 1
            })
        );
        assert!(matches!(decode_next(&mut c).unwrap(), Decoded::Frame(_)));
    }

    #[test]
    fn test_claims() {
        assert!(claims(&encode_record(&header(0), &[])));
        assert!(!claims(&[0xAA; 7]));
        assert!(!claims(&[0x00, 0xAA, 0xAA, 0xAA, 0xAA, 0xAA, 0xAA, 0xAA, 0xAA]));

        // Capture that starts mid-record
        let mut data = vec![0x13, 0x37, 0x42];
        data.extend(encode_record(&header(4), &[1, 2, 3, 4]));
        assert!(claims(&data));

        let mut data = vec![0x00; CLAIM_SCAN_BYTES + 1];
        data.extend(encode_record(&header(4), &[1, 2, 3, 4]));
        assert!(!claims(&data));

        let mut data = PREAMBLE.to_vec();
        data.extend_from_slice(&[0xFF, 0xFF]);
        assert!(!claims(&data));
    }
}

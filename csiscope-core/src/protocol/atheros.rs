//! Atheros CSI Tool log format
//!
//! The log starts with one byte giving the byte order of everything that
//! follows (`0xFF` big-endian, `0x00` little-endian). Each record is a
//! `u16` length followed by a 25 byte header, the CSI bytes and the
//! captured 802.11 payload.

use super::{bounded, within_record, Decoded, RawFrameRecord};
use crate::cursor::{Cursor, Endian};
use crate::error::{DecodeError, SkipReason};
use crate::frame::{Bandwidth, FrameHeader, VendorInfo};
use crate::matrix::SampleLayout;
use crate::Vendor;

// =============================================================================
// Constants
// =============================================================================

pub const MARKER_BIG_ENDIAN: u8 = 0xFF;
pub const MARKER_LITTLE_ENDIAN: u8 = 0x00;

pub const HEADER_SIZE: usize = 25;

pub const MAX_ANTENNAS: u8 = 3;
/// 56 tones at 20 MHz, 114 at 40 MHz
pub const MAX_TONES: u8 = 114;

pub const CLAIM_PRIORITY: u8 = 10;

// =============================================================================
// Header
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AtherosHeader {
    /// TSF timestamp in microseconds
    pub timestamp: u64,
    pub csi_len: u16,
    /// Channel centre frequency in MHz
    pub channel: u16,
    pub err_info: u8,
    pub noise_floor: i8,
    pub rate: u8,
    /// 0 for 20 MHz, 1 for 40 MHz
    pub bandwidth: u8,
    pub num_tones: u8,
    /// Receive antennas
    pub nr: u8,
    /// Transmit antennas
    pub nc: u8,
    pub rssi: u8,
    pub rssi_0: u8,
    pub rssi_1: u8,
    pub rssi_2: u8,
    pub payload_len: u16,
}

impl AtherosHeader {
    pub fn parse(cursor: &mut Cursor<'_>, endian: Endian) -> Result<Self, DecodeError> {
        Ok(AtherosHeader {
            timestamp: cursor.read_u64(endian)?,
            csi_len: cursor.read_u16(endian)?,
            channel: cursor.read_u16(endian)?,
            err_info: cursor.read_u8()?,
            noise_floor: cursor.read_i8()?,
            rate: cursor.read_u8()?,
            bandwidth: cursor.read_u8()?,
            num_tones: cursor.read_u8()?,
            nr: cursor.read_u8()?,
            nc: cursor.read_u8()?,
            rssi: cursor.read_u8()?,
            rssi_0: cursor.read_u8()?,
            rssi_1: cursor.read_u8()?,
            rssi_2: cursor.read_u8()?,
            payload_len: cursor.read_u16(endian)?,
        })
    }

    pub fn to_bytes(&self, endian: Endian) -> [u8; HEADER_SIZE] {
        let mut out = [0u8; HEADER_SIZE];
        match endian {
            Endian::Big => {
                out[0..8].copy_from_slice(&self.timestamp.to_be_bytes());
                out[8..10].copy_from_slice(&self.csi_len.to_be_bytes());
                out[10..12].copy_from_slice(&self.channel.to_be_bytes());
                out[23..25].copy_from_slice(&self.payload_len.to_be_bytes());
            }
            Endian::Little => {
                out[0..8].copy_from_slice(&self.timestamp.to_le_bytes());
                out[8..10].copy_from_slice(&self.csi_len.to_le_bytes());
                out[10..12].copy_from_slice(&self.channel.to_le_bytes());
                out[23..25].copy_from_slice(&self.payload_len.to_le_bytes());
            }
        }
        out[12] = self.err_info;
        out[13] = self.noise_floor as u8;
        out[14] = self.rate;
        out[15] = self.bandwidth;
        out[16] = self.num_tones;
        out[17] = self.nr;
        out[18] = self.nc;
        out[19] = self.rssi;
        out[20] = self.rssi_0;
        out[21] = self.rssi_1;
        out[22] = self.rssi_2;
        out
    }

    /// Value the record's length prefix must carry
    pub fn record_len(&self) -> usize {
        HEADER_SIZE + self.csi_len as usize + self.payload_len as usize
    }

    pub fn bandwidth(&self) -> Option<Bandwidth> {
        match self.bandwidth {
            0 => Some(Bandwidth::Bw20),
            1 => Some(Bandwidth::Bw40),
            _ => None,
        }
    }

    fn dimensions_valid(&self) -> bool {
        (1..=MAX_ANTENNAS).contains(&self.nr)
            && (1..=MAX_ANTENNAS).contains(&self.nc)
            && (1..=MAX_TONES).contains(&self.num_tones)
    }
}

// =============================================================================
// Record decoding
// =============================================================================

/// Stateless apart from the byte order fixed by the file's marker byte
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AtherosDecoder {
    endian: Endian,
}

impl AtherosDecoder {
    pub fn new(endian: Endian) -> Self {
        Self { endian }
    }

    pub fn from_marker(marker: u8) -> Option<Self> {
        match marker {
            MARKER_BIG_ENDIAN => Some(Self::new(Endian::Big)),
            MARKER_LITTLE_ENDIAN => Some(Self::new(Endian::Little)),
            _ => None,
        }
    }

    pub fn endian(&self) -> Endian {
        self.endian
    }

    pub(crate) fn decode_next<'a>(&self, cursor: &mut Cursor<'a>) -> Result<Decoded<'a>, DecodeError> {
        let offset = cursor.position();
        let endian = self.endian;
        let mut body = bounded(cursor, |c| Ok(c.read_u16(endian)? as usize))?;
        let field_len = body.remaining();

        self.decode_body(&mut body, field_len, offset)
            .map_err(within_record(Vendor::Atheros))
    }

    fn decode_body<'a>(
        &self,
        body: &mut Cursor<'a>,
        field_len: usize,
        offset: usize,
    ) -> Result<Decoded<'a>, DecodeError> {
        let header = AtherosHeader::parse(body, self.endian)?;

        if header.record_len() != field_len {
            return Err(DecodeError::matrix(
                Vendor::Atheros,
                format!(
                    "record length {} does not match header ({} + {} CSI + {} payload bytes)",
                    field_len, HEADER_SIZE, header.csi_len, header.payload_len
                ),
            ));
        }
        if header.csi_len == 0 {
            return Ok(Decoded::Skipped(SkipReason::EmptyCsi));
        }
        if !header.dimensions_valid() {
            return Err(DecodeError::InvalidDimensions {
                vendor: Vendor::Atheros,
                ntx: header.nc as usize,
                nrx: header.nr as usize,
                ntones: header.num_tones as usize,
            });
        }

        let payload = body.read_bytes(header.csi_len as usize)?;
        let nrx = header.nr as usize;
        let rssi = [header.rssi_0, header.rssi_1, header.rssi_2][..nrx]
            .iter()
            .map(|&r| r as i16)
            .collect();

        let frame = FrameHeader {
            vendor: Vendor::Atheros,
            timestamp_us: header.timestamp,
            rssi,
            noise_floor: Some(header.noise_floor as i16),
            bandwidth: header.bandwidth(),
            ntx: header.nc as usize,
            nrx,
            ntones: header.num_tones as usize,
            info: VendorInfo::Atheros {
                channel_mhz: header.channel,
                err_info: header.err_info,
                rate: header.rate,
                rssi_combined: header.rssi,
                payload_len: header.payload_len,
            },
        };

        Ok(Decoded::Frame(RawFrameRecord {
            header: frame,
            payload,
            offset,
            layout: SampleLayout::ATHEROS,
            rx_permutation: None,
        }))
    }
}

/// Encode one record: length prefix, header, CSI bytes, packet bytes
///
/// The header's `csi_len` and `payload_len` are written as given, so
/// inconsistent records can be built on purpose.
pub fn encode_record(header: &AtherosHeader, csi: &[u8], packet: &[u8], endian: Endian) -> Vec<u8> {
    let field_len = (HEADER_SIZE + csi.len() + packet.len()) as u16;
    let mut out = Vec::with_capacity(2 + field_len as usize);
    match endian {
        Endian::Big => out.extend_from_slice(&field_len.to_be_bytes()),
        Endian::Little => out.extend_from_slice(&field_len.to_le_bytes()),
    }
    out.extend_from_slice(&header.to_bytes(endian));
    out.extend_from_slice(csi);
    out.extend_from_slice(packet);
    out
}

/// Marker byte for a log written in `endian` order
pub fn marker(endian: Endian) -> u8 {
    match endian {
        Endian::Big => MARKER_BIG_ENDIAN,
        Endian::Little => MARKER_LITTLE_ENDIAN,
    }
}

// =============================================================================
// Detection
// =============================================================================

/// Whether `buf` starts with a marker byte and a fully plausible first record
pub fn claims(buf: &[u8]) -> bool {
    let Some(decoder) = buf.first().and_then(|&m| AtherosDecoder::from_marker(m)) else {
        return false;
    };
    let mut cursor = Cursor::new(&buf[1..]);
    let Ok(field_len) = cursor.read_u16(decoder.endian) else {
        return false;
    };
    let Ok(header) = AtherosHeader::parse(&mut cursor, decoder.endian) else {
        return false;
    };
    header.record_len() == field_len as usize
        && header.csi_len > 0
        && header.dimensions_valid()
        && header.bandwidth().is_some()
}

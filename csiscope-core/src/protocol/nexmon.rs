//! Nexmon CSI (patched Broadcom firmware) packet format
//!
//! The firmware sends one UDP packet per CSI measurement. The UDP payload
//! is a fixed 18 byte little-endian header followed by one 32-bit word per
//! subcarrier:
//!
//! ```text
//! magic [11 11] | rssi i8 | frame_control u8 | src_mac [6] | seq_cnt u16 |
//! core_stream u16 | chanspec u16 | chip u16 | csi[ntones * 4]
//! ```
//!
//! How the 32-bit word encodes a complex value depends on the chip.

use serde::Deserialize;

use super::{Decoded, RawFrameRecord};
use crate::error::{DecodeError, SkipReason};
use crate::frame::{Bandwidth, FrameHeader, VendorInfo};
use crate::matrix::SampleLayout;
use crate::Vendor;

// =============================================================================
// Constants
// =============================================================================

pub const MAGIC: [u8; 2] = [0x11, 0x11];

pub const HEADER_SIZE: usize = 18;

/// Bytes per subcarrier on every supported chip
pub const BYTES_PER_TONE: usize = 4;

pub const CLAIM_PRIORITY: u8 = 35;

/// Container records examined when looking for a CSI packet
pub const CLAIM_SCAN_RECORDS: usize = 16;

// =============================================================================
// Chips
// =============================================================================

/// Broadcom chips supported by nexmon_csi
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Chip {
    /// Nexus 5
    Bcm4339,
    /// Raspberry Pi 3B+ / 4
    Bcm43455c0,
    /// Nexus 6P
    Bcm4358,
    /// Asus RT-AC86U
    Bcm4366c0,
}

impl Chip {
    pub fn from_id(id: u16) -> Option<Self> {
        match id {
            0x4339 => Some(Chip::Bcm4339),
            0x4345 => Some(Chip::Bcm43455c0),
            0x4358 => Some(Chip::Bcm4358),
            0x006a => Some(Chip::Bcm4366c0),
            _ => None,
        }
    }

    /// Chip id as reported in the packet header
    pub fn id(&self) -> u16 {
        match self {
            Chip::Bcm4339 => 0x4339,
            Chip::Bcm43455c0 => 0x4345,
            Chip::Bcm4358 => 0x4358,
            Chip::Bcm4366c0 => 0x006a,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Chip::Bcm4339 => "BCM4339",
            Chip::Bcm43455c0 => "BCM43455c0",
            Chip::Bcm4358 => "BCM4358",
            Chip::Bcm4366c0 => "BCM4366c0",
        }
    }

    /// Sample encoding: int16 pairs on the older chips, packed float on the newer ones
    pub fn layout(&self) -> SampleLayout {
        match self {
            Chip::Bcm4339 | Chip::Bcm43455c0 => SampleLayout::NEXMON_INT16,
            Chip::Bcm4358 | Chip::Bcm4366c0 => SampleLayout::NEXMON_FLOAT,
        }
    }
}

impl std::fmt::Display for Chip {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<&str> for Chip {
    type Error = String;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        let lower = s.to_ascii_lowercase();
        match lower.trim_start_matches("bcm") {
            "4339" => Ok(Chip::Bcm4339),
            "43455c0" | "43455" | "4345" => Ok(Chip::Bcm43455c0),
            "4358" => Ok(Chip::Bcm4358),
            "4366c0" | "4366" => Ok(Chip::Bcm4366c0),
            _ => Err(format!("Unknown Nexmon chip: {}", s)),
        }
    }
}

// =============================================================================
// Header
// =============================================================================

/// Wire layout of the CSI packet header
#[derive(Deserialize, Debug, Copy, Clone)]
#[repr(C, packed)]
struct CsiPacketHeader {
    magic: [u8; 2],
    rssi: i8,
    frame_control: u8,
    src_mac: [u8; 6],
    seq_cnt: [u8; 2],
    core_stream: [u8; 2],
    chanspec: [u8; 2],
    chip: [u8; 2],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NexmonHeader {
    pub rssi: i8,
    pub frame_control: u8,
    pub src_mac: [u8; 6],
    pub sequence: u16,
    /// Receive core in bits 0..3, spatial stream in bits 3..6
    pub core_stream: u16,
    pub chanspec: u16,
    pub chip: u16,
}

impl NexmonHeader {
    /// Parse the header of a payload already known to start with [`MAGIC`]
    pub fn parse(data: &[u8]) -> Result<Self, DecodeError> {
        if data.len() < HEADER_SIZE {
            return Err(DecodeError::matrix(
                Vendor::Nexmon,
                format!("CSI packet of {} bytes is shorter than its header", data.len()),
            ));
        }
        let wire: CsiPacketHeader = bincode::deserialize(&data[..HEADER_SIZE])?;
        Ok(NexmonHeader {
            rssi: wire.rssi,
            frame_control: wire.frame_control,
            src_mac: wire.src_mac,
            sequence: u16::from_le_bytes(wire.seq_cnt),
            core_stream: u16::from_le_bytes(wire.core_stream),
            chanspec: u16::from_le_bytes(wire.chanspec),
            chip: u16::from_le_bytes(wire.chip),
        })
    }

    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut out = [0u8; HEADER_SIZE];
        out[0..2].copy_from_slice(&MAGIC);
        out[2] = self.rssi as u8;
        out[3] = self.frame_control;
        out[4..10].copy_from_slice(&self.src_mac);
        out[10..12].copy_from_slice(&self.sequence.to_le_bytes());
        out[12..14].copy_from_slice(&self.core_stream.to_le_bytes());
        out[14..16].copy_from_slice(&self.chanspec.to_le_bytes());
        out[16..18].copy_from_slice(&self.chip.to_le_bytes());
        out
    }

    pub fn core(&self) -> u8 {
        (self.core_stream & 0x7) as u8
    }

    pub fn spatial_stream(&self) -> u8 {
        ((self.core_stream >> 3) & 0x7) as u8
    }

    /// Bandwidth field of the chanspec, bits 11..14
    pub fn bandwidth(&self) -> Option<Bandwidth> {
        match (self.chanspec >> 11) & 0x7 {
            2 => Some(Bandwidth::Bw20),
            3 => Some(Bandwidth::Bw40),
            4 => Some(Bandwidth::Bw80),
            5 => Some(Bandwidth::Bw160),
            _ => None,
        }
    }

    /// Channel number, the low byte of the chanspec
    pub fn channel(&self) -> u8 {
        (self.chanspec & 0xFF) as u8
    }
}

/// Whether a UDP payload is a nexmon_csi packet
pub fn is_csi_packet(payload: &[u8]) -> bool {
    payload.len() >= MAGIC.len() && payload[..MAGIC.len()] == MAGIC
}

// =============================================================================
// Packet decoding
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NexmonDecoder {
    /// Chip id used instead of the one each packet reports
    chip_override: Option<u16>,
}

impl NexmonDecoder {
    pub fn new(chip_override: Option<u16>) -> Self {
        Self { chip_override }
    }

    /// Decode one UDP payload captured at `timestamp_us`
    pub fn decode_payload<'a>(
        &self,
        payload: &'a [u8],
        timestamp_us: u64,
        offset: usize,
    ) -> Result<Decoded<'a>, DecodeError> {
        if !is_csi_packet(payload) {
            return Ok(Decoded::Skipped(SkipReason::NotCsiPacket));
        }
        let header = NexmonHeader::parse(payload)?;

        let Some(bandwidth) = header.bandwidth() else {
            return Err(DecodeError::InvalidDimensions {
                vendor: Vendor::Nexmon,
                ntx: 1,
                nrx: 1,
                ntones: 0,
            });
        };

        let chip_id = self.chip_override.unwrap_or(header.chip);
        let Some(chip) = Chip::from_id(chip_id) else {
            return Ok(Decoded::Skipped(SkipReason::UnsupportedChip { chip: chip_id }));
        };

        let frame = FrameHeader {
            vendor: Vendor::Nexmon,
            timestamp_us,
            rssi: vec![header.rssi as i16],
            noise_floor: None,
            bandwidth: Some(bandwidth),
            ntx: 1,
            nrx: 1,
            ntones: bandwidth.fft_size(),
            info: VendorInfo::Nexmon {
                chip: chip_id,
                core: header.core(),
                spatial_stream: header.spatial_stream(),
                sequence: header.sequence,
                src_mac: header.src_mac,
                frame_control: header.frame_control,
                chanspec: header.chanspec,
            },
        };

        Ok(Decoded::Frame(RawFrameRecord {
            header: frame,
            payload: &payload[HEADER_SIZE..],
            offset,
            layout: chip.layout(),
            rx_permutation: None,
        }))
    }
}

/// Encode a CSI packet payload from a header and packed samples
pub fn encode_packet(header: &NexmonHeader, csi: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(HEADER_SIZE + csi.len());
    out.extend_from_slice(&header.to_bytes());
    out.extend_from_slice(csi);
    out
}

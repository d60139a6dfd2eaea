//! pcap capture container
//!
//! Container-framed vendors deliver CSI inside UDP packets, so their
//! captures are classic libpcap files. Record framing is done by
//! `pcap_file`'s slice parser; [`PcapReader`] adds the UDP dissection and
//! exposes the payload of each IPv4/UDP packet as a [`ContainerRecord`].
//!
//! Both byte orders and both timestamp resolutions (micro- and nanosecond)
//! are accepted. Supported link types are Ethernet and raw IPv4.

use std::fmt;
use std::time::Duration;

use pcap_file::pcap::{PcapPacket, PcapParser, PcapWriter};
use pcap_file::PcapError;

use crate::error::DecodeError;

pub use pcap_file::pcap::PcapHeader;
pub use pcap_file::{DataLink, Endianness, TsResolution};

// =============================================================================
// Constants
// =============================================================================

pub const GLOBAL_HEADER_SIZE: usize = 24;
pub const RECORD_HEADER_SIZE: usize = 16;

pub const LINKTYPE_ETHERNET: u32 = 1;
pub const LINKTYPE_RAW: u32 = 101;
pub const LINKTYPE_IPV4: u32 = 228;

const ETHERTYPE_IPV4: u16 = 0x0800;
const ETHERTYPE_VLAN: u16 = 0x8100;
const IPPROTO_UDP: u8 = 17;
const UDP_HEADER_SIZE: usize = 8;

/// Port nexmon_csi sends its packets to
pub const NEXMON_UDP_PORT: u16 = 5500;

/// One packet of a capture container
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContainerRecord<'a> {
    /// Position of the packet in the capture
    pub index: usize,
    /// Capture time in microseconds since the Unix epoch
    pub timestamp_us: u64,
    /// Absolute byte offset of the packet's record header
    pub offset: usize,
    /// UDP payload, empty when the packet is not IPv4/UDP
    pub payload: &'a [u8],
}

fn format_error(e: PcapError) -> DecodeError {
    DecodeError::UnknownFormat(format!("not a pcap capture ({})", e))
}

// =============================================================================
// Reader
// =============================================================================

/// Iterator over the packets of a pcap capture
///
/// Yields `Err(Truncated)` once if the last record is cut short and stops.
pub struct PcapReader<'a> {
    buf: &'a [u8],
    rest: &'a [u8],
    parser: PcapParser,
    linktype: u32,
    index: usize,
    done: bool,
}

impl<'a> PcapReader<'a> {
    pub fn new(buf: &'a [u8]) -> Result<Self, DecodeError> {
        let (rest, parser) = PcapParser::new(buf).map_err(|e| match e {
            PcapError::IncompleteBuffer => {
                DecodeError::UnknownFormat("not a pcap capture (short global header)".into())
            }
            other => format_error(other),
        })?;
        let linktype = u32::from(parser.header().datalink);
        match linktype {
            LINKTYPE_ETHERNET | LINKTYPE_RAW | LINKTYPE_IPV4 => {}
            other => {
                return Err(DecodeError::UnknownFormat(format!(
                    "unsupported pcap link type {}",
                    other
                )))
            }
        }
        Ok(Self {
            buf,
            rest,
            parser,
            linktype,
            index: 0,
            done: false,
        })
    }

    pub fn header(&self) -> PcapHeader {
        self.parser.header()
    }

    fn read_record(&mut self) -> Result<ContainerRecord<'a>, DecodeError> {
        let offset = self.buf.len() - self.rest.len();
        let (rest, packet) = self
            .parser
            .next_packet(self.rest)
            .map_err(|e| match e {
                PcapError::IncompleteBuffer => {
                    DecodeError::truncated(offset, self.record_len(), self.rest.len())
                }
                other => format_error(other),
            })?;

        // Packet data ends where the unparsed remainder starts
        let end = self.rest.len() - rest.len();
        let data = &self.rest[end - packet.data.len()..end];
        self.rest = rest;

        let record = ContainerRecord {
            index: self.index,
            timestamp_us: packet.timestamp.as_micros() as u64,
            offset,
            payload: udp_payload(data, self.linktype).unwrap_or(&[]),
        };
        self.index += 1;
        Ok(record)
    }

    /// Size of the record at the read position, as far as its header tells
    fn record_len(&self) -> usize {
        let Some(incl_len) = self.rest.get(8..12) else {
            return RECORD_HEADER_SIZE;
        };
        let incl_len = [incl_len[0], incl_len[1], incl_len[2], incl_len[3]];
        let incl_len = match self.parser.header().endianness {
            Endianness::Big => u32::from_be_bytes(incl_len),
            Endianness::Little => u32::from_le_bytes(incl_len),
        };
        RECORD_HEADER_SIZE + incl_len as usize
    }
}

impl fmt::Debug for PcapReader<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PcapReader")
            .field("offset", &(self.buf.len() - self.rest.len()))
            .field("linktype", &self.linktype)
            .field("index", &self.index)
            .field("done", &self.done)
            .finish()
    }
}

impl<'a> Iterator for PcapReader<'a> {
    type Item = Result<ContainerRecord<'a>, DecodeError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done || self.rest.is_empty() {
            return None;
        }
        let result = self.read_record();
        if result.is_err() {
            self.done = true;
        }
        Some(result)
    }
}

// =============================================================================
// Packet dissection
// =============================================================================

/// UDP payload of an IPv4/UDP packet captured with the given link type
pub fn udp_payload(frame: &[u8], linktype: u32) -> Option<&[u8]> {
    let ip = match linktype {
        LINKTYPE_ETHERNET => {
            let mut ethertype = u16::from_be_bytes([*frame.get(12)?, *frame.get(13)?]);
            let mut start = 14;
            if ethertype == ETHERTYPE_VLAN {
                ethertype = u16::from_be_bytes([*frame.get(16)?, *frame.get(17)?]);
                start = 18;
            }
            if ethertype != ETHERTYPE_IPV4 {
                return None;
            }
            frame.get(start..)?
        }
        LINKTYPE_RAW | LINKTYPE_IPV4 => frame,
        _ => return None,
    };

    let version_ihl = *ip.first()?;
    if version_ihl >> 4 != 4 {
        return None;
    }
    let ihl = (version_ihl & 0x0F) as usize * 4;
    if ihl < 20 || ip.len() < ihl || *ip.get(9)? != IPPROTO_UDP {
        return None;
    }
    let total_len = u16::from_be_bytes([*ip.get(2)?, *ip.get(3)?]) as usize;
    let ip = &ip[..total_len.clamp(ihl, ip.len())];

    let udp = ip.get(ihl..)?;
    let udp_len = u16::from_be_bytes([*udp.get(4)?, *udp.get(5)?]) as usize;
    if udp_len < UDP_HEADER_SIZE {
        return None;
    }
    udp.get(UDP_HEADER_SIZE..udp_len.min(udp.len()))
}

/// Wrap a UDP payload in Ethernet, IPv4 and UDP headers
pub fn ethernet_udp_frame(payload: &[u8], dst_port: u16) -> Vec<u8> {
    let udp_len = (UDP_HEADER_SIZE + payload.len()) as u16;
    let ip_len = 20 + udp_len;

    let mut out = Vec::with_capacity(14 + ip_len as usize);
    out.extend_from_slice(&[0xff; 6]); // dst mac
    out.extend_from_slice(&[0x4e, 0x45, 0x58, 0x4d, 0x4f, 0x4e]); // src mac
    out.extend_from_slice(&ETHERTYPE_IPV4.to_be_bytes());

    out.extend_from_slice(&[0x45, 0x00]);
    out.extend_from_slice(&ip_len.to_be_bytes());
    out.extend_from_slice(&[0, 0, 0x40, 0, 64, IPPROTO_UDP, 0, 0]);
    out.extend_from_slice(&[10, 10, 10, 10]);
    out.extend_from_slice(&[255, 255, 255, 255]);

    out.extend_from_slice(&dst_port.to_be_bytes()); // source port
    out.extend_from_slice(&dst_port.to_be_bytes());
    out.extend_from_slice(&udp_len.to_be_bytes());
    out.extend_from_slice(&[0, 0]);
    out.extend_from_slice(payload);
    out
}

/// Encode a complete capture from `(timestamp_us, frame)` pairs
pub fn encode_pcap(header: PcapHeader, packets: &[(u64, Vec<u8>)]) -> Result<Vec<u8>, PcapError> {
    let mut writer = PcapWriter::with_header(Vec::new(), header)?;
    for (timestamp_us, frame) in packets {
        let packet = PcapPacket::new(
            Duration::from_micros(*timestamp_us),
            frame.len() as u32,
            frame,
        );
        writer.write_packet(&packet)?;
    }
    Ok(writer.into_writer())
}

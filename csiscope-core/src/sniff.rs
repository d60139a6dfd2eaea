//! Capture format detection
//!
//! Every vendor module exposes a cheap `claims` check over the first bytes
//! of a capture together with a fixed priority. All claims are collected
//! and the highest priority wins, so a strong signature (an ESP32
//! preamble, a pcap magic followed by CSI packets) beats a weak one (the
//! Atheros endianness byte).

use crate::container::{ContainerRecord, PcapReader};
use crate::error::DecodeError;
use crate::protocol;
use crate::Vendor;

/// Container a capture is wrapped in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerKind {
    Pcap,
}

/// Outcome of format detection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Detection {
    pub vendor: Vendor,
    /// Byte offset at which record parsing starts
    pub offset: usize,
    pub container: Option<ContainerKind>,
    pub priority: u8,
}

impl Detection {
    /// Detection for a vendor chosen by the caller instead of sniffed
    pub fn forced(vendor: Vendor) -> Self {
        Detection {
            vendor,
            offset: protocol::record_start(vendor),
            container: vendor.is_container_framed().then_some(ContainerKind::Pcap),
            priority: u8::MAX,
        }
    }
}

/// Identify the vendor format of `buf`
pub fn sniff(buf: &[u8]) -> Result<Detection, DecodeError> {
    if buf.is_empty() {
        return Err(DecodeError::UnknownFormat("empty buffer".into()));
    }

    let mut claims: Vec<Detection> = Vec::new();

    #[cfg(feature = "esp32")]
    if protocol::esp32::claims(buf) {
        claims.push(Detection {
            vendor: Vendor::Esp32,
            offset: 0,
            container: None,
            priority: protocol::esp32::CLAIM_PRIORITY,
        });
    }

    #[cfg(feature = "nexmon")]
    if let Ok(reader) = PcapReader::new(buf) {
        let payloads = reader
            .take(protocol::nexmon::CLAIM_SCAN_RECORDS)
            .map_while(Result::ok);
        if sniff_container(payloads) == Some(Vendor::Nexmon) {
            claims.push(Detection {
                vendor: Vendor::Nexmon,
                offset: 0,
                container: Some(ContainerKind::Pcap),
                priority: protocol::nexmon::CLAIM_PRIORITY,
            });
        }
    }

    #[cfg(feature = "intel")]
    if protocol::intel::claims(buf) {
        claims.push(Detection {
            vendor: Vendor::Intel,
            offset: 0,
            container: None,
            priority: protocol::intel::CLAIM_PRIORITY,
        });
    }

    #[cfg(feature = "atheros")]
    if protocol::atheros::claims(buf) {
        claims.push(Detection {
            vendor: Vendor::Atheros,
            offset: protocol::record_start(Vendor::Atheros),
            container: None,
            priority: protocol::atheros::CLAIM_PRIORITY,
        });
    }

    if claims.len() > 1 {
        log::debug!(
            "Competing format claims: {}",
            claims
                .iter()
                .map(|c| format!("{} ({})", c.vendor, c.priority))
                .collect::<Vec<_>>()
                .join(", ")
        );
    }

    claims
        .into_iter()
        .max_by_key(|c| c.priority)
        .ok_or_else(|| {
            let head: Vec<String> = buf.iter().take(4).map(|b| format!("{:02x}", b)).collect();
            if PcapReader::new(buf).is_ok() {
                DecodeError::UnknownFormat("pcap capture without CSI packets".into())
            } else {
                DecodeError::UnknownFormat(format!("no decoder claims bytes {}", head.join(" ")))
            }
        })
}

/// Identify the vendor of container records supplied by the caller
///
/// Returns the first vendor whose packet signature appears in any record.
pub fn sniff_container<'a, I>(records: I) -> Option<Vendor>
where
    I: IntoIterator<Item = ContainerRecord<'a>>,
{
    records
        .into_iter()
        .find_map(|record| payload_vendor(record.payload))
}

#[cfg_attr(not(feature = "nexmon"), allow(unused_variables))]
fn payload_vendor(payload: &[u8]) -> Option<Vendor> {
    #[cfg(feature = "nexmon")]
    if protocol::nexmon::is_csi_packet(payload) {
        return Some(Vendor::Nexmon);
    }
    None
}

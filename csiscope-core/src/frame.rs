//! Decoded frame data structures
//!
//! These structures are vendor-neutral: every decoder fills the same
//! [`FrameHeader`], with vendor-only fields kept in [`VendorInfo`].

use serde::Serialize;

use crate::matrix::CsiMatrix;
use crate::Vendor;

/// Channel bandwidth
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Bandwidth {
    #[serde(rename = "20MHz")]
    Bw20,
    #[serde(rename = "40MHz")]
    Bw40,
    #[serde(rename = "80MHz")]
    Bw80,
    #[serde(rename = "160MHz")]
    Bw160,
}

impl Bandwidth {
    pub fn from_mhz(mhz: u16) -> Option<Self> {
        match mhz {
            20 => Some(Bandwidth::Bw20),
            40 => Some(Bandwidth::Bw40),
            80 => Some(Bandwidth::Bw80),
            160 => Some(Bandwidth::Bw160),
            _ => None,
        }
    }

    pub fn mhz(&self) -> u16 {
        match self {
            Bandwidth::Bw20 => 20,
            Bandwidth::Bw40 => 40,
            Bandwidth::Bw80 => 80,
            Bandwidth::Bw160 => 160,
        }
    }

    /// OFDM FFT size at 3.2 subcarriers per MHz
    pub fn fft_size(&self) -> usize {
        self.mhz() as usize * 16 / 5
    }
}

impl std::fmt::Display for Bandwidth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} MHz", self.mhz())
    }
}

/// Vendor-specific per-frame fields
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "vendor", rename_all = "camelCase")]
pub enum VendorInfo {
    #[serde(rename_all = "camelCase")]
    Intel {
        /// Driver-side beamforming report counter
        bfee_count: u16,
        agc: u8,
        antenna_sel: u8,
        /// Receive chain permutation decoded from `antenna_sel`
        perm: [u8; 3],
        rate_n_flags: u16,
    },
    #[serde(rename_all = "camelCase")]
    Atheros {
        channel_mhz: u16,
        err_info: u8,
        rate: u8,
        /// Combined RSSI over all chains
        rssi_combined: u8,
        /// Length of the captured 802.11 payload that followed the CSI
        payload_len: u16,
    },
    #[serde(rename_all = "camelCase")]
    Nexmon {
        chip: u16,
        core: u8,
        spatial_stream: u8,
        sequence: u16,
        src_mac: [u8; 6],
        frame_control: u8,
        chanspec: u16,
    },
    #[serde(rename_all = "camelCase")]
    Esp32 {
        src_mac: [u8; 6],
        dst_mac: [u8; 6],
        sequence: u16,
        agc_gain: u8,
        fft_gain: u8,
    },
}

/// Per-frame metadata
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FrameHeader {
    /// Which decoder produced this frame
    pub vendor: Vendor,
    /// Microseconds on the vendor's clock (or the capture container's)
    pub timestamp_us: u64,
    /// Signal strength per receive chain as reported by the hardware
    pub rssi: Vec<i16>,
    pub noise_floor: Option<i16>,
    pub bandwidth: Option<Bandwidth>,
    pub ntx: usize,
    pub nrx: usize,
    pub ntones: usize,
    pub info: VendorInfo,
}

impl FrameHeader {
    /// Matrix shape `(ntx, nrx, ntones)` declared by this header
    pub fn shape(&self) -> (usize, usize, usize) {
        (self.ntx, self.nrx, self.ntones)
    }
}

/// One decoded CSI measurement
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Frame {
    /// Sequential position within the run, in file order
    pub index: usize,
    pub header: FrameHeader,
    pub csi: CsiMatrix,
}

impl Frame {
    pub fn vendor(&self) -> Vendor {
        self.header.vendor
    }

    pub fn timestamp_us(&self) -> u64 {
        self.header.timestamp_us
    }
}

/// Format a MAC address as `aa:bb:cc:dd:ee:ff`
pub fn format_mac(mac: &[u8; 6]) -> String {
    mac.iter()
        .map(|b| format!("{:02x}", b))
        .collect::<Vec<_>>()
        .join(":")
}

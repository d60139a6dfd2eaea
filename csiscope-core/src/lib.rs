//! # csiscope Core
//!
//! Platform-independent decoding library for Wi-Fi Channel State
//! Information (CSI) captures.
//!
//! This crate contains pure parsing and reconstruction logic with **zero I/O
//! dependencies**: every entry point takes a borrowed byte buffer (or an
//! iterator of container records) and returns owned, immutable results.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │  csiscope-core (no filesystem, no threads, no globals)       │
//! │  ├── cursor     (byte and bit reads over a borrowed buffer)  │
//! │  ├── sniff      (format detection by priority claims)        │
//! │  ├── container  (pcap unwrapping)                            │
//! │  ├── protocol/  (one decoder per hardware family)            │
//! │  ├── matrix     (packed samples -> complex [tx][rx][tone])   │
//! │  ├── session    (decode loop and partial-failure report)     │
//! │  └── calibration (SNR and RSSI scaling)                      │
//! └──────────────────────────────────────────────────────────────┘
//!                              ▲
//!                 ┌────────────┴────────────┐
//!                 │  csiscope               │
//!                 │  (file loading, CLI)    │
//!                 └─────────────────────────┘
//! ```
//!
//! ## Supported Hardware
//!
//! | Family  | Capture format                         |
//! |---------|----------------------------------------|
//! | Intel   | IWL5300 CSI Tool netlink log (`.dat`)  |
//! | Atheros | Atheros CSI Tool log                   |
//! | Nexmon  | nexmon_csi UDP packets inside pcap     |
//! | ESP32   | binary serial log with `0xAA` preamble |
//!
//! ## Feature Flags
//!
//! Enable/disable support for specific hardware families:
//!
//! - `intel` - Intel IWL5300 support (default)
//! - `atheros` - Atheros support (default)
//! - `nexmon` - Broadcom nexmon_csi support (default)
//! - `esp32` - ESP32 support (default)
//!
//! ## Example: Decoding a Capture
//!
//! ```rust
//! use csiscope_core::protocol::intel::{encode_record, expected_payload_len, BfeeHeader};
//! use csiscope_core::{decode, DecodeOptions, Vendor};
//!
//! let header = BfeeHeader {
//!     nrx: 1,
//!     ntx: 2,
//!     len: expected_payload_len(2, 1) as u16,
//!     ..Default::default()
//! };
//! let buf = encode_record(&header, &vec![0; header.len as usize]);
//!
//! let data = decode(&buf, &DecodeOptions::default()).unwrap();
//! assert_eq!(data.vendor(), Vendor::Intel);
//! assert_eq!(data.frame_count(), 1);
//! assert_eq!(data.get(0).unwrap().csi.shape(), (2, 1, 30));
//! ```

#[cfg(not(any(
    feature = "intel",
    feature = "atheros",
    feature = "nexmon",
    feature = "esp32"
)))]
compile_error!("csiscope-core needs at least one of the intel, atheros, nexmon or esp32 features");

pub mod calibration;
pub mod container;
pub mod cursor;
pub mod error;
pub mod frame;
pub mod matrix;
pub mod protocol;
pub mod session;
pub mod sniff;
pub mod vendor;

#[cfg(test)]
mod test_utils;

// Re-export commonly used types
pub use cursor::{Cursor, Endian};
pub use error::{DecodeError, SessionError, SkipReason, Stage};
pub use frame::{Bandwidth, Frame, FrameHeader, VendorInfo};
pub use matrix::CsiMatrix;
pub use session::{
    decode, decode_as, decode_container, CsiData, DecodeOptions, DecodeReport, Issue, IssueKind,
    Metric, RunMetadata, Strictness,
};
pub use sniff::{sniff, Detection};
pub use vendor::Vendor;

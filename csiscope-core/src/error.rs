//! Error types for capture decoding

use std::fmt;

use serde::Serialize;
use thiserror::Error;

use crate::Vendor;

/// Errors that can occur while decoding a capture
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DecodeError {
    /// Not enough bytes (or bits) left for the current read
    #[error("Truncated at byte {offset}: needed {needed} bytes, {available} available")]
    Truncated {
        offset: usize,
        needed: usize,
        available: usize,
    },

    /// No decoder claims the stream
    #[error("Unknown capture format: {0}")]
    UnknownFormat(String),

    /// Declared antenna or tone counts are outside the vendor's bounds
    #[error("Invalid dimensions for {vendor}: ntx={ntx}, nrx={nrx}, ntones={ntones}")]
    InvalidDimensions {
        vendor: Vendor,
        ntx: usize,
        nrx: usize,
        ntones: usize,
    },

    /// Payload too short or inconsistent with the declared dimensions
    #[error("Matrix reconstruction failed for {vendor}: {reason}")]
    MatrixReconstruction { vendor: Vendor, reason: String },

    /// Bit read wider than the 64-bit accumulator
    #[error("Bit field of {0} bits exceeds 64")]
    BitWidth(u32),
}

impl DecodeError {
    pub(crate) fn truncated(offset: usize, needed: usize, available: usize) -> Self {
        DecodeError::Truncated {
            offset,
            needed,
            available,
        }
    }

    pub(crate) fn matrix(vendor: Vendor, reason: impl Into<String>) -> Self {
        DecodeError::MatrixReconstruction {
            vendor,
            reason: reason.into(),
        }
    }

    /// True for errors that only invalidate the current record
    pub fn is_record_local(&self) -> bool {
        matches!(
            self,
            DecodeError::InvalidDimensions { .. } | DecodeError::MatrixReconstruction { .. }
        )
    }
}

impl From<bincode::Error> for DecodeError {
    fn from(e: bincode::Error) -> Self {
        // The only fixed-layout structs deserialized with bincode are
        // length-checked first, so a failure here means the slice ran short.
        DecodeError::UnknownFormat(format!("fixed header deserialization failed: {}", e))
    }
}

/// Why a recognized record carried no CSI frame
///
/// Skips are not errors: the decode loop counts them and moves on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum SkipReason {
    /// Record of a known container with a non-CSI type code
    NonCsiRecord { code: u8 },
    /// Record declares zero CSI bytes
    EmptyCsi,
    /// Container payload that is not a CSI packet (e.g. other UDP traffic)
    NotCsiPacket,
    /// CSI packet from a chip whose sample encoding is unknown
    UnsupportedChip { chip: u16 },
    /// Garbage bytes scanned over to find the next record boundary
    Resync { bytes: usize },
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::NonCsiRecord { code } => write!(f, "non-CSI record (code {:#04X})", code),
            SkipReason::EmptyCsi => write!(f, "record carries no CSI"),
            SkipReason::NotCsiPacket => write!(f, "payload is not a CSI packet"),
            SkipReason::UnsupportedChip { chip } => write!(f, "unsupported chip {:#06X}", chip),
            SkipReason::Resync { bytes } => write!(f, "skipped {} bytes to resynchronise", bytes),
        }
    }
}

/// Stage of the decode pipeline at which a session failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Stage {
    Sniff,
    Container,
    Header,
    Reconstruct,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Sniff => "format detection",
            Stage::Container => "container unwrapping",
            Stage::Header => "record decoding",
            Stage::Reconstruct => "matrix reconstruction",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Fatal failure of a whole decode session
///
/// Names the decoder and stage that failed and the byte offset of the
/// record being processed, so the failure can be located without re-parsing.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{stage} failed{} at byte offset {offset}: {source}", vendor_suffix(.vendor))]
pub struct SessionError {
    pub vendor: Option<Vendor>,
    pub stage: Stage,
    pub offset: usize,
    #[source]
    pub source: DecodeError,
}

fn vendor_suffix(vendor: &Option<Vendor>) -> String {
    match vendor {
        Some(v) => format!(" for {}", v),
        None => String::new(),
    }
}

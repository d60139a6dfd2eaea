//! Vendor record decoders.
//!
//! Each vendor module knows one capture layout: how records are framed,
//! what the fixed header holds, and how to tell its files apart from the
//! others. All functions are pure and work on borrowed buffers.
//!
//! # Structure
//!
//! Each vendor module provides:
//! - **Header type** with `parse` and `to_bytes`
//! - **`claims`** - cheap check used by format detection, with a `CLAIM_PRIORITY`
//! - **Record decoding** into a [`RawFrameRecord`] or a [`SkipReason`]
//! - **`encode_record`** - builds a record from a header and payload
//!
//! [`Decoder`] is the closed set of decoders; format detection resolves it
//! once per session and every record is dispatched through it.
//!
//! # Example
//!
//! ```rust
//! use csiscope_core::protocol::Decoder;
//! use csiscope_core::{Cursor, Vendor};
//!
//! let buf: &[u8] = &[];
//! let decoder = Decoder::new(Vendor::Intel, buf, None).unwrap();
//! let mut cursor = Cursor::new(buf);
//! assert!(decoder.decode_next(&mut cursor).unwrap().is_none());
//! ```

#[cfg(feature = "intel")]
pub mod intel;

#[cfg(feature = "atheros")]
pub mod atheros;

#[cfg(feature = "nexmon")]
pub mod nexmon;

#[cfg(feature = "esp32")]
pub mod esp32;

use crate::container::ContainerRecord;
use crate::cursor::Cursor;
use crate::error::{DecodeError, SkipReason};
use crate::frame::FrameHeader;
use crate::matrix::SampleLayout;
use crate::Vendor;

/// A decoded record header plus the still-packed CSI payload
#[derive(Debug, Clone, PartialEq)]
pub struct RawFrameRecord<'a> {
    pub header: FrameHeader,
    /// Packed CSI samples, borrowed from the capture buffer
    pub payload: &'a [u8],
    /// Absolute byte offset of the record in the capture
    pub offset: usize,
    pub layout: SampleLayout,
    /// Receive chain each native rx index belongs to, if the hardware permutes them
    pub rx_permutation: Option<[usize; 3]>,
}

/// Outcome of decoding one record
#[derive(Debug, Clone, PartialEq)]
pub enum Decoded<'a> {
    Frame(RawFrameRecord<'a>),
    Skipped(SkipReason),
}

/// The closed set of vendor decoders
#[derive(Debug, Clone, PartialEq)]
pub enum Decoder {
    #[cfg(feature = "intel")]
    Intel,
    #[cfg(feature = "atheros")]
    Atheros(atheros::AtherosDecoder),
    #[cfg(feature = "nexmon")]
    Nexmon(nexmon::NexmonDecoder),
    #[cfg(feature = "esp32")]
    Esp32,
}

impl Decoder {
    /// Build the decoder for `vendor` over the capture `buf`
    ///
    /// `nexmon_chip` overrides the chip id reported by Nexmon packets.
    #[cfg_attr(
        not(all(feature = "atheros", feature = "nexmon")),
        allow(unused_variables)
    )]
    pub fn new(vendor: Vendor, buf: &[u8], nexmon_chip: Option<u16>) -> Result<Self, DecodeError> {
        match vendor {
            #[cfg(feature = "intel")]
            Vendor::Intel => Ok(Decoder::Intel),
            #[cfg(feature = "atheros")]
            Vendor::Atheros => {
                let marker = buf
                    .first()
                    .ok_or_else(|| DecodeError::UnknownFormat("empty buffer".into()))?;
                atheros::AtherosDecoder::from_marker(*marker)
                    .map(Decoder::Atheros)
                    .ok_or_else(|| {
                        DecodeError::UnknownFormat(format!(
                            "invalid Atheros endianness marker {:#04X}",
                            marker
                        ))
                    })
            }
            #[cfg(feature = "nexmon")]
            Vendor::Nexmon => Ok(Decoder::Nexmon(nexmon::NexmonDecoder::new(nexmon_chip))),
            #[cfg(feature = "esp32")]
            Vendor::Esp32 => Ok(Decoder::Esp32),
            #[allow(unreachable_patterns)]
            other => Err(DecodeError::UnknownFormat(format!(
                "support for {} is not compiled in",
                other
            ))),
        }
    }

    pub fn vendor(&self) -> Vendor {
        match self {
            #[cfg(feature = "intel")]
            Decoder::Intel => Vendor::Intel,
            #[cfg(feature = "atheros")]
            Decoder::Atheros(_) => Vendor::Atheros,
            #[cfg(feature = "nexmon")]
            Decoder::Nexmon(_) => Vendor::Nexmon,
            #[cfg(feature = "esp32")]
            Decoder::Esp32 => Vendor::Esp32,
        }
    }

    /// Byte offset of the first record, past any file preamble
    pub fn start_offset(&self) -> usize {
        record_start(self.vendor())
    }

    /// Decode the record at the cursor
    ///
    /// Returns `Ok(None)` once the stream is exhausted. On error the cursor
    /// is either unchanged (the record could not be bounded) or already past
    /// the failing record.
    pub fn decode_next<'a>(
        &self,
        cursor: &mut Cursor<'a>,
    ) -> Result<Option<Decoded<'a>>, DecodeError> {
        if cursor.remaining() == 0 {
            return Ok(None);
        }
        match self {
            #[cfg(feature = "intel")]
            Decoder::Intel => intel::decode_next(cursor).map(Some),
            #[cfg(feature = "atheros")]
            Decoder::Atheros(d) => d.decode_next(cursor).map(Some),
            #[cfg(feature = "nexmon")]
            Decoder::Nexmon(d) => {
                // Raw stream of a single CSI packet without its container
                let offset = cursor.position();
                let payload = cursor.read_bytes(cursor.remaining())?;
                d.decode_payload(payload, 0, offset).map(Some)
            }
            #[cfg(feature = "esp32")]
            Decoder::Esp32 => esp32::decode_next(cursor).map(Some),
        }
    }

    /// Decode one payload handed over by a container
    pub fn decode_payload<'a>(
        &self,
        record: &ContainerRecord<'a>,
    ) -> Result<Decoded<'a>, DecodeError> {
        match self {
            #[cfg(feature = "nexmon")]
            Decoder::Nexmon(d) => d.decode_payload(record.payload, record.timestamp_us, record.offset),
            #[allow(unreachable_patterns)]
            _ => {
                let mut cursor = Cursor::new(record.payload);
                match self.decode_next(&mut cursor)? {
                    Some(Decoded::Frame(mut raw)) => {
                        raw.offset += record.offset;
                        Ok(Decoded::Frame(raw))
                    }
                    Some(skipped) => Ok(skipped),
                    None => Ok(Decoded::Skipped(SkipReason::NotCsiPacket)),
                }
            }
        }
    }
}

/// Byte offset of the first record in a raw `vendor` capture
///
/// Atheros logs open with a one-byte endianness marker.
pub fn record_start(vendor: Vendor) -> usize {
    match vendor {
        Vendor::Atheros => 1,
        _ => 0,
    }
}

/// Bound the next record by its length prefix and step past it
///
/// Reads run on a copy of the cursor, so the caller's cursor only moves
/// once the whole record is known to be present.
pub(crate) fn bounded<'a>(
    cursor: &mut Cursor<'a>,
    read_len: impl FnOnce(&mut Cursor<'a>) -> Result<usize, DecodeError>,
) -> Result<Cursor<'a>, DecodeError> {
    let mut probe = cursor.clone();
    let len = read_len(&mut probe)?;
    let body = probe.sub_cursor(len)?;
    *cursor = probe;
    Ok(body)
}

/// Errors raised inside an already bounded record only invalidate that record
pub(crate) fn within_record(vendor: Vendor) -> impl Fn(DecodeError) -> DecodeError {
    move |e| match e {
        DecodeError::Truncated {
            offset,
            needed,
            available,
        } => DecodeError::matrix(
            vendor,
            format!(
                "record body too short at byte {}: needed {} bytes, {} available",
                offset, needed, available
            ),
        ),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bounded_leaves_cursor_on_failure() {
        let data = [0x00, 0x05, 1, 2, 3];
        let mut c = Cursor::new(&data);
        let err = bounded(&mut c, |p| Ok(p.read_u16(crate::Endian::Big)? as usize)).unwrap_err();
        assert!(matches!(err, DecodeError::Truncated { needed: 5, .. }));
        assert_eq!(c.position(), 0);

        let data = [0x00, 0x02, 1, 2, 3];
        let mut c = Cursor::new(&data);
        let mut body = bounded(&mut c, |p| Ok(p.read_u16(crate::Endian::Big)? as usize)).unwrap();
        assert_eq!(c.position(), 4);
        assert_eq!(body.read_bytes(2).unwrap(), &[1, 2]);
    }

    #[test]
    fn test_within_record_maps_truncation() {
        let map = within_record(Vendor::Intel);
        assert!(map(DecodeError::truncated(10, 4, 1)).is_record_local());
        assert_eq!(
            map(DecodeError::UnknownFormat("x".into())),
            DecodeError::UnknownFormat("x".into())
        );
    }

    #[cfg(feature = "atheros")]
    #[test]
    fn test_atheros_decoder_needs_marker() {
        assert!(Decoder::new(Vendor::Atheros, &[], None).is_err());
        assert!(Decoder::new(Vendor::Atheros, &[0x42], None).is_err());
        let d = Decoder::new(Vendor::Atheros, &[0xFF], None).unwrap();
        assert_eq!(d.vendor(), Vendor::Atheros);
        assert_eq!(d.start_offset(), 1);
    }

    #[cfg(feature = "esp32")]
    #[test]
    fn test_exhausted_stream() {
        let d = Decoder::new(Vendor::Esp32, &[], None).unwrap();
        let mut c = Cursor::new(&[]);
        assert_eq!(d.decode_next(&mut c).unwrap(), None);
        assert_eq!(d.start_offset(), 0);
    }
}

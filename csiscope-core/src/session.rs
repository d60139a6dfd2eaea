//! Decode sessions
//!
//! A session drives one decoder over a whole capture and collects the
//! frames together with a [`DecodeReport`] of everything that was skipped
//! or failed along the way. Failures are handled by kind:
//!
//! - unknown formats always end the session
//! - truncation ends the session with an error if no frame was decoded yet,
//!   otherwise it ends the loop and marks the result partial
//! - skipped records are counted
//! - bad dimensions or payloads are counted in [`Strictness::Lenient`] mode
//!   and end the session in [`Strictness::Strict`] mode

use std::fmt;

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::container::{ContainerRecord, PcapReader};
use crate::cursor::Cursor;
use crate::error::{DecodeError, SessionError, SkipReason, Stage};
use crate::frame::Frame;
use crate::matrix::reconstruct;
use crate::protocol::{Decoded, Decoder};
use crate::sniff::{sniff, ContainerKind, Detection};
use crate::Vendor;

/// Issues kept in a report; later ones are only counted
pub const MAX_ISSUES: usize = 1000;

/// How record-local decode failures are treated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Strictness {
    /// Count the failed record and continue with the next one
    #[default]
    Lenient,
    /// Fail the whole session
    Strict,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DecodeOptions {
    pub strictness: Strictness,
    /// Nexmon chip id used instead of the one in each packet
    pub nexmon_chip: Option<u16>,
    /// Name of the capture, carried into the run metadata
    pub source: Option<String>,
}

impl DecodeOptions {
    pub fn strict() -> Self {
        DecodeOptions {
            strictness: Strictness::Strict,
            ..Default::default()
        }
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum IssueKind {
    Skipped { reason: SkipReason },
    Failed { message: String },
    Truncated { message: String },
}

impl fmt::Display for IssueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IssueKind::Skipped { reason } => write!(f, "skipped: {}", reason),
            IssueKind::Failed { message } => write!(f, "failed: {}", message),
            IssueKind::Truncated { message } => write!(f, "{}", message),
        }
    }
}

/// A record that did not produce a frame
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Issue {
    /// Position of the record in the capture, counting every record seen
    pub record: usize,
    /// Byte offset of the record
    pub offset: usize,
    pub kind: IssueKind,
}

/// Accumulated outcome of a decode loop
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DecodeReport {
    pub frames: usize,
    pub skipped: usize,
    pub failed: usize,
    /// Byte offset at which the capture ended mid-record
    pub truncated_at: Option<usize>,
    pub issues: Vec<Issue>,
}

impl DecodeReport {
    /// Records examined, whether or not they produced a frame
    pub fn records(&self) -> usize {
        self.frames + self.skipped + self.failed
    }

    /// Skips, failures and the truncation marker
    pub fn skipped_count(&self) -> usize {
        self.skipped + self.failed + usize::from(self.truncated_at.is_some())
    }

    pub fn is_partial(&self) -> bool {
        self.truncated_at.is_some()
    }

    fn push_issue(&mut self, offset: usize, kind: IssueKind) {
        if self.issues.len() < MAX_ISSUES {
            let record = self.records();
            self.issues.push(Issue {
                record,
                offset,
                kind,
            });
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunMetadata {
    pub source: Option<String>,
    pub vendor: Vendor,
    /// Size of the capture, if it was decoded from a single buffer
    pub byte_len: Option<usize>,
}

/// Per-tone quantity derived by [`CsiData::tone_series`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Metric {
    /// `20 * log10(|h|)`
    AmplitudeDb,
    /// Phase of receive chain 1 minus receive chain 0, in radians
    PhaseDiff,
}

/// All frames of one capture, in file order
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CsiData {
    metadata: RunMetadata,
    frames: Vec<Frame>,
    report: DecodeReport,
}

impl CsiData {
    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    /// Records skipped or failed, plus one if the capture was truncated
    pub fn skipped_count(&self) -> usize {
        self.report.skipped_count()
    }

    /// True if the capture ended in the middle of a record
    pub fn is_partial(&self) -> bool {
        self.report.is_partial()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Frame> {
        self.frames.iter()
    }

    pub fn get(&self, index: usize) -> Option<&Frame> {
        self.frames.get(index)
    }

    pub fn frames(&self) -> &[Frame] {
        &self.frames
    }

    pub fn vendor(&self) -> Vendor {
        self.metadata.vendor
    }

    pub fn metadata(&self) -> &RunMetadata {
        &self.metadata
    }

    pub fn report(&self) -> &DecodeReport {
        &self.report
    }

    /// Seconds since the first frame
    ///
    /// The Intel timestamp is the low 32 bits of a microsecond counter, so
    /// differences are taken modulo 2^32.
    pub fn relative_timestamps(&self) -> Vec<f64> {
        let mut out = Vec::with_capacity(self.frames.len());
        let mut elapsed_us = 0.0;
        let mut previous: Option<u64> = None;
        for frame in &self.frames {
            let ts = frame.timestamp_us();
            if let Some(prev) = previous {
                elapsed_us += match self.metadata.vendor {
                    Vendor::Intel => (ts as u32).wrapping_sub(prev as u32) as f64,
                    _ => ts as f64 - prev as f64,
                };
            }
            previous = Some(ts);
            out.push(elapsed_us * 1e-6);
        }
        out
    }

    /// Series of `metric` per tone across all frames, indexed `[tone][frame]`
    ///
    /// Returns `None` if a frame lacks the antenna pair, if frames disagree
    /// on the tone count, or for [`Metric::PhaseDiff`] on single-chain runs.
    pub fn tone_series(&self, metric: Metric, tx: usize, rx: usize) -> Option<Vec<Vec<f64>>> {
        let first = self.frames.first()?;
        let ntones = first.csi.ntones();
        let mut series = vec![Vec::with_capacity(self.frames.len()); ntones];

        for frame in &self.frames {
            if frame.csi.ntones() != ntones {
                return None;
            }
            let values: Vec<f64> = match metric {
                Metric::AmplitudeDb => frame
                    .csi
                    .tones(tx, rx)?
                    .iter()
                    .map(|h| 20.0 * h.norm().log10())
                    .collect(),
                Metric::PhaseDiff => {
                    let a = frame.csi.tones(tx, 0)?;
                    let b = frame.csi.tones(tx, 1)?;
                    a.iter().zip(&b).map(|(a, b)| b.arg() - a.arg()).collect()
                }
            };
            for (tone, value) in values.into_iter().enumerate() {
                series[tone].push(value);
            }
        }
        Some(series)
    }
}

// =============================================================================
// Decode loop
// =============================================================================

enum Flow {
    Continue,
    Stop,
}

/// Frames and report of a session in progress
struct Aggregator {
    vendor: Vendor,
    strictness: Strictness,
    frames: Vec<Frame>,
    report: DecodeReport,
}

impl Aggregator {
    fn new(vendor: Vendor, options: &DecodeOptions) -> Self {
        Aggregator {
            vendor,
            strictness: options.strictness,
            frames: Vec::new(),
            report: DecodeReport::default(),
        }
    }

    fn accept(&mut self, decoded: Decoded<'_>, offset: usize) -> Result<Flow, SessionError> {
        match decoded {
            Decoded::Skipped(reason) => {
                debug!("{}: record at byte {} skipped: {}", self.vendor, offset, reason);
                self.report.push_issue(offset, IssueKind::Skipped { reason });
                self.report.skipped += 1;
                Ok(Flow::Continue)
            }
            Decoded::Frame(raw) => match reconstruct(&raw) {
                Ok(csi) => {
                    self.frames.push(Frame {
                        index: self.frames.len(),
                        header: raw.header,
                        csi,
                    });
                    self.report.frames += 1;
                    Ok(Flow::Continue)
                }
                Err(e) => self.fail(e, raw.offset, Stage::Reconstruct),
            },
        }
    }

    fn fail(&mut self, err: DecodeError, offset: usize, stage: Stage) -> Result<Flow, SessionError> {
        match err {
            DecodeError::Truncated { .. } if !self.frames.is_empty() => {
                warn!(
                    "{}: capture truncated after {} frames: {}",
                    self.vendor,
                    self.frames.len(),
                    err
                );
                self.report.push_issue(
                    offset,
                    IssueKind::Truncated {
                        message: err.to_string(),
                    },
                );
                self.report.truncated_at = Some(offset);
                Ok(Flow::Stop)
            }
            e if e.is_record_local() && self.strictness == Strictness::Lenient => {
                debug!("{}: record at byte {} failed: {}", self.vendor, offset, e);
                self.report.push_issue(
                    offset,
                    IssueKind::Failed {
                        message: e.to_string(),
                    },
                );
                self.report.failed += 1;
                Ok(Flow::Continue)
            }
            source => Err(SessionError {
                vendor: Some(self.vendor),
                stage,
                offset,
                source,
            }),
        }
    }

    fn finish(self, metadata: RunMetadata) -> CsiData {
        info!(
            "{}: decoded {} frames ({} skipped, {} failed{})",
            metadata.source.as_deref().unwrap_or(self.vendor.as_str()),
            self.report.frames,
            self.report.skipped,
            self.report.failed,
            if self.report.is_partial() {
                ", truncated"
            } else {
                ""
            }
        );
        CsiData {
            metadata,
            frames: self.frames,
            report: self.report,
        }
    }
}

/// Detect the format of `buf` and decode every record in it
pub fn decode(buf: &[u8], options: &DecodeOptions) -> Result<CsiData, SessionError> {
    let detection = sniff(buf).map_err(|source| SessionError {
        vendor: None,
        stage: Stage::Sniff,
        offset: 0,
        source,
    })?;
    debug!(
        "Detected {} capture (priority {})",
        detection.vendor, detection.priority
    );
    decode_detected(buf, detection, options)
}

/// Decode `buf` as a capture of `vendor` without format detection
pub fn decode_as(buf: &[u8], vendor: Vendor, options: &DecodeOptions) -> Result<CsiData, SessionError> {
    if buf.is_empty() {
        return Err(SessionError {
            vendor: Some(vendor),
            stage: Stage::Sniff,
            offset: 0,
            source: DecodeError::UnknownFormat("empty buffer".into()),
        });
    }
    decode_detected(buf, Detection::forced(vendor), options)
}

fn decode_detected(
    buf: &[u8],
    detection: Detection,
    options: &DecodeOptions,
) -> Result<CsiData, SessionError> {
    let vendor = detection.vendor;
    let at = |stage: Stage, offset: usize| {
        move |source: DecodeError| SessionError {
            vendor: Some(vendor),
            stage,
            offset,
            source,
        }
    };

    match detection.container {
        Some(ContainerKind::Pcap) => {
            let reader = PcapReader::new(buf).map_err(at(Stage::Container, 0))?;
            let mut data = decode_container(reader, vendor, options)?;
            data.metadata.byte_len = Some(buf.len());
            Ok(data)
        }
        None => {
            let decoder =
                Decoder::new(vendor, buf, options.nexmon_chip).map_err(at(Stage::Header, 0))?;
            let mut cursor = Cursor::at(buf, detection.offset).map_err(at(Stage::Header, 0))?;
            let mut agg = Aggregator::new(vendor, options);

            loop {
                let offset = cursor.position();
                let flow = match decoder.decode_next(&mut cursor) {
                    Ok(None) => break,
                    Ok(Some(decoded)) => agg.accept(decoded, offset)?,
                    Err(e) => agg.fail(e, offset, Stage::Header)?,
                };
                if let Flow::Stop = flow {
                    break;
                }
                // Every decoder consumes at least one byte per record
                if cursor.position() == offset {
                    warn!("{}: decoder made no progress at byte {}", vendor, offset);
                    break;
                }
            }

            Ok(agg.finish(RunMetadata {
                source: options.source.clone(),
                vendor,
                byte_len: Some(buf.len()),
            }))
        }
    }
}

/// Decode records supplied by an external container reader
///
/// Each record's payload is handed to the `vendor` decoder. Container
/// errors follow the same policy as record errors: truncation after the
/// first frame marks the result partial.
pub fn decode_container<'a, I>(
    records: I,
    vendor: Vendor,
    options: &DecodeOptions,
) -> Result<CsiData, SessionError>
where
    I: IntoIterator<Item = Result<ContainerRecord<'a>, DecodeError>>,
{
    let decoder = Decoder::new(vendor, &[], options.nexmon_chip).map_err(|source| SessionError {
        vendor: Some(vendor),
        stage: Stage::Header,
        offset: 0,
        source,
    })?;
    let mut agg = Aggregator::new(vendor, options);
    let mut last_offset = 0;

    for item in records {
        let flow = match item {
            Ok(record) => {
                last_offset = record.offset;
                match decoder.decode_payload(&record) {
                    Ok(decoded) => agg.accept(decoded, record.offset)?,
                    Err(e) => agg.fail(e, record.offset, Stage::Header)?,
                }
            }
            Err(e) => {
                let offset = match e {
                    DecodeError::Truncated { offset, .. } => offset,
                    _ => last_offset,
                };
                agg.fail(e, offset, Stage::Container)?
            }
        };
        if let Flow::Stop = flow {
            break;
        }
    }

    Ok(agg.finish(RunMetadata {
        source: options.source.clone(),
        vendor,
        byte_len: None,
    }))
}

//! CSI matrix reconstruction
//!
//! Every vendor packs its complex samples differently, but the differences
//! reduce to a handful of parameters: sample width and encoding, which
//! component comes first, which antenna index varies fastest, how many
//! padding bits precede each tone, and the order the tones are stored in.
//! [`SampleLayout`] captures those parameters and [`reconstruct`] is the one
//! bit-extraction routine that consumes them.
//!
//! The output matrix is always `[ntx][nrx][ntones]` with tones in ascending
//! frequency order, values scaled so that the vendor's native full-scale
//! sample magnitude maps to 1.0.

use ndarray::Array3;
use num_complex::Complex64;
use serde::Serialize;

use crate::cursor::Cursor;
use crate::error::DecodeError;
use crate::protocol::RawFrameRecord;

// =============================================================================
// Canonical scales
// =============================================================================

/// IWL5300: 8-bit two's complement
pub const INTEL_FULL_SCALE: f64 = 128.0;
/// AR9xxx: 10-bit two's complement
pub const ATHEROS_FULL_SCALE: f64 = 512.0;
/// BCM4339 / BCM43455c0: 16-bit two's complement
pub const NEXMON_INT16_FULL_SCALE: f64 = 32768.0;
/// BCM4358 / BCM4366c0: 12-bit mantissa, exponent kept as decoded
pub const NEXMON_FLOAT_FULL_SCALE: f64 = 4096.0;
/// ESP32: 8-bit two's complement
pub const ESP32_FULL_SCALE: f64 = 128.0;

/// How one complex sample is encoded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleEncoding {
    /// Two two's complement integers of `bits` each
    FixedPoint { bits: u32 },
    /// Shared-exponent sign/magnitude pair, LSB-first:
    /// `exp | im mantissa | im sign | re mantissa | re sign`
    PackedFloat { mantissa_bits: u32, exponent_bits: u32 },
}

/// Which component of a fixed-point sample is stored first
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComponentOrder {
    RealImag,
    ImagReal,
}

/// Which antenna index varies fastest within one tone
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AntennaOrder {
    TxFastest,
    RxFastest,
}

impl AntennaOrder {
    /// `(tx, rx)` of the `k`-th sample within a tone
    fn position(&self, k: usize, ntx: usize, nrx: usize) -> (usize, usize) {
        match self {
            AntennaOrder::TxFastest => (k % ntx, k / ntx),
            AntennaOrder::RxFastest => (k / nrx, k % nrx),
        }
    }
}

/// Storage order of tones in the payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToneOrder {
    /// Already ascending by frequency
    Ascending,
    /// FFT order over the whole width: DC first, positive then negative tones
    FftShift,
    /// FFT order repeated in consecutive blocks of the given size
    FftShiftBlocks(usize),
}

impl ToneOrder {
    /// Index in ascending frequency order of the tone stored at `native`
    pub fn canonical_index(&self, native: usize, ntones: usize) -> usize {
        let block = match *self {
            ToneOrder::Ascending => return native,
            ToneOrder::FftShift => ntones,
            ToneOrder::FftShiftBlocks(block) => block,
        };
        if block < 2 {
            return native;
        }
        let start = native - native % block;
        if start + block > ntones {
            // Trailing partial block has no defined FFT order
            return native;
        }
        start + (native - start + block / 2) % block
    }
}

/// Per-vendor sample packing parameters
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SampleLayout {
    pub encoding: SampleEncoding,
    pub components: ComponentOrder,
    pub antennas: AntennaOrder,
    /// Padding bits in front of every tone
    pub tone_prefix_bits: u32,
    pub tones: ToneOrder,
    /// Multiplier taking a native sample to the canonical unit
    pub scale: f64,
}

impl SampleLayout {
    pub const INTEL: SampleLayout = SampleLayout {
        encoding: SampleEncoding::FixedPoint { bits: 8 },
        components: ComponentOrder::RealImag,
        antennas: AntennaOrder::TxFastest,
        tone_prefix_bits: 3,
        tones: ToneOrder::Ascending,
        scale: 1.0 / INTEL_FULL_SCALE,
    };

    pub const ATHEROS: SampleLayout = SampleLayout {
        encoding: SampleEncoding::FixedPoint { bits: 10 },
        components: ComponentOrder::ImagReal,
        antennas: AntennaOrder::RxFastest,
        tone_prefix_bits: 0,
        tones: ToneOrder::Ascending,
        scale: 1.0 / ATHEROS_FULL_SCALE,
    };

    pub const NEXMON_INT16: SampleLayout = SampleLayout {
        encoding: SampleEncoding::FixedPoint { bits: 16 },
        components: ComponentOrder::RealImag,
        antennas: AntennaOrder::TxFastest,
        tone_prefix_bits: 0,
        tones: ToneOrder::FftShift,
        scale: 1.0 / NEXMON_INT16_FULL_SCALE,
    };

    pub const NEXMON_FLOAT: SampleLayout = SampleLayout {
        encoding: SampleEncoding::PackedFloat {
            mantissa_bits: 12,
            exponent_bits: 6,
        },
        components: ComponentOrder::RealImag,
        antennas: AntennaOrder::TxFastest,
        tone_prefix_bits: 0,
        tones: ToneOrder::FftShift,
        scale: 1.0 / NEXMON_FLOAT_FULL_SCALE,
    };

    pub const ESP32: SampleLayout = SampleLayout {
        encoding: SampleEncoding::FixedPoint { bits: 8 },
        components: ComponentOrder::ImagReal,
        antennas: AntennaOrder::TxFastest,
        tone_prefix_bits: 0,
        tones: ToneOrder::FftShiftBlocks(64),
        scale: 1.0 / ESP32_FULL_SCALE,
    };

    pub fn bits_per_sample(&self) -> u32 {
        match self.encoding {
            SampleEncoding::FixedPoint { bits } => 2 * bits,
            SampleEncoding::PackedFloat {
                mantissa_bits,
                exponent_bits,
            } => 2 * (mantissa_bits + 1) + exponent_bits,
        }
    }

    pub fn required_bits(&self, ntx: usize, nrx: usize, ntones: usize) -> usize {
        ntones * (self.tone_prefix_bits as usize + ntx * nrx * self.bits_per_sample() as usize)
    }

    /// Minimum payload length for the given dimensions
    pub fn required_bytes(&self, ntx: usize, nrx: usize, ntones: usize) -> usize {
        self.required_bits(ntx, nrx, ntones).div_ceil(8)
    }

    fn read_sample(&self, cursor: &mut Cursor<'_>) -> Result<Complex64, DecodeError> {
        match self.encoding {
            SampleEncoding::FixedPoint { bits } => {
                let first = cursor.read_signed_bits(bits)? as f64;
                let second = cursor.read_signed_bits(bits)? as f64;
                Ok(match self.components {
                    ComponentOrder::RealImag => Complex64::new(first, second),
                    ComponentOrder::ImagReal => Complex64::new(second, first),
                })
            }
            SampleEncoding::PackedFloat {
                mantissa_bits,
                exponent_bits,
            } => {
                let exp = cursor.read_signed_bits(exponent_bits)? as i32;
                let im = cursor.read_bits(mantissa_bits)? as f64;
                let im_negative = cursor.read_bits(1)? == 1;
                let re = cursor.read_bits(mantissa_bits)? as f64;
                let re_negative = cursor.read_bits(1)? == 1;

                let mag = 2f64.powi(exp);
                let re = if re_negative { -re } else { re };
                let im = if im_negative { -im } else { im };
                Ok(Complex64::new(re * mag, im * mag))
            }
        }
    }
}

/// Dense complex CSI matrix, indexed `[tx][rx][tone]`
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct CsiMatrix {
    data: Array3<Complex64>,
}

impl CsiMatrix {
    pub fn zeros(ntx: usize, nrx: usize, ntones: usize) -> Self {
        Self {
            data: Array3::zeros((ntx, nrx, ntones)),
        }
    }

    /// `(ntx, nrx, ntones)`
    pub fn shape(&self) -> (usize, usize, usize) {
        self.data.dim()
    }

    pub fn ntx(&self) -> usize {
        self.data.dim().0
    }

    pub fn nrx(&self) -> usize {
        self.data.dim().1
    }

    pub fn ntones(&self) -> usize {
        self.data.dim().2
    }

    pub fn get(&self, tx: usize, rx: usize, tone: usize) -> Option<Complex64> {
        self.data.get([tx, rx, tone]).copied()
    }

    /// All tones of one antenna pair, ascending by frequency
    pub fn tones(&self, tx: usize, rx: usize) -> Option<Vec<Complex64>> {
        if tx >= self.ntx() || rx >= self.nrx() {
            return None;
        }
        Some(
            self.data
                .slice(ndarray::s![tx, rx, ..])
                .iter()
                .copied()
                .collect(),
        )
    }

    pub fn as_array(&self) -> &Array3<Complex64> {
        &self.data
    }

    pub fn iter(&self) -> impl Iterator<Item = &Complex64> {
        self.data.iter()
    }

    /// Sum of squared magnitudes over every element
    pub fn power(&self) -> f64 {
        self.data.iter().map(|v| v.norm_sqr()).sum()
    }

    /// New matrix with every element multiplied by `factor`
    pub fn scaled(&self, factor: f64) -> CsiMatrix {
        CsiMatrix {
            data: self.data.mapv(|v| v * factor),
        }
    }

    pub fn is_finite(&self) -> bool {
        self.data.iter().all(|v| v.re.is_finite() && v.im.is_finite())
    }
}

impl From<Array3<Complex64>> for CsiMatrix {
    fn from(data: Array3<Complex64>) -> Self {
        CsiMatrix { data }
    }
}

impl From<CsiMatrix> for Array3<Complex64> {
    fn from(m: CsiMatrix) -> Self {
        m.data
    }
}

fn is_permutation(perm: &[usize]) -> bool {
    let mut seen = [false; 8];
    perm.iter().all(|&p| {
        if p >= perm.len() || seen[p] {
            return false;
        }
        seen[p] = true;
        true
    })
}

/// Unpack a record's payload into a canonical [`CsiMatrix`]
pub fn reconstruct(record: &RawFrameRecord<'_>) -> Result<CsiMatrix, DecodeError> {
    let header = &record.header;
    let vendor = header.vendor;
    let (ntx, nrx, ntones) = header.shape();
    if ntx == 0 || nrx == 0 || ntones == 0 {
        return Err(DecodeError::InvalidDimensions {
            vendor,
            ntx,
            nrx,
            ntones,
        });
    }

    let layout = &record.layout;
    let needed = layout.required_bytes(ntx, nrx, ntones);
    if record.payload.len() < needed {
        return Err(DecodeError::matrix(
            vendor,
            format!(
                "payload holds {} bytes, {}x{}x{} needs {}",
                record.payload.len(),
                ntx,
                nrx,
                ntones,
                needed
            ),
        ));
    }

    let short = |e: DecodeError| DecodeError::matrix(vendor, format!("payload ran short: {}", e));
    let mut cursor = Cursor::new(record.payload);
    let mut native = Array3::<Complex64>::zeros((ntx, nrx, ntones));
    for tone in 0..ntones {
        cursor
            .skip_bits(layout.tone_prefix_bits as usize)
            .map_err(short)?;
        for k in 0..ntx * nrx {
            let (tx, rx) = layout.antennas.position(k, ntx, nrx);
            let value = layout.read_sample(&mut cursor).map_err(short)? * layout.scale;
            if !value.re.is_finite() || !value.im.is_finite() {
                return Err(DecodeError::matrix(
                    vendor,
                    format!("non-finite sample at tx={} rx={} tone={}", tx, rx, tone),
                ));
            }
            native[[tx, rx, tone]] = value;
        }
    }

    let perm = record
        .rx_permutation
        .filter(|p| nrx > 1 && nrx <= p.len() && is_permutation(&p[..nrx]));

    let mut data = Array3::<Complex64>::zeros((ntx, nrx, ntones));
    for ((tx, rx, tone), value) in native.indexed_iter() {
        let rx_out = perm.map_or(rx, |p| p[rx]);
        let tone_out = layout.tones.canonical_index(tone, ntones);
        data[[tx, rx_out, tone_out]] = *value;
    }

    Ok(CsiMatrix { data })
}

//! Conversion of decoded CSI to physical units
//!
//! Intel frames carry enough metadata (per-chain RSSI, AGC gain and the
//! noise floor) to scale the CSI so that `|h|^2` is a signal to noise
//! ratio. Nexmon frames only carry one RSSI value, so their CSI is scaled
//! against it over a 256-tone reference. Other vendors are not calibrated.

use crate::frame::{Frame, FrameHeader, VendorInfo};
use crate::matrix::{CsiMatrix, INTEL_FULL_SCALE};
use crate::Vendor;

/// Noise floor assumed when the Intel firmware did not measure it (dBm)
pub const DEFAULT_NOISE_DBM: f64 = -92.0;

/// Offset between the Intel RSSI scale and dBm
const INTEL_RSSI_OFFSET_DB: f64 = 44.0;

/// Tone count the Nexmon RSSI is referred to
const NEXMON_REFERENCE_TONES: f64 = 256.0;

/// Intel approximates a factor of 3 (4.77 dB) with 4.5 dB
const THREE_STREAM_GAIN_DB: f64 = 4.5;

/// Decibels to a power ratio
pub fn dbinv(db: f64) -> f64 {
    10f64.powf(db / 10.0)
}

/// Power ratio to decibels
pub fn db(power: f64) -> f64 {
    10.0 * power.log10()
}

/// Total received signal strength in dBm from per-chain Intel RSSI values
///
/// Chains reporting zero were not active and are left out.
pub fn total_rss_dbm(rssi: &[i16], agc: u8) -> f64 {
    let magnitude: f64 = rssi
        .iter()
        .filter(|&&r| r != 0)
        .map(|&r| dbinv(r as f64))
        .sum();
    db(magnitude) - INTEL_RSSI_OFFSET_DB - agc as f64
}

/// Signal to noise ratio of an Intel frame in dB
pub fn snr_db(header: &FrameHeader) -> Option<f64> {
    match header.info {
        VendorInfo::Intel { agc, .. } => {
            let noise = header
                .noise_floor
                .map(f64::from)
                .unwrap_or(DEFAULT_NOISE_DBM);
            Some(total_rss_dbm(&header.rssi, agc) - noise)
        }
        _ => None,
    }
}

/// CSI of `frame` in physical units, if its vendor supports calibration
///
/// Returns `None` for uncalibrated vendors and for frames whose CSI has
/// no power to scale against.
pub fn scaled_csi(frame: &Frame) -> Option<CsiMatrix> {
    match frame.vendor() {
        Vendor::Intel => scaled_intel(frame),
        Vendor::Nexmon => scaled_nexmon(frame),
        _ => None,
    }
}

fn scaled_intel(frame: &Frame) -> Option<CsiMatrix> {
    let header = &frame.header;
    let VendorInfo::Intel { agc, .. } = header.info else {
        return None;
    };

    // Work on the firmware's integer scale
    let csi = frame.csi.scaled(INTEL_FULL_SCALE);
    let csi_power = csi.power();
    if csi_power <= 0.0 {
        return None;
    }

    let ntones = header.ntones as f64;
    let rssi_power = dbinv(total_rss_dbm(&header.rssi, agc));
    let scale = rssi_power / (csi_power / ntones);

    let noise_db = header
        .noise_floor
        .map(f64::from)
        .unwrap_or(DEFAULT_NOISE_DBM);
    let thermal_noise = dbinv(noise_db);
    // One LSB of error per antenna pair on each tone
    let quant_error = scale * (header.nrx * header.ntx) as f64;

    let mut factor = (scale / (thermal_noise + quant_error)).sqrt();
    match header.ntx {
        2 => factor *= 2f64.sqrt(),
        3 => factor *= dbinv(THREE_STREAM_GAIN_DB).sqrt(),
        _ => {}
    }
    Some(csi.scaled(factor))
}

fn scaled_nexmon(frame: &Frame) -> Option<CsiMatrix> {
    let rssi = *frame.header.rssi.first()?;
    let csi_power = frame.csi.power();
    if csi_power <= 0.0 {
        return None;
    }
    let rssi_power = dbinv((rssi as f64).abs());
    let scale = rssi_power / (csi_power / NEXMON_REFERENCE_TONES);
    Some(frame.csi.scaled(scale.sqrt()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::Bandwidth;
    use ndarray::Array3;
    use num_complex::Complex64;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9 * b.abs().max(1.0)
    }

    fn frame(vendor: Vendor, info: VendorInfo, rssi: Vec<i16>, csi: CsiMatrix) -> Frame {
        let (ntx, nrx, ntones) = csi.shape();
        Frame {
            index: 0,
            header: FrameHeader {
                vendor,
                timestamp_us: 0,
                rssi,
                noise_floor: None,
                bandwidth: Some(Bandwidth::Bw20),
                ntx,
                nrx,
                ntones,
                info,
            },
            csi,
        }
    }

    fn intel_info(agc: u8) -> VendorInfo {
        VendorInfo::Intel {
            bfee_count: 0,
            agc,
            antenna_sel: 0,
            perm: [0, 1, 2],
            rate_n_flags: 0,
        }
    }

    /// Matrix with every element equal to `value`
    fn filled(ntx: usize, nrx: usize, ntones: usize, value: f64) -> CsiMatrix {
        CsiMatrix::from(Array3::from_elem((ntx, nrx, ntones), Complex64::new(value, 0.0)))
    }

    #[test]
    fn test_db_helpers() {
        assert!(approx(dbinv(30.0), 1000.0));
        assert!(approx(db(1000.0), 30.0));
        assert!(approx(dbinv(-3.0), 0.501187233627272));
    }

    #[test]
    fn test_total_rss_ignores_inactive_chains() {
        let one = total_rss_dbm(&[30, 0, 0], 20);
        assert!(approx(one, 30.0 - 44.0 - 20.0));

        // Two equal chains add 3 dB
        let two = total_rss_dbm(&[30, 30, 0], 20);
        assert!(approx(two, one + db(2.0)));
    }

    #[test]
    fn test_snr() {
        let mut f = frame(Vendor::Intel, intel_info(10), vec![40, 0, 0], filled(1, 1, 30, 0.25));
        assert!(approx(snr_db(&f.header).unwrap(), 40.0 - 44.0 - 10.0 + 92.0));

        f.header.noise_floor = Some(-80);
        assert!(approx(snr_db(&f.header).unwrap(), 40.0 - 44.0 - 10.0 + 80.0));

        let esp = frame(
            Vendor::Esp32,
            VendorInfo::Esp32 {
                src_mac: [0; 6],
                dst_mac: [0; 6],
                sequence: 0,
                agc_gain: 0,
                fft_gain: 0,
            },
            vec![-40],
            filled(1, 1, 64, 0.25),
        );
        assert_eq!(snr_db(&esp.header), None);
        assert_eq!(scaled_csi(&esp), None);
    }

    #[test]
    fn test_intel_scaling() {
        let f = frame(Vendor::Intel, intel_info(10), vec![40, 0, 0], filled(1, 1, 30, 0.25));
        let scaled = scaled_csi(&f).unwrap();
        assert_eq!(scaled.shape(), (1, 1, 30));

        // Raw samples are 32; per-tone power is 1024
        let scale = dbinv(40.0 - 44.0 - 10.0) / 1024.0;
        let expected = 32.0 * (scale / (dbinv(-92.0) + scale)).sqrt();
        assert!(approx(scaled.get(0, 0, 0).unwrap().re, expected));
    }

    #[test]
    fn test_intel_ntx_correction() {
        let one = frame(Vendor::Intel, intel_info(0), vec![30, 30, 30], filled(1, 1, 30, 0.5));
        let two = frame(Vendor::Intel, intel_info(0), vec![30, 30, 30], filled(2, 1, 30, 0.5));
        let a = scaled_csi(&one).unwrap().get(0, 0, 0).unwrap().re;
        let b = scaled_csi(&two).unwrap().get(0, 0, 0).unwrap().re;

        // Doubling ntx halves the per-element scale and adds the sqrt(2) gain
        let scale1 = dbinv(total_rss_dbm(&[30, 30, 30], 0)) / (64.0 * 64.0);
        let scale2 = scale1 / 2.0;
        let noise = dbinv(-92.0);
        assert!(approx(a, 64.0 * (scale1 / (noise + scale1)).sqrt()));
        assert!(approx(b, 64.0 * (scale2 / (noise + 2.0 * scale2)).sqrt() * 2f64.sqrt()));
    }

    #[test]
    fn test_zero_power_is_not_scaled() {
        let f = frame(Vendor::Intel, intel_info(0), vec![30, 0, 0], CsiMatrix::zeros(1, 1, 30));
        assert_eq!(scaled_csi(&f), None);
    }

    #[test]
    fn test_nexmon_scaling_is_scale_invariant() {
        let info = VendorInfo::Nexmon {
            chip: 0x4345,
            core: 0,
            spatial_stream: 0,
            sequence: 0,
            src_mac: [0; 6],
            frame_control: 0,
            chanspec: 0,
        };
        let a = frame(Vendor::Nexmon, info.clone(), vec![-50], filled(1, 1, 64, 0.01));
        let b = frame(Vendor::Nexmon, info, vec![-50], filled(1, 1, 64, 0.02));
        let sa = scaled_csi(&a).unwrap();
        let sb = scaled_csi(&b).unwrap();
        assert!(approx(sa.get(0, 0, 5).unwrap().re, sb.get(0, 0, 5).unwrap().re));

        // Mean power per tone is referred to the 256-tone RSSI
        assert!(approx(sa.power(), dbinv(50.0) * 256.0));
    }
}

#![cfg(all(feature = "intel", feature = "esp32"))]

use std::fs;
use std::io::Write;
use std::path::PathBuf;

use csiscope::{decode_file, decode_files, LoadError, Settings, Strictness, Vendor};
use csiscope_core::protocol::esp32::{self, Esp32Header};
use csiscope_core::protocol::intel::{self, expected_payload_len, BfeeHeader};
use csiscope_core::{DecodeError, DecodeOptions};
use flate2::{write::GzEncoder, Compression};
use tempfile::TempDir;

fn intel_capture(frames: usize) -> Vec<u8> {
    let len = expected_payload_len(2, 1);
    (0..frames)
        .flat_map(|i| {
            let header = BfeeHeader {
                timestamp_low: i as u32 * 1000,
                nrx: 1,
                ntx: 2,
                rssi_a: 35,
                noise: -95,
                len: len as u16,
                ..Default::default()
            };
            intel::encode_record(&header, &vec![0x11; len])
        })
        .collect()
}

fn esp32_capture() -> Vec<u8> {
    let header = Esp32Header {
        timestamp_us: 1_000,
        rssi: -60,
        csi_len: 128,
        ..Default::default()
    };
    esp32::encode_record(&header, &[3; 128])
}

fn write(dir: &TempDir, name: &str, data: &[u8]) -> PathBuf {
    let path = dir.path().join(name);
    fs::write(&path, data).unwrap();
    path
}

fn gzip(data: &[u8]) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data).unwrap();
    encoder.finish().unwrap()
}

#[test]
fn test_decode_plain_file() {
    let dir = TempDir::new().unwrap();
    let path = write(&dir, "run.dat", &intel_capture(3));

    let data = decode_file(&path, None, &DecodeOptions::default()).unwrap();
    assert_eq!(data.vendor(), Vendor::Intel);
    assert_eq!(data.frame_count(), 3);
    assert_eq!(
        data.metadata().source.as_deref(),
        Some(path.display().to_string().as_str())
    );
}

#[test]
fn test_gzip_matches_plain() {
    let dir = TempDir::new().unwrap();
    let capture = intel_capture(4);
    let plain = write(&dir, "run.dat", &capture);
    let packed = write(&dir, "run.dat.gz", &gzip(&capture));

    let options = DecodeOptions::default().with_source("run");
    let a = decode_file(&plain, None, &options).unwrap();
    let b = decode_file(&packed, None, &options).unwrap();
    assert_eq!(a, b);
}

#[test]
fn test_forced_vendor() {
    let dir = TempDir::new().unwrap();
    let path = write(&dir, "esp.bin", &esp32_capture());

    let data = decode_file(&path, Some(Vendor::Esp32), &DecodeOptions::default()).unwrap();
    assert_eq!(data.frame_count(), 1);

    // Read as an Intel log the preamble is an oversized length prefix
    let err = decode_file(&path, Some(Vendor::Intel), &DecodeOptions::default()).unwrap_err();
    assert!(matches!(err, LoadError::Decode { .. }));
}

#[test]
fn test_results_keep_input_order() {
    let dir = TempDir::new().unwrap();
    let paths = vec![
        write(&dir, "a.dat", &intel_capture(1)),
        write(&dir, "b.bin", &esp32_capture()),
        dir.path().join("missing.dat"),
        write(&dir, "c.dat.gz", &gzip(&intel_capture(5))),
        write(&dir, "empty.dat", &[]),
    ];
    let settings = Settings {
        jobs: 3,
        ..Default::default()
    };

    let results = decode_files(&paths, &settings);
    assert_eq!(results.len(), paths.len());

    assert_eq!(results[0].as_ref().unwrap().frame_count(), 1);
    assert_eq!(results[1].as_ref().unwrap().vendor(), Vendor::Esp32);
    assert!(matches!(results[2], Err(LoadError::Io { .. })));
    assert_eq!(results[3].as_ref().unwrap().frame_count(), 5);
    match &results[4] {
        Err(LoadError::Decode { source, .. }) => {
            assert!(matches!(source.source, DecodeError::UnknownFormat(_)))
        }
        other => panic!("expected a decode error, got {:?}", other),
    }

    for (path, result) in paths.iter().zip(&results) {
        if let Err(e) = result {
            assert_eq!(e.path(), path.as_path());
        }
    }
}

#[test]
fn test_strict_settings_reach_every_file() {
    let dir = TempDir::new().unwrap();
    let mut capture = intel_capture(1);
    capture.extend(intel::encode_record(
        &BfeeHeader {
            nrx: 0,
            ntx: 1,
            ..Default::default()
        },
        &[],
    ));
    let paths = vec![
        write(&dir, "one.dat", &capture),
        write(&dir, "two.dat", &capture),
    ];

    let lenient = decode_files(&paths, &Settings::default());
    assert!(lenient.iter().all(|r| r.as_ref().unwrap().skipped_count() == 1));

    let strict = Settings {
        options: DecodeOptions {
            strictness: Strictness::Strict,
            ..Default::default()
        },
        ..Default::default()
    };
    let results = decode_files(&paths, &strict);
    assert!(results
        .iter()
        .all(|r| matches!(r, Err(LoadError::Decode { .. }))));
}

#[test]
fn test_no_files() {
    let paths: Vec<PathBuf> = Vec::new();
    assert!(decode_files(&paths, &Settings::default()).is_empty());
}

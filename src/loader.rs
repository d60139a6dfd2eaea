//! Reading captures from disk
//!
//! Captures are read whole into memory. Files starting with the gzip magic
//! are decompressed before decoding, so `run.dat.gz` decodes the same as
//! `run.dat`.

use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use csiscope_core::{decode, decode_as, CsiData, DecodeOptions, SessionError, Vendor};
use flate2::read::MultiGzDecoder;
use log::debug;
use thiserror::Error;

pub const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

#[derive(Error, Debug)]
pub enum LoadError {
    #[error("Failed to read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to decompress {}: {source}", .path.display())]
    Gzip {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to decode {}: {source}", .path.display())]
    Decode {
        path: PathBuf,
        #[source]
        source: SessionError,
    },

    #[error("Decoding {} did not complete", .path.display())]
    Worker { path: PathBuf },
}

impl LoadError {
    pub fn path(&self) -> &Path {
        match self {
            LoadError::Io { path, .. }
            | LoadError::Gzip { path, .. }
            | LoadError::Decode { path, .. }
            | LoadError::Worker { path } => path,
        }
    }
}

/// Whether `data` is gzip compressed
pub fn is_gzip(data: &[u8]) -> bool {
    data.starts_with(&GZIP_MAGIC)
}

/// Decompress `data` if it is gzip compressed, otherwise return it unchanged
pub fn decompress(data: Vec<u8>) -> io::Result<Vec<u8>> {
    if !is_gzip(&data) {
        return Ok(data);
    }
    let mut decoder = MultiGzDecoder::new(&data[..]);
    let mut decompressed = Vec::new();
    decoder.read_to_end(&mut decompressed)?;
    debug!(
        "Decompressed {} bytes to {} bytes",
        data.len(),
        decompressed.len()
    );
    Ok(decompressed)
}

/// Read the raw capture bytes of `path`
pub fn read_capture(path: &Path) -> Result<Vec<u8>, LoadError> {
    let data = fs::read(path).map_err(|source| LoadError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    decompress(data).map_err(|source| LoadError::Gzip {
        path: path.to_path_buf(),
        source,
    })
}

/// Read and decode one capture
///
/// The format is detected unless `vendor` is given. The path is recorded
/// as the run's source unless `options` already names one.
pub fn decode_file(
    path: &Path,
    vendor: Option<Vendor>,
    options: &DecodeOptions,
) -> Result<CsiData, LoadError> {
    let buf = read_capture(path)?;
    debug!("{}: {} bytes", path.display(), buf.len());

    let mut options = options.clone();
    if options.source.is_none() {
        options.source = Some(path.display().to_string());
    }
    let result = match vendor {
        Some(vendor) => decode_as(&buf, vendor, &options),
        None => decode(&buf, &options),
    };
    result.map_err(|source| LoadError::Decode {
        path: path.to_path_buf(),
        source,
    })
}

//! # csiscope
//!
//! Decoder for Wi-Fi Channel State Information captures.
//!
//! This crate adds file handling on top of [`csiscope_core`]:
//! - Reads captures from disk, decompressing gzip files transparently
//! - Loads defaults from a JSON config file
//! - Decodes many captures in parallel, one session per file
//!
//! ## Example: Decoding Files
//!
//! ```rust,no_run
//! use csiscope::{decode_files, Settings};
//!
//! let results = decode_files(&["run1.dat", "run2.dat.gz"], &Settings::default());
//! for result in results {
//!     match result {
//!         Ok(data) => println!("{} frames", data.frame_count()),
//!         Err(e) => eprintln!("{}", e),
//!     }
//! }
//! ```
//!
//! ## Command-Line Interface
//!
//! See [`Cli`] for all available options. Key options:
//!
//! - `-f, --format` - Decode as the given hardware family instead of detecting it
//! - `--strict` - Fail on the first malformed record
//! - `--json` - Write decoded captures as JSON lines
//! - `-v` - Increase verbosity (use multiple times)

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use clap::Parser;
use log::{debug, warn};

pub mod config;
pub mod loader;

pub use config::{Config, ConfigError, Settings};
pub use csiscope_core::{
    CsiData, DecodeOptions, Frame, SessionError, Strictness, Vendor,
};
pub use loader::{decode_file, read_capture, LoadError};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Hardware family selectable on the command line
#[derive(clap::ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum VendorArg {
    Intel,
    Atheros,
    Nexmon,
    Esp32,
}

impl From<VendorArg> for Vendor {
    fn from(arg: VendorArg) -> Self {
        match arg {
            VendorArg::Intel => Vendor::Intel,
            VendorArg::Atheros => Vendor::Atheros,
            VendorArg::Nexmon => Vendor::Nexmon,
            VendorArg::Esp32 => Vendor::Esp32,
        }
    }
}

#[derive(Parser, Clone, Debug)]
#[command(version, about)]
pub struct Cli {
    #[clap(flatten)]
    pub verbose: clap_verbosity_flag::Verbosity<clap_verbosity_flag::InfoLevel>,

    /// Capture files to decode
    #[arg(required = true)]
    pub files: Vec<PathBuf>,

    /// Decode as this hardware family instead of detecting the format
    #[arg(short, long, value_enum)]
    pub format: Option<VendorArg>,

    /// Fail on the first malformed record instead of skipping it
    #[arg(long, default_value_t = false)]
    pub strict: bool,

    /// Nexmon chip (e.g. bcm43455c0) used instead of the one in each packet
    #[arg(long)]
    pub nexmon_chip: Option<String>,

    /// Number of captures decoded in parallel
    #[arg(short, long)]
    pub jobs: Option<usize>,

    /// Config file to use instead of the default location
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Write each decoded capture as one line of JSON
    #[arg(long, default_value_t = false)]
    pub json: bool,
}

/// Decode `paths` on up to `settings.jobs` worker threads
///
/// Results are returned in the order of `paths`.
pub fn decode_files<P>(paths: &[P], settings: &Settings) -> Vec<Result<CsiData, LoadError>>
where
    P: AsRef<Path> + Sync,
{
    let workers = settings.jobs.clamp(1, paths.len().max(1));
    let next = AtomicUsize::new(0);
    let (tx, rx) = crossbeam::channel::unbounded();

    let scoped = crossbeam::scope(|s| {
        for worker in 0..workers {
            let tx = tx.clone();
            let next = &next;
            s.spawn(move |_| loop {
                let i = next.fetch_add(1, Ordering::Relaxed);
                let Some(path) = paths.get(i) else {
                    break;
                };
                debug!("worker {}: decoding {}", worker, path.as_ref().display());
                let result = decode_file(path.as_ref(), settings.vendor, &settings.options);
                if tx.send((i, result)).is_err() {
                    break;
                }
            });
        }
    });
    drop(tx);
    if scoped.is_err() {
        warn!("A decode worker panicked");
    }

    let mut results: Vec<Option<Result<CsiData, LoadError>>> = paths.iter().map(|_| None).collect();
    for (i, result) in rx.try_iter() {
        results[i] = Some(result);
    }
    results
        .into_iter()
        .zip(paths)
        .map(|(result, path)| {
            result.unwrap_or_else(|| {
                Err(LoadError::Worker {
                    path: path.as_ref().to_path_buf(),
                })
            })
        })
        .collect()
}

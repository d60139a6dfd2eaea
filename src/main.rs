use std::io::{self, Write};
use std::path::Path;

use clap::Parser;
use csiscope::{decode_files, Cli, Config, CsiData};
use csiscope_core::calibration::snr_db;
use log::error;
use miette::{IntoDiagnostic, Result};

fn main() -> Result<()> {
    let args = Cli::parse();

    env_logger::Builder::new()
        .filter_level(args.verbose.log_level_filter())
        .init();

    let config = Config::load(args.config.as_deref()).into_diagnostic()?;
    let settings = config.resolve(&args).into_diagnostic()?;
    log::debug!("Settings: {:?}", settings);

    let results = decode_files(&args.files, &settings);

    let stdout = io::stdout();
    let mut out = stdout.lock();
    let mut failures = 0;
    for (path, result) in args.files.iter().zip(results) {
        match result {
            Ok(data) if args.json => {
                serde_json::to_writer(&mut out, &data).into_diagnostic()?;
                writeln!(out).into_diagnostic()?;
            }
            Ok(data) => print_summary(&mut out, path, &data).into_diagnostic()?,
            Err(e) => {
                error!("{}", e);
                failures += 1;
            }
        }
    }

    if failures > 0 {
        miette::bail!(
            "{} of {} captures could not be decoded",
            failures,
            args.files.len()
        );
    }
    Ok(())
}

fn print_summary(out: &mut impl Write, path: &Path, data: &CsiData) -> io::Result<()> {
    let report = data.report();
    writeln!(out, "{}", path.display())?;
    writeln!(out, "  format:   {}", data.vendor())?;
    writeln!(
        out,
        "  frames:   {} ({} skipped, {} failed{})",
        data.frame_count(),
        report.skipped,
        report.failed,
        if data.is_partial() { ", truncated" } else { "" }
    )?;

    if let Some(first) = data.get(0) {
        let (ntx, nrx, ntones) = first.csi.shape();
        writeln!(out, "  shape:    {} tx x {} rx x {} tones", ntx, nrx, ntones)?;
    }
    if let Some(duration) = data.relative_timestamps().last() {
        writeln!(out, "  duration: {:.3} s", duration)?;
    }

    let snrs: Vec<f64> = data
        .iter()
        .filter_map(|frame| snr_db(&frame.header))
        .filter(|snr| snr.is_finite())
        .collect();
    if !snrs.is_empty() {
        let mean = snrs.iter().sum::<f64>() / snrs.len() as f64;
        writeln!(out, "  mean SNR: {:.1} dB", mean)?;
    }

    for issue in report.issues.iter().take(5) {
        writeln!(out, "  record {} at byte {}: {}", issue.record, issue.offset, issue.kind)?;
    }
    Ok(())
}

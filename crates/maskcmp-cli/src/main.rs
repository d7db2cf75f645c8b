// SPDX-License-Identifier: Apache-2.0
// Copyright © 2025 Au-Zone Technologies. All Rights Reserved.

use clap::{Parser, Subcommand, ValueEnum};
use maskcmp::{
    BorderMode, Comparator, ComparatorMode, ComparisonConfig, ComparisonReport, Confusion, Error,
    LabelPropagator, MatchPolicy, SweepAccumulator, load_mask, slice_files, write_mask,
};
use rayon::prelude::*;
use std::{
    fs::File,
    io::Write,
    path::{Path, PathBuf},
};

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file (TOML, JSON or YAML). Defaults to the platform
    /// configuration directory when present.
    #[clap(long, env = "MASKCMP_CONFIG")]
    config: Option<PathBuf>,

    /// MaskCmp Command
    #[command(subcommand)]
    cmd: Command,
}

/// Overrides applied on top of the loaded configuration.
#[derive(clap::Args, Debug, Clone, PartialEq, Default)]
struct Overrides {
    /// Comparator mode
    #[clap(long, value_enum)]
    mode: Option<ModeArg>,

    /// Border exclusion semantics, the mode default when omitted
    #[clap(long, value_enum)]
    border_mode: Option<BorderArg>,

    /// Histogram-route candidate selection
    #[clap(long, value_enum)]
    match_policy: Option<PolicyArg>,

    /// Objects with fewer pixels are excluded from object scoring
    #[clap(long)]
    min_size: Option<f64>,

    /// Border distance in pixels, negative disables the border filter
    #[clap(long, allow_negative_numbers = true)]
    min_dist: Option<f64>,

    /// IoU threshold of the object-level record
    #[clap(long)]
    threshold: Option<f64>,

    /// First threshold of the sweep
    #[clap(long)]
    overlap_min: Option<f64>,

    /// Last threshold of the sweep, inclusive
    #[clap(long)]
    overlap_max: Option<f64>,

    /// Step between sweep thresholds
    #[clap(long)]
    overlap_increment: Option<f64>,

    /// Skip the threshold sweep
    #[clap(long)]
    no_sweep: bool,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq)]
enum ModeArg {
    Histogram,
    Objects,
}

impl From<ModeArg> for ComparatorMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Histogram => ComparatorMode::Histogram,
            ModeArg::Objects => ComparatorMode::Objects,
        }
    }
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq)]
enum BorderArg {
    StripScan,
    CenterDistance,
}

impl From<BorderArg> for BorderMode {
    fn from(mode: BorderArg) -> Self {
        match mode {
            BorderArg::StripScan => BorderMode::StripScan,
            BorderArg::CenterDistance => BorderMode::CenterDistance,
        }
    }
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq)]
enum PolicyArg {
    LastAboveThreshold,
    ArgmaxOverlap,
}

impl From<PolicyArg> for MatchPolicy {
    fn from(policy: PolicyArg) -> Self {
        match policy {
            PolicyArg::LastAboveThreshold => MatchPolicy::LastAboveThreshold,
            PolicyArg::ArgmaxOverlap => MatchPolicy::ArgmaxOverlap,
        }
    }
}

#[derive(Subcommand, PartialEq, Clone, Debug)]
enum Command {
    /// Compare a test mask against a truth mask.  Each mask is an image file
    /// or a directory of slice images.
    ///
    /// The report is printed as a summary and optionally written to a file
    /// matching the output extension.  Currently we support `.json` (full
    /// report) and `.arrow` (metrics table) formats.
    Compare {
        /// Truth mask
        truth: PathBuf,

        /// Test mask
        test: PathBuf,

        #[command(flatten)]
        overrides: Overrides,

        /// Output File Path
        #[clap(long)]
        output: Option<PathBuf>,

        /// Write the per-object correspondence table (`.json` or `.arrow`)
        #[clap(long)]
        correspondences: Option<PathBuf>,
    },
    /// Compare every mask of the truth directory with the same-named mask of
    /// the test directory.  One JSON report is written per pair along with a
    /// `summary.json` of counts summed over all pairs.
    Batch {
        /// Truth directory
        truth_dir: PathBuf,

        /// Test directory
        test_dir: PathBuf,

        #[command(flatten)]
        overrides: Overrides,

        /// Output directory for the reports
        #[clap(long)]
        output: PathBuf,
    },
    /// Link the independently labelled slices of a stack into 3D object
    /// identities and write the relabelled slices as 16-bit PNG images.
    #[command(name = "stack-to-3d")]
    StackTo3d {
        /// Directory of slice images or a single image
        input: PathBuf,

        /// Output directory
        output: PathBuf,

        /// IoU required to carry an identity into the next slice
        #[clap(long, default_value = "0.5")]
        iou: f64,

        /// Candidate selection between slices
        #[clap(long, value_enum, default_value = "last-above-threshold")]
        match_policy: PolicyArg,
    },
    /// Print the effective configuration.
    Config {
        #[command(flatten)]
        overrides: Overrides,
    },
}

fn load_config(path: Option<&Path>, overrides: &Overrides) -> Result<ComparisonConfig, Error> {
    let mut config = ComparisonConfig::load(path)?;
    if let Some(mode) = overrides.mode {
        config.mode = mode.into();
    }
    if let Some(border_mode) = overrides.border_mode {
        config.border_mode = Some(border_mode.into());
    }
    if let Some(policy) = overrides.match_policy {
        config.match_policy = policy.into();
    }
    if let Some(min_size) = overrides.min_size {
        config.min_size = min_size;
    }
    if let Some(min_dist) = overrides.min_dist {
        config.min_dist = min_dist;
    }
    if let Some(threshold) = overrides.threshold {
        config.object_threshold = threshold;
    }
    if let Some(min) = overrides.overlap_min {
        config.overlap_min = min;
    }
    if let Some(max) = overrides.overlap_max {
        config.overlap_max = max;
    }
    if let Some(increment) = overrides.overlap_increment {
        config.overlap_increment = increment;
    }
    if overrides.no_sweep {
        config.pixel_object_method = false;
    }
    config.validate()?;
    Ok(config)
}

fn output_format(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_lowercase())
}

fn write_report(report: &ComparisonReport, output: &Path) -> Result<(), Error> {
    match output_format(output) {
        Some(ext) if ext == "json" => {
            let mut file = File::create(output)?;
            file.write_all(serde_json::to_string_pretty(report)?.as_bytes())?;
        }
        Some(ext) if ext == "arrow" => {
            #[cfg(feature = "polars")]
            {
                use polars::{io::SerWriter as _, prelude::IpcWriter};

                let mut df = maskcmp::metrics_dataframe(report)?;
                IpcWriter::new(File::create(output)?).finish(&mut df)?;
            }
            #[cfg(not(feature = "polars"))]
            {
                return Err(Error::FeatureNotEnabled("polars".to_owned()));
            }
        }
        _ => {
            return Err(Error::UnsupportedFormat(format!(
                "output {} has no .json or .arrow extension",
                output.display()
            )));
        }
    }
    Ok(())
}

fn write_correspondences(report: &ComparisonReport, output: &Path) -> Result<(), Error> {
    match output_format(output) {
        Some(ext) if ext == "json" => {
            let mut file = File::create(output)?;
            file.write_all(serde_json::to_string_pretty(&report.correspondences)?.as_bytes())?;
        }
        Some(ext) if ext == "arrow" => {
            #[cfg(feature = "polars")]
            {
                use polars::{io::SerWriter as _, prelude::IpcWriter};

                let mut df = maskcmp::correspondence_dataframe(report)?;
                IpcWriter::new(File::create(output)?).finish(&mut df)?;
            }
            #[cfg(not(feature = "polars"))]
            {
                return Err(Error::FeatureNotEnabled("polars".to_owned()));
            }
        }
        _ => {
            return Err(Error::UnsupportedFormat(format!(
                "output {} has no .json or .arrow extension",
                output.display()
            )));
        }
    }
    Ok(())
}

fn handle_compare(
    config: ComparisonConfig,
    truth: PathBuf,
    test: PathBuf,
    output: Option<PathBuf>,
    correspondences: Option<PathBuf>,
) -> Result<(), Error> {
    let truth = load_mask(&truth)?;
    let test = load_mask(&test)?;
    let report = Comparator::new(config)?.compare(&truth, &test)?;

    println!("{}", report);
    for anomaly in &report.anomalies {
        log::debug!("{}", anomaly);
    }

    if let Some(output) = output {
        write_report(&report, &output)?;
        log::info!("report written to {}", output.display());
    }
    if let Some(path) = correspondences {
        write_correspondences(&report, &path)?;
    }
    Ok(())
}

fn handle_batch(
    config: ComparisonConfig,
    truth_dir: PathBuf,
    test_dir: PathBuf,
    output: PathBuf,
) -> Result<(), Error> {
    use indicatif::{ProgressBar, ProgressStyle};

    let pairs: Vec<(String, PathBuf, PathBuf)> = slice_files(&truth_dir)?
        .into_iter()
        .filter_map(|truth| {
            let name = truth.file_name()?.to_str()?.to_owned();
            let test = test_dir.join(&name);
            if test.is_file() {
                Some((name, truth, test))
            } else {
                log::warn!("{} has no counterpart in {}", name, test_dir.display());
                None
            }
        })
        .collect();
    if pairs.is_empty() {
        return Err(Error::InvalidParameters(format!(
            "no mask in {} has a same-named mask in {}",
            truth_dir.display(),
            test_dir.display()
        )));
    }
    std::fs::create_dir_all(&output)?;

    let thresholds = if config.pixel_object_method {
        config.sweep()?.thresholds()
    } else {
        Vec::new()
    };
    let comparator = Comparator::new(config)?;

    let bar = ProgressBar::new(pairs.len() as u64);
    bar.set_style(
        ProgressStyle::with_template(
            "[{elapsed_precise} ETA: {eta}] {msg}: {wide_bar:.yellow} {human_pos}/{human_len}",
        )
        .map_err(|e| Error::InvalidParameters(e.to_string()))?
        .progress_chars("█▇▆▅▄▃▂▁  "),
    );
    bar.set_message("Comparing");

    let results: Vec<(String, Result<ComparisonReport, Error>)> = pairs
        .par_iter()
        .map(|(name, truth, test)| {
            let result = load_mask(truth)
                .and_then(|truth| Ok((truth, load_mask(test)?)))
                .and_then(|(truth, test)| comparator.compare(&truth, &test))
                .and_then(|report| {
                    let stem = Path::new(name)
                        .file_stem()
                        .and_then(|s| s.to_str())
                        .unwrap_or(name);
                    write_report(&report, &output.join(format!("{}.json", stem)))?;
                    Ok(report)
                });
            bar.inc(1);
            (name.clone(), result)
        })
        .collect();
    bar.finish_and_clear();

    let mut pixel = Confusion::default();
    let mut object = Confusion::default();
    let mut sweep = SweepAccumulator::new(thresholds);
    let mut failed = Vec::new();
    for (name, result) in &results {
        match result {
            Ok(report) => {
                if let Some(r) = &report.pixel {
                    pixel.add(&r.confusion());
                }
                if let Some(r) = &report.object {
                    object.add(&r.confusion());
                }
                sweep.add_records(&report.sweep)?;
            }
            Err(err) => {
                log::error!("{}: {}", name, err);
                failed.push(name.clone());
            }
        }
    }

    let threshold = comparator.config().object_threshold;
    let summary = serde_json::json!({
        "pairs": results.len(),
        "failed": failed,
        "pixel": pixel.record(None),
        "object": object.record(Some(threshold)),
        "sweep": sweep.records(),
    });
    let mut file = File::create(output.join("summary.json"))?;
    file.write_all(serde_json::to_string_pretty(&summary)?.as_bytes())?;

    println!(
        "Compared {} pairs ({} failed)",
        results.len() - failed.len(),
        failed.len()
    );
    println!("{}", pixel.record(None));
    println!("{}", object.record(Some(threshold)));

    if failed.is_empty() {
        Ok(())
    } else {
        Err(Error::InvalidParameters(format!(
            "{} of {} comparisons failed",
            failed.len(),
            results.len()
        )))
    }
}

fn handle_stack_to_3d(
    config: ComparisonConfig,
    input: PathBuf,
    output: PathBuf,
    iou: f64,
    policy: PolicyArg,
) -> Result<(), Error> {
    let stack = load_mask(&input)?;
    let propagation = LabelPropagator::new(iou)?
        .with_policy(policy.into())
        .with_max_matrix_cells(config.max_matrix_cells)
        .propagate(&stack)?;
    let written = write_mask(&propagation.raster, &output)?;
    println!(
        "{} identities across {} slices ({} carried over), {} files written to {}",
        propagation.max_identity,
        stack.depth(),
        propagation.carried,
        written.len(),
        output.display()
    );
    Ok(())
}

fn handle_config(config: ComparisonConfig) -> Result<(), Error> {
    if let Some(path) = ComparisonConfig::default_path() {
        println!("# default configuration file: {}", path.display());
    }
    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(())
}

fn main() -> Result<(), Error> {
    #[cfg(feature = "profiling")]
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_span_events(tracing_subscriber::fmt::format::FmtSpan::CLOSE)
        .init();
    #[cfg(not(feature = "profiling"))]
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let config_path = args.config.as_deref();

    match args.cmd {
        Command::Compare {
            truth,
            test,
            overrides,
            output,
            correspondences,
        } => {
            let config = load_config(config_path, &overrides)?;
            handle_compare(config, truth, test, output, correspondences)
        }
        Command::Batch {
            truth_dir,
            test_dir,
            overrides,
            output,
        } => {
            let config = load_config(config_path, &overrides)?;
            handle_batch(config, truth_dir, test_dir, output)
        }
        Command::StackTo3d {
            input,
            output,
            iou,
            match_policy,
        } => handle_stack_to_3d(
            load_config(config_path, &Overrides::default())?,
            input,
            output,
            iou,
            match_policy,
        ),
        Command::Config { overrides } => handle_config(load_config(config_path, &overrides)?),
    }
}

//! minflux: command-line front end for MINFLUX acquisitions.
//!
//! Decodes `.npy` exports, applies the configured filters and reports
//! per-trace statistics, automatic thresholds and FRC resolution.
#![allow(
    clippy::uninlined_format_args,
    clippy::cast_precision_loss,
    clippy::too_many_lines
)]

use clap::{Args, Parser, Subcommand, ValueEnum};
use minflux_algorithms::{
    estimate_resolution, localization_boundaries, signal::nan_median, DatasetProcessor,
    FrcConfig, RenderMode,
};
use minflux_core::{AnalysisConfig, Column};
use minflux_io::{DecodeOptions, MinfluxReader, SyntheticAcquisition};
use std::path::PathBuf;
use std::time::Instant;
use thiserror::Error;

/// Result type for CLI operations.
type Result<T> = std::result::Result<T, CliError>;

/// CLI error types.
#[derive(Error, Debug)]
enum CliError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("decode error: {0}")]
    Decode(#[from] minflux_io::Error),

    #[error("analysis error: {0}")]
    Core(#[from] minflux_core::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Column an automatic threshold is computed for.
#[derive(Debug, Clone, Copy, ValueEnum)]
enum ThresholdColumn {
    /// Emission frequency, first histogram peak
    Efo,
    /// Center-frequency ratio, median/MAD band
    Cfr,
}

/// MINFLUX localization analysis.
#[derive(Parser)]
#[command(name = "minflux")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Loading options shared by the analysis commands.
#[derive(Args)]
struct LoadArgs {
    /// Input `.npy` file
    input: PathBuf,

    /// Analysis configuration (JSON)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Minimum number of localizations per trace (overrides the config)
    #[arg(long)]
    min_locs: Option<usize>,

    /// The file holds a tracking acquisition
    #[arg(long)]
    tracking: bool,

    /// Decode the events flagged invalid instead of the valid ones
    #[arg(long)]
    invalid: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Show information about an acquisition
    Info {
        #[command(flatten)]
        load: LoadArgs,
    },

    /// Per-trace statistics of the filtered localizations
    Stats {
        #[command(flatten)]
        load: LoadArgs,

        /// Print the full statistics table as JSON
        #[arg(long)]
        json: bool,
    },

    /// Compute an automatic threshold for EFO or CFR
    Threshold {
        #[command(flatten)]
        load: LoadArgs,

        /// Column to threshold
        #[arg(long, value_enum)]
        column: ThresholdColumn,

        /// Apply the threshold and report what is left
        #[arg(long)]
        apply: bool,
    },

    /// Estimate the resolution by Fourier ring correlation
    Frc {
        #[command(flatten)]
        load: LoadArgs,

        /// Number of random half-splits to average
        #[arg(short, long, default_value = "5")]
        reps: usize,

        /// Pixel size (nm)
        #[arg(long, default_value = "1.0")]
        pixel_size: f64,

        /// Seed for the half-splits
        #[arg(long)]
        seed: Option<u64>,

        /// Render Gaussian splats instead of histograms
        #[arg(long)]
        gaussian: bool,

        /// Gaussian FWHM (nm); defaults to three pixel diagonals
        #[arg(long, requires = "gaussian")]
        fwhm: Option<f64>,

        /// Correlate per-trace mean positions instead of localizations
        #[arg(long)]
        per_trace: bool,
    },

    /// Write a synthetic acquisition
    GenerateSample {
        /// Output `.npy` file
        output: PathBuf,

        /// Write a 3D acquisition
        #[arg(long = "3d")]
        three_d: bool,

        /// Write a single-iteration (aggregated) acquisition
        #[arg(long)]
        aggregated: bool,

        /// Number of traces
        #[arg(long, default_value = "100")]
        traces: usize,

        /// Localizations per trace
        #[arg(long, default_value = "10")]
        locs_per_trace: usize,

        /// Additional events flagged invalid
        #[arg(long, default_value = "0")]
        invalid: usize,

        /// Random seed
        #[arg(long, default_value = "0")]
        seed: u64,
    },
}

impl LoadArgs {
    fn config(&self) -> Result<AnalysisConfig> {
        let mut config = match &self.config {
            Some(path) => AnalysisConfig::from_file(path)?,
            None => AnalysisConfig::default(),
        };
        if let Some(n) = self.min_locs {
            config.min_num_loc_per_trace = n;
        }
        Ok(config)
    }

    fn open(&self, config: &AnalysisConfig) -> Result<MinfluxReader> {
        let options = DecodeOptions::default()
            .with_keep_valid(!self.invalid)
            .with_tracking(self.tracking)
            .with_z_scaling_factor(config.z_scaling_factor);
        let start = Instant::now();
        let reader = MinfluxReader::open(&self.input, options)?;
        log::info!(
            "Loaded {} in {:.2}s: {}",
            self.input.display(),
            start.elapsed().as_secs_f64(),
            reader
        );
        Ok(reader)
    }

    /// Decodes the input and applies the global filter and any configured
    /// thresholds.
    fn load(&self) -> Result<(DatasetProcessor, AnalysisConfig)> {
        let config = self.config()?;
        let reader = self.open(&config)?;
        let info = *reader.info();
        let mut processor = DatasetProcessor::with_config(reader.into_processed(), info, &config)?;
        if let Some((lower, upper)) = config.efo_thresholds {
            processor.apply_range_filter(Column::Efo, lower, upper)?;
        }
        if let Some((lower, upper)) = config.cfr_thresholds {
            processor.apply_range_filter(Column::Cfr, lower, upper)?;
        }
        log::debug!(
            "{} of {} localizations pass the filters",
            processor.num_values(),
            processor.processed().len()
        );
        Ok((processor, config))
    }
}

fn init_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Commands::Info { load } => {
            let config = load.config()?;
            let reader = load.open(&config)?;
            let indices = *reader.iteration_indices();

            println!("File: {}", load.input.display());
            println!("Acquisition: {}", reader);
            println!("Iterations per event: {}", reader.info().num_iterations);
            println!(
                "Resolved iterations: efo={} cfr={} dcr={} eco={} loc={}",
                indices.efo, indices.cfr, indices.dcr, indices.eco, indices.loc
            );

            let table = reader.processed();
            println!("Decoded localizations: {}", table.len());
            if !table.is_empty() {
                let bounds = localization_boundaries(&table.x, &table.y, &table.z, 0.0, 0.0)?;
                println!("X range: {:.1} - {:.1} nm", bounds.x.0, bounds.x.1);
                println!("Y range: {:.1} - {:.1} nm", bounds.y.0, bounds.y.1);
                if reader.info().is_3d() {
                    println!("Z range: {:.1} - {:.1} nm", bounds.z.0, bounds.z.1);
                }
            }
        }

        Commands::Stats { load, json } => {
            let (processor, config) = load.load()?;
            let stats = processor.filtered_stats();

            if json {
                println!("{}", serde_json::to_string_pretty(stats)?);
                return Ok(());
            }

            println!(
                "Localizations: {} of {} (min {} per trace)",
                processor.num_values(),
                processor.processed().len(),
                config.min_num_loc_per_trace
            );
            println!("Traces: {}", stats.len());
            if !stats.is_empty() {
                let mean_n = stats.n.iter().sum::<usize>() as f64 / stats.len() as f64;
                println!("Mean localizations per trace: {:.2}", mean_n);
                let median = |values: &[f64]| nan_median(values).unwrap_or(f64::NAN);
                println!("Median trace sx: {:.2} nm", median(&stats.sx));
                println!("Median trace sy: {:.2} nm", median(&stats.sy));
                if processor.is_3d() {
                    println!("Median trace sz: {:.2} nm", median(&stats.sz));
                }
            }
        }

        Commands::Threshold {
            load,
            column,
            apply,
        } => {
            let (mut processor, config) = load.load()?;
            let (name, col, thresholds) = match column {
                ThresholdColumn::Efo => ("EFO", Column::Efo, processor.auto_efo_thresholds(&config)?),
                ThresholdColumn::Cfr => ("CFR", Column::Cfr, processor.auto_cfr_thresholds(&config)?),
            };

            let Some((lower, upper)) = thresholds else {
                println!("No {} threshold found", name);
                return Ok(());
            };
            println!("{} thresholds: {:.4} - {:.4}", name, lower, upper);

            if apply {
                let before = processor.num_values();
                processor.apply_range_filter(col, lower, upper)?;
                println!(
                    "Kept {} of {} localizations in {} traces",
                    processor.num_values(),
                    before,
                    processor.filtered_stats().len()
                );
            }
        }

        Commands::Frc {
            load,
            reps,
            pixel_size,
            seed,
            gaussian,
            fwhm,
            per_trace,
        } => {
            let (processor, _) = load.load()?;
            let (x, y) = if per_trace {
                let stats = processor.filtered_stats();
                (stats.mx.clone(), stats.my.clone())
            } else {
                let table = processor.filtered();
                (table.x.clone(), table.y.clone())
            };

            let mode = if gaussian {
                RenderMode::FixedGaussian { fwhm }
            } else {
                RenderMode::Histogram
            };
            let mut frc = FrcConfig::default()
                .with_repetitions(reps)
                .with_pixel_size(pixel_size, pixel_size)
                .with_mode(mode);
            if let Some(seed) = seed {
                frc = frc.with_seed(seed);
            }

            let start = Instant::now();
            let estimate = estimate_resolution(&x, &y, &frc)?;
            log::info!("FRC finished in {:.2}s", start.elapsed().as_secs_f64());

            println!("Points: {}", x.len());
            for (k, r) in estimate.resolutions.iter().enumerate() {
                println!("  repetition {}: {:.2} nm", k + 1, r * 1e9);
            }
            println!("FRC resolution: {:.2} nm", estimate.resolution_nm());
        }

        Commands::GenerateSample {
            output,
            three_d,
            aggregated,
            traces,
            locs_per_trace,
            invalid,
            seed,
        } => {
            let lengths = vec![locs_per_trace; traces];
            let synth = if aggregated {
                SyntheticAcquisition::aggregated(&lengths, three_d)
            } else if three_d {
                SyntheticAcquisition::localization_3d(&lengths)
            } else {
                SyntheticAcquisition::localization_2d(&lengths)
            }
            .seed(seed)
            .invalid_events(invalid);

            synth.write_to(&output)?;
            println!(
                "Wrote {} events to {}",
                synth.num_events(),
                output.display()
            );
        }
    }

    Ok(())
}

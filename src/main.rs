// Quantize a model at every configured mode and bit-width, then compare each variant
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use quantized_model_sweep::evaluate::RESULT_FILE;
use quantized_model_sweep::report::plot_sweep;
use quantized_model_sweep::{
    evaluate_directory, run_sweep, QuantizationMode, SweepConfig, SweepReport,
};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(version, about = "Sweep weight quantization modes and bit-widths over a model")]
struct Cli {
    /// Model base name; the input is `<model-dir>/<name>.<extension>`
    #[arg(long, env = "SWEEP_MODEL_NAME", default_value = "food")]
    name: String,

    #[arg(long, env = "SWEEP_MODEL_DIR", default_value = ".")]
    model_dir: PathBuf,

    #[arg(long, env = "SWEEP_OUTPUT_DIR", default_value = ".")]
    output_dir: PathBuf,

    #[arg(long, env = "SWEEP_EXTENSION", default_value = "mlmodel")]
    extension: String,

    /// Comma separated: linear, linear_lut, kmeans, linear_symmetric
    #[arg(
        long,
        env = "SWEEP_MODES",
        value_delimiter = ',',
        default_value = "linear,linear_lut,kmeans",
        value_parser = parse_mode
    )]
    modes: Vec<QuantizationMode>,

    /// Comma separated bit-widths, 1 to 8 or 16
    #[arg(
        long,
        env = "SWEEP_BITS",
        value_delimiter = ',',
        default_value = "16,8,7,6,5,4,3,2,1"
    )]
    bits: Vec<u8>,

    /// Directory of `.json` / `.f32` samples to compare on
    #[arg(long, env = "SWEEP_TESTING_DATA", default_value = "testing_data/pizza")]
    testing_data: PathBuf,

    /// Skip the comparison step
    #[arg(long)]
    no_compare: bool,

    /// Write the sweep report as JSON
    #[arg(long)]
    report: Option<PathBuf>,

    /// Summarize a saved JSON report instead of running a sweep
    #[arg(long, conflicts_with = "report")]
    from_report: Option<PathBuf>,

    /// Write per-label accuracy of the original and every variant as CSV
    #[arg(long)]
    csv: Option<PathBuf>,

    /// Score every model in the output directory against the classes under
    /// --labelled-data and write `result.csv` there
    #[arg(long)]
    evaluate: bool,

    /// One subdirectory of samples per class label
    #[arg(long, env = "SWEEP_LABELLED_DATA", default_value = "testing_data")]
    labelled_data: PathBuf,

    /// Render metric vs. bit-width to an SVG chart
    #[arg(long)]
    plot: Option<PathBuf>,

    /// -v for progress, -vv for per-layer detail
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn parse_mode(s: &str) -> std::result::Result<QuantizationMode, String> {
    s.parse().map_err(|e: quantized_model_sweep::Error| e.to_string())
}

impl From<&Cli> for SweepConfig {
    fn from(cli: &Cli) -> Self {
        SweepConfig {
            model_name: cli.name.clone(),
            model_dir: cli.model_dir.clone(),
            output_dir: cli.output_dir.clone(),
            extension: cli.extension.clone(),
            modes: cli.modes.clone(),
            bit_widths: cli.bits.clone(),
            testing_data: (!cli.no_compare).then(|| cli.testing_data.clone()),
        }
    }
}

fn init_tracing(verbose: u8) {
    let default_level = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn print_summary(report: &SweepReport) {
    println!();
    println!(
        "Original: {} ({} bytes, {} weight bytes)",
        report.model.display(),
        report.original_bytes,
        report.original_weight_bytes
    );
    println!(
        "{:<18} {:>4} {:>10} {:>10} {:>7} {:>9} {:>9}",
        "mode", "bits", "bytes", "weights", "ratio", "top1 %", "SNR dB"
    );
    for entry in &report.entries {
        let ratio = report.original_weight_bytes as f64 / entry.weight_bytes.max(1) as f64;
        let (top1, snr) = match &entry.comparison {
            Some(c) => (
                c.top1_agreement
                    .map_or_else(|| "-".to_string(), |v| format!("{v:.2}")),
                format!("{:.2}", c.snr_db.mean),
            ),
            None => ("-".to_string(), "-".to_string()),
        };
        println!(
            "{:<18} {:>4} {:>10} {:>10} {:>7.2} {:>9} {:>9}",
            entry.mode.name(),
            entry.nbits,
            entry.file_bytes,
            entry.weight_bytes,
            ratio,
            top1,
            snr
        );
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = SweepConfig::from(&cli);
    let report = match &cli.from_report {
        Some(path) => SweepReport::read_json(path)
            .with_context(|| format!("reading report from {}", path.display()))?,
        None => run_sweep(&config).with_context(|| {
            format!("quantization sweep of {} failed", config.input_path().display())
        })?,
    };

    print_summary(&report);

    if let Some(path) = &cli.report {
        report
            .write_json(path)
            .with_context(|| format!("writing report to {}", path.display()))?;
    }
    if let Some(path) = &cli.csv {
        report
            .accuracy_table()
            .write_csv(path)
            .with_context(|| format!("writing accuracy table to {}", path.display()))?;
    }
    if let Some(path) = &cli.plot {
        plot_sweep(&report, path).with_context(|| format!("plotting to {}", path.display()))?;
    }

    if cli.evaluate {
        let table = evaluate_directory(&config.output_dir, &config.extension, &cli.labelled_data)
            .with_context(|| {
                format!(
                    "evaluating {} against {}",
                    config.output_dir.display(),
                    cli.labelled_data.display()
                )
            })?;
        println!();
        print!("{table}");
        let path = config.output_dir.join(RESULT_FILE);
        table
            .write_csv(&path)
            .with_context(|| format!("writing {}", path.display()))?;
    }

    Ok(())
}

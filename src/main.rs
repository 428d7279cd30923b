//! Slice Batch Pipeline CLI
//!
//! Batch-parallel processing of per-patient medical image slices.

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use slice_batch::{discover_patients, run_pipeline, Config};

#[derive(Parser)]
#[command(name = "slice-batch")]
#[command(about = "Segment and export medical image slices in parallel batches", long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.yaml", global = true)]
    config: PathBuf,

    /// Override batch size
    #[arg(long, global = true)]
    batch_size: Option<usize>,

    /// Override worker thread count
    #[arg(long, global = true)]
    workers: Option<usize>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the pipeline (default if no command specified)
    Run,

    /// List discovered patients and slice counts without processing
    Analyze,

    /// Validate configuration
    Validate,

    /// Generate a sample configuration file
    GenerateConfig {
        /// Output path for configuration file
        #[arg(short, long, default_value = "config.yaml")]
        output: PathBuf,
    },
}

fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let cli = Cli::parse();

    match cli.command {
        None | Some(Commands::Run) => {
            run_command(cli.config, cli.batch_size, cli.workers)?;
        }

        Some(Commands::Analyze) => {
            analyze_command(cli.config)?;
        }

        Some(Commands::Validate) => {
            validate_command(cli.config)?;
        }

        Some(Commands::GenerateConfig { output }) => {
            generate_config_command(output)?;
        }
    }

    Ok(())
}

fn load_config(
    config_path: &PathBuf,
    batch_size: Option<usize>,
    workers: Option<usize>,
) -> Result<Config> {
    let mut config = Config::from_file(config_path)?;

    // Apply overrides
    if let Some(b) = batch_size {
        config.processing.batch_size = b;
    }
    if let Some(w) = workers {
        config.processing.worker_threads = Some(w);
    }

    config.validate()?;
    Ok(config)
}

fn run_command(config_path: PathBuf, batch_size: Option<usize>, workers: Option<usize>) -> Result<()> {
    let config = load_config(&config_path, batch_size, workers)?;
    run_pipeline(config)?;
    Ok(())
}

fn analyze_command(config_path: PathBuf) -> Result<()> {
    let config = load_config(&config_path, None, None)?;
    let patients = discover_patients(&config)?;

    let batch_size = config.processing.batch_size;
    let total: usize = patients.iter().map(|p| p.len()).sum();

    println!("\n=== Work Analysis ===");
    println!("Data root: {}", config.input.data_root.display());
    println!("Output root: {}", config.output.root.display());
    for patient in &patients {
        println!(
            "{}: {} slices in {} batches",
            patient.patient_id,
            patient.len(),
            patient.len().div_ceil(batch_size)
        );
    }
    println!("\nPatients: {}", patients.len());
    println!("Slices: {}", total);
    println!("Output images: {} (two per successful slice)", total * 2);
    println!("=====================\n");

    Ok(())
}

fn validate_command(config_path: PathBuf) -> Result<()> {
    let config = Config::from_file(&config_path)?;
    config.validate()?;
    println!("Configuration is valid");
    Ok(())
}

fn generate_config_command(output: PathBuf) -> Result<()> {
    // Generate a commented YAML config
    let yaml = r#"# Slice Batch Pipeline Configuration

# === INPUT: Where to find patient slices ===
input:
  # Directory holding one subdirectory per patient
  data_root: "/data/gbm"

  # Only directories starting with this prefix are treated as patients
  patient_prefix: "PGBM-"

  # Slice file extension. The bundled engine decodes png, tif, bmp and jpg;
  # DICOM (dcm) slices need a different engine.
  extension: "png"

  # false: use the first series subdirectory of each patient (sorted by name)
  # true: collect every matching file below the patient directory
  recursive: false

# === OUTPUT: Where to write rendered images ===
output:
  # Each patient is written to <root>/<patient_id>, cleared at run start
  root: "/tmp/slice-batch"

  # Extension of exported images; selects the encoder
  image_extension: "jpg"

  # Optional JSON timing summary
  # summary_path: "/tmp/slice-batch/summary.json"

# === PROCESSING: Batching and parallelism ===
processing:
  # Slices per batch; a batch fully completes before the next one starts
  batch_size: 25

  # Worker threads (null = num CPUs)
  # worker_threads: 8

  # Slices smaller than this in either dimension are rejected
  min_dimension: 100

  # Print the timing summary at the end of the run
  enable_metrics: true

# === STAGES: Image processing parameters ===
stages:
  # Map source intensities [min_intensity, max_intensity] onto [low, high]
  normalize:
    low: 0.5
    high: 2.5
    min_intensity: 0.0
    max_intensity: 10000.0

  clip:
    low: 0.68
    high: 4000.0

  # Median filter kernel (odd)
  denoise_kernel_size: 7

  sharpen:
    amount: 2.0
    radius: 0.5
    kernel_size: 9

  # Intensity band accepted by region growing
  segment_band:
    min: 0.74
    max: 0.91

  morphology_radius: 3

  # dilate | erode_then_dilate | dilate_then_erode
  morphology: dilate

# === RENDER: Exported image appearance ===
render:
  width: 512
  height: 512
  background: [0, 0, 0]
  label_color: [255, 255, 255]
  opacity: 0.6
  border_opacity: 1.0
  border_radius: 2
"#;

    std::fs::write(&output, yaml)?;
    println!("Generated sample configuration at: {}", output.display());

    Ok(())
}

//! Slice Batch Pipeline
//!
//! Batch-parallel processing of 2D medical image slices: every slice of every
//! patient is imported, preprocessed, segmented by seeded region growing,
//! cleaned up morphologically and exported as a pair of rendered images.
//!
//! # Architecture
//!
//! The pipeline consists of:
//!
//! - **Index**: Patient discovery and numeric slice ordering
//! - **Engine**: The stage and render collaborators, plus an in-process
//!   raster implementation built on `image`/`imageproc`
//! - **Pipeline**: Per-slice stage runner, fork-join batch scheduler and
//!   timing aggregation
//! - **I/O**: Filesystem helpers and the serialized export coordinator
//!
//! # Usage
//!
//! ```no_run
//! use slice_batch::{run_pipeline, Config};
//!
//! fn main() -> anyhow::Result<()> {
//!     let config = Config::from_file(&"config.yaml".into())?;
//!     let summary = run_pipeline(config)?;
//!     println!("{}", summary);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod engine;
pub mod error;
pub mod index;
pub mod io;
pub mod pipeline;

pub use config::{Config, StageParams};
pub use engine::{RasterEngine, RasterRenderer, RenderTarget, StageInvoker};
pub use error::{EngineError, ErrorRecord, JobError, SetupError, Stage};
pub use index::{PatientDirectoryWalker, PatientJobSet};
pub use io::ExportCoordinator;
pub use pipeline::{
    BatchScheduler, BatchSummary, ImagePipelineRunner, JobUnit, RunSummary, SchedulerConfig,
    TimingAggregator,
};

use anyhow::Result;
use std::sync::Arc;

use pipeline::{PatientSummary, TimingRecord};

/// Run the full pipeline with the in-process raster engine.
pub fn run_pipeline(config: Config) -> Result<RunSummary> {
    let renderer = RasterRenderer::new(&config.render);
    run_with_engine(&config, RasterEngine::new(), renderer)
}

/// Discover patients according to the input configuration.
pub fn discover_patients(config: &Config) -> Result<Vec<PatientJobSet>> {
    let walker = PatientDirectoryWalker::from_config(&config.input);
    Ok(walker.discover()?)
}

/// Run the full pipeline with the given engine and render target.
///
/// Discovery and output directory setup happen before any job is scheduled;
/// failures there are fatal. Per-slice failures only lower the success
/// counts in the returned summary.
pub fn run_with_engine<E, R>(config: &Config, engine: E, renderer: R) -> Result<RunSummary>
where
    E: StageInvoker,
    R: RenderTarget<Image = E::Image, Labels = E::Labels>,
{
    config.validate()?;

    tracing::info!("Starting slice batch pipeline");
    tracing::info!("Scanning {}", config.input.data_root.display());

    let patients = discover_patients(config)?;

    // Establish every output directory up front
    for patient in &patients {
        ExportCoordinator::<R>::prepare_destination(&patient.output_dir(&config.output.root))?;
    }

    let scheduler = BatchScheduler::new(&SchedulerConfig {
        batch_size: config.processing.batch_size,
        worker_threads: config.processing.worker_threads,
    })?;

    let runner = ImagePipelineRunner::new(
        Arc::new(engine),
        config.stages.clone(),
        config.processing.min_dimension,
    );
    let mut exporter =
        ExportCoordinator::new(renderer, &config.render, &config.output.image_extension);

    let mut overall = TimingRecord::default();
    let mut summaries = Vec::with_capacity(patients.len());

    for patient in &patients {
        tracing::info!(
            "Processing {} ({} slices)",
            patient.patient_id,
            patient.len()
        );

        let timings = TimingAggregator::new();
        let stats = scheduler.process_all(
            patient.jobs(),
            &runner,
            &mut exporter,
            &patient.output_dir(&config.output.root),
            &timings,
        );

        overall += &timings.totals();

        let summary = PatientSummary::from_aggregator(&patient.patient_id, &timings);
        tracing::info!("{} | {}", summary, stats);
        summaries.push(summary);
    }

    let run_summary = RunSummary::new(summaries, &overall);

    if config.processing.enable_metrics {
        run_summary.print_summary();
    }

    if let Some(ref path) = config.output.summary_path {
        if let Err(e) = run_summary.save_to_file(path) {
            tracing::warn!("Failed to save run summary to {}: {}", path.display(), e);
        }
    }

    tracing::info!("Pipeline complete: {}", run_summary);

    Ok(run_summary)
}

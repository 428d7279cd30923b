//! Per-slice processing pipeline.
//!
//! Stages run in a fixed order, each chained on the previous output:
//!
//! ```text
//! import ─▶ dimension guard ─▶ normalize ─▶ clip ─▶ denoise ─▶ sharpen
//!        ─▶ seed planning ─▶ region grow ─▶ cast ─▶ morphology
//! ```
//!
//! The first failure short-circuits the rest and is recorded on the job.
//! The runner never touches the export resource or any shared accumulator;
//! it hands its timing delta back to the caller.

use std::sync::Arc;
use std::time::Instant;

use crate::config::{MorphologyMode, StageParams};
use crate::engine::{ImageDims, ImportMode, PixelType, StageInvoker};
use crate::error::{EngineError, ErrorRecord, JobError, Stage};
use crate::pipeline::{seeds, JobUnit, TimingRecord};

/// Runs the stage sequence for one job at a time. Shared by all workers.
pub struct ImagePipelineRunner<E> {
    /// Image-processing engine
    engine: Arc<E>,

    /// Stage parameters
    params: StageParams,

    /// Dimension floor enforced before segmentation
    min_dimension: u32,
}

impl<E: StageInvoker> ImagePipelineRunner<E> {
    /// Create a new runner.
    pub fn new(engine: Arc<E>, params: StageParams, min_dimension: u32) -> Self {
        Self {
            engine,
            params,
            min_dimension,
        }
    }

    pub fn engine(&self) -> &Arc<E> {
        &self.engine
    }

    /// Process a single job in place and return its timing delta.
    ///
    /// Never fails: any stage error is recorded as `job.failure`.
    pub fn run(&self, job: &mut JobUnit<E::Image, E::Labels>) -> TimingRecord {
        let mut timing = TimingRecord::for_job();

        match self.run_stages(job, &mut timing) {
            Ok(()) => {
                timing.successful_images = 1;
                tracing::debug!("Processed {}", job.source_path.display());
            }
            Err((stage, error)) => {
                let record = ErrorRecord::new(stage, error, &job.source_path);
                tracing::warn!("Error processing {}", record);
                job.original = None;
                job.processed = None;
                job.failure = Some(record);
            }
        }

        timing
    }

    fn run_stages(
        &self,
        job: &mut JobUnit<E::Image, E::Labels>,
        timing: &mut TimingRecord,
    ) -> Result<(), (Stage, JobError)> {
        let engine = self.engine.as_ref();
        let params = &self.params;

        // Import: always a single 2D slice, never the whole series
        let start = Instant::now();
        let imported = engine
            .import(&job.source_path, ImportMode::SingleSlice)
            .map_err(|e| (Stage::Import, JobError::ImportFailure(e.to_string())))?;
        timing.add_stage(Stage::Import, start.elapsed());

        let (width, height) = (imported.width(), imported.height());
        if width < self.min_dimension || height < self.min_dimension {
            return Err((
                Stage::Import,
                JobError::DimensionTooSmall {
                    width,
                    height,
                    minimum: self.min_dimension,
                },
            ));
        }
        let original = job.original.insert(imported);

        // Preprocess
        let start = Instant::now();
        let preprocessed = engine
            .normalize(original, &params.normalize)
            .and_then(|img| engine.clip(&img, &params.clip))
            .and_then(|img| engine.denoise(&img, params.denoise_kernel_size))
            .and_then(|img| engine.sharpen(&img, &params.sharpen))
            .map_err(stage_failure(Stage::Preprocess))?;
        timing.add_stage(Stage::Preprocess, start.elapsed());

        // Segment
        let start = Instant::now();
        let seed_set = seeds::plan(width, height);
        tracing::debug!(
            "Planned {} seeds for {}x{} slice {}",
            seed_set.len(),
            width,
            height,
            job.source_path.display()
        );
        let segmented = engine
            .region_grow(&preprocessed, &params.segment_band, &seed_set)
            .map_err(stage_failure(Stage::Segment))?;
        drop(preprocessed);
        timing.add_stage(Stage::Segment, start.elapsed());

        // Postprocess
        let start = Instant::now();
        let radius = params.morphology_radius;
        let cleaned = engine
            .cast(&segmented, PixelType::U8)
            .and_then(|labels| match params.morphology {
                MorphologyMode::Dilate => engine.dilate(&labels, radius),
                MorphologyMode::ErodeThenDilate => engine
                    .erode(&labels, radius)
                    .and_then(|eroded| engine.dilate(&eroded, radius)),
                MorphologyMode::DilateThenErode => engine
                    .dilate(&labels, radius)
                    .and_then(|dilated| engine.erode(&dilated, radius)),
            })
            .map_err(stage_failure(Stage::Postprocess))?;
        timing.add_stage(Stage::Postprocess, start.elapsed());

        job.processed = Some(cleaned);
        Ok(())
    }
}

fn stage_failure(stage: Stage) -> impl Fn(EngineError) -> (Stage, JobError) {
    move |e| {
        (
            stage,
            JobError::StageFailure {
                stage,
                message: e.to_string(),
            },
        )
    }
}

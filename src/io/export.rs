//! Batch export through the shared render target.
//!
//! The render target holds "current renderer" state and is not safe for
//! concurrent use. The coordinator owns it outright and every export method
//! takes `&mut self`, so only the single-threaded export phase (after a batch
//! has fully joined) can reach it.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use crate::config::RenderConfig;
use crate::engine::{LabelStyle, RenderTarget};
use crate::error::{JobError, SetupError};
use crate::io::fs;
use crate::pipeline::JobUnit;

/// Suffix of the plain render of the imported slice.
pub const ORIGINAL_SUFFIX: &str = "_original";

/// Suffix of the label-aware render of the processed slice.
pub const PROCESSED_SUFFIX: &str = "_processed";

/// Outcome of exporting one batch.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ExportReport {
    /// Jobs whose two images were written
    pub exported: usize,

    /// Jobs skipped because they failed or lack an artifact
    pub skipped: usize,

    /// Jobs whose export failed
    pub failed: usize,

    /// Time spent exporting
    pub elapsed: Duration,
}

/// Serializes export of completed batches.
pub struct ExportCoordinator<R> {
    renderer: R,
    style: LabelStyle,
    extension: String,
}

impl<R: RenderTarget> ExportCoordinator<R> {
    /// Create a coordinator that owns `renderer`.
    pub fn new(renderer: R, render: &RenderConfig, extension: &str) -> Self {
        Self {
            renderer,
            style: LabelStyle {
                label: 1,
                color: render.label_color,
                opacity: render.opacity,
                border_opacity: render.border_opacity,
                border_radius: render.border_radius,
            },
            extension: extension.trim_start_matches('.').to_string(),
        }
    }

    pub fn renderer(&self) -> &R {
        &self.renderer
    }

    /// Create `dir` if needed and remove anything a previous run left in it.
    pub fn prepare_destination(dir: &Path) -> Result<(), SetupError> {
        let setup = |source| SetupError::DirectorySetupFailure {
            path: dir.to_path_buf(),
            source,
        };
        fs::ensure_dir(dir).map_err(setup)?;
        fs::clear_dir(dir).map_err(setup)?;
        tracing::info!("Prepared output directory: {}", dir.display());
        Ok(())
    }

    /// Output paths for a source slice: `(original, processed)`.
    pub fn output_paths(&self, source: &Path, destination: &Path) -> (PathBuf, PathBuf) {
        let stem = source
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "slice".to_string());
        (
            destination.join(format!("{}{}.{}", stem, ORIGINAL_SUFFIX, self.extension)),
            destination.join(format!("{}{}.{}", stem, PROCESSED_SUFFIX, self.extension)),
        )
    }

    /// Export every successful job in `results` to `destination`.
    ///
    /// Consumes the batch: artifacts are released when this returns. A failed
    /// export is logged and does not stop the remaining jobs.
    pub fn export_batch(
        &mut self,
        results: Vec<JobUnit<R::Image, R::Labels>>,
        destination: &Path,
    ) -> ExportReport {
        let start = Instant::now();
        let mut report = ExportReport::default();

        for job in results {
            let (Some(original), Some(processed), None) =
                (&job.original, &job.processed, &job.failure)
            else {
                report.skipped += 1;
                continue;
            };

            match self.export_one(&job.source_path, original, processed, destination) {
                Ok(()) => report.exported += 1,
                Err(e) => {
                    tracing::warn!("Export failed for {}: {}", job.source_path.display(), e);
                    report.failed += 1;
                }
            }
        }

        self.renderer.reset();
        report.elapsed = start.elapsed();
        report
    }

    fn export_one(
        &mut self,
        source: &Path,
        original: &R::Image,
        processed: &R::Labels,
        destination: &Path,
    ) -> Result<(), JobError> {
        let (original_path, processed_path) = self.output_paths(source, destination);
        let export_failure = |e: crate::error::EngineError| JobError::ExportFailure(e.to_string());

        // Render both before writing either
        self.renderer.reset();
        let plain = self.renderer.render_plain(original).map_err(export_failure)?;
        self.renderer.reset();
        let labeled = self
            .renderer
            .render_labeled(processed, &self.style)
            .map_err(export_failure)?;

        self.renderer
            .write_to_file(&plain, &original_path)
            .map_err(export_failure)?;
        if let Err(e) = self.renderer.write_to_file(&labeled, &processed_path) {
            // Never leave an original without its processed counterpart
            if let Err(remove) = std::fs::remove_file(&original_path) {
                tracing::warn!(
                    "Failed to remove unpaired {}: {}",
                    original_path.display(),
                    remove
                );
            }
            return Err(export_failure(e));
        }

        tracing::debug!(
            "Exported {} and {}",
            original_path.display(),
            processed_path.display()
        );
        Ok(())
    }
}

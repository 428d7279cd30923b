//! Batch scheduling across a bounded worker pool.
//!
//! Jobs are split into contiguous batches. Each batch is forked onto a
//! dedicated rayon pool and fully joined before the coordinating thread
//! exports it and folds its timings. Batches never overlap.

use std::num::NonZeroUsize;
use std::path::Path;

use anyhow::{Context, Result};
use rayon::prelude::*;

use crate::engine::{RenderTarget, StageInvoker};
use crate::io::ExportCoordinator;
use crate::pipeline::job::{self, JobUnit};
use crate::pipeline::{ImagePipelineRunner, TimingAggregator, TimingRecord};

/// Configuration for the scheduler.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Maximum jobs per batch
    pub batch_size: usize,

    /// Worker pool size (None = num CPUs)
    pub worker_threads: Option<usize>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            batch_size: 25,
            worker_threads: None,
        }
    }
}

/// Drives fork-join execution of batches.
pub struct BatchScheduler {
    /// Dedicated worker pool; bounds in-flight jobs
    pool: rayon::ThreadPool,

    batch_size: NonZeroUsize,
}

impl BatchScheduler {
    /// Create a scheduler and its worker pool.
    pub fn new(config: &SchedulerConfig) -> Result<Self> {
        let batch_size = NonZeroUsize::new(config.batch_size)
            .context("batch_size must be greater than 0")?;

        let mut builder =
            rayon::ThreadPoolBuilder::new().thread_name(|i| format!("slice-worker-{}", i));
        if let Some(threads) = config.worker_threads {
            if threads == 0 {
                anyhow::bail!("worker_threads must be greater than 0");
            }
            builder = builder.num_threads(threads);
        }
        let pool = builder.build().context("Failed to build worker pool")?;

        Ok(Self { pool, batch_size })
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size.get()
    }

    pub fn worker_count(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// Process every job in order, batch by batch, exporting each batch to
    /// `destination` once it has joined.
    pub fn process_all<E, R>(
        &self,
        jobs: Vec<JobUnit<E::Image, E::Labels>>,
        runner: &ImagePipelineRunner<E>,
        exporter: &mut ExportCoordinator<R>,
        destination: &Path,
        timings: &TimingAggregator,
    ) -> BatchSummary
    where
        E: StageInvoker,
        R: RenderTarget<Image = E::Image, Labels = E::Labels>,
    {
        let total = jobs.len();
        let num_batches = job::batch_count(total, self.batch_size);

        tracing::info!(
            "Scheduling {} jobs in {} batches ({} per batch, {} workers)",
            total,
            num_batches,
            self.batch_size,
            self.worker_count()
        );

        let mut summary = BatchSummary::default();

        for mut batch in job::partition(jobs, self.batch_size) {
            // Fork: slot i is written only by the task running job i
            let deltas: Vec<TimingRecord> = self.pool.install(|| {
                batch
                    .jobs
                    .par_iter_mut()
                    .map(|job| runner.run(job))
                    .collect()
            });

            // Joined: single-threaded from here on
            let mut batch_timing = TimingRecord::default();
            for delta in &deltas {
                batch_timing += delta;
            }

            let batch_len = batch.len();
            let batch_success = batch.jobs.iter().filter(|j| j.is_success()).count();

            let report = exporter.export_batch(batch.jobs, destination);
            batch_timing.export += report.elapsed;
            timings.accumulate(&batch_timing);

            summary.total_count += batch_len;
            summary.success_count += batch_success;
            summary.export_failures += report.failed;
            summary.batch_sizes.push(batch_len);

            let done = batch.offset + batch_len;
            tracing::info!(
                "[{:.1}%] batch {}/{}: {}/{} succeeded ({}/{} jobs done)",
                done as f64 / total as f64 * 100.0,
                batch.index + 1,
                num_batches,
                batch_success,
                batch_len,
                done,
                total
            );
        }

        summary
    }
}

/// Statistics from scheduling one job list.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BatchSummary {
    /// Jobs attempted
    pub total_count: usize,

    /// Jobs that completed every stage
    pub success_count: usize,

    /// Size of each batch, in order
    pub batch_sizes: Vec<usize>,

    /// Successful jobs whose export failed
    pub export_failures: usize,
}

impl BatchSummary {
    pub fn failed_count(&self) -> usize {
        self.total_count - self.success_count
    }
}

impl std::fmt::Display for BatchSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Succeeded: {}/{}, Failed: {}, Batches: {}, Export failures: {}",
            self.success_count,
            self.total_count,
            self.failed_count(),
            self.batch_sizes.len(),
            self.export_failures
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{RenderConfig, StageParams};
    use crate::engine::testing::{FailAt, JobEvent, MockEngine, MockRenderer, TrackingEngine};
    use crate::index::slice_key;
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::TempDir;

    fn scheduler(batch_size: usize, workers: usize) -> BatchScheduler {
        BatchScheduler::new(&SchedulerConfig {
            batch_size,
            worker_threads: Some(workers),
        })
        .unwrap()
    }

    #[test]
    fn test_scheduler_config_default() {
        let config = SchedulerConfig::default();
        assert_eq!(config.batch_size, 25);
        assert!(config.worker_threads.is_none());
    }

    #[test]
    fn test_invalid_config_rejected() {
        assert!(BatchScheduler::new(&SchedulerConfig {
            batch_size: 0,
            worker_threads: None
        })
        .is_err());
        assert!(BatchScheduler::new(&SchedulerConfig {
            batch_size: 5,
            worker_threads: Some(0)
        })
        .is_err());
    }

    #[test]
    fn test_worker_pool_size() {
        let scheduler = scheduler(5, 3);
        assert_eq!(scheduler.worker_count(), 3);
        assert_eq!(scheduler.batch_size(), 5);
    }

    #[test]
    fn test_fewer_workers_than_batch_size() {
        let dir = TempDir::new().unwrap();
        let scheduler = scheduler(8, 2);
        let runner =
            ImagePipelineRunner::new(Arc::new(MockEngine::new()), StageParams::default(), 100);
        let mut exporter =
            ExportCoordinator::new(MockRenderer::new(), &RenderConfig::default(), "jpg");
        let timings = TimingAggregator::new();

        let jobs = (0..10)
            .map(|i| JobUnit::new(format!("/data/1-{}.dcm", i)))
            .collect();
        let summary = scheduler.process_all(jobs, &runner, &mut exporter, dir.path(), &timings);

        assert_eq!(summary.success_count, 10);
        assert_eq!(summary.batch_sizes, vec![8, 2]);
        assert_eq!(runner.engine().calls.import.load(std::sync::atomic::Ordering::SeqCst), 10);
        assert_eq!(timings.totals().total_images, 10);
        assert_eq!(exporter.renderer().written.len(), 20);
    }

    /// Run `jobs` slices through a tracking engine and return it.
    fn run_tracked(
        jobs: usize,
        batch_size: usize,
        workers: usize,
    ) -> (Arc<TrackingEngine>, BatchSummary) {
        let dir = TempDir::new().unwrap();
        let scheduler = scheduler(batch_size, workers);
        let engine = Arc::new(TrackingEngine::new(Duration::from_millis(5)));
        let runner = ImagePipelineRunner::new(engine.clone(), StageParams::default(), 100);
        let mut exporter =
            ExportCoordinator::new(MockRenderer::new(), &RenderConfig::default(), "jpg");
        let timings = TimingAggregator::new();

        let list = (0..jobs)
            .map(|i| JobUnit::new(format!("/data/1-{}.dcm", i)))
            .collect();
        let summary = scheduler.process_all(list, &runner, &mut exporter, dir.path(), &timings);
        (engine, summary)
    }

    fn batch_of(event: &JobEvent, batch_size: usize) -> usize {
        let path = match event {
            JobEvent::Started(p) | JobEvent::Finished(p) => p,
        };
        slice_key(path).unwrap() as usize / batch_size
    }

    fn assert_batches_never_overlap(events: &[JobEvent], batch_size: usize) {
        let batches: Vec<usize> = events.iter().map(|e| batch_of(e, batch_size)).collect();
        assert!(
            batches.windows(2).all(|w| w[0] <= w[1]),
            "a job started before the previous batch joined: {:?}",
            batches
        );
    }

    #[test]
    fn test_in_flight_bounded_by_workers() {
        // (jobs, batch_size, workers): fewer, more and equal workers
        for (jobs, batch_size, workers) in [(17, 6, 2), (17, 4, 8), (9, 3, 3)] {
            let (engine, summary) = run_tracked(jobs, batch_size, workers);

            assert_eq!(summary.success_count, jobs);
            assert!(engine.peak() >= 1);
            assert!(engine.peak() <= workers.min(batch_size));

            let events = engine.events();
            assert_eq!(events.len(), 2 * jobs);
            assert_batches_never_overlap(&events, batch_size);
        }
    }

    #[test]
    fn test_empty_job_list() {
        let dir = TempDir::new().unwrap();
        let scheduler = scheduler(5, 2);
        let runner =
            ImagePipelineRunner::new(Arc::new(MockEngine::new()), StageParams::default(), 100);
        let mut exporter =
            ExportCoordinator::new(MockRenderer::new(), &RenderConfig::default(), "jpg");
        let timings = TimingAggregator::new();

        let summary =
            scheduler.process_all(Vec::new(), &runner, &mut exporter, dir.path(), &timings);

        assert_eq!(summary, BatchSummary::default());
        assert_eq!(timings.totals().total_images, 0);
    }

    #[test]
    fn test_export_failures_counted() {
        let dir = TempDir::new().unwrap();
        let scheduler = scheduler(2, 2);
        let runner = ImagePipelineRunner::new(
            Arc::new(MockEngine::new().failing("broken", FailAt::Import)),
            StageParams::default(),
            100,
        );
        let mut exporter = ExportCoordinator::new(
            MockRenderer::new().failing_writes("1-1_original"),
            &RenderConfig::default(),
            "jpg",
        );
        let timings = TimingAggregator::new();

        let jobs = vec![
            JobUnit::new("/data/1-0.dcm"),
            JobUnit::new("/data/1-1.dcm"),
            JobUnit::new("/data/broken-2.dcm"),
        ];
        let summary = scheduler.process_all(jobs, &runner, &mut exporter, dir.path(), &timings);

        assert_eq!(summary.total_count, 3);
        assert_eq!(summary.success_count, 2);
        assert_eq!(summary.export_failures, 1);
        assert!(dir.path().join("1-0_processed.jpg").exists());
    }

    #[test]
    fn test_batch_summary_display() {
        let summary = BatchSummary {
            total_count: 23,
            success_count: 12,
            batch_sizes: vec![5, 5, 5, 5, 3],
            export_failures: 0,
        };

        let display = format!("{}", summary);
        assert!(display.contains("12/23"));
        assert!(display.contains("Failed: 11"));
        assert!(display.contains("Batches: 5"));
    }
}

//! Per-stage timing collection and run summaries.

use serde::Serialize;
use std::ops::AddAssign;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::error::Stage;

/// Per-stage durations plus image counts.
///
/// Workers build one of these per job with purely local timing; the
/// scheduler folds them into a [`TimingAggregator`] after the batch joins.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TimingRecord {
    pub import: Duration,
    pub preprocess: Duration,
    pub segment: Duration,
    pub postprocess: Duration,
    pub export: Duration,
    pub total_images: u64,
    pub successful_images: u64,
}

impl TimingRecord {
    /// Timing delta for a single job.
    pub fn for_job() -> Self {
        Self {
            total_images: 1,
            ..Default::default()
        }
    }

    /// Add `elapsed` to the given stage.
    pub fn add_stage(&mut self, stage: Stage, elapsed: Duration) {
        match stage {
            Stage::Import => self.import += elapsed,
            Stage::Preprocess => self.preprocess += elapsed,
            Stage::Segment => self.segment += elapsed,
            Stage::Postprocess => self.postprocess += elapsed,
            Stage::Export => self.export += elapsed,
        }
    }

    pub fn stage(&self, stage: Stage) -> Duration {
        match stage {
            Stage::Import => self.import,
            Stage::Preprocess => self.preprocess,
            Stage::Segment => self.segment,
            Stage::Postprocess => self.postprocess,
            Stage::Export => self.export,
        }
    }

    /// Sum of all stage durations.
    pub fn total_time(&self) -> Duration {
        Stage::ALL.iter().map(|&stage| self.stage(stage)).sum()
    }

    /// `total_time / total_images`, or zero when no images were counted.
    pub fn average_per_image(&self) -> Duration {
        match u32::try_from(self.total_images) {
            Ok(0) => Duration::ZERO,
            Ok(n) => self.total_time() / n,
            Err(_) => Duration::from_secs_f64(
                self.total_time().as_secs_f64() / self.total_images as f64,
            ),
        }
    }
}

impl AddAssign<&TimingRecord> for TimingRecord {
    fn add_assign(&mut self, rhs: &TimingRecord) {
        self.import += rhs.import;
        self.preprocess += rhs.preprocess;
        self.segment += rhs.segment;
        self.postprocess += rhs.postprocess;
        self.export += rhs.export;
        self.total_images += rhs.total_images;
        self.successful_images += rhs.successful_images;
    }
}

/// Thread-safe accumulator of [`TimingRecord`] deltas for one patient or run.
///
/// Each field is a separate atomic add, so concurrent submissions never lose
/// an update. The scheduler submits from the coordinating thread after each
/// batch join, so in practice there is a single writer.
#[derive(Debug, Default)]
pub struct TimingAggregator {
    // Per-stage timing (in microseconds for precision)
    import_us: AtomicU64,
    preprocess_us: AtomicU64,
    segment_us: AtomicU64,
    postprocess_us: AtomicU64,
    export_us: AtomicU64,

    total_images: AtomicU64,
    successful_images: AtomicU64,
}

impl TimingAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold a delta into the running totals.
    pub fn accumulate(&self, delta: &TimingRecord) {
        add_duration(&self.import_us, delta.import);
        add_duration(&self.preprocess_us, delta.preprocess);
        add_duration(&self.segment_us, delta.segment);
        add_duration(&self.postprocess_us, delta.postprocess);
        add_duration(&self.export_us, delta.export);
        self.total_images.fetch_add(delta.total_images, Ordering::Relaxed);
        self.successful_images
            .fetch_add(delta.successful_images, Ordering::Relaxed);
    }

    /// Current totals as a [`TimingRecord`].
    pub fn totals(&self) -> TimingRecord {
        TimingRecord {
            import: load_duration(&self.import_us),
            preprocess: load_duration(&self.preprocess_us),
            segment: load_duration(&self.segment_us),
            postprocess: load_duration(&self.postprocess_us),
            export: load_duration(&self.export_us),
            total_images: self.total_images.load(Ordering::Relaxed),
            successful_images: self.successful_images.load(Ordering::Relaxed),
        }
    }

    /// Totals in seconds, with `total` and `average_per_image` derived.
    pub fn snapshot(&self) -> TimingSnapshot {
        TimingSnapshot::from(&self.totals())
    }
}

fn add_duration(counter: &AtomicU64, duration: Duration) {
    let micros = u64::try_from(duration.as_micros()).unwrap_or(u64::MAX);
    counter.fetch_add(micros, Ordering::Relaxed);
}

fn load_duration(counter: &AtomicU64) -> Duration {
    Duration::from_micros(counter.load(Ordering::Relaxed))
}

/// Stage timing in seconds, as persisted in the run summary.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TimingSnapshot {
    pub import: f64,
    pub preprocess: f64,
    pub segment: f64,
    pub postprocess: f64,
    pub export: f64,
    pub total: f64,
    pub average_per_image: f64,
}

impl TimingSnapshot {
    pub fn stage(&self, stage: Stage) -> f64 {
        match stage {
            Stage::Import => self.import,
            Stage::Preprocess => self.preprocess,
            Stage::Segment => self.segment,
            Stage::Postprocess => self.postprocess,
            Stage::Export => self.export,
        }
    }
}

impl From<&TimingRecord> for TimingSnapshot {
    fn from(record: &TimingRecord) -> Self {
        Self {
            import: record.import.as_secs_f64(),
            preprocess: record.preprocess.as_secs_f64(),
            segment: record.segment.as_secs_f64(),
            postprocess: record.postprocess.as_secs_f64(),
            export: record.export.as_secs_f64(),
            total: record.total_time().as_secs_f64(),
            average_per_image: record.average_per_image().as_secs_f64(),
        }
    }
}

/// Summary record for one patient.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PatientSummary {
    pub patient_id: String,
    pub total_images: u64,
    pub successful_images: u64,
    pub timing: TimingSnapshot,
}

impl PatientSummary {
    pub fn new(patient_id: impl Into<String>, totals: &TimingRecord) -> Self {
        Self {
            patient_id: patient_id.into(),
            total_images: totals.total_images,
            successful_images: totals.successful_images,
            timing: TimingSnapshot::from(totals),
        }
    }

    /// Summarize everything folded into `timings` for one patient.
    pub fn from_aggregator(patient_id: impl Into<String>, timings: &TimingAggregator) -> Self {
        let totals = timings.totals();
        Self {
            patient_id: patient_id.into(),
            total_images: totals.total_images,
            successful_images: totals.successful_images,
            timing: timings.snapshot(),
        }
    }
}

impl std::fmt::Display for PatientSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Patient {}: {}/{} images | Total: {:.2}s | Avg: {:.3}s/image",
            self.patient_id,
            self.successful_images,
            self.total_images,
            self.timing.total,
            self.timing.average_per_image,
        )
    }
}

/// Summary of a full run, serialized once at the end.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    pub patients: Vec<PatientSummary>,
    pub total_images: u64,
    pub successful_images: u64,
    pub timing: TimingSnapshot,
}

impl RunSummary {
    pub fn new(patients: Vec<PatientSummary>, overall: &TimingRecord) -> Self {
        Self {
            patients,
            total_images: overall.total_images,
            successful_images: overall.successful_images,
            timing: TimingSnapshot::from(overall),
        }
    }

    /// Save the summary to a JSON file.
    pub fn save_to_file(&self, path: &Path) -> anyhow::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        tracing::info!("Run summary saved to {}", path.display());
        Ok(())
    }

    /// Seconds and share of the total per stage, in pipeline order.
    /// Empty when no stage time was recorded.
    pub fn stage_breakdown(&self) -> Vec<(Stage, f64, f64)> {
        let total = self.timing.total;
        if total <= 0.0 {
            return Vec::new();
        }
        Stage::ALL
            .iter()
            .map(|&stage| {
                let secs = self.timing.stage(stage);
                (stage, secs, secs / total * 100.0)
            })
            .collect()
    }

    /// Print a final human-readable summary.
    pub fn print_summary(&self) {
        println!("\n=== Pipeline Summary ===");
        for patient in &self.patients {
            println!(
                "{}: {}/{} images",
                patient.patient_id, patient.successful_images, patient.total_images
            );
        }
        println!(
            "Overall: {}/{} images processed successfully",
            self.successful_images, self.total_images
        );
        println!("Total stage time: {:.2}s", self.timing.total);
        println!("Average per image: {:.3}s", self.timing.average_per_image);

        let breakdown = self.stage_breakdown();
        if !breakdown.is_empty() {
            println!("\n--- Stage Time Breakdown ---");
            for (stage, secs, percent) in breakdown {
                let label = format!("{}:", stage);
                println!("{:<13}{:>8.2}s ({:>5.1}%)", label, secs, percent);
            }
        }
        println!("========================\n");
    }
}

impl std::fmt::Display for RunSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Patients: {} | Images: {}/{} | Total: {:.2}s | Avg: {:.3}s/image",
            self.patients.len(),
            self.successful_images,
            self.total_images,
            self.timing.total,
            self.timing.average_per_image,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn job_delta(millis: u64, success: bool) -> TimingRecord {
        let mut delta = TimingRecord::for_job();
        delta.add_stage(Stage::Import, Duration::from_millis(millis));
        delta.add_stage(Stage::Segment, Duration::from_millis(2 * millis));
        delta.successful_images = u64::from(success);
        delta
    }

    #[test]
    fn test_accumulate() {
        let aggregator = TimingAggregator::new();

        aggregator.accumulate(&job_delta(10, true));
        aggregator.accumulate(&job_delta(20, false));

        let totals = aggregator.totals();
        assert_eq!(totals.import, Duration::from_millis(30));
        assert_eq!(totals.segment, Duration::from_millis(60));
        assert_eq!(totals.total_images, 2);
        assert_eq!(totals.successful_images, 1);
        assert_eq!(totals.total_time(), Duration::from_millis(90));
    }

    #[test]
    fn test_average_per_image() {
        let mut record = TimingRecord::default();
        record.add_stage(Stage::Preprocess, Duration::from_millis(300));
        record.total_images = 3;
        assert_eq!(record.average_per_image(), Duration::from_millis(100));
    }

    #[test]
    fn test_average_zero_images() {
        let mut record = TimingRecord::default();
        record.add_stage(Stage::Export, Duration::from_millis(50));
        assert_eq!(record.average_per_image(), Duration::ZERO);

        let snapshot = TimingAggregator::new().snapshot();
        assert_eq!(snapshot.total, 0.0);
        assert_eq!(snapshot.average_per_image, 0.0);
    }

    #[test]
    fn test_total_time_covers_every_stage() {
        let mut record = TimingRecord::default();
        for (i, stage) in Stage::ALL.iter().enumerate() {
            record.add_stage(*stage, Duration::from_millis(10 * (i as u64 + 1)));
        }

        assert_eq!(record.stage(Stage::Export), Duration::from_millis(50));
        assert_eq!(record.total_time(), Duration::from_millis(150));
    }

    #[test]
    fn test_patient_summary_from_aggregator() {
        let aggregator = TimingAggregator::new();
        aggregator.accumulate(&job_delta(10, true));
        aggregator.accumulate(&job_delta(30, false));

        let summary = PatientSummary::from_aggregator("PGBM-003", &aggregator);
        assert_eq!(summary.total_images, 2);
        assert_eq!(summary.successful_images, 1);
        assert_eq!(summary, PatientSummary::new("PGBM-003", &aggregator.totals()));
        assert!((summary.timing.segment - 0.08).abs() < 1e-9);
    }

    #[test]
    fn test_stage_breakdown() {
        let mut totals = TimingRecord::for_job();
        totals.add_stage(Stage::Import, Duration::from_millis(100));
        totals.add_stage(Stage::Segment, Duration::from_millis(300));
        let run = RunSummary::new(Vec::new(), &totals);

        let breakdown = run.stage_breakdown();
        let stages: Vec<Stage> = breakdown.iter().map(|(stage, _, _)| *stage).collect();
        assert_eq!(stages, Stage::ALL.to_vec());

        let (_, segment_secs, segment_share) = breakdown[2];
        assert!((segment_secs - 0.3).abs() < 1e-9);
        assert!((segment_share - 75.0).abs() < 1e-9);

        let shares: f64 = breakdown.iter().map(|(_, _, share)| share).sum();
        assert!((shares - 100.0).abs() < 1e-6);

        let idle = RunSummary::new(Vec::new(), &TimingRecord::default());
        assert!(idle.stage_breakdown().is_empty());
    }

    #[test]
    fn test_concurrent_accumulate_loses_nothing() {
        let aggregator = Arc::new(TimingAggregator::new());

        std::thread::scope(|scope| {
            for _ in 0..8 {
                let aggregator = aggregator.clone();
                scope.spawn(move || {
                    for _ in 0..250 {
                        aggregator.accumulate(&job_delta(1, true));
                    }
                });
            }
        });

        let totals = aggregator.totals();
        assert_eq!(totals.total_images, 2000);
        assert_eq!(totals.successful_images, 2000);
        assert_eq!(totals.import, Duration::from_millis(2000));
        assert_eq!(totals.segment, Duration::from_millis(4000));
    }

    #[test]
    fn test_add_assign_matches_aggregator() {
        let deltas = [job_delta(3, true), job_delta(5, false), job_delta(7, true)];

        let mut reduced = TimingRecord::default();
        let aggregator = TimingAggregator::new();
        for delta in &deltas {
            reduced += delta;
            aggregator.accumulate(delta);
        }

        assert_eq!(reduced, aggregator.totals());
    }

    #[test]
    fn test_snapshot_values() {
        let mut record = TimingRecord::default();
        record.add_stage(Stage::Import, Duration::from_millis(100));
        record.add_stage(Stage::Postprocess, Duration::from_millis(300));
        record.total_images = 4;

        let snapshot = TimingSnapshot::from(&record);
        assert!((snapshot.import - 0.1).abs() < 1e-9);
        assert!((snapshot.postprocess - 0.3).abs() < 1e-9);
        assert!((snapshot.total - 0.4).abs() < 1e-9);
        assert!((snapshot.average_per_image - 0.1).abs() < 1e-9);
        assert!(snapshot.total >= 0.0);
    }

    #[test]
    fn test_summary_json_shape() {
        let mut totals = TimingRecord::for_job();
        totals.successful_images = 1;
        let patient = PatientSummary::new("PGBM-001", &totals);
        let run = RunSummary::new(vec![patient], &totals);

        let json = serde_json::to_value(&run).unwrap();
        let first = &json["patients"][0];
        assert_eq!(first["patientId"], "PGBM-001");
        assert_eq!(first["totalImages"], 1);
        assert_eq!(first["successfulImages"], 1);
        assert!(first["timing"]["averagePerImage"].is_number());
        assert!(first["timing"]["postprocess"].is_number());
        assert_eq!(json["totalImages"], 1);
    }

    #[test]
    fn test_summary_display() {
        let mut totals = TimingRecord::default();
        totals.total_images = 23;
        totals.successful_images = 12;
        let patient = PatientSummary::new("PGBM-002", &totals);

        let display = format!("{}", patient);
        assert!(display.contains("PGBM-002"));
        assert!(display.contains("12/23"));
    }

    #[test]
    fn test_save_summary() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("summary.json");

        let run = RunSummary::new(Vec::new(), &TimingRecord::default());
        run.save_to_file(&path).unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.contains("\"patients\""));
        assert!(contents.contains("\"averagePerImage\""));
    }
}

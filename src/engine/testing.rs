//! In-memory engine and render target used by the pipeline tests.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use super::{ImageDims, ImportMode, LabelStyle, PixelType, RenderTarget, StageInvoker};
use crate::config::{ClipThresholds, IntensityBand, NormalizeRange, SharpenParams};
use crate::error::EngineError;
use crate::pipeline::SeedSet;

#[derive(Debug, Clone, PartialEq)]
pub struct FakeImage {
    pub width: u32,
    pub height: u32,
    pub source: String,
}

impl ImageDims for FakeImage {
    fn width(&self) -> u32 {
        self.width
    }

    fn height(&self) -> u32 {
        self.height
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FakeLabels {
    pub source: String,
    pub seed_count: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailAt {
    Import,
    Denoise,
    Segment,
    Dilate,
}

#[derive(Debug, Default)]
pub struct CallCounts {
    pub import: AtomicUsize,
    pub series_imports: AtomicUsize,
    pub normalize: AtomicUsize,
    pub sharpen: AtomicUsize,
    pub region_grow: AtomicUsize,
    pub cast: AtomicUsize,
    pub dilate: AtomicUsize,
    pub erode: AtomicUsize,
}

/// Engine that fabricates images and fails on sources containing a marker.
#[derive(Debug)]
pub struct MockEngine {
    width: u32,
    height: u32,
    fail_marker: Option<(String, FailAt)>,
    pub calls: CallCounts,
}

impl MockEngine {
    pub fn new() -> Self {
        Self {
            width: 512,
            height: 512,
            fail_marker: None,
            calls: CallCounts::default(),
        }
    }

    pub fn with_dimensions(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    /// Fail at `stage` for every source whose path contains `marker`.
    pub fn failing(mut self, marker: &str, stage: FailAt) -> Self {
        self.fail_marker = Some((marker.to_string(), stage));
        self
    }

    fn check(&self, source: &str, stage: FailAt) -> Result<(), EngineError> {
        match &self.fail_marker {
            Some((marker, at)) if *at == stage && source.contains(marker.as_str()) => Err(
                EngineError::new(format!("forced {:?} failure for {}", stage, source)),
            ),
            _ => Ok(()),
        }
    }
}

impl StageInvoker for MockEngine {
    type Image = FakeImage;
    type Labels = FakeLabels;

    fn import(&self, path: &Path, mode: ImportMode) -> Result<FakeImage, EngineError> {
        self.calls.import.fetch_add(1, Ordering::SeqCst);
        if mode == ImportMode::Series {
            self.calls.series_imports.fetch_add(1, Ordering::SeqCst);
        }
        let source = path.display().to_string();
        self.check(&source, FailAt::Import)?;
        Ok(FakeImage {
            width: self.width,
            height: self.height,
            source,
        })
    }

    fn normalize(&self, image: &FakeImage, _range: &NormalizeRange) -> Result<FakeImage, EngineError> {
        self.calls.normalize.fetch_add(1, Ordering::SeqCst);
        Ok(image.clone())
    }

    fn clip(&self, image: &FakeImage, _thresholds: &ClipThresholds) -> Result<FakeImage, EngineError> {
        Ok(image.clone())
    }

    fn denoise(&self, image: &FakeImage, _kernel_size: u32) -> Result<FakeImage, EngineError> {
        self.check(&image.source, FailAt::Denoise)?;
        Ok(image.clone())
    }

    fn sharpen(&self, image: &FakeImage, _params: &SharpenParams) -> Result<FakeImage, EngineError> {
        self.calls.sharpen.fetch_add(1, Ordering::SeqCst);
        Ok(image.clone())
    }

    fn region_grow(
        &self,
        image: &FakeImage,
        _band: &IntensityBand,
        seeds: &SeedSet,
    ) -> Result<FakeLabels, EngineError> {
        self.calls.region_grow.fetch_add(1, Ordering::SeqCst);
        self.check(&image.source, FailAt::Segment)?;
        Ok(FakeLabels {
            source: image.source.clone(),
            seed_count: seeds.len(),
        })
    }

    fn cast(&self, labels: &FakeLabels, _target: PixelType) -> Result<FakeLabels, EngineError> {
        self.calls.cast.fetch_add(1, Ordering::SeqCst);
        Ok(labels.clone())
    }

    fn dilate(&self, labels: &FakeLabels, _radius: u32) -> Result<FakeLabels, EngineError> {
        self.calls.dilate.fetch_add(1, Ordering::SeqCst);
        self.check(&labels.source, FailAt::Dilate)?;
        Ok(labels.clone())
    }

    fn erode(&self, labels: &FakeLabels, _radius: u32) -> Result<FakeLabels, EngineError> {
        self.calls.erode.fetch_add(1, Ordering::SeqCst);
        Ok(labels.clone())
    }
}

/// Start or finish of one job, as seen by [`TrackingEngine`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobEvent {
    Started(PathBuf),
    Finished(PathBuf),
}

/// Engine that records when each job starts (import) and finishes (final
/// morphology step), and the peak number of jobs in flight.
#[derive(Debug)]
pub struct TrackingEngine {
    inner: MockEngine,
    hold: Duration,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
    events: Mutex<Vec<JobEvent>>,
}

impl TrackingEngine {
    /// Each import sleeps for `hold` so jobs overlap when they can.
    pub fn new(hold: Duration) -> Self {
        Self {
            inner: MockEngine::new(),
            hold,
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            events: Mutex::new(Vec::new()),
        }
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn events(&self) -> Vec<JobEvent> {
        self.events.lock().unwrap().clone()
    }

    fn record(&self, event: JobEvent) {
        self.events.lock().unwrap().push(event);
    }
}

impl StageInvoker for TrackingEngine {
    type Image = FakeImage;
    type Labels = FakeLabels;

    fn import(&self, path: &Path, mode: ImportMode) -> Result<FakeImage, EngineError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        self.record(JobEvent::Started(path.to_path_buf()));
        std::thread::sleep(self.hold);
        self.inner.import(path, mode)
    }

    fn normalize(&self, image: &FakeImage, range: &NormalizeRange) -> Result<FakeImage, EngineError> {
        self.inner.normalize(image, range)
    }

    fn clip(&self, image: &FakeImage, thresholds: &ClipThresholds) -> Result<FakeImage, EngineError> {
        self.inner.clip(image, thresholds)
    }

    fn denoise(&self, image: &FakeImage, kernel_size: u32) -> Result<FakeImage, EngineError> {
        self.inner.denoise(image, kernel_size)
    }

    fn sharpen(&self, image: &FakeImage, params: &SharpenParams) -> Result<FakeImage, EngineError> {
        self.inner.sharpen(image, params)
    }

    fn region_grow(
        &self,
        image: &FakeImage,
        band: &IntensityBand,
        seeds: &SeedSet,
    ) -> Result<FakeLabels, EngineError> {
        self.inner.region_grow(image, band, seeds)
    }

    fn cast(&self, labels: &FakeLabels, target: PixelType) -> Result<FakeLabels, EngineError> {
        self.inner.cast(labels, target)
    }

    fn dilate(&self, labels: &FakeLabels, radius: u32) -> Result<FakeLabels, EngineError> {
        let result = self.inner.dilate(labels, radius);
        self.record(JobEvent::Finished(PathBuf::from(&labels.source)));
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }

    fn erode(&self, labels: &FakeLabels, radius: u32) -> Result<FakeLabels, EngineError> {
        self.inner.erode(labels, radius)
    }
}

/// Render target that writes a small text file per export and checks that
/// it is reset before every render.
#[derive(Debug, Default)]
pub struct MockRenderer {
    attached: bool,
    fail_markers: Vec<String>,
    pub resets: usize,
    pub renders: usize,
    pub written: Vec<String>,
}

impl MockRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail `write_to_file` for destinations containing `marker`. May be
    /// chained to fail several destinations.
    pub fn failing_writes(mut self, marker: &str) -> Self {
        self.fail_markers.push(marker.to_string());
        self
    }

    fn attach(&mut self) -> Result<(), EngineError> {
        if self.attached {
            return Err(EngineError::new("render target was not reset"));
        }
        self.attached = true;
        self.renders += 1;
        Ok(())
    }
}

impl RenderTarget for MockRenderer {
    type Image = FakeImage;
    type Labels = FakeLabels;
    type Rendered = String;

    fn reset(&mut self) {
        self.attached = false;
        self.resets += 1;
    }

    fn render_plain(&mut self, image: &FakeImage) -> Result<String, EngineError> {
        self.attach()?;
        Ok(format!("plain {}", image.source))
    }

    fn render_labeled(&mut self, labels: &FakeLabels, style: &LabelStyle) -> Result<String, EngineError> {
        self.attach()?;
        Ok(format!("labeled {} {:?}", labels.source, style.color))
    }

    fn write_to_file(&mut self, rendered: &String, path: &Path) -> Result<(), EngineError> {
        let name = path.display().to_string();
        if self.fail_markers.iter().any(|m| name.contains(m.as_str())) {
            return Err(EngineError::new(format!("forced write failure for {}", name)));
        }
        std::fs::write(path, rendered).map_err(|e| EngineError::new(e.to_string()))?;
        self.written.push(name);
        Ok(())
    }
}

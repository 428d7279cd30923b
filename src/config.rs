//! Configuration for the slice batch pipeline.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Main configuration for the slice pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Input configuration
    pub input: InputConfig,

    /// Output configuration
    pub output: OutputConfig,

    /// Processing configuration
    #[serde(default)]
    pub processing: ProcessingConfig,

    /// Stage parameters handed to the image-processing engine
    #[serde(default)]
    pub stages: StageParams,

    /// Export rendering configuration
    #[serde(default)]
    pub render: RenderConfig,
}

/// Input data configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputConfig {
    /// Directory containing one subdirectory per patient
    pub data_root: PathBuf,

    /// Prefix identifying patient directories
    #[serde(default = "default_patient_prefix")]
    pub patient_prefix: String,

    /// Slice file extension (without the dot). The bundled raster engine
    /// decodes PNG, TIFF, BMP and JPEG; DICOM needs another `StageInvoker`.
    #[serde(default = "default_input_extension")]
    pub extension: String,

    /// Collect every matching file under the patient directory instead of
    /// only the first series subdirectory
    #[serde(default)]
    pub recursive: bool,
}

/// Output configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Root directory; each patient gets `<root>/<patient_id>`
    pub root: PathBuf,

    /// Extension of exported images; selects the encoder
    #[serde(default = "default_image_extension")]
    pub image_extension: String,

    /// Optional path to save the JSON run summary after the run completes
    #[serde(default)]
    pub summary_path: Option<PathBuf>,
}

/// Processing configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingConfig {
    /// Maximum number of jobs per batch
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Worker pool size (null = num CPUs)
    #[serde(default)]
    pub worker_threads: Option<usize>,

    /// Images smaller than this in either dimension are rejected before
    /// segmentation
    #[serde(default = "default_min_dimension")]
    pub min_dimension: u32,

    /// Print the timing summary at the end of the run
    #[serde(default = "default_true")]
    pub enable_metrics: bool,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            worker_threads: None,
            min_dimension: default_min_dimension(),
            enable_metrics: true,
        }
    }
}

/// Intensity normalization: the source window `[min_intensity, max_intensity]`
/// is mapped onto `[low, high]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NormalizeRange {
    pub low: f32,
    pub high: f32,
    pub min_intensity: f32,
    pub max_intensity: f32,
}

impl Default for NormalizeRange {
    fn default() -> Self {
        Self {
            low: 0.5,
            high: 2.5,
            min_intensity: 0.0,
            max_intensity: 10000.0,
        }
    }
}

/// Outlier clipping thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClipThresholds {
    pub low: f32,
    pub high: f32,
}

impl Default for ClipThresholds {
    fn default() -> Self {
        Self {
            low: 0.68,
            high: 4000.0,
        }
    }
}

/// Unsharp-mask sharpening parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SharpenParams {
    /// Gain applied to the high-frequency residual
    pub amount: f32,

    /// Standard deviation of the blur
    pub radius: f32,

    /// Blur kernel size in pixels (odd)
    pub kernel_size: u32,
}

impl Default for SharpenParams {
    fn default() -> Self {
        Self {
            amount: 2.0,
            radius: 0.5,
            kernel_size: 9,
        }
    }
}

/// Intensity similarity band used by region growing.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IntensityBand {
    pub min: f32,
    pub max: f32,
}

impl IntensityBand {
    pub fn contains(&self, value: f32) -> bool {
        value >= self.min && value <= self.max
    }
}

impl Default for IntensityBand {
    fn default() -> Self {
        Self {
            min: 0.74,
            max: 0.91,
        }
    }
}

/// Morphological cleanup applied after segmentation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MorphologyMode {
    #[default]
    Dilate,
    ErodeThenDilate,
    DilateThenErode,
}

/// Stage parameters for the pipeline, handed to the engine on every call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageParams {
    #[serde(default)]
    pub normalize: NormalizeRange,

    #[serde(default)]
    pub clip: ClipThresholds,

    /// Edge-preserving denoise kernel size (odd)
    #[serde(default = "default_denoise_kernel_size")]
    pub denoise_kernel_size: u32,

    #[serde(default)]
    pub sharpen: SharpenParams,

    #[serde(default)]
    pub segment_band: IntensityBand,

    /// Structuring element radius for dilation/erosion
    #[serde(default = "default_morphology_radius")]
    pub morphology_radius: u32,

    #[serde(default)]
    pub morphology: MorphologyMode,
}

impl Default for StageParams {
    fn default() -> Self {
        Self {
            normalize: NormalizeRange::default(),
            clip: ClipThresholds::default(),
            denoise_kernel_size: default_denoise_kernel_size(),
            sharpen: SharpenParams::default(),
            segment_band: IntensityBand::default(),
            morphology_radius: default_morphology_radius(),
            morphology: MorphologyMode::default(),
        }
    }
}

/// Rendering configuration for exported images.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderConfig {
    /// Canvas width in pixels
    #[serde(default = "default_canvas_size")]
    pub width: u32,

    /// Canvas height in pixels
    #[serde(default = "default_canvas_size")]
    pub height: u32,

    /// Canvas background colour
    #[serde(default = "default_background")]
    pub background: [u8; 3],

    /// Display colour for the foreground label
    #[serde(default = "default_label_color")]
    pub label_color: [u8; 3],

    /// Fill opacity of labelled pixels
    #[serde(default = "default_opacity")]
    pub opacity: f32,

    /// Opacity of the label border
    #[serde(default = "default_border_opacity")]
    pub border_opacity: f32,

    /// Border thickness in pixels
    #[serde(default = "default_border_radius")]
    pub border_radius: u32,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            width: default_canvas_size(),
            height: default_canvas_size(),
            background: default_background(),
            label_color: default_label_color(),
            opacity: default_opacity(),
            border_opacity: default_border_opacity(),
            border_radius: default_border_radius(),
        }
    }
}

impl Config {
    /// Load configuration from a YAML or JSON file.
    /// Format is auto-detected from file extension (.yaml, .yml, or .json).
    pub fn from_file(path: &PathBuf) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");

        let config: Config = match ext {
            "yaml" | "yml" => serde_yaml::from_str(&contents)?,
            "json" => serde_json::from_str(&contents)?,
            _ => {
                // Try YAML first (it's a superset of JSON)
                serde_yaml::from_str(&contents)?
            }
        };
        Ok(config)
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> anyhow::Result<Self> {
        let config: Config = serde_yaml::from_str(yaml)?;
        Ok(config)
    }

    /// Load configuration from a JSON string.
    pub fn from_json(json: &str) -> anyhow::Result<Self> {
        let config: Config = serde_json::from_str(json)?;
        Ok(config)
    }

    /// Serialize configuration to YAML.
    pub fn to_yaml(&self) -> anyhow::Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.input.extension.trim_start_matches('.').is_empty() {
            anyhow::bail!("Input extension must not be empty");
        }
        if self.output.image_extension.trim_start_matches('.').is_empty() {
            anyhow::bail!("Output image extension must not be empty");
        }
        if self.processing.batch_size == 0 {
            anyhow::bail!("Batch size must be > 0");
        }
        if self.processing.worker_threads == Some(0) {
            anyhow::bail!("Worker threads must be > 0");
        }

        let stages = &self.stages;
        if stages.normalize.min_intensity >= stages.normalize.max_intensity {
            anyhow::bail!("Normalize intensity window must satisfy min_intensity < max_intensity");
        }
        if stages.clip.low > stages.clip.high {
            anyhow::bail!("Clip thresholds must satisfy low <= high");
        }
        if stages.denoise_kernel_size == 0 || stages.denoise_kernel_size % 2 == 0 {
            anyhow::bail!("Denoise kernel size must be odd and > 0");
        }
        if stages.sharpen.kernel_size == 0 || stages.sharpen.kernel_size % 2 == 0 {
            anyhow::bail!("Sharpen kernel size must be odd and > 0");
        }
        if stages.sharpen.radius <= 0.0 {
            anyhow::bail!("Sharpen radius must be > 0");
        }
        if stages.segment_band.min > stages.segment_band.max {
            anyhow::bail!("Segment intensity band must satisfy min <= max");
        }
        if stages.morphology_radius == 0 || stages.morphology_radius > u32::from(u8::MAX) {
            anyhow::bail!("Morphology radius must be 1-255");
        }

        if self.render.width == 0 || self.render.height == 0 {
            anyhow::bail!("Render canvas dimensions must be > 0");
        }
        if !(0.0..=1.0).contains(&self.render.opacity)
            || !(0.0..=1.0).contains(&self.render.border_opacity)
        {
            anyhow::bail!("Render opacities must be within 0.0-1.0");
        }
        Ok(())
    }
}

// Default value functions for serde
fn default_patient_prefix() -> String { "PGBM-".to_string() }
fn default_input_extension() -> String { "png".to_string() }
fn default_image_extension() -> String { "jpg".to_string() }
fn default_batch_size() -> usize { 25 }
fn default_min_dimension() -> u32 { 100 }
fn default_true() -> bool { true }
fn default_denoise_kernel_size() -> u32 { 7 }
fn default_morphology_radius() -> u32 { 3 }
fn default_canvas_size() -> u32 { 512 }
fn default_background() -> [u8; 3] { [0, 0, 0] }
fn default_label_color() -> [u8; 3] { [255, 255, 255] }
fn default_opacity() -> f32 { 0.6 }
fn default_border_opacity() -> f32 { 1.0 }
fn default_border_radius() -> u32 { 2 }

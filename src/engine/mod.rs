//! Image-processing engine boundary.
//!
//! The pipeline core never does filter math, decoding or rendering itself.
//! It drives two collaborators:
//!
//! - [`StageInvoker`]: runs one named stage on one image. Shared by all
//!   workers, so it must be `Send + Sync`.
//! - [`RenderTarget`]: the stateful render-to-image resource used for export.
//!   Every method takes `&mut self`; it is owned by the single-threaded export
//!   phase and is never handed to a worker.

pub mod raster;

#[cfg(test)]
pub(crate) mod testing;

use std::path::Path;

use crate::config::{ClipThresholds, IntensityBand, NormalizeRange, SharpenParams};
use crate::error::EngineError;
use crate::pipeline::SeedSet;

pub use raster::{RasterEngine, RasterRenderer};

/// Dimensions of an imported slice.
pub trait ImageDims {
    fn width(&self) -> u32;
    fn height(&self) -> u32;
}

/// How the importer should treat a file that belongs to a multi-slice series.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportMode {
    /// Load exactly one 2D slice
    SingleSlice,
    /// Load the whole series as a volume
    Series,
}

/// Pixel type targets for the cast stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelType {
    U8,
    U16,
    F32,
}

/// Per-stage operations of the image-processing engine.
pub trait StageInvoker: Send + Sync {
    /// Intensity image
    type Image: ImageDims + Send;

    /// Label image produced by segmentation and morphology
    type Labels: Send;

    fn import(&self, path: &Path, mode: ImportMode) -> Result<Self::Image, EngineError>;

    fn normalize(&self, image: &Self::Image, range: &NormalizeRange) -> Result<Self::Image, EngineError>;

    fn clip(&self, image: &Self::Image, thresholds: &ClipThresholds) -> Result<Self::Image, EngineError>;

    fn denoise(&self, image: &Self::Image, kernel_size: u32) -> Result<Self::Image, EngineError>;

    fn sharpen(&self, image: &Self::Image, params: &SharpenParams) -> Result<Self::Image, EngineError>;

    fn region_grow(
        &self,
        image: &Self::Image,
        band: &IntensityBand,
        seeds: &SeedSet,
    ) -> Result<Self::Labels, EngineError>;

    fn cast(&self, labels: &Self::Labels, target: PixelType) -> Result<Self::Labels, EngineError>;

    fn dilate(&self, labels: &Self::Labels, radius: u32) -> Result<Self::Labels, EngineError>;

    fn erode(&self, labels: &Self::Labels, radius: u32) -> Result<Self::Labels, EngineError>;
}

/// Label-aware rendering style.
#[derive(Debug, Clone, PartialEq)]
pub struct LabelStyle {
    /// Label value rendered as foreground
    pub label: u8,

    /// Display colour of the foreground label
    pub color: [u8; 3],

    /// Fill opacity
    pub opacity: f32,

    /// Border opacity
    pub border_opacity: f32,

    /// Border thickness in pixels
    pub border_radius: u32,
}

/// Stateful render-to-image resource. Not safe for concurrent use.
pub trait RenderTarget {
    type Image;
    type Labels;
    type Rendered;

    /// Drop whatever is currently attached to the target.
    fn reset(&mut self);

    fn render_plain(&mut self, image: &Self::Image) -> Result<Self::Rendered, EngineError>;

    fn render_labeled(
        &mut self,
        labels: &Self::Labels,
        style: &LabelStyle,
    ) -> Result<Self::Rendered, EngineError>;

    fn write_to_file(&mut self, rendered: &Self::Rendered, path: &Path) -> Result<(), EngineError>;
}

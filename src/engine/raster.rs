//! In-process raster engine built on `image` and `imageproc`.
//!
//! Slices are decoded with `image` (PNG, TIFF, BMP, JPEG) into a single
//! `f32` intensity channel. Label images are 8-bit with the foreground
//! stored as label value 1.

use std::collections::VecDeque;
use std::path::Path;

use image::imageops::{self, FilterType};
use image::{GrayImage, ImageBuffer, Luma, Rgb, RgbImage};
use imageproc::distance_transform::Norm;

use super::{ImageDims, ImportMode, LabelStyle, PixelType, RenderTarget, StageInvoker};
use crate::config::{ClipThresholds, IntensityBand, NormalizeRange, RenderConfig, SharpenParams};
use crate::error::EngineError;
use crate::pipeline::SeedSet;

/// Single-channel intensity slice.
pub type Slice = ImageBuffer<Luma<f32>, Vec<f32>>;

/// Label value written by region growing.
pub const FOREGROUND: u8 = 1;

impl ImageDims for Slice {
    fn width(&self) -> u32 {
        self.dimensions().0
    }

    fn height(&self) -> u32 {
        self.dimensions().1
    }
}

/// Stage implementations over [`Slice`] and [`GrayImage`] labels.
#[derive(Debug, Default, Clone, Copy)]
pub struct RasterEngine;

impl RasterEngine {
    pub fn new() -> Self {
        Self
    }
}

impl StageInvoker for RasterEngine {
    type Image = Slice;
    type Labels = GrayImage;

    fn import(&self, path: &Path, mode: ImportMode) -> Result<Slice, EngineError> {
        if mode == ImportMode::Series {
            return Err(EngineError::new("series import is not supported"));
        }

        let decoded = image::open(path)
            .map_err(|e| EngineError::new(format!("cannot decode {}: {}", path.display(), e)))?;
        let raw = decoded.to_luma16();
        let (width, height) = raw.dimensions();
        Ok(Slice::from_fn(width, height, |x, y| {
            Luma([f32::from(raw.get_pixel(x, y).0[0])])
        }))
    }

    fn normalize(&self, image: &Slice, range: &NormalizeRange) -> Result<Slice, EngineError> {
        let span = range.max_intensity - range.min_intensity;
        if span <= 0.0 {
            return Err(EngineError::new("normalize window is empty"));
        }
        let scale = (range.high - range.low) / span;
        Ok(map_pixels(image, |v| {
            range.low + (v.clamp(range.min_intensity, range.max_intensity) - range.min_intensity) * scale
        }))
    }

    fn clip(&self, image: &Slice, thresholds: &ClipThresholds) -> Result<Slice, EngineError> {
        Ok(map_pixels(image, |v| v.clamp(thresholds.low, thresholds.high)))
    }

    fn denoise(&self, image: &Slice, kernel_size: u32) -> Result<Slice, EngineError> {
        if kernel_size == 0 || kernel_size % 2 == 0 {
            return Err(EngineError::new(format!(
                "median kernel size must be odd, got {}",
                kernel_size
            )));
        }
        Ok(median_filter(image, kernel_size / 2))
    }

    fn sharpen(&self, image: &Slice, params: &SharpenParams) -> Result<Slice, EngineError> {
        if params.radius <= 0.0 {
            return Err(EngineError::new("sharpen radius must be positive"));
        }
        let kernel = gaussian_kernel(params.kernel_size, params.radius);
        let blurred = imageproc::filter::separable_filter_equal(image, &kernel);
        Ok(Slice::from_fn(image.width(), image.height(), |x, y| {
            let v = image.get_pixel(x, y).0[0];
            let b = blurred.get_pixel(x, y).0[0];
            Luma([v + params.amount * (v - b)])
        }))
    }

    fn region_grow(
        &self,
        image: &Slice,
        band: &IntensityBand,
        seeds: &SeedSet,
    ) -> Result<GrayImage, EngineError> {
        let (width, height) = image.dimensions();
        let mut labels = GrayImage::new(width, height);
        let mut queue = VecDeque::new();

        for seed in seeds.iter() {
            if seed.x >= width || seed.y >= height {
                continue;
            }
            if band.contains(image.get_pixel(seed.x, seed.y).0[0])
                && labels.get_pixel(seed.x, seed.y).0[0] == 0
            {
                labels.put_pixel(seed.x, seed.y, Luma([FOREGROUND]));
                queue.push_back((seed.x, seed.y));
            }
        }

        // 4-connected flood within the band
        while let Some((x, y)) = queue.pop_front() {
            let neighbours = [
                (x.checked_sub(1), Some(y)),
                (x.checked_add(1).filter(|&nx| nx < width), Some(y)),
                (Some(x), y.checked_sub(1)),
                (Some(x), y.checked_add(1).filter(|&ny| ny < height)),
            ];
            for (nx, ny) in neighbours {
                let (Some(nx), Some(ny)) = (nx, ny) else {
                    continue;
                };
                if labels.get_pixel(nx, ny).0[0] == 0 && band.contains(image.get_pixel(nx, ny).0[0]) {
                    labels.put_pixel(nx, ny, Luma([FOREGROUND]));
                    queue.push_back((nx, ny));
                }
            }
        }

        Ok(labels)
    }

    fn cast(&self, labels: &GrayImage, target: PixelType) -> Result<GrayImage, EngineError> {
        match target {
            PixelType::U8 => Ok(labels.clone()),
            other => Err(EngineError::new(format!(
                "label images are 8-bit, cannot cast to {:?}",
                other
            ))),
        }
    }

    fn dilate(&self, labels: &GrayImage, radius: u32) -> Result<GrayImage, EngineError> {
        let dilated = imageproc::morphology::dilate(labels, Norm::LInf, structuring_radius(radius)?);
        Ok(relabel(dilated))
    }

    fn erode(&self, labels: &GrayImage, radius: u32) -> Result<GrayImage, EngineError> {
        let eroded = imageproc::morphology::erode(labels, Norm::LInf, structuring_radius(radius)?);
        Ok(relabel(eroded))
    }
}

/// imageproc marks foreground as 255; restore the label value.
fn relabel(mut image: GrayImage) -> GrayImage {
    for p in image.pixels_mut() {
        if p.0[0] != 0 {
            p.0[0] = FOREGROUND;
        }
    }
    image
}

fn structuring_radius(radius: u32) -> Result<u8, EngineError> {
    u8::try_from(radius)
        .map_err(|_| EngineError::new(format!("morphology radius {} exceeds 255", radius)))
}

fn map_pixels(image: &Slice, f: impl Fn(f32) -> f32) -> Slice {
    Slice::from_fn(image.width(), image.height(), |x, y| {
        Luma([f(image.get_pixel(x, y).0[0])])
    })
}

/// Median over a `(2r+1)²` window with edge pixels replicated.
fn median_filter(image: &Slice, r: u32) -> Slice {
    let (width, height) = image.dimensions();
    let side = (2 * r + 1) as usize;
    let mut window = Vec::with_capacity(side * side);

    Slice::from_fn(width, height, |x, y| {
        window.clear();
        for dy in -(r as i64)..=r as i64 {
            for dx in -(r as i64)..=r as i64 {
                let sx = (x as i64 + dx).clamp(0, width as i64 - 1) as u32;
                let sy = (y as i64 + dy).clamp(0, height as i64 - 1) as u32;
                window.push(image.get_pixel(sx, sy).0[0]);
            }
        }
        let mid = window.len() / 2;
        let (_, median, _) = window.select_nth_unstable_by(mid, f32::total_cmp);
        Luma([*median])
    })
}

fn gaussian_kernel(size: u32, sigma: f32) -> Vec<f32> {
    let half = (size / 2) as i32;
    let mut kernel: Vec<f32> = (-half..=half)
        .map(|i| (-((i * i) as f32) / (2.0 * sigma * sigma)).exp())
        .collect();
    let sum: f32 = kernel.iter().sum();
    for k in &mut kernel {
        *k /= sum;
    }
    kernel
}

/// Fixed-size RGB canvas. Holds the "currently attached" render state and
/// must be reset before each render.
#[derive(Debug, Clone)]
pub struct RasterRenderer {
    width: u32,
    height: u32,
    background: Rgb<u8>,
    attached: bool,
}

impl RasterRenderer {
    pub fn new(config: &RenderConfig) -> Self {
        Self {
            width: config.width,
            height: config.height,
            background: Rgb(config.background),
            attached: false,
        }
    }

    fn attach(&mut self) -> Result<(), EngineError> {
        if self.attached {
            return Err(EngineError::new("renderer still attached to a previous image"));
        }
        self.attached = true;
        Ok(())
    }

    /// Scale `content` to fit the canvas, keep its aspect ratio and centre it.
    fn place_on_canvas(&self, content: &RgbImage, filter: FilterType) -> RgbImage {
        let (cw, ch) = content.dimensions();
        let scale = (self.width as f32 / cw as f32).min(self.height as f32 / ch as f32);
        let fw = ((cw as f32 * scale).round() as u32).clamp(1, self.width);
        let fh = ((ch as f32 * scale).round() as u32).clamp(1, self.height);

        let fitted = imageops::resize(content, fw, fh, filter);
        let mut canvas = RgbImage::from_pixel(self.width, self.height, self.background);
        imageops::overlay(
            &mut canvas,
            &fitted,
            i64::from((self.width - fw) / 2),
            i64::from((self.height - fh) / 2),
        );
        canvas
    }
}

impl RenderTarget for RasterRenderer {
    type Image = Slice;
    type Labels = GrayImage;
    type Rendered = RgbImage;

    fn reset(&mut self) {
        self.attached = false;
    }

    fn render_plain(&mut self, image: &Slice) -> Result<RgbImage, EngineError> {
        self.attach()?;

        let (lo, hi) = image
            .pixels()
            .map(|p| p.0[0])
            .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), v| (lo.min(v), hi.max(v)));
        let span = if hi > lo { hi - lo } else { 1.0 };

        let gray = RgbImage::from_fn(image.width(), image.height(), |x, y| {
            let v = ((image.get_pixel(x, y).0[0] - lo) / span * 255.0).round() as u8;
            Rgb([v, v, v])
        });
        Ok(self.place_on_canvas(&gray, FilterType::Triangle))
    }

    fn render_labeled(&mut self, labels: &GrayImage, style: &LabelStyle) -> Result<RgbImage, EngineError> {
        self.attach()?;

        let mask = GrayImage::from_fn(labels.width(), labels.height(), |x, y| {
            Luma([u8::from(labels.get_pixel(x, y).0[0] == style.label) * 255])
        });
        let interior = match u8::try_from(style.border_radius) {
            Ok(0) => mask.clone(),
            Ok(r) => imageproc::morphology::erode(&mask, Norm::LInf, r),
            Err(_) => GrayImage::new(mask.width(), mask.height()),
        };

        let background = self.background;
        let colored = RgbImage::from_fn(labels.width(), labels.height(), |x, y| {
            if mask.get_pixel(x, y).0[0] == 0 {
                background
            } else if interior.get_pixel(x, y).0[0] == 0 {
                blend(background, style.color, style.border_opacity)
            } else {
                blend(background, style.color, style.opacity)
            }
        });
        Ok(self.place_on_canvas(&colored, FilterType::Nearest))
    }

    fn write_to_file(&mut self, rendered: &RgbImage, path: &Path) -> Result<(), EngineError> {
        rendered
            .save(path)
            .map_err(|e| EngineError::new(format!("cannot write {}: {}", path.display(), e)))
    }
}

fn blend(base: Rgb<u8>, color: [u8; 3], alpha: f32) -> Rgb<u8> {
    let a = alpha.clamp(0.0, 1.0);
    Rgb(std::array::from_fn(|c| {
        (f32::from(base.0[c]) * (1.0 - a) + f32::from(color[c]) * a).round() as u8
    }))
}

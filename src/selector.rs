use image::imageops::{self, FilterType};
use image::RgbImage;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::types::{Intrinsics, CameraModel, Point3D};

pub const BLOCK_SIZE: usize = 32;
pub const GRADIENT_SQ_THRESHOLD: u32 = 50;
pub const MAX_POINTS_PER_FRAME: usize = 2000;
pub const MIN_DEPTH: f32 = 0.1;
pub const MAX_DEPTH: f32 = 9.5;
/// Metric depth that a full-scale (255) depth pixel stands for.
pub const DEPTH_RANGE: f32 = 10.0;
pub const DEPTH_SCALE: f32 = 2.0;

/// Tuning for [`PixelSelector`]. Defaults are the DSO-style constants above.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectorConfig {
    pub block_size: usize,
    pub gradient_sq_threshold: u32,
    pub max_points_per_frame: usize,
    pub min_depth: f32,
    pub max_depth: f32,
    pub depth_range: f32,
    pub depth_scale: f32,
}

impl Default for SelectorConfig {
    fn default() -> Self {
        Self {
            block_size: BLOCK_SIZE,
            gradient_sq_threshold: GRADIENT_SQ_THRESHOLD,
            max_points_per_frame: MAX_POINTS_PER_FRAME,
            min_depth: MIN_DEPTH,
            max_depth: MAX_DEPTH,
            depth_range: DEPTH_RANGE,
            depth_scale: DEPTH_SCALE,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Candidate {
    u: usize,
    v: usize,
    gradient: u32,
}

/// Grid-based gradient pixel selection followed by pinhole back-projection.
#[derive(Debug, Clone, Copy, Default)]
pub struct PixelSelector {
    config: SelectorConfig,
}

impl PixelSelector {
    pub fn new(config: SelectorConfig) -> Self {
        Self { config }
    }

    /// Camera-frame points for the most textured pixel of every block.
    ///
    /// Depth is read from the red channel of `depth`. `color` is resampled
    /// to the depth resolution when the sizes differ. Empty inputs give an
    /// empty result.
    pub fn select(&self, color: &RgbImage, depth: &RgbImage, camera: &CameraModel) -> Vec<Point3D> {
        let (width, height) = depth.dimensions();
        if width == 0 || height == 0 || color.width() == 0 || color.height() == 0 {
            return Vec::new();
        }

        let resized;
        let color = if color.dimensions() != depth.dimensions() {
            resized = imageops::resize(color, width, height, FilterType::Triangle);
            &resized
        } else {
            color
        };

        let intr = camera.intrinsics(width as usize, height as usize);

        // 1. one candidate per textured block ---------------------------------
        let mut candidates = self.block_candidates(color);

        // 2. strongest first, capped ------------------------------------------
        candidates.sort_by(|a, b| b.gradient.cmp(&a.gradient));
        candidates.truncate(self.config.max_points_per_frame);

        // 3. back-project -----------------------------------------------------
        candidates
            .iter()
            .filter_map(|c| self.back_project(c, depth, &intr))
            .collect()
    }

    /// Metric depth for a raw 8-bit sample, or `None` outside the valid range.
    ///
    /// Both bounds are inclusive: exactly `max_depth` is kept.
    pub fn depth_from_sample(&self, raw: u8) -> Option<f32> {
        let d = raw as f32 / 255.0 * self.config.depth_range;
        self.in_depth_range(d).then_some(d)
    }

    pub fn in_depth_range(&self, depth: f32) -> bool {
        !(depth < self.config.min_depth || depth > self.config.max_depth)
    }

    fn back_project(&self, c: &Candidate, depth: &RgbImage, intr: &Intrinsics) -> Option<Point3D> {
        let raw = depth.get_pixel(c.u as u32, c.v as u32)[0];
        let z = self.depth_from_sample(raw)? * self.config.depth_scale;
        let x = (c.u as f32 - intr.ppx) * z / intr.fx;
        let y = (c.v as f32 - intr.ppy) * z / intr.fy;
        Some(Point3D::new(x, y, z))
    }

    fn block_candidates(&self, color: &RgbImage) -> Vec<Candidate> {
        let width = color.width() as usize;
        let height = color.height() as usize;
        let block = self.config.block_size.max(1);
        let blocks_x = width.div_ceil(block);
        let blocks_y = height.div_ceil(block);
        let threshold = self.config.gradient_sq_threshold;
        let raw = color.as_raw();

        (0..blocks_x * blocks_y)
            .into_par_iter()
            .filter_map(|b| {
                let x0 = (b % blocks_x) * block;
                let y0 = (b / blocks_x) * block;
                // A pixel needs a right and a lower neighbour for the forward
                // difference, so the last image row/column never qualifies.
                let x1 = (x0 + block).min(width - 1);
                let y1 = (y0 + block).min(height - 1);

                let mut best = Candidate { u: x0, v: y0, gradient: 0 };
                for v in y0..y1 {
                    for u in x0..x1 {
                        let g = gradient_sq(raw, width, u, v);
                        if g > best.gradient {
                            best = Candidate { u, v, gradient: g };
                        }
                    }
                }
                (best.gradient > threshold).then_some(best)
            })
            .collect()
    }
}

/// Squared forward difference of the green channel at `(u, v)`.
#[inline]
fn gradient_sq(raw: &[u8], width: usize, u: usize, v: usize) -> u32 {
    let green = |x: usize, y: usize| raw[(y * width + x) * 3 + 1] as i32;
    let c = green(u, v);
    let dx = c - green(u + 1, v);
    let dy = c - green(u, v + 1);
    (dx * dx + dy * dy) as u32
}

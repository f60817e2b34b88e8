use bytemuck::{Pod, Zeroable};
use image::RgbImage;
use serde::{Deserialize, Serialize};

use crate::pose::CameraPose;

/// Opaque black, the color every selected point is drawn with.
pub const POINT_COLOR: [u8; 4] = [0, 0, 0, 255];

/// A 3-D point with a packed RGBA color.
///
/// `repr(C)` with no padding so a point slice can be cast to bytes for the
/// wire and for numpy.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct Point3D {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub color: [u8; 4],
}

impl Point3D {
    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z, color: POINT_COLOR }
    }

    pub fn with_color(x: f32, y: f32, z: f32, color: [u8; 4]) -> Self {
        Self { x, y, z, color }
    }

    /// Same color, new coordinates.
    pub fn moved_to(&self, x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z, color: self.color }
    }

    pub fn xyz(&self) -> [f32; 3] {
        [self.x, self.y, self.z]
    }
}

/// Pinhole intrinsics in pixels for one image resolution.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Intrinsics {
    pub width: usize,
    pub height: usize,
    pub fx: f32,
    pub fy: f32,
    pub ppx: f32,
    pub ppy: f32,
}

/// Calibration expressed relative to the image size (`camera.txt`).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RelativeCalibration {
    pub fx_rel: f32,
    pub fy_rel: f32,
    pub cx_rel: f32,
    pub cy_rel: f32,
}

/// Where intrinsics come from for a session.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum CameraModel {
    Calibrated(RelativeCalibration),
    #[default]
    Default,
}

// Fallback focal lengths and principal point, measured at 640x480.
const DEFAULT_REF_WIDTH: f32 = 640.0;
const DEFAULT_REF_HEIGHT: f32 = 480.0;
const DEFAULT_FX: f32 = 256.0;
const DEFAULT_FY: f32 = 254.4;
const DEFAULT_PPX: f32 = 319.5;
const DEFAULT_PPY: f32 = 239.5;

impl CameraModel {
    /// Resolve pixel intrinsics for an image of `width` x `height`.
    pub fn intrinsics(&self, width: usize, height: usize) -> Intrinsics {
        let (w, h) = (width as f32, height as f32);
        match self {
            CameraModel::Calibrated(c) => Intrinsics {
                width,
                height,
                fx: c.fx_rel * w,
                fy: c.fy_rel * h,
                ppx: c.cx_rel * w,
                ppy: c.cy_rel * h,
            },
            CameraModel::Default => {
                let sx = w / DEFAULT_REF_WIDTH;
                let sy = h / DEFAULT_REF_HEIGHT;
                Intrinsics {
                    width,
                    height,
                    fx: DEFAULT_FX * sx,
                    fy: DEFAULT_FY * sy,
                    ppx: DEFAULT_PPX * sx,
                    ppy: DEFAULT_PPY * sy,
                }
            }
        }
    }

    pub fn is_calibrated(&self) -> bool {
        matches!(self, CameraModel::Calibrated(_))
    }
}

/// A color image and where the camera was when it was taken.
#[derive(Debug, Clone)]
pub struct VisualFrame {
    pub image: RgbImage,
    pub pose: CameraPose,
    /// Seconds; only used for pacing recorded playback.
    pub timestamp: f64,
}

impl VisualFrame {
    pub fn new(image: RgbImage, pose: CameraPose, timestamp: f64) -> Self {
        Self { image, pose, timestamp }
    }

    /// Live frames carry no tracking, so their pose is identity.
    pub fn untracked(image: RgbImage, timestamp: f64) -> Self {
        Self::new(image, CameraPose::identity(), timestamp)
    }
}

/// Inference output joined with the frame it was computed from.
#[derive(Debug, Clone)]
pub struct DepthResult {
    /// Depth encoded in the red channel, 0..=255 over the metric range.
    pub depth_map: RgbImage,
    pub color_image: RgbImage,
    pub pose: CameraPose,
    pub inference_time_s: f64,
    pub image_dims: (u32, u32),
    pub model_label: String,
}

/// Which kind of source a session is fed from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageSourceMode {
    Camera,
    Dataset,
    Playback,
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn point_is_sixteen_bytes() {
        assert_eq!(std::mem::size_of::<Point3D>(), 16);
        let pts = [Point3D::new(1.0, 2.0, 3.0); 4];
        assert_eq!(bytemuck::cast_slice::<Point3D, u8>(&pts).len(), 64);
    }

    #[test]
    fn default_intrinsics_match_reference_resolution() {
        let intr = CameraModel::Default.intrinsics(640, 480);
        assert_relative_eq!(intr.fx, 256.0);
        assert_relative_eq!(intr.fy, 254.4);
        assert_relative_eq!(intr.ppx, 319.5);
        assert_relative_eq!(intr.ppy, 239.5);
    }

    #[test]
    fn default_intrinsics_scale_with_image() {
        let intr = CameraModel::Default.intrinsics(320, 240);
        assert_relative_eq!(intr.fx, 128.0);
        assert_relative_eq!(intr.ppy, 119.75);
    }

    #[test]
    fn calibrated_intrinsics_are_relative() {
        let model = CameraModel::Calibrated(RelativeCalibration {
            fx_rel: 0.5,
            fy_rel: 0.75,
            cx_rel: 0.5,
            cy_rel: 0.25,
        });
        let intr = model.intrinsics(200, 100);
        assert_relative_eq!(intr.fx, 100.0);
        assert_relative_eq!(intr.fy, 75.0);
        assert_relative_eq!(intr.ppx, 100.0);
        assert_relative_eq!(intr.ppy, 25.0);
        assert!(model.is_calibrated());
    }
}

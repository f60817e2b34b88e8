//! Payloads exchanged over zenoh.

use anyhow::{bail, Context};
use bincode::{Decode, Encode};
use image::RgbImage;
use snap::raw::{Decoder, Encoder};

use crate::fusion::MapUpdate;
use crate::types::Point3D;

fn bincode_config() -> bincode::config::Configuration {
    bincode::config::standard()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
pub enum FrameEncoding {
    Jpeg,
    /// Raw RGB8, snappy-compressed.
    Rgb8Snappy,
}

/// A color frame published by a camera node.
#[derive(Debug, Clone, Encode, Decode)]
pub struct CameraFrameWire {
    pub timestamp: f64,
    pub width: u16,
    pub height: u16,
    pub encoding: FrameEncoding,
    pub data: Vec<u8>,
}

impl CameraFrameWire {
    pub fn jpeg(timestamp: f64, width: u16, height: u16, jpeg: Vec<u8>) -> Self {
        Self { timestamp, width, height, encoding: FrameEncoding::Jpeg, data: jpeg }
    }

    pub fn from_rgb(timestamp: f64, image: &RgbImage) -> anyhow::Result<Self> {
        let mut encoder = Encoder::new();
        let data = encoder.compress_vec(image.as_raw())?;
        Ok(Self {
            timestamp,
            width: u16::try_from(image.width()).context("frame too wide")?,
            height: u16::try_from(image.height()).context("frame too tall")?,
            encoding: FrameEncoding::Rgb8Snappy,
            data,
        })
    }

    pub fn encode(&self) -> anyhow::Result<Vec<u8>> {
        Ok(bincode::encode_to_vec(self, bincode_config())?)
    }

    pub fn decode(bytes: &[u8]) -> anyhow::Result<Self> {
        let (frame, _) = bincode::decode_from_slice(bytes, bincode_config())?;
        Ok(frame)
    }

    pub fn to_image(&self) -> anyhow::Result<RgbImage> {
        let image = match self.encoding {
            FrameEncoding::Jpeg => {
                turbojpeg::decompress_image::<image::Rgb<u8>>(&self.data).context("jpeg decode")?
            }
            FrameEncoding::Rgb8Snappy => {
                let mut decoder = Decoder::new();
                let raw = decoder.decompress_vec(&self.data).context("snappy decode")?;
                RgbImage::from_raw(self.width as u32, self.height as u32, raw)
                    .context("raw frame size does not match its header")?
            }
        };
        if image.dimensions() != (self.width as u32, self.height as u32) {
            bail!(
                "frame is {}x{}, header says {}x{}",
                image.width(),
                image.height(),
                self.width,
                self.height
            );
        }
        Ok(image)
    }
}

/// Reply of the depth-inference queryable.
#[derive(Debug, Clone, Encode, Decode)]
pub struct InferenceReplyWire {
    pub status: String,
    pub model_name: String,
    pub model_version: String,
    pub inference_ms: f64,
    pub total_ms: f64,
    pub original_width: u32,
    pub original_height: u32,
    pub depth_width: u32,
    pub depth_height: u32,
    /// Depth map as PNG, grayscale or RGB.
    pub depth_png: Vec<u8>,
}

impl InferenceReplyWire {
    pub fn decode(bytes: &[u8]) -> anyhow::Result<Self> {
        let (reply, _) = bincode::decode_from_slice(bytes, bincode_config())?;
        Ok(reply)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub struct HealthWire {
    pub status: String,
    pub model: String,
    pub ready: bool,
}

impl HealthWire {
    pub fn is_healthy(&self) -> bool {
        self.ready && (self.status == "healthy" || self.status == "success")
    }

    pub fn decode(bytes: &[u8]) -> anyhow::Result<Self> {
        let (health, _) = bincode::decode_from_slice(bytes, bincode_config())?;
        Ok(health)
    }
}

/// Render set and trajectory as published to viewers.
#[derive(Debug, Clone, Encode, Decode)]
pub struct CloudWire {
    pub frame_index: u64,
    pub is_keyframe: bool,
    pub map_points: u64,
    pub keyframes: u64,
    pub trajectory: Vec<[f32; 3]>,
    pub point_count: u64,
    /// `Point3D`s as raw bytes, zstd-compressed.
    pub points_zstd: Vec<u8>,
}

const CLOUD_ZSTD_LEVEL: i32 = 3;

impl CloudWire {
    pub fn from_update(update: &MapUpdate) -> anyhow::Result<Self> {
        let raw: &[u8] = bytemuck::cast_slice(&update.points);
        let points_zstd = zstd::encode_all(raw, CLOUD_ZSTD_LEVEL)?;
        Ok(Self {
            frame_index: update.frame_index,
            is_keyframe: update.is_keyframe,
            map_points: update.map_points as u64,
            keyframes: update.keyframes() as u64,
            trajectory: update.trajectory.iter().map(|p| p.translation()).collect(),
            point_count: update.points.len() as u64,
            points_zstd,
        })
    }

    pub fn points(&self) -> anyhow::Result<Vec<Point3D>> {
        let raw = zstd::decode_all(&self.points_zstd[..])?;
        let expected = self.point_count as usize * std::mem::size_of::<Point3D>();
        if raw.len() != expected {
            bail!("cloud payload is {} bytes, expected {}", raw.len(), expected);
        }
        // The decompressed buffer carries no alignment guarantee.
        Ok(bytemuck::pod_collect_to_vec(&raw))
    }

    pub fn encode(&self) -> anyhow::Result<Vec<u8>> {
        Ok(bincode::encode_to_vec(self, bincode_config())?)
    }

    pub fn decode(bytes: &[u8]) -> anyhow::Result<Self> {
        let (cloud, _) = bincode::decode_from_slice(bytes, bincode_config())?;
        Ok(cloud)
    }
}

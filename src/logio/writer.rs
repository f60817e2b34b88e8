use std::io::Write;
use std::{fs::File, path::Path};

use anyhow::Context;
use byteorder::{LittleEndian, WriteBytesExt};
use image::RgbImage;
use tracing::warn;

use super::{FRAME_RECORD, JPEG_QUALITY};
use crate::pose::CameraPose;
use crate::source::FrameSource;
use crate::types::{CameraModel, VisualFrame};

pub struct FrameLogWriter(std::io::BufWriter<File>);

impl FrameLogWriter {
    pub fn create(path: &Path) -> anyhow::Result<Self> {
        let file = File::create(path)
            .with_context(|| format!("failed to create log {}", path.display()))?;
        Ok(Self(std::io::BufWriter::new(file)))
    }

    pub fn write(&mut self, frame: &VisualFrame) -> anyhow::Result<()> {
        let jpeg = encode_jpeg(&frame.image)?;
        self.write_encoded(frame.timestamp, &frame.pose, &jpeg)
    }

    /// Append a record whose image is already JPEG-encoded.
    pub fn write_encoded(&mut self, timestamp: f64, pose: &CameraPose, jpeg: &[u8]) -> anyhow::Result<()> {
        self.0.write_u8(FRAME_RECORD)?;
        self.0.write_f64::<LittleEndian>(timestamp)?;
        for v in pose.to_column_major() {
            self.0.write_f32::<LittleEndian>(v)?;
        }
        self.0.write_u32::<LittleEndian>(u32::try_from(jpeg.len())?)?;
        self.0.write_all(jpeg)?;
        Ok(())
    }

    pub fn finish(mut self) -> anyhow::Result<()> {
        self.0.flush()?;
        Ok(())
    }
}

fn encode_jpeg(image: &RgbImage) -> anyhow::Result<Vec<u8>> {
    let jpeg = turbojpeg::compress_image(image, JPEG_QUALITY, turbojpeg::Subsamp::Sub2x2)
        .context("jpeg encode")?;
    Ok(jpeg.to_vec())
}

/// Tees every frame of `S` into a frame log.
///
/// A write failure disables recording for the rest of the session; the
/// frames themselves still flow through.
pub struct Recording<S> {
    inner: S,
    writer: Option<FrameLogWriter>,
}

impl<S: FrameSource> Recording<S> {
    pub fn new(inner: S, writer: FrameLogWriter) -> Self {
        Self { inner, writer: Some(writer) }
    }

    fn close_writer(&mut self) {
        if let Some(writer) = self.writer.take() {
            if let Err(e) = writer.finish() {
                warn!("failed to flush frame log: {e:#}");
            }
        }
    }
}

impl<S: FrameSource> FrameSource for Recording<S> {
    async fn next_frame(&mut self) -> anyhow::Result<Option<VisualFrame>> {
        let Some(frame) = self.inner.next_frame().await? else {
            return Ok(None);
        };
        if self.writer.is_none() {
            return Ok(Some(frame));
        }

        let (frame, jpeg) = tokio::task::spawn_blocking(move || {
            let jpeg = encode_jpeg(&frame.image);
            (frame, jpeg)
        })
        .await?;

        if let Some(writer) = self.writer.as_mut() {
            let written = jpeg.and_then(|jpeg| writer.write_encoded(frame.timestamp, &frame.pose, &jpeg));
            if let Err(e) = written {
                warn!("frame log write failed, recording stopped: {e:#}");
                self.writer = None;
            }
        }
        Ok(Some(frame))
    }

    fn calibration(&self) -> CameraModel {
        self.inner.calibration()
    }

    fn stop(&mut self) {
        self.inner.stop();
        self.close_writer();
    }
}

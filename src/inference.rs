//! Depth inference client.
//!
//! The model runs in a separate service reachable over zenoh. A request is a
//! query on the predict key carrying a JPEG of the color frame; the reply is
//! an [`InferenceReplyWire`] with the depth map as an embedded PNG.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use image::imageops::FilterType;
use image::RgbImage;
use thiserror::Error;
use tracing::{debug, info};

use crate::config::{InferenceConfig, ZenohKeys};
use crate::types::{DepthResult, VisualFrame};
use crate::wire::{HealthWire, InferenceReplyWire};

const SUCCESS_STATUS: &str = "success";
const HEALTH_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum InferenceError {
    #[error("inference service returned status '{status}'")]
    Status { status: String },
    #[error("inference transport failed: {0}")]
    Transport(String),
    #[error("inference service did not reply")]
    NoReply,
    #[error("malformed inference reply: {0}")]
    Decode(String),
}

/// Decoded reply of one inference request.
#[derive(Debug, Clone)]
pub struct InferenceResponse {
    pub status: String,
    /// Depth in the red channel; grayscale replies are widened to RGB.
    pub depth_map: RgbImage,
    pub inference_time_s: f64,
    pub original_dims: (u32, u32),
    pub depth_dims: (u32, u32),
    pub model_label: String,
}

impl InferenceResponse {
    pub fn from_wire(reply: InferenceReplyWire) -> Result<Self, InferenceError> {
        if reply.status != SUCCESS_STATUS {
            return Err(InferenceError::Status { status: reply.status });
        }
        let depth_map = image::load_from_memory(&reply.depth_png)
            .map_err(|e| InferenceError::Decode(format!("depth png: {e}")))?
            .to_rgb8();

        Ok(Self {
            status: reply.status,
            depth_map,
            inference_time_s: reply.inference_ms / 1000.0,
            original_dims: (reply.original_width, reply.original_height),
            depth_dims: (reply.depth_width, reply.depth_height),
            model_label: format!("{} {}", reply.model_name, reply.model_version),
        })
    }
}

impl DepthResult {
    /// Join an inference reply with the frame it was computed from.
    pub fn from_response(response: InferenceResponse, frame: VisualFrame) -> Self {
        Self {
            depth_map: response.depth_map,
            color_image: frame.image,
            pose: frame.pose,
            inference_time_s: response.inference_time_s,
            image_dims: response.depth_dims,
            model_label: response.model_label,
        }
    }
}

/// Anything that turns a color image into a depth map.
pub trait DepthEstimator: Send + Sync + 'static {
    fn estimate(
        &self,
        image: &RgbImage,
    ) -> impl Future<Output = Result<InferenceResponse, InferenceError>> + Send;
}

pub struct ZenohDepthClient {
    session: Arc<zenoh::Session>,
    predict_key: String,
    health_key: String,
    config: InferenceConfig,
}

impl ZenohDepthClient {
    pub fn new(session: Arc<zenoh::Session>, config: &InferenceConfig, keys: &ZenohKeys) -> Self {
        Self {
            session,
            predict_key: keys.predict_key.clone(),
            health_key: keys.health_key.clone(),
            config: *config,
        }
    }

    /// Resize to the request size and JPEG-encode.
    fn encode_request(&self, image: &RgbImage) -> Result<Vec<u8>, InferenceError> {
        let (w, h) = (self.config.request_width, self.config.request_height);
        let jpeg = if image.dimensions() == (w, h) {
            turbojpeg::compress_image(image, self.config.jpeg_quality, turbojpeg::Subsamp::Sub2x2)
        } else {
            let resized = image::imageops::resize(image, w, h, FilterType::Triangle);
            turbojpeg::compress_image(&resized, self.config.jpeg_quality, turbojpeg::Subsamp::Sub2x2)
        };
        jpeg.map(|buf| buf.to_vec())
            .map_err(|e| InferenceError::Transport(format!("jpeg encode: {e}")))
    }

    async fn query(&self, key: &str, payload: Vec<u8>, timeout: Duration) -> Result<Vec<u8>, InferenceError> {
        let replies = self
            .session
            .get(key)
            .payload(payload)
            .timeout(timeout)
            .await
            .map_err(|e| InferenceError::Transport(e.to_string()))?;

        let reply = replies.recv_async().await.map_err(|_| InferenceError::NoReply)?;
        match reply.result() {
            Ok(sample) => Ok(sample.payload().to_bytes().into_owned()),
            Err(err) => Err(InferenceError::Transport(format!(
                "error reply: {}",
                String::from_utf8_lossy(&err.payload().to_bytes())
            ))),
        }
    }

    /// Ask the service whether a model is loaded.
    pub async fn check_health(&self) -> anyhow::Result<HealthWire> {
        let bytes = self.query(&self.health_key, Vec::new(), HEALTH_TIMEOUT).await?;
        let health = HealthWire::decode(&bytes)?;
        info!(status = %health.status, model = %health.model, ready = health.ready, "inference service health");
        Ok(health)
    }
}

impl DepthEstimator for ZenohDepthClient {
    async fn estimate(&self, image: &RgbImage) -> Result<InferenceResponse, InferenceError> {
        let jpeg = self.encode_request(image)?;
        debug!(bytes = jpeg.len(), key = %self.predict_key, "sending inference request");

        let bytes = self
            .query(&self.predict_key, jpeg, self.config.timeout())
            .await?;
        let reply = InferenceReplyWire::decode(&bytes)
            .map_err(|e| InferenceError::Decode(format!("{e:#}")))?;
        debug!(total_ms = reply.total_ms, inference_ms = reply.inference_ms, "inference reply");
        InferenceResponse::from_wire(reply)
    }
}

//! Live dense mapping from monocular depth estimates.
//!
//! Color frames come from a camera topic, an image sequence or a recorded
//! log. Each frame is sent to a depth-inference service, the high-gradient
//! pixels of the reply are back-projected into world space, and every
//! keyframe's points are kept in a bounded global map. After each frame the
//! map plus the live points is published for viewers.

pub mod cli;
pub mod config;
pub mod fusion;
pub mod inference;
pub mod logio;
pub mod map;
pub mod pose;
pub mod publish;
pub mod selector;
pub mod session;
pub mod source;
pub mod stats;
pub mod types;
pub mod wire;

#[cfg(feature = "python")]
mod python;

pub use config::AppConfig;
pub use fusion::{FusionPipeline, MapUpdate};
pub use inference::{DepthEstimator, InferenceError, InferenceResponse, ZenohDepthClient};
pub use map::{GlobalMap, MapConfig};
pub use pose::{pose_from_quaternion, transform_point, CameraPose};
pub use selector::{PixelSelector, SelectorConfig};
pub use session::{CaptureSession, CaptureState, FrameError};
pub use source::FrameSource;
pub use types::{CameraModel, DepthResult, Point3D, VisualFrame};

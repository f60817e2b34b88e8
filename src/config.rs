use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};

use crate::map::MapConfig;
use crate::selector::SelectorConfig;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub zenoh: ZenohKeys,
    pub inference: InferenceConfig,
    pub dataset: DatasetConfig,
    pub mapping: MapConfig,
    pub selector: SelectorConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ZenohKeys {
    pub camera_key: String,
    pub predict_key: String,
    pub health_key: String,
    pub cloud_key: String,
}

impl Default for ZenohKeys {
    fn default() -> Self {
        Self {
            camera_key: "camera/rgb".into(),
            predict_key: "depth/predict".into(),
            health_key: "depth/health".into(),
            cloud_key: "reconstruction/cloud".into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InferenceConfig {
    pub timeout_ms: u64,
    pub request_width: u32,
    pub request_height: u32,
    pub jpeg_quality: i32,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 60_000,
            request_width: 640,
            request_height: 480,
            jpeg_quality: 80,
        }
    }
}

impl InferenceConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatasetConfig {
    pub frame_delay_ms: u64,
    pub loop_delay_ms: u64,
    pub loop_playback: bool,
}

impl Default for DatasetConfig {
    fn default() -> Self {
        Self {
            frame_delay_ms: 100,
            loop_delay_ms: 1000,
            loop_playback: true,
        }
    }
}

impl DatasetConfig {
    pub fn frame_delay(&self) -> Duration {
        Duration::from_millis(self.frame_delay_ms)
    }

    pub fn loop_delay(&self) -> Duration {
        Duration::from_millis(self.loop_delay_ms)
    }
}

impl AppConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        Self::from_yaml(&content).with_context(|| format!("invalid config {}", path.display()))
    }

    pub fn from_yaml(content: &str) -> anyhow::Result<Self> {
        // An empty file is a valid "all defaults" config.
        let config: AppConfig = if content.trim().is_empty() {
            AppConfig::default()
        } else {
            serde_yaml::from_str(content)?
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.mapping.keyframe_interval == 0 {
            bail!("mapping.keyframe_interval must be at least 1");
        }
        if self.mapping.max_global_points == 0 {
            bail!("mapping.max_global_points must be at least 1");
        }
        let s = &self.selector;
        if s.block_size < 2 {
            bail!("selector.block_size must be at least 2");
        }
        if !(s.min_depth >= 0.0 && s.min_depth <= s.max_depth) {
            bail!("selector depth range [{}, {}] is empty", s.min_depth, s.max_depth);
        }
        if !(s.depth_range > 0.0 && s.depth_scale > 0.0) {
            bail!("selector.depth_range and depth_scale must be positive");
        }
        if !(1..=100).contains(&self.inference.jpeg_quality) {
            bail!("inference.jpeg_quality must be within 1..=100");
        }
        if self.inference.request_width == 0 || self.inference.request_height == 0 {
            bail!("inference request size must be non-zero");
        }
        Ok(())
    }
}

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::pose::CameraPose;
use crate::types::Point3D;

pub const MAX_GLOBAL_POINTS: usize = 200_000;
pub const KEYFRAME_INTERVAL: u64 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MapConfig {
    pub keyframe_interval: u64,
    pub max_global_points: usize,
}

impl Default for MapConfig {
    fn default() -> Self {
        Self {
            keyframe_interval: KEYFRAME_INTERVAL,
            max_global_points: MAX_GLOBAL_POINTS,
        }
    }
}

/// One processed frame as seen by the map.
///
/// Ticks are zero-based: the first frame of a session is tick 0 and is a
/// keyframe, then every `keyframe_interval`-th frame after it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameTick {
    index: u64,
    keyframe: bool,
}

impl FrameTick {
    pub fn index(&self) -> u64 {
        self.index
    }

    pub fn is_keyframe(&self) -> bool {
        self.keyframe
    }
}

/// Read-only copy of the map handed to renderers.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MapSnapshot {
    pub points: Vec<Point3D>,
    pub trajectory: Vec<CameraPose>,
}

/// Bounded world-frame point map plus the keyframe trajectory.
#[derive(Debug)]
pub struct GlobalMap {
    config: MapConfig,
    points: VecDeque<Point3D>,
    trajectory: Vec<CameraPose>,
    frame_counter: u64,
}

impl GlobalMap {
    pub fn new(config: MapConfig) -> Self {
        Self {
            config,
            points: VecDeque::new(),
            trajectory: Vec::new(),
            frame_counter: 0,
        }
    }

    pub fn reset(&mut self) {
        self.points.clear();
        self.trajectory.clear();
        self.frame_counter = 0;
    }

    /// Count one processed frame and report whether it is a keyframe.
    pub fn begin_frame(&mut self) -> FrameTick {
        let index = self.frame_counter;
        self.frame_counter += 1;
        FrameTick {
            index,
            keyframe: index % self.config.keyframe_interval.max(1) == 0,
        }
    }

    /// Append a keyframe's world points and pose. Non-keyframe ticks are
    /// ignored. Returns how many points were evicted to stay within capacity.
    pub fn maybe_insert_keyframe(
        &mut self,
        tick: FrameTick,
        pose: CameraPose,
        world_points: impl IntoIterator<Item = Point3D>,
    ) -> Option<usize> {
        if !tick.keyframe {
            return None;
        }

        self.trajectory.push(pose);
        self.points.extend(world_points);

        let excess = self.points.len().saturating_sub(self.config.max_global_points);
        if excess > 0 {
            self.points.drain(..excess);
            tracing::debug!(excess, kept = self.points.len(), "evicted oldest map points");
        }
        Some(excess)
    }

    pub fn snapshot(&self) -> MapSnapshot {
        MapSnapshot {
            points: self.points.iter().copied().collect(),
            trajectory: self.trajectory.clone(),
        }
    }

    /// History followed by `live`, as one render-ready vector.
    pub fn merged_with(&self, live: &[Point3D]) -> Vec<Point3D> {
        let mut out = Vec::with_capacity(self.points.len() + live.len());
        out.extend(self.points.iter().copied());
        out.extend_from_slice(live);
        out
    }

    pub fn trajectory(&self) -> &[CameraPose] {
        &self.trajectory
    }

    pub fn point_count(&self) -> usize {
        self.points.len()
    }

    pub fn keyframe_count(&self) -> usize {
        self.trajectory.len()
    }

    pub fn frame_counter(&self) -> u64 {
        self.frame_counter
    }
}

impl Default for GlobalMap {
    fn default() -> Self {
        Self::new(MapConfig::default())
    }
}

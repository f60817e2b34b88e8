use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::map::{GlobalMap, MapConfig, MapSnapshot};
use crate::pose::CameraPose;
use crate::selector::{PixelSelector, SelectorConfig};
use crate::types::{CameraModel, DepthResult, Point3D};

/// Everything a renderer needs after one frame.
#[derive(Debug, Clone, Default)]
pub struct MapUpdate {
    pub frame_index: u64,
    pub is_keyframe: bool,
    /// Map history followed by the live frame's points, world frame.
    pub points: Vec<Point3D>,
    pub trajectory: Vec<CameraPose>,
    pub live_points: usize,
    pub map_points: usize,
    pub inference_time_s: f64,
}

impl MapUpdate {
    pub fn keyframes(&self) -> usize {
        self.trajectory.len()
    }
}

/// Per-frame fusion: select, transform, update the shared map, merge.
///
/// Cloning is cheap and every clone works on the same map. The map lock is
/// only held for counting, insert/evict and the snapshot copy; selection and
/// transforms run outside it.
#[derive(Debug, Clone)]
pub struct FusionPipeline {
    map: Arc<Mutex<GlobalMap>>,
    selector: PixelSelector,
}

impl FusionPipeline {
    pub fn new(map_config: MapConfig, selector_config: SelectorConfig) -> Self {
        Self {
            map: Arc::new(Mutex::new(GlobalMap::new(map_config))),
            selector: PixelSelector::new(selector_config),
        }
    }

    pub fn reset(&self) {
        self.lock_map().reset();
    }

    pub fn snapshot(&self) -> MapSnapshot {
        self.lock_map().snapshot()
    }

    pub fn frame_counter(&self) -> u64 {
        self.lock_map().frame_counter()
    }

    /// Fuse one frame into the map and return the render set.
    ///
    /// The frame is only counted once its points exist, and counting,
    /// keyframe insert and the snapshot share one lock, so the trajectory
    /// holds exactly one pose per keyframe tick, in tick order.
    pub fn process(&self, frame: &DepthResult, camera: &CameraModel) -> MapUpdate {
        // 1. live points, camera frame -----------------------------------------
        let local = self
            .selector
            .select(&frame.color_image, &frame.depth_map, camera);

        // 2. to world ---------------------------------------------------------
        let world: Vec<Point3D> = local
            .iter()
            .map(|p| frame.pose.transform_point(p))
            .collect();

        // 3. count, keyframe insert, merged snapshot under one lock ------------
        let (tick, points, trajectory, map_points) = {
            let mut map = self.lock_map();
            let tick = map.begin_frame();
            if tick.is_keyframe() {
                // The keyframe selection has the same inputs as the live one.
                map.maybe_insert_keyframe(tick, frame.pose, world.iter().copied());
            }
            (tick, map.merged_with(&world), map.trajectory().to_vec(), map.point_count())
        };

        tracing::debug!(
            frame = tick.index(),
            keyframe = tick.is_keyframe(),
            live = world.len(),
            map_points,
            "fused frame"
        );

        MapUpdate {
            frame_index: tick.index(),
            is_keyframe: tick.is_keyframe(),
            points,
            trajectory,
            live_points: world.len(),
            map_points,
            inference_time_s: frame.inference_time_s,
        }
    }

    fn lock_map(&self) -> MutexGuard<'_, GlobalMap> {
        // Map mutations never panic midway, so a poisoned map is still whole.
        self.map.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for FusionPipeline {
    fn default() -> Self {
        Self::new(MapConfig::default(), SelectorConfig::default())
    }
}

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use image::{Rgb, RgbImage};
use tokio::time::timeout;

use zenoh_depth_fusion::{
    pose_from_quaternion, CaptureSession, CaptureState, DepthEstimator, FrameSource,
    FusionPipeline, InferenceError, InferenceResponse, MapConfig, SelectorConfig, VisualFrame,
};

const SIZE: u32 = 64;
// Four 32-px blocks, one textured pixel each.
const POINTS_PER_FRAME: usize = 4;

/// Green checkerboard: every block has a strong gradient.
fn textured() -> RgbImage {
    RgbImage::from_fn(SIZE, SIZE, |x, y| {
        let g = if (x + y) % 2 == 0 { 255 } else { 0 };
        Rgb([0, g, 0])
    })
}

fn frames(n: usize) -> VecDeque<VisualFrame> {
    (0..n)
        .map(|i| {
            let pose = pose_from_quaternion(i as f32, 0.0, 0.0, 0.0, 0.0, 0.0, 1.0);
            VisualFrame::new(textured(), pose, i as f64 * 0.1)
        })
        .collect()
}

struct VecSource {
    frames: VecDeque<VisualFrame>,
    /// Block forever once the frames run out instead of ending.
    hold_open: bool,
    stopped: Arc<AtomicBool>,
}

impl VecSource {
    fn new(frames: VecDeque<VisualFrame>) -> Self {
        Self { frames, hold_open: false, stopped: Arc::new(AtomicBool::new(false)) }
    }
}

impl FrameSource for VecSource {
    async fn next_frame(&mut self) -> anyhow::Result<Option<VisualFrame>> {
        match self.frames.pop_front() {
            Some(frame) => Ok(Some(frame)),
            None if self.hold_open => std::future::pending().await,
            None => Ok(None),
        }
    }

    fn stop(&mut self) {
        self.stopped.store(true, Ordering::SeqCst);
    }
}

/// Answers every request with a flat mid-range depth map, except the calls
/// listed in `fail_calls`.
#[derive(Default)]
struct FakeEstimator {
    calls: AtomicUsize,
    fail_calls: Vec<usize>,
    fail_all: bool,
}

impl DepthEstimator for FakeEstimator {
    async fn estimate(&self, _image: &RgbImage) -> Result<InferenceResponse, InferenceError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_all || self.fail_calls.contains(&call) {
            return Err(InferenceError::Status { status: "error".into() });
        }
        Ok(InferenceResponse {
            status: "success".into(),
            depth_map: RgbImage::from_pixel(SIZE, SIZE, Rgb([100, 100, 100])),
            inference_time_s: 0.05,
            original_dims: (SIZE, SIZE),
            depth_dims: (SIZE, SIZE),
            model_label: "fake 1".into(),
        })
    }
}

fn session(estimator: FakeEstimator) -> CaptureSession<FakeEstimator> {
    CaptureSession::new(
        estimator,
        FusionPipeline::new(MapConfig::default(), SelectorConfig::default()),
    )
}

#[tokio::test]
async fn twenty_five_frames_make_three_keyframes() {
    let mut capture = session(FakeEstimator::default());
    let updates = capture.updates();
    let source = VecSource::new(frames(25));
    let stopped = source.stopped.clone();

    capture.start(source).await;
    timeout(Duration::from_secs(10), capture.wait()).await.unwrap();

    let pipeline = capture.pipeline();
    assert_eq!(pipeline.frame_counter(), 25);
    let snapshot = pipeline.snapshot();
    let tx: Vec<f32> = snapshot.trajectory.iter().map(|p| p.tx()).collect();
    assert_eq!(tx, vec![0.0, 10.0, 20.0]);
    assert_eq!(snapshot.points.len(), 3 * POINTS_PER_FRAME);

    let last = updates.borrow().clone().unwrap();
    assert_eq!(last.frame_index, 24);
    assert!(!last.is_keyframe);
    assert_eq!(last.keyframes(), 3);
    assert_eq!(last.live_points, POINTS_PER_FRAME);
    assert_eq!(last.points.len(), 4 * POINTS_PER_FRAME);
    assert!(stopped.load(Ordering::SeqCst));
}

#[tokio::test]
async fn failed_inference_drops_only_that_frame() {
    let mut capture = session(FakeEstimator { fail_calls: vec![0], ..Default::default() });

    capture.start(VecSource::new(frames(11))).await;
    timeout(Duration::from_secs(10), capture.wait()).await.unwrap();

    // The first frame never reached fusion, so the second one is tick 0.
    let pipeline = capture.pipeline();
    assert_eq!(pipeline.frame_counter(), 10);
    let snapshot = pipeline.snapshot();
    assert_eq!(snapshot.trajectory.len(), 1);
    assert_eq!(snapshot.trajectory[0].tx(), 1.0);
}

#[tokio::test]
async fn inference_failures_leave_the_map_untouched() {
    let mut capture = session(FakeEstimator { fail_all: true, ..Default::default() });
    let state = capture.state();

    capture.start(VecSource::new(frames(3))).await;
    timeout(Duration::from_secs(10), capture.wait()).await.unwrap();

    assert_eq!(capture.pipeline().frame_counter(), 0);
    assert!(capture.pipeline().snapshot().points.is_empty());
    assert!(capture.updates().borrow().is_none());
    assert!(matches!(&*state.borrow(), CaptureState::Error(_)));
}

#[tokio::test]
async fn stop_keeps_the_map_and_start_resets_it() {
    let mut capture = session(FakeEstimator::default());
    let mut updates = capture.updates();

    let mut source = VecSource::new(frames(3));
    source.hold_open = true;
    let stopped = source.stopped.clone();
    capture.start(source).await;

    timeout(
        Duration::from_secs(10),
        updates.wait_for(|u| u.as_ref().is_some_and(|u| u.frame_index == 2)),
    )
    .await
    .unwrap()
    .unwrap();
    assert!(capture.is_running());

    capture.stop().await;
    assert!(!capture.is_running());
    assert!(stopped.load(Ordering::SeqCst));
    assert_eq!(*capture.state().borrow(), CaptureState::Idle);
    let kept = capture.pipeline().snapshot();
    assert_eq!(kept.trajectory.len(), 1);
    assert_eq!(kept.points.len(), POINTS_PER_FRAME);

    capture.start(VecSource::new(VecDeque::new())).await;
    timeout(Duration::from_secs(10), capture.wait()).await.unwrap();
    assert!(capture.pipeline().snapshot().points.is_empty());
    assert_eq!(capture.pipeline().frame_counter(), 0);
    assert!(capture.updates().borrow().is_none());
}

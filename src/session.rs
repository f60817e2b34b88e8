use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::fusion::{FusionPipeline, MapUpdate};
use crate::inference::{DepthEstimator, InferenceError};
use crate::source::FrameSource;
use crate::stats::{FpsMeter, FrameTimings};
use crate::types::{CameraModel, DepthResult};

const FPS_WINDOW: Duration = Duration::from_secs(1);

/// What the capture loop is doing right now, for status displays.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum CaptureState {
    #[default]
    Idle,
    Processing,
    Success {
        frame_index: u64,
        points: usize,
        inference_time_s: f64,
    },
    Error(String),
}

/// Why one frame produced no update. The session keeps running.
#[derive(Debug, Error)]
pub enum FrameError {
    #[error(transparent)]
    Inference(#[from] InferenceError),
    #[error("fusion task failed: {0}")]
    Fusion(String),
}

struct Running {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

/// Drives one source through inference and fusion.
///
/// Results go out on `watch` channels so any number of consumers can see the
/// newest update without slowing the loop down. The map lives in the
/// pipeline and survives `stop`; `start` clears it.
pub struct CaptureSession<E> {
    estimator: Arc<E>,
    pipeline: FusionPipeline,
    updates: Arc<watch::Sender<Option<Arc<MapUpdate>>>>,
    state: Arc<watch::Sender<CaptureState>>,
    running: Option<Running>,
}

impl<E: DepthEstimator> CaptureSession<E> {
    pub fn new(estimator: E, pipeline: FusionPipeline) -> Self {
        let (updates, _) = watch::channel(None);
        let (state, _) = watch::channel(CaptureState::Idle);
        Self {
            estimator: Arc::new(estimator),
            pipeline,
            updates: Arc::new(updates),
            state: Arc::new(state),
            running: None,
        }
    }

    pub fn pipeline(&self) -> &FusionPipeline {
        &self.pipeline
    }

    pub fn updates(&self) -> watch::Receiver<Option<Arc<MapUpdate>>> {
        self.updates.subscribe()
    }

    pub fn state(&self) -> watch::Receiver<CaptureState> {
        self.state.subscribe()
    }

    pub fn is_running(&self) -> bool {
        self.running.as_ref().is_some_and(|r| !r.task.is_finished())
    }

    /// Begin capturing from `source` with a fresh map. A session already
    /// running is stopped first.
    pub async fn start<S: FrameSource>(&mut self, source: S) {
        self.stop().await;
        self.reset();

        let (shutdown, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(run_capture(
            source,
            self.estimator.clone(),
            self.pipeline.clone(),
            shutdown_rx,
            self.updates.clone(),
            self.state.clone(),
        ));
        self.running = Some(Running { shutdown, task });
        info!("capture started");
    }

    /// Stop capturing and release the source. The map is kept.
    pub async fn stop(&mut self) {
        let Some(running) = self.running.take() else {
            return;
        };
        let _ = running.shutdown.send(true);
        if let Err(e) = running.task.await {
            error!("capture task ended abnormally: {e}");
        }
        self.state.send_replace(CaptureState::Idle);
        info!(frames = self.pipeline.frame_counter(), "capture stopped");
    }

    /// Wait for the running source to run out on its own.
    pub async fn wait(&mut self) {
        if let Some(running) = self.running.as_mut() {
            if let Err(e) = (&mut running.task).await {
                error!("capture task ended abnormally: {e}");
            }
            self.running = None;
        }
    }

    /// Clear the map and the last published update.
    pub fn reset(&self) {
        self.pipeline.reset();
        self.updates.send_replace(None);
    }
}

async fn run_capture<S: FrameSource, E: DepthEstimator>(
    mut source: S,
    estimator: Arc<E>,
    pipeline: FusionPipeline,
    mut shutdown: watch::Receiver<bool>,
    updates: Arc<watch::Sender<Option<Arc<MapUpdate>>>>,
    state: Arc<watch::Sender<CaptureState>>,
) {
    let camera = source.calibration();
    let mut fps = FpsMeter::new(FPS_WINDOW);

    loop {
        let next = tokio::select! {
            _ = shutdown.changed() => break,
            next = source.next_frame() => next,
        };
        let frame = match next {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                info!("source exhausted");
                break;
            }
            Err(e) => {
                error!("source failed: {e:#}");
                state.send_replace(CaptureState::Error(format!("{e:#}")));
                break;
            }
        };

        state.send_replace(CaptureState::Processing);
        let started = Instant::now();

        // Only the wait on inference is cancelled by a stop; fusion always
        // finishes so no map write lands after `stop` returns.
        let response = tokio::select! {
            _ = shutdown.changed() => break,
            response = estimator.estimate(&frame.image) => response,
        };
        let network = started.elapsed();

        let result = match response {
            Ok(response) => {
                let depth = DepthResult::from_response(response, frame);
                fuse(&pipeline, depth, camera).await
            }
            Err(e) => Err(FrameError::from(e)),
        };

        match result {
            Ok(update) => {
                let timings = FrameTimings {
                    network,
                    processing: started.elapsed().saturating_sub(network),
                };
                timings.log(update.frame_index);
                state.send_replace(CaptureState::Success {
                    frame_index: update.frame_index,
                    points: update.points.len(),
                    inference_time_s: update.inference_time_s,
                });
                updates.send_replace(Some(Arc::new(update)));
                if let Some(rate) = fps.tick() {
                    info!(fps = rate, "processing rate");
                }
            }
            Err(e) => {
                warn!("dropping frame: {e}");
                state.send_replace(CaptureState::Error(e.to_string()));
            }
        }
    }

    source.stop();
    debug!("capture loop exited");
}

async fn fuse(
    pipeline: &FusionPipeline,
    depth: DepthResult,
    camera: CameraModel,
) -> Result<MapUpdate, FrameError> {
    let pipeline = pipeline.clone();
    tokio::task::spawn_blocking(move || pipeline.process(&depth, &camera))
        .await
        .map_err(|e| FrameError::Fusion(e.to_string()))
}

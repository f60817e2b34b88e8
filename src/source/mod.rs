use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

use tokio::sync::Notify;
use tokio::task::JoinHandle;

use crate::types::{CameraModel, VisualFrame};

pub mod camera;
pub mod dataset;

pub use camera::ZenohCameraSource;
pub use dataset::DatasetSource;

/// A sequence of frames with a start/stop lifecycle.
///
/// `Ok(None)` means the source is exhausted; `Err` is an unrecoverable
/// failure that ends the session. Per-frame problems (one bad file) are
/// handled inside the source by skipping the frame.
pub trait FrameSource: Send + 'static {
    fn next_frame(&mut self) -> impl Future<Output = anyhow::Result<Option<VisualFrame>>> + Send;

    /// Intrinsics to use for frames from this source.
    fn calibration(&self) -> CameraModel {
        CameraModel::Default
    }

    /// Release the underlying device or files.
    fn stop(&mut self) {}
}

/// Single-slot "keep only latest" buffer between a live producer and the
/// pipeline. Publishing over an unread frame drops the older one.
#[derive(Debug, Default)]
pub struct LatestFrame {
    slot: Mutex<Option<VisualFrame>>,
    notify: Notify,
    dropped: AtomicU64,
    closed: AtomicBool,
}

impl LatestFrame {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish(&self, frame: VisualFrame) {
        let replaced = self
            .slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(frame);
        if replaced.is_some() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
        self.notify.notify_one();
    }

    pub fn take(&self) -> Option<VisualFrame> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner).take()
    }

    /// Wait until a frame is available and take it. `None` once the
    /// producer has closed the slot and nothing is left in it.
    pub async fn next(&self) -> Option<VisualFrame> {
        loop {
            if let Some(frame) = self.take() {
                return Some(frame);
            }
            if self.is_closed() {
                return None;
            }
            self.notify.notified().await;
        }
    }

    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.notify.notify_one();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Frames overwritten before the consumer got to them.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// At most one spawned background loop. Replacing or dropping it aborts the
/// previous loop, which also drops whatever subscriber it owned.
#[derive(Debug, Default)]
pub struct BackgroundTask(Option<JoinHandle<()>>);

impl BackgroundTask {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn replace(&mut self, handle: JoinHandle<()>) {
        self.abort();
        self.0 = Some(handle);
    }

    pub fn abort(&mut self) {
        if let Some(task) = self.0.take() {
            task.abort();
        }
    }

    pub fn is_active(&self) -> bool {
        self.0.as_ref().is_some_and(|task| !task.is_finished())
    }
}

impl Drop for BackgroundTask {
    fn drop(&mut self) {
        self.abort();
    }
}

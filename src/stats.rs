use std::time::{Duration, Instant};

/// Frames-per-second over a fixed reporting window.
#[derive(Debug)]
pub struct FpsMeter {
    window: Duration,
    started: Instant,
    frames: u32,
}

impl FpsMeter {
    pub fn new(window: Duration) -> Self {
        Self { window, started: Instant::now(), frames: 0 }
    }

    /// Count a frame; returns the rate once per elapsed window.
    pub fn tick(&mut self) -> Option<f32> {
        self.tick_at(Instant::now())
    }

    fn tick_at(&mut self, now: Instant) -> Option<f32> {
        self.frames += 1;
        let elapsed = now.saturating_duration_since(self.started);
        if elapsed < self.window {
            return None;
        }
        let fps = self.frames as f32 / elapsed.as_secs_f32();
        self.frames = 0;
        self.started = now;
        Some(fps)
    }
}

/// Wall-clock split of one frame: waiting on inference vs local work.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct FrameTimings {
    pub network: Duration,
    pub processing: Duration,
}

impl FrameTimings {
    pub fn total(&self) -> Duration {
        self.network + self.processing
    }

    pub fn log(&self, frame_index: u64) {
        tracing::info!(
            target: "benchmark",
            frame = frame_index,
            total_ms = self.total().as_secs_f64() * 1e3,
            network_ms = self.network.as_secs_f64() * 1e3,
            processing_ms = self.processing.as_secs_f64() * 1e3,
        );
    }
}

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail};
use tracing::{info, warn};

use super::{BackgroundTask, FrameSource, LatestFrame};
use crate::stats::FpsMeter;
use crate::types::VisualFrame;
use crate::wire::CameraFrameWire;

const FPS_PRINT_INTERVAL: Duration = Duration::from_secs(5);

/// Live color frames from a zenoh camera topic.
///
/// Frames are decoded as they arrive and parked in a [`LatestFrame`] slot,
/// so a slow consumer always sees the newest image. There is no tracking,
/// every frame has the identity pose.
pub struct ZenohCameraSource {
    latest: Arc<LatestFrame>,
    task: BackgroundTask,
    stopped: bool,
}

impl ZenohCameraSource {
    pub async fn subscribe(session: Arc<zenoh::Session>, key: &str) -> anyhow::Result<Self> {
        let subscriber = session
            .declare_subscriber(key.to_owned())
            .await
            .map_err(|e| anyhow!("failed to subscribe to '{key}': {e}"))?;

        let latest = Arc::new(LatestFrame::new());
        let store = latest.clone();
        let key = key.to_owned();

        let mut task = BackgroundTask::new();
        task.replace(tokio::spawn(async move {
            let mut fps = FpsMeter::new(FPS_PRINT_INTERVAL);
            info!("camera subscriber started, listening on '{key}'");

            loop {
                match subscriber.recv_async().await {
                    Ok(sample) => {
                        let payload = sample.payload().to_bytes();
                        match decode_frame(&payload) {
                            Ok(frame) => {
                                store.publish(frame);
                                if let Some(rate) = fps.tick() {
                                    info!(fps = rate, dropped = store.dropped(), "camera frames");
                                }
                            }
                            Err(e) => warn!("failed to unpack camera frame: {e:#}"),
                        }
                    }
                    Err(e) => {
                        warn!("camera subscriber error: {e}");
                        break;
                    }
                }
            }
            store.close();
            info!("camera subscriber stopped");
        }));

        Ok(Self { latest, task, stopped: false })
    }

    pub fn dropped_frames(&self) -> u64 {
        self.latest.dropped()
    }
}

/// Decode one camera payload into an untracked frame.
pub fn decode_frame(payload: &[u8]) -> anyhow::Result<VisualFrame> {
    let wire = CameraFrameWire::decode(payload)?;
    let image = wire.to_image()?;
    Ok(VisualFrame::untracked(image, wire.timestamp))
}

impl FrameSource for ZenohCameraSource {
    async fn next_frame(&mut self) -> anyhow::Result<Option<VisualFrame>> {
        match self.latest.next().await {
            Some(frame) => Ok(Some(frame)),
            None if self.stopped => Ok(None),
            None => bail!("camera stream closed"),
        }
    }

    fn stop(&mut self) {
        self.stopped = true;
        self.task.abort();
        self.latest.close();
        info!(dropped = self.dropped_frames(), "camera source stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    #[test]
    fn decoded_frames_are_untracked() {
        let img = RgbImage::from_pixel(4, 4, Rgb([5, 6, 7]));
        let payload = CameraFrameWire::from_rgb(3.25, &img).unwrap().encode().unwrap();
        let frame = decode_frame(&payload).unwrap();
        assert_eq!(frame.timestamp, 3.25);
        assert_eq!(frame.pose, crate::pose::CameraPose::identity());
        assert_eq!(frame.image, img);
    }

    #[test]
    fn garbage_payload_is_an_error() {
        assert!(decode_frame(&[1, 2, 3]).is_err());
    }
}

use std::io::{ErrorKind, Read};
use std::time::Duration;
use std::{fs::File, path::Path};

use anyhow::{bail, Context};
use byteorder::{LittleEndian, ReadBytesExt};
use tokio::time::sleep;
use tracing::{info, warn};

use super::FRAME_RECORD;
use crate::pose::CameraPose;
use crate::source::FrameSource;
use crate::types::VisualFrame;

/// Longest pause replayed between two records.
const MAX_PACING_GAP: Duration = Duration::from_secs(10);

/// Replays a frame log at the pace it was recorded.
pub struct LogPlayback {
    reader: std::io::BufReader<File>,
    last_ts: Option<f64>,
    stopped: bool,
}

struct RawRecord {
    timestamp: f64,
    pose: CameraPose,
    jpeg: Vec<u8>,
}

impl LogPlayback {
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        let file = File::open(path).with_context(|| format!("failed to open log {}", path.display()))?;
        info!("replaying frame log {}", path.display());
        Ok(Self {
            reader: std::io::BufReader::new(file),
            last_ts: None,
            stopped: false,
        })
    }

    fn read_record(&mut self) -> anyhow::Result<Option<RawRecord>> {
        let f = &mut self.reader;
        let kind = match f.read_u8() {
            Ok(k) => k,
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        if kind != FRAME_RECORD {
            bail!("unknown record kind {kind}");
        }

        let body = (|| -> std::io::Result<RawRecord> {
            let timestamp = f.read_f64::<LittleEndian>()?;
            let mut m = [0f32; 16];
            f.read_f32_into::<LittleEndian>(&mut m)?;
            let len = f.read_u32::<LittleEndian>()? as usize;
            let mut jpeg = vec![0u8; len];
            f.read_exact(&mut jpeg)?;
            Ok(RawRecord { timestamp, pose: CameraPose::from_column_major(&m), jpeg })
        })();

        match body {
            Ok(record) => Ok(Some(record)),
            // A crash while recording leaves a partial last record.
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => {
                warn!("frame log ends with a truncated record");
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// Sleep between two recorded timestamps. Gaps that are not a usable
/// duration or exceed [`MAX_PACING_GAP`] are not replayed.
fn pacing_gap(prev: f64, next: f64) -> Option<Duration> {
    let dt = next - prev;
    if dt <= 0.0 {
        return None;
    }
    match Duration::try_from_secs_f64(dt) {
        Ok(gap) if gap <= MAX_PACING_GAP => Some(gap),
        _ => {
            warn!(prev, next, "implausible gap between logged frames, not pacing");
            None
        }
    }
}

impl FrameSource for LogPlayback {
    async fn next_frame(&mut self) -> anyhow::Result<Option<VisualFrame>> {
        loop {
            if self.stopped {
                return Ok(None);
            }
            let Some(record) = self.read_record()? else {
                return Ok(None);
            };

            if let Some(gap) = self.last_ts.and_then(|prev| pacing_gap(prev, record.timestamp)) {
                sleep(gap).await;
            }
            self.last_ts = Some(record.timestamp);

            let RawRecord { timestamp, pose, jpeg } = record;
            let decoded = tokio::task::spawn_blocking(move || {
                turbojpeg::decompress_image::<image::Rgb<u8>>(&jpeg)
            })
            .await?;
            match decoded {
                Ok(image) => return Ok(Some(VisualFrame::new(image, pose, timestamp))),
                Err(e) => warn!(ts = timestamp, "skipping undecodable logged frame: {e}"),
            }
        }
    }

    fn stop(&mut self) {
        self.stopped = true;
    }
}

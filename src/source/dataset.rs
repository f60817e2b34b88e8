use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use image::RgbImage;
use itertools::Itertools;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::FrameSource;
use crate::config::DatasetConfig;
use crate::pose::{pose_from_quaternion, CameraPose};
use crate::types::{CameraModel, RelativeCalibration, VisualFrame};

const TRAJECTORY_FILES: [&str; 2] = ["groundtruthSync.txt", "groundtruth.txt"];
const CALIBRATION_FILE: &str = "camera.txt";
const IMAGE_EXTENSIONS: [&str; 3] = ["png", "jpg", "jpeg"];

/// One line of a TUM-style trajectory file.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrajectoryRecord {
    pub timestamp: f64,
    pub pose: CameraPose,
}

/// Parse `timestamp tx ty tz qx qy qz qw` records. Comment lines (`#`) and
/// lines that do not hold eight numbers are skipped.
pub fn parse_trajectory(content: &str) -> Vec<TrajectoryRecord> {
    content
        .lines()
        .enumerate()
        .filter(|(_, line)| {
            let line = line.trim();
            !line.is_empty() && !line.starts_with('#')
        })
        .filter_map(|(n, line)| {
            let record = parse_trajectory_line(line);
            if record.is_none() {
                warn!(line = n + 1, "skipping malformed trajectory record");
            }
            record
        })
        .collect()
}

fn parse_trajectory_line(line: &str) -> Option<TrajectoryRecord> {
    let fields: Vec<f64> = line
        .split_whitespace()
        .take(8)
        .map(str::parse::<f64>)
        .collect::<Result<_, _>>()
        .ok()?;
    let [ts, tx, ty, tz, qx, qy, qz, qw] = fields.as_slice() else {
        return None;
    };
    if fields.iter().any(|v| !v.is_finite()) {
        return None;
    }
    Some(TrajectoryRecord {
        timestamp: *ts,
        pose: pose_from_quaternion(
            *tx as f32, *ty as f32, *tz as f32, *qx as f32, *qy as f32, *qz as f32, *qw as f32,
        ),
    })
}

/// First line of `camera.txt`: `fxRel fyRel cxRel cyRel`.
pub fn parse_calibration(content: &str) -> Option<RelativeCalibration> {
    let line = content.lines().next()?;
    let (fx_rel, fy_rel, cx_rel, cy_rel) = line
        .split_whitespace()
        .take(4)
        .map(|s| s.parse::<f32>().ok().filter(|v| v.is_finite()))
        .collect::<Option<Vec<_>>>()?
        .into_iter()
        .collect_tuple::<(f32, f32, f32, f32)>()?;
    if fx_rel <= 0.0 || fy_rel <= 0.0 {
        return None;
    }
    Some(RelativeCalibration { fx_rel, fy_rel, cx_rel, cy_rel })
}

/// Image folder replayed at a fixed rate, with ground-truth poses matched to
/// images by position.
#[derive(Debug)]
pub struct DatasetSource {
    images: Vec<PathBuf>,
    trajectory: Vec<TrajectoryRecord>,
    calibration: CameraModel,
    config: DatasetConfig,
    index: usize,
    next_due: Option<Instant>,
    stopped: bool,
}

impl DatasetSource {
    /// Open a dataset folder. `path` may be the dataset root or its `images`
    /// directory; companion files are looked up next to the images folder.
    pub fn open(path: &Path, config: DatasetConfig) -> anyhow::Result<Self> {
        let (image_dir, companion_dir) = resolve_layout(path)?;
        let images = list_images(&image_dir)?;
        if images.is_empty() {
            bail!("no images found in {}", image_dir.display());
        }

        let trajectory = TRAJECTORY_FILES
            .iter()
            .map(|name| companion_dir.join(name))
            .find(|p| p.is_file())
            .map(|p| -> anyhow::Result<_> {
                let content = fs::read_to_string(&p)
                    .with_context(|| format!("failed to read {}", p.display()))?;
                Ok(parse_trajectory(&content))
            })
            .transpose()?
            .unwrap_or_else(|| {
                warn!(dir = %companion_dir.display(), "no ground truth found, poses will be identity");
                Vec::new()
            });

        let calibration = match fs::read_to_string(companion_dir.join(CALIBRATION_FILE)) {
            Ok(content) => match parse_calibration(&content) {
                Some(c) => {
                    debug!(?c, "loaded calibration");
                    CameraModel::Calibrated(c)
                }
                None => {
                    warn!("malformed {CALIBRATION_FILE}, using default intrinsics");
                    CameraModel::Default
                }
            },
            Err(_) => CameraModel::Default,
        };

        info!(
            images = images.len(),
            poses = trajectory.len(),
            calibrated = calibration.is_calibrated(),
            "opened dataset {}",
            path.display()
        );

        Ok(Self {
            images,
            trajectory,
            calibration,
            config,
            index: 0,
            next_due: None,
            stopped: false,
        })
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }

    pub fn pose_count(&self) -> usize {
        self.trajectory.len()
    }
}

impl FrameSource for DatasetSource {
    async fn next_frame(&mut self) -> anyhow::Result<Option<VisualFrame>> {
        loop {
            if self.stopped {
                return Ok(None);
            }
            if self.index >= self.images.len() {
                if !self.config.loop_playback {
                    return Ok(None);
                }
                self.index = 0;
                tokio::time::sleep(self.config.loop_delay()).await;
            }

            if let Some(due) = self.next_due {
                tokio::time::sleep_until(due).await;
            }
            self.next_due = Some(Instant::now() + self.config.frame_delay());

            let index = self.index;
            self.index += 1;
            let path = self.images[index].clone();

            let decoded = tokio::task::spawn_blocking({
                let path = path.clone();
                move || decode_image(&path)
            })
            .await?;

            match decoded {
                Ok(image) => {
                    let (pose, timestamp) = match self.trajectory.get(index) {
                        Some(r) => (r.pose, r.timestamp),
                        None => (
                            CameraPose::identity(),
                            index as f64 * self.config.frame_delay().as_secs_f64(),
                        ),
                    };
                    return Ok(Some(VisualFrame::new(image, pose, timestamp)));
                }
                Err(e) => warn!(file = %path.display(), "skipping frame: {e:#}"),
            }
        }
    }

    fn calibration(&self) -> CameraModel {
        self.calibration
    }

    fn stop(&mut self) {
        self.stopped = true;
    }
}

fn resolve_layout(path: &Path) -> anyhow::Result<(PathBuf, PathBuf)> {
    if !path.is_dir() {
        bail!("dataset path {} is not a directory", path.display());
    }
    let nested = path.join("images");
    if nested.is_dir() {
        return Ok((nested, path.to_path_buf()));
    }
    if path.file_name().is_some_and(|n| n == "images") {
        let parent = path.parent().unwrap_or(path).to_path_buf();
        return Ok((path.to_path_buf(), parent));
    }
    Ok((path.to_path_buf(), path.to_path_buf()))
}

fn list_images(dir: &Path) -> anyhow::Result<Vec<PathBuf>> {
    let entries = fs::read_dir(dir).with_context(|| format!("failed to list {}", dir.display()))?;
    let mut images = Vec::new();
    for entry in entries {
        let path = entry?.path();
        let is_image = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| IMAGE_EXTENSIONS.iter().any(|x| x.eq_ignore_ascii_case(e)));
        if is_image && path.is_file() {
            images.push(path);
        }
    }
    images.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    Ok(images)
}

fn decode_image(path: &Path) -> anyhow::Result<RgbImage> {
    let bytes = fs::read(path)?;
    let is_jpeg = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("jpg") || e.eq_ignore_ascii_case("jpeg"));
    if is_jpeg {
        Ok(turbojpeg::decompress_image::<image::Rgb<u8>>(&bytes)?)
    } else {
        Ok(image::load_from_memory(&bytes)?.to_rgb8())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use image::Rgb;
    use std::time::Duration;

    fn write_png(dir: &Path, name: &str, value: u8) {
        RgbImage::from_pixel(8, 6, Rgb([value, value, value]))
            .save(dir.join(name))
            .unwrap();
    }

    fn fast(loop_playback: bool) -> DatasetConfig {
        DatasetConfig { frame_delay_ms: 1, loop_delay_ms: 1, loop_playback }
    }

    #[test]
    fn trajectory_skips_comments_and_short_lines() {
        let content = "# timestamp tx ty tz qx qy qz qw\n\
                       1.0 1 2 3 0 0 0 1\n\
                       2.0 1 2 3 0 0\n\
                       3.0 4 5 6 0 0 0 1 extra\n\
                       bad 4 5 6 0 0 0 1\n";
        let records = parse_trajectory(content);
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].timestamp, 1.0);
        assert_eq!(records[0].pose.translation(), [1.0, 2.0, 3.0]);
        assert_eq!(records[1].pose.translation(), [4.0, 5.0, 6.0]);
    }

    #[test]
    fn calibration_reads_first_line_only() {
        let c = parse_calibration("0.9 1.2 0.5 0.49 0\n640 480\n").unwrap();
        assert_relative_eq!(c.fx_rel, 0.9);
        assert_relative_eq!(c.cy_rel, 0.49);
        assert!(parse_calibration("0.9 1.2 0.5\n").is_none());
        assert!(parse_calibration("a b c d\n").is_none());
        assert!(parse_calibration("").is_none());
    }

    #[tokio::test]
    async fn frames_are_sorted_and_paired_with_poses() {
        let dir = tempfile::tempdir().unwrap();
        write_png(dir.path(), "0002.png", 20);
        write_png(dir.path(), "0001.png", 10);
        write_png(dir.path(), "0003.png", 30);
        fs::write(dir.path().join("notes.txt"), "ignored").unwrap();
        fs::write(
            dir.path().join("groundtruthSync.txt"),
            "0.5 1 0 0 0 0 0 1\n0.6 2 0 0 0 0 0 1\n",
        )
        .unwrap();

        let mut source = DatasetSource::open(dir.path(), fast(false)).unwrap();
        assert_eq!(source.len(), 3);
        assert_eq!(source.pose_count(), 2);

        let mut seen = Vec::new();
        while let Some(frame) = source.next_frame().await.unwrap() {
            seen.push((frame.image.get_pixel(0, 0)[0], frame.pose.tx()));
        }
        // The third image has no pose and falls back to identity.
        assert_eq!(seen, vec![(10, 1.0), (20, 2.0), (30, 0.0)]);
    }

    #[tokio::test]
    async fn images_dir_finds_companions_in_parent() {
        let root = tempfile::tempdir().unwrap();
        let images = root.path().join("images");
        fs::create_dir(&images).unwrap();
        write_png(&images, "a.png", 1);
        fs::write(root.path().join("camera.txt"), "0.5 0.5 0.5 0.5\n").unwrap();

        let from_images = DatasetSource::open(&images, fast(false)).unwrap();
        assert!(from_images.calibration().is_calibrated());
        let from_root = DatasetSource::open(root.path(), fast(false)).unwrap();
        assert!(from_root.calibration().is_calibrated());
        assert_eq!(from_root.len(), 1);
    }

    #[tokio::test]
    async fn undecodable_files_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        write_png(dir.path(), "1.png", 1);
        fs::write(dir.path().join("2.png"), b"not a png").unwrap();
        write_png(dir.path(), "3.png", 3);

        let mut source = DatasetSource::open(dir.path(), fast(false)).unwrap();
        let mut values = Vec::new();
        while let Some(frame) = source.next_frame().await.unwrap() {
            values.push(frame.image.get_pixel(0, 0)[0]);
        }
        assert_eq!(values, vec![1, 3]);
    }

    #[tokio::test]
    async fn playback_loops_until_stopped() {
        let dir = tempfile::tempdir().unwrap();
        write_png(dir.path(), "1.png", 1);
        write_png(dir.path(), "2.png", 2);

        let mut source = DatasetSource::open(dir.path(), fast(true)).unwrap();
        let mut values = Vec::new();
        for _ in 0..5 {
            values.push(source.next_frame().await.unwrap().unwrap().image.get_pixel(0, 0)[0]);
        }
        assert_eq!(values, vec![1, 2, 1, 2, 1]);
        source.stop();
        assert!(source.next_frame().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn frames_are_paced() {
        let dir = tempfile::tempdir().unwrap();
        write_png(dir.path(), "1.png", 1);
        write_png(dir.path(), "2.png", 2);
        let config = DatasetConfig { frame_delay_ms: 50, loop_delay_ms: 0, loop_playback: false };
        let mut source = DatasetSource::open(dir.path(), config).unwrap();

        let start = std::time::Instant::now();
        source.next_frame().await.unwrap().unwrap();
        source.next_frame().await.unwrap().unwrap();
        assert!(start.elapsed() >= Duration::from_millis(50));
    }

    #[test]
    fn empty_folder_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(DatasetSource::open(dir.path(), fast(false)).is_err());
    }
}

use std::path::PathBuf;

use anyhow::bail;
use clap::{Parser, ValueEnum};

use crate::types::ImageSourceMode;

#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Args {
    /// YAML settings file; defaults are used for anything missing
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Map a recorded image sequence instead of the live camera
    #[arg(long)]
    pub dataset: Option<PathBuf>,

    /// Record an on-disk log while running live
    #[arg(long)]
    pub start_log: Option<PathBuf>,

    /// Play back a previously recorded log instead of the live camera
    #[arg(long)]
    pub play_log: Option<PathBuf>,

    #[arg(long, value_enum, default_value_t = LogLevel::Info)]
    pub log_level: LogLevel,
}

impl Args {
    pub fn mode(&self) -> anyhow::Result<RunMode> {
        Ok(match (&self.dataset, &self.start_log, &self.play_log) {
            (None, None, None) => RunMode::Camera,
            (None, Some(p), None) => RunMode::CameraWithLog(p.clone()),
            (None, None, Some(p)) => RunMode::Playback(p.clone()),
            (Some(p), None, None) => RunMode::Dataset(p.clone()),
            _ => bail!("--dataset, --start-log and --play-log are mutually exclusive"),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunMode {
    Camera,
    CameraWithLog(PathBuf),
    Dataset(PathBuf),
    Playback(PathBuf),
}

impl RunMode {
    pub fn source_mode(&self) -> ImageSourceMode {
        match self {
            RunMode::Camera | RunMode::CameraWithLog(_) => ImageSourceMode::Camera,
            RunMode::Dataset(_) => ImageSourceMode::Dataset,
            RunMode::Playback(_) => ImageSourceMode::Playback,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn as_filter(&self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Args {
        Args::try_parse_from(std::iter::once("depth-fusion").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn no_flags_means_live_camera() {
        assert_eq!(parse(&[]).mode().unwrap(), RunMode::Camera);
    }

    #[test]
    fn each_flag_selects_its_mode() {
        assert_eq!(
            parse(&["--dataset", "/data/seq"]).mode().unwrap(),
            RunMode::Dataset("/data/seq".into())
        );
        assert_eq!(
            parse(&["--start-log", "a.log"]).mode().unwrap(),
            RunMode::CameraWithLog("a.log".into())
        );
        assert_eq!(
            parse(&["--play-log", "a.log"]).mode().unwrap(),
            RunMode::Playback("a.log".into())
        );
    }

    #[test]
    fn recording_still_uses_the_camera() {
        let mode = parse(&["--start-log", "a.log"]).mode().unwrap();
        assert_eq!(mode.source_mode(), ImageSourceMode::Camera);
    }

    #[test]
    fn conflicting_flags_are_rejected() {
        assert!(parse(&["--start-log", "a", "--play-log", "b"]).mode().is_err());
        assert!(parse(&["--dataset", "d", "--play-log", "b"]).mode().is_err());
    }

    #[test]
    fn log_level_parses() {
        let args = parse(&["--log-level", "debug"]);
        assert_eq!(args.log_level, LogLevel::Debug);
        assert_eq!(args.log_level.as_filter(), "debug");
    }
}

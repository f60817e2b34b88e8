use std::sync::Arc;

use anyhow::anyhow;
use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use zenoh_depth_fusion::cli::{Args, RunMode};
use zenoh_depth_fusion::config::AppConfig;
use zenoh_depth_fusion::logio::{FrameLogWriter, LogPlayback, Recording};
use zenoh_depth_fusion::publish::CloudPublisher;
use zenoh_depth_fusion::source::{DatasetSource, FrameSource, ZenohCameraSource};
use zenoh_depth_fusion::{CaptureSession, FusionPipeline, ZenohDepthClient};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // RUST_LOG wins over --log-level when set.
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(args.log_level.as_filter()));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let mode = args.mode()?;
    let config = match &args.config {
        Some(path) => AppConfig::load(path)?,
        None => AppConfig::default(),
    };

    let session = Arc::new(
        zenoh::open(zenoh::Config::default())
            .await
            .map_err(|e| anyhow!("failed to open zenoh session: {e}"))?,
    );

    let client = ZenohDepthClient::new(session.clone(), &config.inference, &config.zenoh);
    match client.check_health().await {
        Ok(health) if health.is_healthy() => {}
        Ok(health) => warn!("inference service not ready (status '{}')", health.status),
        Err(e) => warn!("inference health check failed: {e:#}"),
    }

    let pipeline = FusionPipeline::new(config.mapping, config.selector);
    let mut capture = CaptureSession::new(client, pipeline);
    let publisher = CloudPublisher::new(session.clone(), &config.zenoh.cloud_key).spawn(capture.updates());

    info!(source = ?mode.source_mode(), "starting capture");
    match mode {
        RunMode::Camera => {
            let source = ZenohCameraSource::subscribe(session.clone(), &config.zenoh.camera_key).await?;
            run(&mut capture, source).await;
        }
        RunMode::CameraWithLog(path) => {
            let source = ZenohCameraSource::subscribe(session.clone(), &config.zenoh.camera_key).await?;
            let writer = FrameLogWriter::create(&path)?;
            info!("recording frames to {}", path.display());
            run(&mut capture, Recording::new(source, writer)).await;
        }
        RunMode::Dataset(path) => {
            let source = DatasetSource::open(&path, config.dataset)?;
            run(&mut capture, source).await;
        }
        RunMode::Playback(path) => {
            let source = LogPlayback::open(&path)?;
            run(&mut capture, source).await;
        }
    }

    let snapshot = capture.pipeline().snapshot();
    info!(
        points = snapshot.points.len(),
        keyframes = snapshot.trajectory.len(),
        "final map"
    );

    drop(capture);
    if let Err(e) = publisher.await {
        error!("cloud publisher failed: {e}");
    }
    session
        .close()
        .await
        .map_err(|e| anyhow!("failed to close zenoh session: {e}"))?;
    Ok(())
}

/// Capture until Ctrl-C or until the source runs out.
async fn run<S: FrameSource>(capture: &mut CaptureSession<ZenohDepthClient>, source: S) {
    capture.start(source).await;
    tokio::select! {
        res = tokio::signal::ctrl_c() => {
            if let Err(e) = res {
                error!("failed to listen for ctrl-c: {e}");
            }
            info!("interrupted");
        }
        _ = capture.wait() => {}
    }
    capture.stop().await;
}

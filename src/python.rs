use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use numpy::{IntoPyArray, PyArray2};
use pyo3::exceptions::PyRuntimeError;
use pyo3::prelude::*;
use tokio::runtime::Runtime;
use tracing::warn;

use crate::config::ZenohKeys;
use crate::source::BackgroundTask;
use crate::wire::CloudWire;

#[derive(Default)]
struct LatestCloud {
    frame_index: u64,
    map_points: u64,
    keyframes: u64,
    points: Vec<[f32; 3]>,
    trajectory: Vec<[f32; 3]>,
}

/// Polls the reconstruction published by a running mapper.
#[pyclass]
pub struct CloudSubscriber {
    runtime: Arc<Runtime>,
    session: Option<Arc<zenoh::Session>>,
    key: String,
    latest: Arc<Mutex<LatestCloud>>,
    received: Arc<AtomicU64>,
    running: Arc<AtomicBool>,
    task: BackgroundTask,
}

fn runtime_err(e: impl std::fmt::Display) -> PyErr {
    PyRuntimeError::new_err(e.to_string())
}

fn to_array<'py>(py: Python<'py>, rows: &[[f32; 3]]) -> PyResult<Bound<'py, PyArray2<f32>>> {
    let flat: Vec<f32> = rows.iter().flatten().copied().collect();
    let array = ndarray::Array2::from_shape_vec((rows.len(), 3), flat)
        .map_err(|e| runtime_err(format!("Shape error: {e}")))?;
    Ok(array.into_pyarray_bound(py))
}

#[pymethods]
impl CloudSubscriber {
    #[new]
    #[pyo3(signature = (key=None))]
    fn new(key: Option<String>) -> PyResult<Self> {
        let runtime = Arc::new(Runtime::new().map_err(runtime_err)?);
        Ok(Self {
            runtime,
            session: None,
            key: key.unwrap_or_else(|| ZenohKeys::default().cloud_key),
            latest: Arc::new(Mutex::new(LatestCloud::default())),
            received: Arc::new(AtomicU64::new(0)),
            running: Arc::new(AtomicBool::new(false)),
            task: BackgroundTask::new(),
        })
    }

    /// Connect to Zenoh
    fn connect(&mut self) -> PyResult<()> {
        let session = self
            .runtime
            .block_on(async { zenoh::open(zenoh::Config::default()).await })
            .map_err(runtime_err)?;
        self.session = Some(Arc::new(session));
        Ok(())
    }

    fn start_subscribing(&mut self) -> PyResult<()> {
        let session = self
            .session
            .as_ref()
            .ok_or_else(|| PyRuntimeError::new_err("Not connected to Zenoh. Call connect() first."))?
            .clone();

        let subscriber = self
            .runtime
            .block_on(async { session.declare_subscriber(self.key.clone()).await })
            .map_err(runtime_err)?;

        let latest = self.latest.clone();
        let received = self.received.clone();
        let running = self.running.clone();
        running.store(true, Ordering::Release);

        // Replacing the task aborts an earlier subscription, if any.
        let handle = self.runtime.spawn(async move {
            while running.load(Ordering::Acquire) {
                let sample = match subscriber.recv_async().await {
                    Ok(sample) => sample,
                    Err(e) => {
                        warn!("cloud subscriber error: {e}");
                        break;
                    }
                };
                let cloud = match CloudWire::decode(&sample.payload().to_bytes()) {
                    Ok(cloud) => cloud,
                    Err(e) => {
                        warn!("failed to decode cloud: {e:#}");
                        continue;
                    }
                };
                let points = match cloud.points() {
                    Ok(points) => points,
                    Err(e) => {
                        warn!("failed to unpack cloud points: {e:#}");
                        continue;
                    }
                };

                let mut slot = latest.lock().unwrap_or_else(PoisonError::into_inner);
                slot.frame_index = cloud.frame_index;
                slot.map_points = cloud.map_points;
                slot.keyframes = cloud.keyframes;
                slot.points = points.iter().map(|p| p.xyz()).collect();
                slot.trajectory = cloud.trajectory;
                received.fetch_add(1, Ordering::Relaxed);
            }
            running.store(false, Ordering::Release);
        });
        self.task.replace(handle);
        Ok(())
    }

    /// Latest render set as an N x 3 float array.
    fn get_points<'py>(&self, py: Python<'py>) -> PyResult<Bound<'py, PyArray2<f32>>> {
        let slot = self.latest.lock().unwrap_or_else(PoisonError::into_inner);
        to_array(py, &slot.points)
    }

    /// Keyframe camera positions as a K x 3 float array.
    fn get_trajectory<'py>(&self, py: Python<'py>) -> PyResult<Bound<'py, PyArray2<f32>>> {
        let slot = self.latest.lock().unwrap_or_else(PoisonError::into_inner);
        to_array(py, &slot.trajectory)
    }

    fn get_stats(&self) -> String {
        let slot = self.latest.lock().unwrap_or_else(PoisonError::into_inner);
        format!(
            "Clouds received: {}, frame: {}, points: {}, map points: {}, keyframes: {}",
            self.received.load(Ordering::Relaxed),
            slot.frame_index,
            slot.points.len(),
            slot.map_points,
            slot.keyframes
        )
    }

    fn stop(&mut self) {
        self.running.store(false, Ordering::Release);
        self.task.abort();
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire) && self.task.is_active()
    }
}

#[pymodule]
fn zenoh_depth_fusion(m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add_class::<CloudSubscriber>()?;
    Ok(())
}

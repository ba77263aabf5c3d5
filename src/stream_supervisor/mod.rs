//! StreamSupervisor - Camera Lifecycle Control
//!
//! ## Responsibilities
//!
//! - Authoritative active-camera registry
//! - Idempotent start (probe, register, spawn exactly one loop)
//! - Cooperative stop via the per-camera flag
//! - Per-camera detection toggle
//!
//! Registration is insert-if-vacant under a single write lock, which is the
//! serialization point guaranteeing at most one orchestrator per camera. The
//! registry entry is removed by the orchestrator itself on exit, so a camera
//! mid-drain still counts as busy for start idempotence.

use crate::cadence::{CadenceController, CadencePolicy};
use crate::detection_aggregator::DetectionAggregator;
use crate::detector::Detector;
use crate::fanout_hub::{FanoutHub, ServerMessage, StreamStatus};
use crate::frame_source::FrameSourceProvider;
use crate::models::CameraId;
use crate::stream_orchestrator::StreamOrchestrator;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Shared per-camera loop flags
#[derive(Clone)]
pub struct StreamHandle {
    /// Observed at the top of every loop iteration
    pub active: Arc<AtomicBool>,
    /// Gates the cadence controller's detection decisions
    pub detection_enabled: Arc<AtomicBool>,
}

impl StreamHandle {
    fn new(detection_enabled: bool) -> Self {
        Self {
            active: Arc::new(AtomicBool::new(true)),
            detection_enabled: Arc::new(AtomicBool::new(detection_enabled)),
        }
    }
}

/// Registry of per-camera stream handles
pub struct ActiveStreams {
    inner: RwLock<HashMap<CameraId, StreamHandle>>,
}

impl ActiveStreams {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(HashMap::new()),
        }
    }

    /// Insert-if-vacant. `None` means a loop already owns this camera.
    async fn try_register(&self, camera_id: &CameraId, detection_enabled: bool) -> Option<StreamHandle> {
        let mut inner = self.inner.write().await;
        if inner.contains_key(camera_id) {
            return None;
        }
        let handle = StreamHandle::new(detection_enabled);
        inner.insert(camera_id.clone(), handle.clone());
        Some(handle)
    }

    async fn deactivate(&self, camera_id: &CameraId) -> bool {
        let inner = self.inner.read().await;
        match inner.get(camera_id) {
            Some(handle) => {
                handle.active.store(false, Ordering::SeqCst);
                true
            }
            None => false,
        }
    }

    /// Remove the entry. Called by the orchestrator on every exit path.
    pub(crate) async fn release(&self, camera_id: &CameraId) {
        let mut inner = self.inner.write().await;
        inner.remove(camera_id);
    }

    async fn is_active(&self, camera_id: &CameraId) -> bool {
        let inner = self.inner.read().await;
        inner
            .get(camera_id)
            .map_or(false, |handle| handle.active.load(Ordering::SeqCst))
    }

    async fn is_registered(&self, camera_id: &CameraId) -> bool {
        let inner = self.inner.read().await;
        inner.contains_key(camera_id)
    }

    async fn set_detection_enabled(&self, camera_id: &CameraId, enabled: bool) -> bool {
        let inner = self.inner.read().await;
        match inner.get(camera_id) {
            Some(handle) => {
                handle.detection_enabled.store(enabled, Ordering::SeqCst);
                true
            }
            None => false,
        }
    }

    async fn active_count(&self) -> usize {
        let inner = self.inner.read().await;
        inner
            .values()
            .filter(|handle| handle.active.load(Ordering::SeqCst))
            .count()
    }

    async fn deactivate_all(&self) {
        let inner = self.inner.read().await;
        for handle in inner.values() {
            handle.active.store(false, Ordering::SeqCst);
        }
    }
}

impl Default for ActiveStreams {
    fn default() -> Self {
        Self::new()
    }
}

/// StreamSupervisor instance
pub struct StreamSupervisor {
    streams: Arc<ActiveStreams>,
    sources: Arc<dyn FrameSourceProvider>,
    detector: Arc<dyn Detector>,
    aggregator: Arc<DetectionAggregator>,
    hub: Arc<FanoutHub>,
    cadence_policy: CadencePolicy,
    confidence_threshold: f32,
}

impl StreamSupervisor {
    /// Create new StreamSupervisor
    pub fn new(
        sources: Arc<dyn FrameSourceProvider>,
        detector: Arc<dyn Detector>,
        aggregator: Arc<DetectionAggregator>,
        hub: Arc<FanoutHub>,
        cadence_policy: CadencePolicy,
        confidence_threshold: f32,
    ) -> Self {
        Self {
            streams: Arc::new(ActiveStreams::new()),
            sources,
            detector,
            aggregator,
            hub,
            cadence_policy,
            confidence_threshold,
        }
    }

    /// Start a camera's stream loop.
    ///
    /// Idempotent: a camera that is already running (or still draining) is a
    /// no-op success with no side effects. Probe failure surfaces as
    /// `SourceUnreachable` and the camera is never marked active.
    pub async fn start(
        &self,
        camera_id: CameraId,
        address: &str,
        port: u16,
    ) -> crate::error::Result<()> {
        if self.streams.is_registered(&camera_id).await {
            tracing::info!(camera_id = %camera_id, "Camera already active, start is a no-op");
            return Ok(());
        }

        self.sources.probe(address, port).await?;

        let Some(handle) = self.streams.try_register(&camera_id, true).await else {
            // Lost the race to a concurrent start; that loop owns the camera.
            tracing::info!(camera_id = %camera_id, "Camera registered concurrently, start is a no-op");
            return Ok(());
        };

        let orchestrator = StreamOrchestrator::new(
            camera_id.clone(),
            address.to_string(),
            port,
            handle,
            self.streams.clone(),
            self.sources.clone(),
            self.detector.clone(),
            self.aggregator.clone(),
            self.hub.clone(),
            CadenceController::new(self.cadence_policy.clone()),
            self.confidence_threshold,
        );
        tokio::spawn(orchestrator.run());

        self.hub
            .broadcast(&ServerMessage::CameraStatus {
                camera_id: camera_id.clone(),
                status: StreamStatus::Started,
                timestamp: Utc::now().to_rfc3339(),
            })
            .await;

        tracing::info!(camera_id = %camera_id, address = %address, port = port, "Camera started");
        Ok(())
    }

    /// Stop a camera's stream loop. The orchestrator observes the flag and
    /// exits within one iteration, releasing the frame source. Stopping a
    /// camera that is not active is a no-op.
    pub async fn stop(&self, camera_id: &CameraId) {
        if self.streams.deactivate(camera_id).await {
            tracing::info!(camera_id = %camera_id, "Camera stop requested");
        } else {
            tracing::debug!(camera_id = %camera_id, "Stop for inactive camera ignored");
        }
    }

    /// Pure state read
    pub async fn is_active(&self, camera_id: &CameraId) -> bool {
        self.streams.is_active(camera_id).await
    }

    /// Toggle the detection gate for a running camera. `false` when the
    /// camera is not active.
    pub async fn set_detection_enabled(&self, camera_id: &CameraId, enabled: bool) -> bool {
        let updated = self.streams.set_detection_enabled(camera_id, enabled).await;
        if updated {
            tracing::info!(camera_id = %camera_id, enabled = enabled, "Detection toggled");
        }
        updated
    }

    /// Number of currently active streams
    pub async fn active_count(&self) -> usize {
        self.streams.active_count().await
    }

    /// Deactivate every camera; each loop drains and releases its source.
    pub async fn shutdown(&self) {
        tracing::info!("Stopping all camera streams");
        self.streams.deactivate_all().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detector::DetectionOutput;
    use crate::error::Error;
    use crate::frame_source::{Frame, FrameSource};
    use async_trait::async_trait;

    struct UnreachableProvider;

    #[async_trait]
    impl FrameSourceProvider for UnreachableProvider {
        async fn probe(&self, address: &str, _port: u16) -> crate::error::Result<()> {
            Err(Error::SourceUnreachable(address.to_string()))
        }

        async fn open(&self, _address: &str, _port: u16) -> crate::error::Result<Box<dyn FrameSource>> {
            panic!("open must not be called when the probe fails");
        }
    }

    struct NoopDetector;

    #[async_trait]
    impl Detector for NoopDetector {
        async fn detect(
            &self,
            _frame: &Frame,
            _confidence_threshold: f32,
        ) -> crate::error::Result<DetectionOutput> {
            Ok(DetectionOutput::default())
        }
    }

    fn supervisor(provider: Arc<dyn FrameSourceProvider>) -> StreamSupervisor {
        StreamSupervisor::new(
            provider,
            Arc::new(NoopDetector),
            Arc::new(DetectionAggregator::new(10, None)),
            Arc::new(FanoutHub::new()),
            CadencePolicy::default(),
            0.6,
        )
    }

    #[tokio::test]
    async fn test_probe_failure_never_marks_active() {
        let sup = supervisor(Arc::new(UnreachableProvider));
        let cam = CameraId::from("cam-1");

        let result = sup.start(cam.clone(), "10.0.0.1", 8080).await;
        assert!(matches!(result, Err(Error::SourceUnreachable(_))));
        assert!(!sup.is_active(&cam).await);
        assert_eq!(sup.active_count().await, 0);
    }

    #[tokio::test]
    async fn test_stop_unknown_camera_is_noop() {
        let sup = supervisor(Arc::new(UnreachableProvider));
        let cam = CameraId::from("cam-missing");

        sup.stop(&cam).await;
        assert!(!sup.is_active(&cam).await);
    }

    #[tokio::test]
    async fn test_detection_toggle_requires_active_camera() {
        let sup = supervisor(Arc::new(UnreachableProvider));
        let cam = CameraId::from("cam-1");

        assert!(!sup.set_detection_enabled(&cam, false).await);
    }
}

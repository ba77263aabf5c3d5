//! StreamOrchestrator - Per-Camera Processing Loop
//!
//! ## Responsibilities
//!
//! - Compose source read, cadence gating, detection, aggregation, and
//!   fan-out on every iteration
//! - Starting → Running → Draining → Stopped lifecycle
//! - Guarantee frame-source release on every exit path
//!
//! The loop is cooperative: it observes the supervisor's active flag at the
//! top of each iteration and never preempts an in-flight detection call.
//! Frames are processed strictly in read order; detection events are emitted
//! in the order they were computed.

use crate::cadence::CadenceController;
use crate::detection_aggregator::DetectionAggregator;
use crate::detector::Detector;
use crate::fanout_hub::{FanoutHub, ServerMessage, StreamStatus};
use crate::frame_source::{Frame, FrameSource, FrameSourceProvider};
use crate::jpeg;
use crate::models::CameraId;
use crate::stream_supervisor::{ActiveStreams, StreamHandle};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use bytes::Bytes;
use chrono::Utc;
use std::sync::atomic::Ordering;
use std::sync::Arc;

/// Loop lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoopState {
    Starting,
    Running,
    Draining,
    Stopped,
}

/// One camera's processing loop
pub(crate) struct StreamOrchestrator {
    camera_id: CameraId,
    address: String,
    port: u16,
    handle: StreamHandle,
    streams: Arc<ActiveStreams>,
    sources: Arc<dyn FrameSourceProvider>,
    detector: Arc<dyn Detector>,
    aggregator: Arc<DetectionAggregator>,
    hub: Arc<FanoutHub>,
    cadence: CadenceController,
    confidence_threshold: f32,
    state: LoopState,
}

impl StreamOrchestrator {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        camera_id: CameraId,
        address: String,
        port: u16,
        handle: StreamHandle,
        streams: Arc<ActiveStreams>,
        sources: Arc<dyn FrameSourceProvider>,
        detector: Arc<dyn Detector>,
        aggregator: Arc<DetectionAggregator>,
        hub: Arc<FanoutHub>,
        cadence: CadenceController,
        confidence_threshold: f32,
    ) -> Self {
        Self {
            camera_id,
            address,
            port,
            handle,
            streams,
            sources,
            detector,
            aggregator,
            hub,
            cadence,
            confidence_threshold,
            state: LoopState::Starting,
        }
    }

    fn transition(&mut self, next: LoopState) {
        tracing::debug!(
            camera_id = %self.camera_id,
            from = ?self.state,
            to = ?next,
            "Stream loop transition"
        );
        self.state = next;
    }

    /// Run the loop to completion. The registry entry is released and the
    /// frame source closed on every exit path.
    pub(crate) async fn run(mut self) {
        let mut source = match self.sources.open(&self.address, self.port).await {
            Ok(source) => source,
            Err(e) => {
                tracing::error!(
                    camera_id = %self.camera_id,
                    error = %e,
                    "Failed to acquire frame source"
                );
                self.emit_error(format!("Camera error: {}", e)).await;
                self.streams.release(&self.camera_id).await;
                self.transition(LoopState::Stopped);
                return;
            }
        };

        self.transition(LoopState::Running);
        self.run_iterations(source.as_mut()).await;

        self.transition(LoopState::Draining);
        source.close().await;
        self.streams.release(&self.camera_id).await;

        self.hub
            .broadcast_to_subscribers(
                &self.camera_id,
                &ServerMessage::CameraStatus {
                    camera_id: self.camera_id.clone(),
                    status: StreamStatus::Stopped,
                    timestamp: Utc::now().to_rfc3339(),
                },
            )
            .await;

        self.transition(LoopState::Stopped);
        tracing::info!(
            camera_id = %self.camera_id,
            frames = self.cadence.frame_count(),
            "Stream loop stopped"
        );
    }

    async fn run_iterations(&mut self, source: &mut dyn FrameSource) {
        let mut consecutive_misses: u32 = 0;

        while self.handle.active.load(Ordering::SeqCst) {
            match source.read_frame().await {
                Ok(Some(frame)) => {
                    consecutive_misses = 0;
                    self.process_frame(frame).await;
                }
                Ok(None) => {
                    consecutive_misses += 1;
                    if consecutive_misses >= self.cadence.max_consecutive_misses() {
                        tracing::error!(
                            camera_id = %self.camera_id,
                            misses = consecutive_misses,
                            "Frame source exhausted retries"
                        );
                        self.emit_error("Camera error: stream stalled".to_string())
                            .await;
                        break;
                    }
                    tokio::time::sleep(self.cadence.miss_cooldown()).await;
                }
                Err(e) => {
                    consecutive_misses += 1;
                    tracing::warn!(
                        camera_id = %self.camera_id,
                        error = %e,
                        misses = consecutive_misses,
                        "Frame read failed"
                    );
                    if consecutive_misses >= self.cadence.max_consecutive_misses() {
                        self.emit_error(format!("Camera error: {}", e)).await;
                        break;
                    }
                    tokio::time::sleep(self.cadence.miss_cooldown()).await;
                }
            }
        }
    }

    async fn process_frame(&mut self, frame: Frame) {
        let detection_enabled = self.handle.detection_enabled.load(Ordering::SeqCst);
        let plan = self.cadence.next_frame(detection_enabled);

        let mut outgoing = frame.bytes.clone();

        if plan.run_detection {
            match self.detector.detect(&frame, self.confidence_threshold).await {
                Ok(output) => {
                    if let Some(annotated) = output.annotated_frame {
                        outgoing = annotated;
                    }

                    let event = self
                        .aggregator
                        .record(&self.camera_id, output.detections, frame.captured_at)
                        .await;

                    self.hub
                        .broadcast_to_subscribers(
                            &self.camera_id,
                            &ServerMessage::Detection {
                                camera_id: self.camera_id.clone(),
                                detections: event.detections.clone(),
                                object_counts: event.object_counts.clone(),
                                timestamp: event.captured_at.to_rfc3339(),
                            },
                        )
                        .await;
                }
                Err(e) => {
                    // Recovered locally: skip this cycle's detection, keep
                    // relaying the raw feed.
                    tracing::warn!(
                        camera_id = %self.camera_id,
                        error = %e,
                        "Detection failed, relaying frame without it"
                    );
                }
            }
        }

        let encoded = encode_outgoing(outgoing, plan.jpeg_quality).await;

        self.hub
            .broadcast_to_subscribers(
                &self.camera_id,
                &ServerMessage::Frame {
                    camera_id: self.camera_id.clone(),
                    frame: BASE64.encode(&encoded),
                    timestamp: frame.captured_at.to_rfc3339(),
                },
            )
            .await;

        tokio::time::sleep(plan.delay).await;
    }

    async fn emit_error(&self, message: String) {
        self.hub
            .broadcast_to_subscribers(
                &self.camera_id,
                &ServerMessage::Error {
                    camera_id: Some(self.camera_id.clone()),
                    message,
                    timestamp: Utc::now().to_rfc3339(),
                },
            )
            .await;
    }
}

/// Re-encode at the cadence-selected quality on the blocking pool; fall
/// back to the original bytes when the payload is not a decodable image.
async fn encode_outgoing(bytes: Bytes, quality: u8) -> Bytes {
    let input = bytes.clone();
    match tokio::task::spawn_blocking(move || jpeg::reencode(&input, quality)).await {
        Ok(Ok(encoded)) => Bytes::from(encoded),
        Ok(Err(e)) => {
            tracing::debug!(error = %e, "Re-encode failed, relaying original bytes");
            bytes
        }
        Err(e) => {
            tracing::warn!(error = %e, "Encode task panicked, relaying original bytes");
            bytes
        }
    }
}

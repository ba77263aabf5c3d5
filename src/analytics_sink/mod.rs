//! Analytics Sink - Best-Effort Persistence Boundary
//!
//! ## Responsibilities
//!
//! - Bounded work queue between the detection loops and the storage
//!   collaborator
//! - Single dedicated writer task, so failures and backlog are observable
//! - Store contract where the hourly write is an upsert-with-increment
//!
//! Persistence is best-effort: a full queue or a failed write is logged and
//! dropped, never surfaced to the real-time path.

use crate::detection_aggregator::DetectionEvent;
use crate::error::{Error, Result};
use crate::models::CameraId;
use async_trait::async_trait;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// One unit of analytics work
#[derive(Debug, Clone)]
pub enum AnalyticsRecord {
    Detection(DetectionEvent),
    HourlyMerge {
        camera_id: CameraId,
        hour_key: String,
        object_counts: HashMap<String, u64>,
        total_delta: u64,
    },
}

/// Storage collaborator contract.
///
/// `merge_hourly` increments server-side: the (camera, hour) read-modify-write
/// lives behind the store, so concurrent writers cannot lose updates.
#[async_trait]
pub trait AnalyticsStore: Send + Sync {
    async fn append_detection(&self, event: &DetectionEvent) -> Result<()>;

    async fn merge_hourly(
        &self,
        camera_id: &CameraId,
        hour_key: &str,
        object_counts: &HashMap<String, u64>,
        total_delta: u64,
    ) -> Result<()>;
}

/// Handle for enqueueing analytics work onto the writer task
#[derive(Clone)]
pub struct AnalyticsWriter {
    tx: mpsc::Sender<AnalyticsRecord>,
}

impl AnalyticsWriter {
    /// Spawn the writer task consuming a bounded queue against the store.
    pub fn spawn(store: Arc<dyn AnalyticsStore>, capacity: usize) -> Self {
        let (tx, mut rx) = mpsc::channel::<AnalyticsRecord>(capacity);

        tokio::spawn(async move {
            while let Some(record) = rx.recv().await {
                let result = match &record {
                    AnalyticsRecord::Detection(event) => store.append_detection(event).await,
                    AnalyticsRecord::HourlyMerge {
                        camera_id,
                        hour_key,
                        object_counts,
                        total_delta,
                    } => {
                        store
                            .merge_hourly(camera_id, hour_key, object_counts, *total_delta)
                            .await
                    }
                };

                if let Err(e) = result {
                    tracing::warn!(error = %e, "Analytics write failed");
                }
            }

            tracing::info!("Analytics writer stopped");
        });

        Self { tx }
    }

    /// Non-blocking enqueue; a full queue drops the record and logs the
    /// backlog instead of stalling the detection loop.
    pub fn enqueue(&self, record: AnalyticsRecord) {
        match self.tx.try_send(record) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!("Analytics queue full, dropping record");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::warn!("Analytics writer gone, dropping record");
            }
        }
    }
}

/// HTTP store posting to an external analytics collector
pub struct HttpAnalyticsStore {
    client: reqwest::Client,
    base_url: String,
}

impl HttpAnalyticsStore {
    pub fn new(base_url: String) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .expect("Failed to create HTTP client");

        Self { client, base_url }
    }
}

#[async_trait]
impl AnalyticsStore for HttpAnalyticsStore {
    async fn append_detection(&self, event: &DetectionEvent) -> Result<()> {
        let url = format!("{}/api/analytics/detections", self.base_url);
        let resp = self
            .client
            .post(&url)
            .json(event)
            .send()
            .await
            .map_err(|e| Error::AnalyticsWrite(e.to_string()))?;

        if resp.status().is_success() {
            Ok(())
        } else {
            Err(Error::AnalyticsWrite(format!(
                "Collector returned {}",
                resp.status()
            )))
        }
    }

    async fn merge_hourly(
        &self,
        camera_id: &CameraId,
        hour_key: &str,
        object_counts: &HashMap<String, u64>,
        total_delta: u64,
    ) -> Result<()> {
        let url = format!("{}/api/analytics/hourly/increment", self.base_url);
        let body = json!({
            "camera_id": camera_id,
            "hour_key": hour_key,
            "object_counts": object_counts,
            "total_delta": total_delta,
        });

        let resp = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::AnalyticsWrite(e.to_string()))?;

        if resp.status().is_success() {
            Ok(())
        } else {
            Err(Error::AnalyticsWrite(format!(
                "Collector returned {}",
                resp.status()
            )))
        }
    }
}

/// No-op store used when no collector is configured
pub struct NullAnalyticsStore;

#[async_trait]
impl AnalyticsStore for NullAnalyticsStore {
    async fn append_detection(&self, _event: &DetectionEvent) -> Result<()> {
        Ok(())
    }

    async fn merge_hourly(
        &self,
        _camera_id: &CameraId,
        _hour_key: &str,
        _object_counts: &HashMap<String, u64>,
        _total_delta: u64,
    ) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use tokio::sync::Mutex;

    #[derive(Default)]
    struct RecordingStore {
        detections: Mutex<Vec<DetectionEvent>>,
        merges: Mutex<Vec<(CameraId, String, u64)>>,
    }

    #[async_trait]
    impl AnalyticsStore for RecordingStore {
        async fn append_detection(&self, event: &DetectionEvent) -> Result<()> {
            self.detections.lock().await.push(event.clone());
            Ok(())
        }

        async fn merge_hourly(
            &self,
            camera_id: &CameraId,
            hour_key: &str,
            _object_counts: &HashMap<String, u64>,
            total_delta: u64,
        ) -> Result<()> {
            self.merges
                .lock()
                .await
                .push((camera_id.clone(), hour_key.to_string(), total_delta));
            Ok(())
        }
    }

    fn event(camera: &str) -> DetectionEvent {
        DetectionEvent {
            camera_id: CameraId::from(camera),
            captured_at: Utc::now(),
            detections: Vec::new(),
            object_counts: HashMap::from([("person".to_string(), 2)]),
        }
    }

    #[tokio::test]
    async fn test_writer_drains_queue_to_store() {
        let store = Arc::new(RecordingStore::default());
        let writer = AnalyticsWriter::spawn(store.clone(), 16);

        writer.enqueue(AnalyticsRecord::Detection(event("cam-1")));
        writer.enqueue(AnalyticsRecord::HourlyMerge {
            camera_id: CameraId::from("cam-1"),
            hour_key: "2026-08-27 10:00".to_string(),
            object_counts: HashMap::from([("person".to_string(), 2)]),
            total_delta: 2,
        });

        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(store.detections.lock().await.len(), 1);
        let merges = store.merges.lock().await;
        assert_eq!(merges.len(), 1);
        assert_eq!(merges[0].2, 2);
    }

    #[tokio::test]
    async fn test_enqueue_overflow_drops_without_panicking() {
        // No spawned consumer: fill the channel directly.
        let (tx, _rx) = mpsc::channel(1);
        let writer = AnalyticsWriter { tx };

        writer.enqueue(AnalyticsRecord::Detection(event("cam-1")));
        writer.enqueue(AnalyticsRecord::Detection(event("cam-1")));
        writer.enqueue(AnalyticsRecord::Detection(event("cam-1")));
    }
}

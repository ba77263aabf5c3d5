//! DetectionAggregator - Analytics State
//!
//! ## Responsibilities
//!
//! - Normalize raw detections into per-cycle `DetectionEvent`s
//! - Maintain the capped per-camera rolling history (FIFO eviction)
//! - Merge counts additively into hourly buckets
//! - Serve read-only summaries derived from process-local state
//!
//! Rolling history and hourly buckets are caches, not authoritative storage;
//! the authoritative copy flows out through the analytics sink. Zero-count
//! cycles are recorded like any other so the event stream stays complete.

use crate::analytics_sink::{AnalyticsRecord, AnalyticsWriter};
use crate::detector::Detection;
use crate::models::CameraId;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use tokio::sync::{Mutex, RwLock};

/// One detection cycle's normalized result. Immutable after creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionEvent {
    pub camera_id: CameraId,
    pub captured_at: DateTime<Utc>,
    pub detections: Vec<Detection>,
    pub object_counts: HashMap<String, u64>,
}

impl DetectionEvent {
    /// Total objects in this cycle
    pub fn total(&self) -> u64 {
        self.object_counts.values().sum()
    }
}

/// Aggregated analytics for one camera and one calendar hour
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HourlyBucket {
    pub camera_id: CameraId,
    pub hour_key: String,
    pub object_counts: HashMap<String, u64>,
    pub total: u64,
    pub created_at: DateTime<Utc>,
}

/// One entry in the recent-activity window
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivitySample {
    pub timestamp: DateTime<Utc>,
    pub object_counts: HashMap<String, u64>,
    pub total_in_frame: u64,
}

/// Single cycle with the most detections
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeakDetection {
    pub timestamp: DateTime<Utc>,
    pub total_objects: u64,
    pub object_counts: HashMap<String, u64>,
}

/// Combined summary over the recent-activity window
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyticsSummary {
    pub total_objects: u64,
    pub object_types: HashMap<String, u64>,
    pub recent_activity: Vec<ActivitySample>,
    /// Per hour-of-day class counts within the window
    pub hourly_distribution: HashMap<String, HashMap<String, u64>>,
}

/// Bucket key format: `YYYY-MM-DD HH:00`
pub fn hour_key(at: DateTime<Utc>) -> String {
    at.format("%Y-%m-%d %H:00").to_string()
}

/// Recent-activity window size used by `summary`
const RECENT_WINDOW: usize = 20;

/// DetectionAggregator instance
pub struct DetectionAggregator {
    history_cap: usize,
    history: RwLock<HashMap<CameraId, VecDeque<DetectionEvent>>>,
    /// Single serialization point for all (camera, hour) merges; a merge is
    /// a read-modify-write that must never interleave per key.
    hourly: Mutex<HashMap<(CameraId, String), HourlyBucket>>,
    writer: Option<AnalyticsWriter>,
}

impl DetectionAggregator {
    /// Create new DetectionAggregator
    pub fn new(history_cap: usize, writer: Option<AnalyticsWriter>) -> Self {
        Self {
            history_cap,
            history: RwLock::new(HashMap::new()),
            hourly: Mutex::new(HashMap::new()),
            writer,
        }
    }

    /// Record one detection cycle: build the event, append it to rolling
    /// history, merge its counts into the hourly bucket, and enqueue the
    /// best-effort sink writes.
    pub async fn record(
        &self,
        camera_id: &CameraId,
        detections: Vec<Detection>,
        captured_at: DateTime<Utc>,
    ) -> DetectionEvent {
        let mut object_counts: HashMap<String, u64> = HashMap::new();
        for detection in &detections {
            *object_counts.entry(detection.label.clone()).or_insert(0) += 1;
        }

        let event = DetectionEvent {
            camera_id: camera_id.clone(),
            captured_at,
            detections,
            object_counts,
        };

        {
            let mut history = self.history.write().await;
            let entries = history.entry(camera_id.clone()).or_default();
            if entries.len() >= self.history_cap {
                entries.pop_front();
            }
            entries.push_back(event.clone());
        }

        let key = hour_key(captured_at);
        let total_delta = event.total();
        {
            let mut hourly = self.hourly.lock().await;
            let bucket = hourly
                .entry((camera_id.clone(), key.clone()))
                .or_insert_with(|| HourlyBucket {
                    camera_id: camera_id.clone(),
                    hour_key: key.clone(),
                    object_counts: HashMap::new(),
                    total: 0,
                    created_at: captured_at,
                });
            for (label, count) in &event.object_counts {
                *bucket.object_counts.entry(label.clone()).or_insert(0) += count;
            }
            bucket.total += total_delta;
        }

        if let Some(writer) = &self.writer {
            writer.enqueue(AnalyticsRecord::Detection(event.clone()));
            writer.enqueue(AnalyticsRecord::HourlyMerge {
                camera_id: camera_id.clone(),
                hour_key: key,
                object_counts: event.object_counts.clone(),
                total_delta,
            });
        }

        tracing::debug!(
            camera_id = %camera_id,
            objects = total_delta,
            "Detection cycle recorded"
        );

        event
    }

    /// Last `count` cycles, oldest first
    pub async fn recent_activity(&self, camera_id: &CameraId, count: usize) -> Vec<ActivitySample> {
        let history = self.history.read().await;
        let Some(entries) = history.get(camera_id) else {
            return Vec::new();
        };

        let skip = entries.len().saturating_sub(count);
        entries
            .iter()
            .skip(skip)
            .map(|event| ActivitySample {
                timestamp: event.captured_at,
                object_counts: event.object_counts.clone(),
                total_in_frame: event.total(),
            })
            .collect()
    }

    /// Total count per class over the whole rolling history
    pub async fn totals_by_class(&self, camera_id: &CameraId) -> HashMap<String, u64> {
        let history = self.history.read().await;
        let mut totals: HashMap<String, u64> = HashMap::new();
        if let Some(entries) = history.get(camera_id) {
            for event in entries {
                for (label, count) in &event.object_counts {
                    *totals.entry(label.clone()).or_insert(0) += count;
                }
            }
        }
        totals
    }

    /// Cycle with the most detections
    pub async fn peak_detection(&self, camera_id: &CameraId) -> Option<PeakDetection> {
        let history = self.history.read().await;
        let entries = history.get(camera_id)?;

        entries
            .iter()
            .max_by_key(|event| event.total())
            .map(|event| PeakDetection {
                timestamp: event.captured_at,
                total_objects: event.total(),
                object_counts: event.object_counts.clone(),
            })
    }

    /// Average detections per hour over the lookback window. Approximate:
    /// derived from rolling history, not authoritative storage.
    pub async fn average_per_hour(&self, camera_id: &CameraId, hours: i64) -> f64 {
        if hours <= 0 {
            return 0.0;
        }

        let cutoff = Utc::now() - Duration::hours(hours);
        let history = self.history.read().await;
        let Some(entries) = history.get(camera_id) else {
            return 0.0;
        };

        let total: u64 = entries
            .iter()
            .filter(|event| event.captured_at > cutoff)
            .map(|event| event.total())
            .sum();

        total as f64 / hours as f64
    }

    /// In-process hourly buckets for the camera within the lookback window,
    /// ordered by hour key
    pub async fn hourly_stats(&self, camera_id: &CameraId, hours: i64) -> Vec<HourlyBucket> {
        let cutoff = Utc::now() - Duration::hours(hours);
        let hourly = self.hourly.lock().await;

        let mut buckets: Vec<HourlyBucket> = hourly
            .iter()
            .filter(|((camera, _), bucket)| camera == camera_id && bucket.created_at > cutoff)
            .map(|(_, bucket)| bucket.clone())
            .collect();

        buckets.sort_by(|a, b| a.hour_key.cmp(&b.hour_key));
        buckets
    }

    /// Combined summary over the recent-activity window
    pub async fn summary(&self, camera_id: &CameraId) -> AnalyticsSummary {
        let recent = self.recent_activity(camera_id, RECENT_WINDOW).await;

        let mut total_objects = 0;
        let mut object_types: HashMap<String, u64> = HashMap::new();
        let mut hourly_distribution: HashMap<String, HashMap<String, u64>> = HashMap::new();

        for sample in &recent {
            total_objects += sample.total_in_frame;
            let hour = sample.timestamp.format("%H:00").to_string();
            let slot = hourly_distribution.entry(hour).or_default();
            for (label, count) in &sample.object_counts {
                *object_types.entry(label.clone()).or_insert(0) += count;
                *slot.entry(label.clone()).or_insert(0) += count;
            }
        }

        AnalyticsSummary {
            total_objects,
            object_types,
            recent_activity: recent,
            hourly_distribution,
        }
    }

    /// Rolling history length for a camera
    pub async fn history_len(&self, camera_id: &CameraId) -> usize {
        let history = self.history.read().await;
        history.get(camera_id).map_or(0, |entries| entries.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detector::BoundingBox;

    fn detection(label: &str) -> Detection {
        Detection {
            label: label.to_string(),
            confidence: 0.9,
            bbox: BoundingBox {
                x: 0,
                y: 0,
                width: 10,
                height: 10,
            },
        }
    }

    fn detections(labels: &[&str]) -> Vec<Detection> {
        labels.iter().map(|l| detection(l)).collect()
    }

    fn counts(event: &DetectionEvent, label: &str) -> u64 {
        event.object_counts.get(label).copied().unwrap_or(0)
    }

    #[tokio::test]
    async fn test_record_builds_class_counts() {
        let agg = DetectionAggregator::new(100, None);
        let cam = CameraId::from("cam-1");

        let event = agg
            .record(&cam, detections(&["person", "person", "car"]), Utc::now())
            .await;

        assert_eq!(counts(&event, "person"), 2);
        assert_eq!(counts(&event, "car"), 1);
        assert_eq!(event.total(), 3);
        assert_eq!(event.detections.len(), 3);
    }

    #[tokio::test]
    async fn test_zero_count_cycles_are_recorded() {
        let agg = DetectionAggregator::new(100, None);
        let cam = CameraId::from("cam-1");

        let event = agg.record(&cam, Vec::new(), Utc::now()).await;
        assert_eq!(event.total(), 0);
        assert_eq!(agg.history_len(&cam).await, 1);
    }

    #[tokio::test]
    async fn test_history_cap_evicts_oldest_first() {
        let agg = DetectionAggregator::new(3, None);
        let cam = CameraId::from("cam-1");

        for label in ["a", "b", "c", "d"] {
            agg.record(&cam, detections(&[label]), Utc::now()).await;
        }

        assert_eq!(agg.history_len(&cam).await, 3);
        let recent = agg.recent_activity(&cam, 10).await;
        assert_eq!(recent.len(), 3);
        // "a" was evicted; "b" is now the oldest.
        assert!(recent[0].object_counts.contains_key("b"));
        assert!(recent[2].object_counts.contains_key("d"));
    }

    #[tokio::test]
    async fn test_hourly_merge_is_additive() {
        let agg = DetectionAggregator::new(100, None);
        let cam = CameraId::from("cam-1");
        let at = Utc::now();

        agg.record(&cam, detections(&["a", "a"]), at).await;
        agg.record(&cam, detections(&["a", "a", "a", "b"]), at).await;

        let buckets = agg.hourly_stats(&cam, 24).await;
        assert_eq!(buckets.len(), 1);
        assert_eq!(buckets[0].object_counts.get("a"), Some(&5));
        assert_eq!(buckets[0].object_counts.get("b"), Some(&1));
        assert_eq!(buckets[0].total, 6);
    }

    #[tokio::test]
    async fn test_hourly_merge_isolated_per_camera() {
        let agg = DetectionAggregator::new(100, None);
        let at = Utc::now();
        let cam1 = CameraId::from("cam-1");
        let cam2 = CameraId::from("cam-2");

        agg.record(&cam1, detections(&["a"]), at).await;
        agg.record(&cam2, detections(&["a", "a"]), at).await;

        assert_eq!(agg.hourly_stats(&cam1, 24).await[0].total, 1);
        assert_eq!(agg.hourly_stats(&cam2, 24).await[0].total, 2);
    }

    #[tokio::test]
    async fn test_peak_and_totals() {
        let agg = DetectionAggregator::new(100, None);
        let cam = CameraId::from("cam-1");

        agg.record(&cam, detections(&["person"]), Utc::now()).await;
        agg.record(&cam, detections(&["person", "person", "car"]), Utc::now())
            .await;
        agg.record(&cam, Vec::new(), Utc::now()).await;

        let totals = agg.totals_by_class(&cam).await;
        assert_eq!(totals.get("person"), Some(&3));
        assert_eq!(totals.get("car"), Some(&1));

        let peak = agg.peak_detection(&cam).await.unwrap();
        assert_eq!(peak.total_objects, 3);
    }

    #[tokio::test]
    async fn test_average_per_hour() {
        let agg = DetectionAggregator::new(100, None);
        let cam = CameraId::from("cam-1");

        agg.record(&cam, detections(&["a", "a"]), Utc::now()).await;
        agg.record(&cam, detections(&["a", "a"]), Utc::now()).await;

        assert!((agg.average_per_hour(&cam, 4).await - 1.0).abs() < f64::EPSILON);
        assert_eq!(agg.average_per_hour(&cam, 0).await, 0.0);
    }

    #[tokio::test]
    async fn test_summary_window() {
        let agg = DetectionAggregator::new(100, None);
        let cam = CameraId::from("cam-1");

        agg.record(&cam, detections(&["person"]), Utc::now()).await;
        agg.record(&cam, detections(&["car"]), Utc::now()).await;

        let summary = agg.summary(&cam).await;
        assert_eq!(summary.total_objects, 2);
        assert_eq!(summary.recent_activity.len(), 2);
        assert_eq!(summary.object_types.get("person"), Some(&1));
        assert!(!summary.hourly_distribution.is_empty());
    }

    #[test]
    fn test_hour_key_format() {
        let at = chrono::DateTime::parse_from_rfc3339("2026-08-27T14:35:00Z")
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(hour_key(at), "2026-08-27 14:00");
    }
}

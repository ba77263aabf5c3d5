//! Application state
//!
//! Holds all shared components and state

use crate::detection_aggregator::DetectionAggregator;
use crate::detector::HttpDetector;
use crate::fanout_hub::FanoutHub;
use crate::stream_supervisor::StreamSupervisor;
use std::sync::Arc;

/// Application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Server host
    pub host: String,
    /// Server port
    pub port: u16,
    /// Inference service URL
    pub detector_url: String,
    /// Analytics collector URL; sink writes are disabled when unset
    pub analytics_url: Option<String>,
    /// Detector confidence threshold
    pub confidence_threshold: f32,
    /// Detection runs every Nth frame
    pub detection_interval: u32,
    /// Rolling history cap per camera
    pub history_cap: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            host: std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: std::env::var("PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(8000),
            detector_url: std::env::var("DETECTOR_URL")
                .unwrap_or_else(|_| "http://localhost:9000".to_string()),
            analytics_url: std::env::var("ANALYTICS_URL").ok(),
            confidence_threshold: std::env::var("CONFIDENCE_THRESHOLD")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(0.6),
            detection_interval: std::env::var("DETECTION_INTERVAL")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(3),
            history_cap: std::env::var("HISTORY_CAP")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(2000),
        }
    }
}

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// Application config
    pub config: AppConfig,
    /// StreamSupervisor (camera lifecycle)
    pub supervisor: Arc<StreamSupervisor>,
    /// DetectionAggregator (rolling history + hourly buckets)
    pub aggregator: Arc<DetectionAggregator>,
    /// FanoutHub (WebSocket distribution)
    pub hub: Arc<FanoutHub>,
    /// Detector adapter, kept for health checks
    pub detector: Arc<HttpDetector>,
}

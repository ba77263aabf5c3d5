//! Camtower - Multi-Camera Streaming and Detection Server
//!
//! ## Architecture (8 Components)
//!
//! 1. FrameSource - MJPEG frame acquisition from IP cameras
//! 2. Detector - Inference service adapter
//! 3. CadenceController - Per-frame detection gating and pacing
//! 4. StreamSupervisor - Camera lifecycle control
//! 5. StreamOrchestrator - Per-camera processing loop
//! 6. DetectionAggregator - Rolling history and hourly analytics
//! 7. FanoutHub - WebSocket distribution
//! 8. WebAPI - REST API endpoints
//!
//! ## Design Principles
//!
//! - One orchestrator per camera, enforced by the supervisor registry
//! - Detection is best-effort: a failed cycle never stops the frame relay
//! - Client failures are isolated: a dead subscriber never affects others

pub mod analytics_sink;
pub mod cadence;
pub mod detection_aggregator;
pub mod detector;
pub mod error;
pub mod fanout_hub;
pub mod frame_source;
pub mod jpeg;
pub mod models;
pub mod state;
pub mod stream_orchestrator;
pub mod stream_supervisor;
pub mod web_api;

pub use error::{Error, Result};
pub use state::AppState;

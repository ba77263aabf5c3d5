//! Detector - Object Detection Adapter
//!
//! ## Responsibilities
//!
//! - Send frames to the inference service
//! - Parse labeled, localized detections from the response
//! - Decode the optional annotated frame
//!
//! The model itself is an opaque external capability; this module only
//! speaks its HTTP contract.

use crate::error::{Error, Result};
use crate::frame_source::Frame;
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use bytes::Bytes;
use reqwest::multipart::{Form, Part};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Axis-aligned bounding box in pixel coordinates
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

/// One labeled detection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Detection {
    pub label: String,
    pub confidence: f32,
    pub bbox: BoundingBox,
}

/// Result of one detection call
#[derive(Debug, Clone, Default)]
pub struct DetectionOutput {
    pub detections: Vec<Detection>,
    /// Frame with boxes and labels drawn in, when the service returns one
    pub annotated_frame: Option<Bytes>,
}

/// Opaque detection capability
#[async_trait]
pub trait Detector: Send + Sync {
    async fn detect(&self, frame: &Frame, confidence_threshold: f32) -> Result<DetectionOutput>;
}

/// Wire response from the inference service
#[derive(Debug, Deserialize)]
struct DetectResponse {
    #[serde(default)]
    detections: Vec<Detection>,
    #[serde(default)]
    annotated_frame: Option<String>,
}

/// HTTP adapter for the inference service
pub struct HttpDetector {
    client: reqwest::Client,
    base_url: String,
}

impl HttpDetector {
    pub fn new(base_url: String) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .expect("Failed to create HTTP client");

        Self { client, base_url }
    }

    /// Check if the inference service is responding
    pub async fn health_check(&self) -> Result<bool> {
        let url = format!("{}/healthz", self.base_url);
        match self.client.get(&url).send().await {
            Ok(resp) => Ok(resp.status().is_success()),
            Err(_) => Ok(false),
        }
    }
}

#[async_trait]
impl Detector for HttpDetector {
    async fn detect(&self, frame: &Frame, confidence_threshold: f32) -> Result<DetectionOutput> {
        let url = format!("{}/v1/detect", self.base_url);

        let image_part = Part::bytes(frame.bytes.to_vec())
            .file_name("frame.jpg")
            .mime_str("image/jpeg")
            .map_err(|e| Error::Detector(format!("Invalid mime type: {}", e)))?;

        let form = Form::new()
            .part("image", image_part)
            .text("confidence_threshold", confidence_threshold.to_string())
            .text("captured_at", frame.captured_at.to_rfc3339());

        let resp = self
            .client
            .post(&url)
            .multipart(form)
            .send()
            .await
            .map_err(|e| Error::Detector(format!("Request failed: {}", e)))?;

        if !resp.status().is_success() {
            return Err(Error::Detector(format!(
                "Inference service returned {}",
                resp.status()
            )));
        }

        let body: DetectResponse = resp
            .json()
            .await
            .map_err(|e| Error::Detector(format!("Invalid response: {}", e)))?;

        let annotated_frame = match body.annotated_frame {
            Some(encoded) => Some(Bytes::from(BASE64.decode(encoded.as_bytes()).map_err(
                |e| Error::Detector(format!("Invalid annotated frame encoding: {}", e)),
            )?)),
            None => None,
        };

        Ok(DetectionOutput {
            detections: body.detections,
            annotated_frame,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_response_parsing() {
        let raw = r#"{
            "detections": [
                {"label": "person", "confidence": 0.91, "bbox": {"x": 10, "y": 20, "width": 50, "height": 120}}
            ],
            "annotated_frame": null
        }"#;

        let parsed: DetectResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.detections.len(), 1);
        assert_eq!(parsed.detections[0].label, "person");
        assert_eq!(parsed.detections[0].bbox.width, 50);
        assert!(parsed.annotated_frame.is_none());
    }

    #[test]
    fn test_detect_response_defaults() {
        let parsed: DetectResponse = serde_json::from_str("{}").unwrap();
        assert!(parsed.detections.is_empty());
        assert!(parsed.annotated_frame.is_none());
    }
}

//! FrameSource - Camera Stream Acquisition
//!
//! ## Responsibilities
//!
//! - Reachability probe against a camera's status endpoint
//! - Pull decoded JPEG frames one at a time from the camera's MJPEG stream
//! - Release the underlying connection on close
//!
//! IP webcam convention: `/status.json` answers the probe, `/video` serves
//! the MJPEG stream. Frames are carved out of the byte stream by scanning
//! for JPEG SOI/EOI markers.

use crate::error::{Error, Result};
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use futures::StreamExt;
use std::time::Duration;

/// JPEG start-of-image marker
const SOI: [u8; 2] = [0xFF, 0xD8];
/// JPEG end-of-image marker
const EOI: [u8; 2] = [0xFF, 0xD9];

/// Buffered stream bytes past this size without a complete frame are
/// discarded and counted as a miss.
const MAX_BUFFER_BYTES: usize = 8 * 1024 * 1024;

/// One decoded frame from a camera
#[derive(Debug, Clone)]
pub struct Frame {
    /// JPEG-encoded image bytes
    pub bytes: Bytes,
    pub captured_at: DateTime<Utc>,
}

impl Frame {
    pub fn new(bytes: Bytes) -> Self {
        Self {
            bytes,
            captured_at: Utc::now(),
        }
    }
}

/// An open per-camera frame stream.
///
/// `read_frame` returning `Ok(None)` is a transient miss; the caller decides
/// when repeated misses become fatal.
#[async_trait]
pub trait FrameSource: Send {
    async fn read_frame(&mut self) -> Result<Option<Frame>>;

    /// Release the underlying connection. Always called on loop exit.
    async fn close(&mut self);
}

/// Opens frame sources for cameras by network address.
#[async_trait]
pub trait FrameSourceProvider: Send + Sync {
    /// Lightweight connectivity check; `Err(SourceUnreachable)` when the
    /// camera does not answer.
    async fn probe(&self, address: &str, port: u16) -> Result<()>;

    async fn open(&self, address: &str, port: u16) -> Result<Box<dyn FrameSource>>;
}

/// HTTP MJPEG provider for IP webcams
pub struct HttpFrameSourceProvider {
    client: reqwest::Client,
}

impl HttpFrameSourceProvider {
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .build()
            .expect("Failed to create HTTP client");

        Self { client }
    }

    fn status_url(address: &str, port: u16) -> String {
        format!("http://{}:{}/status.json", address, port)
    }

    fn video_url(address: &str, port: u16) -> String {
        format!("http://{}:{}/video", address, port)
    }
}

impl Default for HttpFrameSourceProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FrameSourceProvider for HttpFrameSourceProvider {
    async fn probe(&self, address: &str, port: u16) -> Result<()> {
        let url = Self::status_url(address, port);
        let resp = self
            .client
            .get(&url)
            .timeout(Duration::from_secs(5))
            .send()
            .await
            .map_err(|e| Error::SourceUnreachable(format!("{}: {}", url, e)))?;

        if resp.status().is_success() {
            Ok(())
        } else {
            Err(Error::SourceUnreachable(format!(
                "{} returned {}",
                url,
                resp.status()
            )))
        }
    }

    async fn open(&self, address: &str, port: u16) -> Result<Box<dyn FrameSource>> {
        let url = Self::video_url(address, port);
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| Error::SourceUnreachable(format!("{}: {}", url, e)))?;

        if !resp.status().is_success() {
            return Err(Error::SourceUnreachable(format!(
                "{} returned {}",
                url,
                resp.status()
            )));
        }

        tracing::info!(url = %url, "Camera stream opened");

        Ok(Box::new(MjpegFrameSource {
            stream: Some(resp.bytes_stream().boxed()),
            buf: BytesMut::new(),
        }))
    }
}

/// Frame source backed by an HTTP MJPEG byte stream
pub struct MjpegFrameSource {
    stream: Option<BoxStream<'static, reqwest::Result<Bytes>>>,
    buf: BytesMut,
}

#[async_trait]
impl FrameSource for MjpegFrameSource {
    async fn read_frame(&mut self) -> Result<Option<Frame>> {
        loop {
            if let Some(jpeg) = extract_jpeg(&mut self.buf) {
                return Ok(Some(Frame::new(jpeg)));
            }

            if self.buf.len() > MAX_BUFFER_BYTES {
                tracing::warn!(
                    buffered = self.buf.len(),
                    "No frame boundary within buffer cap, discarding"
                );
                self.buf.clear();
                return Ok(None);
            }

            let stream = match self.stream.as_mut() {
                Some(s) => s,
                None => return Ok(None),
            };

            match stream.next().await {
                Some(Ok(chunk)) => self.buf.extend_from_slice(&chunk),
                Some(Err(e)) => {
                    tracing::debug!(error = %e, "Stream chunk error");
                    return Ok(None);
                }
                None => {
                    // Upstream closed; surfaced as misses until the caller
                    // escalates.
                    self.stream = None;
                    return Ok(None);
                }
            }
        }
    }

    async fn close(&mut self) {
        self.stream = None;
        self.buf.clear();
    }
}

/// Carve one complete JPEG out of the buffer, discarding any bytes that
/// precede its start marker.
fn extract_jpeg(buf: &mut BytesMut) -> Option<Bytes> {
    let start = find_marker(buf, &SOI)?;
    if start > 0 {
        let _ = buf.split_to(start);
    }

    let end = find_marker(&buf[SOI.len()..], &EOI)? + SOI.len() + EOI.len();
    let frame = buf.split_to(end);
    Some(frame.freeze())
}

fn find_marker(haystack: &[u8], marker: &[u8; 2]) -> Option<usize> {
    haystack.windows(2).position(|w| w == marker)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fake_jpeg(payload: &[u8]) -> Vec<u8> {
        let mut v = SOI.to_vec();
        v.extend_from_slice(payload);
        v.extend_from_slice(&EOI);
        v
    }

    #[test]
    fn test_extract_single_frame() {
        let mut buf = BytesMut::from(&fake_jpeg(b"abc")[..]);
        let frame = extract_jpeg(&mut buf).unwrap();
        assert_eq!(&frame[..2], &SOI);
        assert_eq!(&frame[frame.len() - 2..], &EOI);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_extract_skips_multipart_boundary_noise() {
        let mut buf = BytesMut::new();
        buf.extend_from_slice(b"--frame\r\nContent-Type: image/jpeg\r\n\r\n");
        buf.extend_from_slice(&fake_jpeg(b"xyz"));
        buf.extend_from_slice(b"\r\n--frame");

        let frame = extract_jpeg(&mut buf).unwrap();
        assert_eq!(&frame[..2], &SOI);
        // Trailing boundary bytes stay buffered for the next frame.
        assert_eq!(&buf[..], b"\r\n--frame");
    }

    #[test]
    fn test_extract_incomplete_frame_returns_none() {
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&SOI);
        buf.extend_from_slice(b"partial data without end marker");
        assert!(extract_jpeg(&mut buf).is_none());
        // Partial data is preserved for the next chunk.
        assert!(!buf.is_empty());
    }

    #[test]
    fn test_extract_consecutive_frames_in_order() {
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&fake_jpeg(b"first"));
        buf.extend_from_slice(&fake_jpeg(b"second"));

        let a = extract_jpeg(&mut buf).unwrap();
        let b = extract_jpeg(&mut buf).unwrap();
        assert!(a.windows(5).any(|w| w == b"first"));
        assert!(b.windows(6).any(|w| w == b"second"));
        assert!(extract_jpeg(&mut buf).is_none());
    }
}

//! JPEG re-encoding at a target quality.
//!
//! Frames arrive from the source (or back from the detector) already
//! JPEG-encoded; the cadence controller picks the outgoing quality, so the
//! relay path decodes and re-encodes. Callers run this on the blocking pool.

use crate::error::Result;
use image::codecs::jpeg::JpegEncoder;
use std::io::Cursor;

/// Re-encode a JPEG at the given quality (1-100).
pub fn reencode(data: &[u8], quality: u8) -> Result<Vec<u8>> {
    let img = image::load_from_memory(data)?;
    let rgb = img.to_rgb8();

    let mut out = Cursor::new(Vec::with_capacity(data.len()));
    let encoder = JpegEncoder::new_with_quality(&mut out, quality);
    rgb.write_with_encoder(encoder)?;
    Ok(out.into_inner())
}

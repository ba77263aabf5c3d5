//! CadenceController - Detection Gating and Relay Pacing
//!
//! ## Responsibilities
//!
//! - Decide per incoming frame whether detection runs this cycle
//! - Pick the output JPEG quality and inter-iteration delay
//! - Provide the cooldown delay for frame-read misses
//!
//! Skipping detection is always cheaper than skipping a relayed frame, so
//! non-detection frames get the faster cadence and the higher encode quality.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Cadence tuning knobs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CadencePolicy {
    /// Detection runs on every Nth counted frame
    pub detection_interval: u32,
    /// Delay after relaying a non-detection frame
    pub idle_delay_ms: u64,
    /// Delay after a detection-bearing frame (annotation overhead)
    pub detection_delay_ms: u64,
    /// JPEG quality for plain relay frames
    pub idle_quality: u8,
    /// JPEG quality for detection-bearing frames
    pub detection_quality: u8,
    /// Cooldown after a frame-read miss, instead of busy-looping
    pub miss_cooldown_ms: u64,
    /// Consecutive misses before the read failure is classified fatal
    pub max_consecutive_misses: u32,
}

impl Default for CadencePolicy {
    fn default() -> Self {
        Self {
            detection_interval: 3,
            idle_delay_ms: 33,
            detection_delay_ms: 66,
            idle_quality: 90,
            detection_quality: 85,
            miss_cooldown_ms: 100,
            max_consecutive_misses: 30,
        }
    }
}

/// Decision for one frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FramePlan {
    pub run_detection: bool,
    pub jpeg_quality: u8,
    pub delay: Duration,
}

/// Per-camera cadence state: a frame counter plus the policy.
///
/// The counter only advances on frames actually read, so upstream read
/// jitter never shifts which frames carry detection.
#[derive(Debug)]
pub struct CadenceController {
    policy: CadencePolicy,
    frame_count: u64,
}

impl CadenceController {
    pub fn new(policy: CadencePolicy) -> Self {
        Self {
            policy,
            frame_count: 0,
        }
    }

    /// Count one frame and decide how to handle it.
    pub fn next_frame(&mut self, detection_enabled: bool) -> FramePlan {
        self.frame_count += 1;
        let run_detection = detection_enabled
            && self.frame_count % u64::from(self.policy.detection_interval) == 0;

        if run_detection {
            FramePlan {
                run_detection: true,
                jpeg_quality: self.policy.detection_quality,
                delay: Duration::from_millis(self.policy.detection_delay_ms),
            }
        } else {
            FramePlan {
                run_detection: false,
                jpeg_quality: self.policy.idle_quality,
                delay: Duration::from_millis(self.policy.idle_delay_ms),
            }
        }
    }

    /// Delay to apply when the source had no frame available.
    pub fn miss_cooldown(&self) -> Duration {
        Duration::from_millis(self.policy.miss_cooldown_ms)
    }

    pub fn max_consecutive_misses(&self) -> u32 {
        self.policy.max_consecutive_misses
    }

    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }
}

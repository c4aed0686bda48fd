//! Core data model shared by the detector, router, tracker and recording
//! controller: frames, detections, tracks and the suspicion score.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single JPEG-encoded camera frame.
#[derive(Debug, Clone)]
pub struct Frame {
    pub frame_id: u64,
    pub jpeg: bytes::Bytes,
    pub width: u32,
    pub height: u32,
    pub captured_at: DateTime<Utc>,
}

impl Frame {
    pub fn new(frame_id: u64, jpeg: bytes::Bytes, width: u32, height: u32) -> Self {
        Self {
            frame_id,
            jpeg,
            width,
            height,
            captured_at: Utc::now(),
        }
    }
}

/// A bounding box in pixel coordinates of the processed frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BBox {
    pub fn area(&self) -> f32 {
        (self.x2 - self.x1).max(0.0) * (self.y2 - self.y1).max(0.0)
    }

    /// Intersection-over-union with another box, used by the tracker's
    /// frame-to-frame association step.
    pub fn iou(&self, other: &BBox) -> f32 {
        let ix1 = self.x1.max(other.x1);
        let iy1 = self.y1.max(other.y1);
        let ix2 = self.x2.min(other.x2);
        let iy2 = self.y2.min(other.y2);
        let inter = (ix2 - ix1).max(0.0) * (iy2 - iy1).max(0.0);
        let union = self.area() + other.area() - inter;
        if union <= 0.0 {
            0.0
        } else {
            inter / union
        }
    }

    /// True if `self` lies entirely inside `frame` (invariant I1).
    pub fn within_frame(&self, width: u32, height: u32) -> bool {
        self.x1 >= 0.0
            && self.y1 >= 0.0
            && self.x2 <= width as f32
            && self.y2 <= height as f32
            && self.x1 <= self.x2
            && self.y1 <= self.y2
    }
}

/// A single object hypothesis in a frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Detection {
    /// Absent until reconciled against the local name→id map (remote
    /// detections may name a class the local model never saw).
    pub class_id: Option<u32>,
    pub class_name: String,
    pub confidence: f32,
    pub bbox: BBox,
}

/// Detections produced for a single frame.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DetectionResult {
    pub detections: Vec<Detection>,
}

impl DetectionResult {
    pub fn empty() -> Self {
        Self::default()
    }
}

/// A tracked object, stable across frames under a single track id.
#[derive(Debug, Clone)]
pub struct Track {
    pub track_id: u64,
    pub class_id: Option<u32>,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub bbox: BBox,
    pub confidence: f32,
    /// Consecutive frames this track has been matched, used to gate
    /// confirmation (minimum_consecutive_frames).
    pub consecutive_frames: u32,
}

/// Output of a single tracker update: the suspicion score plus the set of
/// confirmed tracks that contributed to it.
#[derive(Debug, Clone, Default)]
pub struct TrackedFrame {
    pub score: f64,
    pub tracks: Vec<Track>,
}

/// In-memory recording state, mirrored onto the event fabric.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordingState {
    pub is_recording: bool,
    pub current_segment_id: Option<String>,
    pub last_transition: DateTime<Utc>,
}

impl Default for RecordingState {
    fn default() -> Self {
        Self {
            is_recording: false,
            current_segment_id: None,
            last_transition: Utc::now(),
        }
    }
}

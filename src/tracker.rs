//! Multi-object tracker plus the suspicion scorer. The scoring math is
//! ported verbatim from `original_source/detection/tracking/
//! tracking_service.py`'s `process_detections`/`sigmoid`; frame-to-frame
//! association is an IoU-greedy matcher built against the same contract
//! the original gets from `supervision`'s `ByteTrack` (stable ids,
//! `lost_track_buffer`, `minimum_consecutive_frames`) since no
//! equivalent tracker crate exists in this ecosystem.

use crate::types::{BBox, DetectionResult, Track, TrackedFrame};
use chrono::{DateTime, Utc};
use std::collections::HashMap;

const LOST_TRACK_BUFFER_SECS: f64 = 1.0;
const MINIMUM_CONSECUTIVE_FRAMES: u32 = 15;
const IOU_MATCH_THRESHOLD: f32 = 0.3;

fn sigmoid(x: f64, midpoint: f64, k: f64, max_value: f64) -> f64 {
    max_value / (1.0 + (-k * (x - midpoint)).exp())
}

struct InternalTrack {
    track_id: u64,
    class_id: Option<u32>,
    first_seen: DateTime<Utc>,
    last_seen: DateTime<Utc>,
    bbox: BBox,
    confidence: f32,
    consecutive_frames: u32,
}

/// Owns all tracker state; a single instance lives on the Router task
/// (spec.md §7: "the Tracker's state is owned by the Router task and
/// touched only there").
pub struct Tracker {
    tracks: HashMap<u64, InternalTrack>,
    next_track_id: u64,
    class_weights: HashMap<u32, f64>,
}

impl Tracker {
    pub fn new(class_weights: HashMap<u32, f64>) -> Self {
        Self {
            tracks: HashMap::new(),
            next_track_id: 1,
            class_weights,
        }
    }

    pub fn set_class_weights(&mut self, class_weights: HashMap<u32, f64>) {
        self.class_weights = class_weights;
    }

    fn class_weight(&self, class_id: Option<u32>) -> f64 {
        class_id
            .and_then(|id| self.class_weights.get(&id).copied())
            .unwrap_or(1.0)
    }

    /// Associates `detections` with existing tracks by greedy IoU
    /// matching, updates track state, evicts stale tracks, and computes
    /// the frame's suspicion score. `now` is injected so scoring stays a
    /// pure function of inputs (I4) and deterministic under test (P4).
    pub fn update(&mut self, detections: &DetectionResult, now: DateTime<Utc>, frame_w: u32, frame_h: u32) -> TrackedFrame {
        self.associate(detections, now);
        self.evict_stale(now);

        let mut baselines = Vec::new();
        let mut confirmed = Vec::new();

        for track in self.tracks.values() {
            if track.consecutive_frames < MINIMUM_CONSECUTIVE_FRAMES {
                continue;
            }
            let area_ratio_pct = 100.0 * track.bbox.area() as f64 / (frame_w as f64 * frame_h as f64).max(1.0);
            let duration_s = (now - track.first_seen).num_milliseconds() as f64 / 1000.0;
            let k = self.class_weight(track.class_id);

            let area_score = sigmoid(area_ratio_pct, 25.0, 0.12 * k, 60.0);
            let time_score = sigmoid(duration_s, 4.0, 0.08 * k, 40.0);
            baselines.push(area_score + time_score);

            confirmed.push(Track {
                track_id: track.track_id,
                class_id: track.class_id,
                first_seen: track.first_seen,
                last_seen: track.last_seen,
                bbox: track.bbox,
                confidence: track.confidence,
                consecutive_frames: track.consecutive_frames,
            });
        }

        let score = softmax_weighted_mean(&baselines);
        TrackedFrame { score, tracks: confirmed }
    }

    fn associate(&mut self, detections: &DetectionResult, now: DateTime<Utc>) {
        let mut unmatched_track_ids: Vec<u64> = self.tracks.keys().copied().collect();
        let mut matched_tracks = std::collections::HashSet::new();

        for detection in &detections.detections {
            let best = unmatched_track_ids
                .iter()
                .filter(|id| !matched_tracks.contains(*id))
                .filter(|id| self.tracks[id].class_id == detection.class_id)
                .map(|id| (*id, self.tracks[id].bbox.iou(&detection.bbox)))
                .filter(|(_, iou)| *iou >= IOU_MATCH_THRESHOLD)
                .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap());

            match best {
                Some((track_id, _)) => {
                    matched_tracks.insert(track_id);
                    let track = self.tracks.get_mut(&track_id).unwrap();
                    track.bbox = detection.bbox;
                    track.confidence = detection.confidence;
                    track.last_seen = now;
                    track.consecutive_frames += 1;
                }
                None => {
                    let track_id = self.next_track_id;
                    self.next_track_id += 1;
                    self.tracks.insert(
                        track_id,
                        InternalTrack {
                            track_id,
                            class_id: detection.class_id,
                            first_seen: now,
                            last_seen: now,
                            bbox: detection.bbox,
                            confidence: detection.confidence,
                            consecutive_frames: 1,
                        },
                    );
                }
            }
        }

        unmatched_track_ids.retain(|id| !matched_tracks.contains(id));
        for id in unmatched_track_ids {
            if let Some(track) = self.tracks.get_mut(&id) {
                track.consecutive_frames = 0;
            }
        }
    }

    fn evict_stale(&mut self, now: DateTime<Utc>) {
        self.tracks.retain(|_, track| {
            (now - track.last_seen).num_milliseconds() as f64 / 1000.0 <= LOST_TRACK_BUFFER_SECS
        });
    }
}

fn softmax_weighted_mean(baselines: &[f64]) -> f64 {
    if baselines.is_empty() {
        return 0.0;
    }
    let weights: Vec<f64> = baselines.iter().map(|b| b.exp()).collect();
    let weighted_sum: f64 = weights.iter().zip(baselines).map(|(w, b)| w * b).sum();
    let weight_total: f64 = weights.iter().sum();
    (weighted_sum / weight_total).min(100.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Detection, DetectionResult};
    use chrono::Duration;

    fn default_weights() -> HashMap<u32, f64> {
        let mut w = HashMap::new();
        w.insert(0, 1.6);
        w
    }

    fn person_detection(bbox: BBox) -> DetectionResult {
        DetectionResult {
            detections: vec![Detection {
                class_id: Some(0),
                class_name: "person".to_string(),
                confidence: 0.9,
                bbox,
            }],
        }
    }

    fn run_frames(tracker: &mut Tracker, bbox: BBox, count: u32, start: DateTime<Utc>, step: Duration) -> TrackedFrame {
        let mut result = TrackedFrame::default();
        for i in 0..count {
            let now = start + step * i as i32;
            result = tracker.update(&person_detection(bbox), now, 1000, 1000);
        }
        result
    }

    #[test]
    fn p1_empty_detections_score_zero() {
        let mut tracker = Tracker::new(default_weights());
        let result = tracker.update(&DetectionResult::empty(), Utc::now(), 1000, 1000);
        assert_eq!(result.score, 0.0);
    }

    #[test]
    fn p3_score_bounded_0_to_100() {
        let mut tracker = Tracker::new(default_weights());
        let bbox = BBox { x1: 0.0, y1: 0.0, x2: 900.0, y2: 900.0 };
        let start = Utc::now();
        let result = run_frames(&mut tracker, bbox, 20, start, Duration::seconds(1));
        assert!(result.score >= 0.0 && result.score <= 100.0);
    }

    #[test]
    fn p2_score_monotonic_in_area_and_duration() {
        let small_bbox = BBox { x1: 0.0, y1: 0.0, x2: 100.0, y2: 100.0 };
        let large_bbox = BBox { x1: 0.0, y1: 0.0, x2: 600.0, y2: 600.0 };
        let start = Utc::now();

        let mut small_tracker = Tracker::new(default_weights());
        let small_result = run_frames(&mut small_tracker, small_bbox, 16, start, Duration::seconds(1));

        let mut large_tracker = Tracker::new(default_weights());
        let large_result = run_frames(&mut large_tracker, large_bbox, 16, start, Duration::seconds(1));

        assert!(large_result.score > small_result.score);

        let mut short_tracker = Tracker::new(default_weights());
        let short_result = run_frames(&mut short_tracker, large_bbox, 16, start, Duration::milliseconds(100));
        assert!(large_result.score > short_result.score);
    }

    #[test]
    fn p4_scores_are_deterministic() {
        let bbox = BBox { x1: 0.0, y1: 0.0, x2: 400.0, y2: 400.0 };
        let start = Utc::now();

        let mut tracker_a = Tracker::new(default_weights());
        let result_a = run_frames(&mut tracker_a, bbox, 18, start, Duration::seconds(1));

        let mut tracker_b = Tracker::new(default_weights());
        let result_b = run_frames(&mut tracker_b, bbox, 18, start, Duration::seconds(1));

        assert_eq!(result_a.score, result_b.score);
    }

    #[test]
    fn p5_track_ids_unique_and_never_reused() {
        let mut tracker = Tracker::new(default_weights());
        let start = Utc::now();
        let bbox_a = BBox { x1: 0.0, y1: 0.0, x2: 100.0, y2: 100.0 };

        tracker.update(&person_detection(bbox_a), start, 1000, 1000);
        let first_id = tracker.tracks.values().next().unwrap().track_id;

        // Let the track go stale so it's evicted, then re-appear far away:
        // association must not reuse the evicted id.
        let far_future = start + Duration::seconds(5);
        tracker.update(&DetectionResult::empty(), far_future, 1000, 1000);
        assert!(tracker.tracks.is_empty());

        tracker.update(&person_detection(bbox_a), far_future, 1000, 1000);
        let second_id = tracker.tracks.values().next().unwrap().track_id;
        assert_ne!(first_id, second_id);
    }

    #[test]
    fn tracks_evicted_after_one_second_idle() {
        let mut tracker = Tracker::new(default_weights());
        let start = Utc::now();
        let bbox = BBox { x1: 0.0, y1: 0.0, x2: 100.0, y2: 100.0 };
        tracker.update(&person_detection(bbox), start, 1000, 1000);
        assert_eq!(tracker.tracks.len(), 1);

        tracker.update(&DetectionResult::empty(), start + Duration::milliseconds(1100), 1000, 1000);
        assert!(tracker.tracks.is_empty());
    }

    #[test]
    fn track_not_reported_until_minimum_consecutive_frames() {
        let mut tracker = Tracker::new(default_weights());
        let bbox = BBox { x1: 0.0, y1: 0.0, x2: 400.0, y2: 400.0 };
        let start = Utc::now();
        let result = run_frames(&mut tracker, bbox, 10, start, Duration::seconds(1));
        assert!(result.tracks.is_empty());
        assert_eq!(result.score, 0.0);
    }
}

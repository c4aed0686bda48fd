//! In-process local detector. Wraps a black-box `ModelBackend` (the
//! actual object-detection model is out of scope per spec.md §1) and
//! publishes the class-name -> class-id map the Router uses to
//! reconcile remote detections. Grounded on
//! `original_source/detection/processing/processors/local_processor.py`
//! and `detection/model/detection_service.py::get_classes`.

use super::{Detector, DetectorError};
use crate::types::{BBox, DetectionResult, Frame};
use async_trait::async_trait;
use std::collections::HashMap;

/// The six weighted classes from `tracking_service.py`'s `class_k` map,
/// using COCO's conventional ids (0 person, 1 bicycle, 2 car, 3
/// motorcycle, 5 bus, 7 truck).
pub fn default_class_map() -> HashMap<String, u32> {
    [
        ("person", 0),
        ("bicycle", 1),
        ("car", 2),
        ("motorcycle", 3),
        ("bus", 5),
        ("truck", 7),
    ]
    .into_iter()
    .map(|(name, id)| (name.to_string(), id))
    .collect()
}

/// Abstraction over the actual detection model, so the model itself
/// (explicitly out of scope, spec.md §1) can be swapped without touching
/// routing/tracking logic.
pub trait ModelBackend: Send + Sync {
    /// Run inference on a decoded/raw frame. Per spec.md §4.1.1, a
    /// per-frame model failure is never raised — the backend itself
    /// absorbs it and returns an empty result.
    fn infer(&self, frame: &Frame) -> DetectionResult;

    fn class_map(&self) -> HashMap<String, u32>;
}

/// Deterministic stand-in used by tests and as the default backend until
/// a real model is wired in; returns no detections for any frame.
pub struct NullModel {
    class_map: HashMap<String, u32>,
}

impl Default for NullModel {
    fn default() -> Self {
        Self {
            class_map: default_class_map(),
        }
    }
}

impl ModelBackend for NullModel {
    fn infer(&self, _frame: &Frame) -> DetectionResult {
        DetectionResult::empty()
    }

    fn class_map(&self) -> HashMap<String, u32> {
        self.class_map.clone()
    }
}

pub struct LocalDetector {
    backend: Box<dyn ModelBackend>,
    class_map: HashMap<String, u32>,
}

impl LocalDetector {
    /// Model-load failure is fatal at startup (spec.md §4.1.1); callers
    /// construct the backend beforehand and only hand over a loaded one.
    pub fn new(backend: Box<dyn ModelBackend>) -> Self {
        let class_map = backend.class_map();
        Self { backend, class_map }
    }

    pub fn class_map(&self) -> &HashMap<String, u32> {
        &self.class_map
    }
}

#[async_trait]
impl Detector for LocalDetector {
    async fn detect(&self, frame: &Frame) -> Result<DetectionResult, DetectorError> {
        // CPU-bound inference belongs on a blocking-worker thread so it
        // never stalls the event loop (spec.md §5).
        let backend_frame = frame.clone();
        let result = tokio::task::block_in_place(|| self.backend.infer(&backend_frame));
        Ok(result)
    }

    fn ready(&self) -> bool {
        true
    }

    async fn stop(&self) {}

    fn name(&self) -> &str {
        "local"
    }
}

/// A bbox that covers `area_ratio_pct` percent of the frame, anchored at
/// the frame's top-left corner — used by tests and the stub backend.
pub fn bbox_with_area_ratio(width: u32, height: u32, area_ratio_pct: f32) -> BBox {
    let target_area = (width as f32) * (height as f32) * (area_ratio_pct / 100.0);
    let side = target_area.sqrt();
    BBox {
        x1: 0.0,
        y1: 0.0,
        x2: side.min(width as f32),
        y2: side.min(height as f32),
    }
}

//! Owns the detector registry, the circuit breaker guarding the selected
//! remote path, and the tracker. A single instance lives on the frame
//! pump task (spec.md §7: tracker state "touched only there"), so all
//! methods take `&mut self` rather than locking internally. Grounded on
//! `original_source/detection/processing/processor_provider.py`
//! (`ProcessorProvider`) and `processors/rpc_processor.py`'s
//! circuit-breaker-guarded fallback flow.

use crate::circuit_breaker::{BreakerState, CircuitBreaker};
use crate::detector::Detector;
use crate::tracker::Tracker;
use crate::types::{Frame, TrackedFrame};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

pub const LOCAL_PROVIDER_NAME: &str = "local";

const FAIL_MAX: u32 = 3;
const BASE_RECOVERY: Duration = Duration::from_secs(5);
const MAX_RECOVERY: Duration = Duration::from_secs(120);
const HALF_OPEN_PROBE_TIMEOUT: Duration = Duration::from_millis(200);

pub struct Router {
    registry: HashMap<String, Arc<dyn Detector>>,
    order: Vec<String>,
    active: String,
    breaker: CircuitBreaker,
    local_class_map: HashMap<String, u32>,
    tracker: Tracker,
}

impl Router {
    pub fn new(local: Arc<dyn Detector>, local_class_map: HashMap<String, u32>, class_weights: HashMap<u32, f64>) -> Self {
        let mut registry = HashMap::new();
        registry.insert(LOCAL_PROVIDER_NAME.to_string(), local);
        Self {
            registry,
            order: vec![LOCAL_PROVIDER_NAME.to_string()],
            active: LOCAL_PROVIDER_NAME.to_string(),
            breaker: CircuitBreaker::new(FAIL_MAX, BASE_RECOVERY, MAX_RECOVERY),
            local_class_map,
            tracker: Tracker::new(class_weights),
        }
    }

    pub fn active_provider(&self) -> &str {
        &self.active
    }

    pub fn set_class_weights(&mut self, class_weights: HashMap<u32, f64>) {
        self.tracker.set_class_weights(class_weights);
    }

    pub fn breaker_state(&self) -> BreakerState {
        self.breaker.state()
    }

    /// Registers a new provider under `name`; does not select it.
    pub fn register(&mut self, name: String, detector: Arc<dyn Detector>) {
        if !self.order.contains(&name) {
            self.order.push(name.clone());
        }
        self.registry.insert(name, detector);
    }

    /// Atomic with respect to per-frame processing: the frame pump holds
    /// the only `&mut Router` reference, so a call here can never
    /// interleave with `process_frame`.
    pub fn select(&mut self, name: &str) -> bool {
        if self.registry.contains_key(name) {
            self.active = name.to_string();
            true
        } else {
            false
        }
    }

    /// Removes a provider, stopping it if it was registered. If it was
    /// the active provider, selects the next available remote or falls
    /// back to local.
    pub async fn remove(&mut self, name: &str) {
        if let Some(detector) = self.registry.remove(name) {
            detector.stop().await;
        }
        self.order.retain(|n| n != name);

        if self.active == name {
            let next = self.find_next_remote(name);
            self.active = next;
        }
    }

    /// First non-local provider other than `excluding`, else `"local"`.
    pub fn find_next_remote(&self, excluding: &str) -> String {
        self.order
            .iter()
            .find(|n| n.as_str() != LOCAL_PROVIDER_NAME && n.as_str() != excluding && self.registry.contains_key(*n))
            .cloned()
            .unwrap_or_else(|| LOCAL_PROVIDER_NAME.to_string())
    }

    /// Runs the per-frame algorithm (spec.md §4.2) and hands the unified
    /// detections plus frame shape to the tracker.
    pub async fn process_frame(&mut self, frame: &Frame) -> TrackedFrame {
        let mut result = if self.active == LOCAL_PROVIDER_NAME {
            self.call_local(frame).await
        } else {
            self.call_active_with_breaker(frame).await
        };

        for detection in &mut result.detections {
            if detection.class_id.is_none() {
                detection.class_id = self
                    .local_class_map
                    .get(&detection.class_name.to_lowercase())
                    .copied();
            }
        }

        self.tracker.update(&result, Utc::now(), frame.width, frame.height)
    }

    async fn call_local(&self, frame: &Frame) -> crate::types::DetectionResult {
        match self.registry.get(LOCAL_PROVIDER_NAME) {
            Some(local) => local
                .detect(frame)
                .await
                .unwrap_or_else(|_| crate::types::DetectionResult::empty()),
            None => crate::types::DetectionResult::empty(),
        }
    }

    async fn call_active_with_breaker(&mut self, frame: &Frame) -> crate::types::DetectionResult {
        let detector = match self.registry.get(&self.active) {
            Some(d) => d.clone(),
            None => return self.call_local(frame).await,
        };

        if self.breaker.state() == BreakerState::HalfOpen {
            let probe_ready = tokio::time::timeout(HALF_OPEN_PROBE_TIMEOUT, async { detector.ready() })
                .await
                .unwrap_or(false);
            if !probe_ready {
                self.breaker.on_failure();
                detector.drain_queue().await;
                return self.call_local(frame).await;
            }
        }

        if !self.breaker.should_call() {
            detector.drain_queue().await;
            return self.call_local(frame).await;
        }

        match detector.detect(frame).await {
            Ok(result) => {
                self.breaker.on_success();
                result
            }
            Err(_) => {
                self.breaker.on_failure();
                detector.drain_queue().await;
                self.call_local(frame).await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detector::local::{default_class_map, LocalDetector, NullModel};
    use crate::detector::DetectorError;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    struct FlakyRemote {
        calls: AtomicU32,
        fail_first_n: u32,
        drained: Mutex<bool>,
    }

    #[async_trait]
    impl Detector for FlakyRemote {
        async fn detect(&self, _frame: &Frame) -> Result<crate::types::DetectionResult, DetectorError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.fail_first_n {
                Err(DetectorError::Timeout)
            } else {
                Ok(crate::types::DetectionResult::empty())
            }
        }

        fn ready(&self) -> bool {
            true
        }

        async fn stop(&self) {}

        async fn drain_queue(&self) {
            *self.drained.lock().unwrap() = true;
        }

        fn name(&self) -> &str {
            "remote"
        }
    }

    fn make_frame() -> Frame {
        Frame::new(1, bytes::Bytes::new(), 640, 480)
    }

    fn make_router_with_remote(fail_first_n: u32) -> (Router, Arc<FlakyRemote>) {
        let local = Arc::new(LocalDetector::new(Box::new(NullModel::default())));
        let mut router = Router::new(local, default_class_map(), HashMap::new());
        let remote = Arc::new(FlakyRemote {
            calls: AtomicU32::new(0),
            fail_first_n,
            drained: Mutex::new(false),
        });
        router.register("remote".to_string(), remote.clone());
        router.select("remote");
        (router, remote)
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn scenario_2_three_failures_open_circuit_and_fall_back_to_local() {
        let (mut router, remote) = make_router_with_remote(10);
        let frame = make_frame();

        for _ in 0..3 {
            router.process_frame(&frame).await;
        }
        assert_eq!(router.breaker_state(), BreakerState::Open);

        // Fourth frame must not even invoke the remote detector.
        let calls_before = remote.calls.load(Ordering::SeqCst);
        router.process_frame(&frame).await;
        assert_eq!(remote.calls.load(Ordering::SeqCst), calls_before);
        assert!(*remote.drained.lock().unwrap());
    }

    #[tokio::test]
    async fn scenario_3_removing_active_remote_falls_back_to_local() {
        let (mut router, _remote) = make_router_with_remote(0);
        assert_eq!(router.active_provider(), "remote");

        router.remove("remote").await;
        assert_eq!(router.active_provider(), LOCAL_PROVIDER_NAME);
    }

    #[tokio::test]
    async fn find_next_remote_skips_excluded_and_falls_back_to_local() {
        let local = Arc::new(LocalDetector::new(Box::new(NullModel::default())));
        let mut router = Router::new(local, default_class_map(), HashMap::new());
        let remote_a = Arc::new(FlakyRemote {
            calls: AtomicU32::new(0),
            fail_first_n: 0,
            drained: Mutex::new(false),
        });
        router.register("remote-a".to_string(), remote_a);

        assert_eq!(router.find_next_remote("remote-a"), LOCAL_PROVIDER_NAME);
        assert_eq!(router.find_next_remote("other"), "remote-a");
    }
}

//! Detector capability interface: `detect(frame) -> DetectionResult`,
//! implemented by a local in-process model and a remote streaming-RPC
//! client. Modeled as a trait object per spec.md §9's "abstract detector
//! hierarchy -> capability interface" redesign note, rather than the
//! source's class hierarchy.

pub mod local;
pub mod remote;

use crate::types::{DetectionResult, Frame};
use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error, Clone)]
pub enum DetectorError {
    #[error("circuit open")]
    CircuitOpen,
    #[error("detector not ready")]
    NotReady,
    #[error("detector timed out")]
    Timeout,
    #[error("transport error: {0}")]
    Transport(String),
    #[error("decode error: {0}")]
    Decode(String),
}

#[async_trait]
pub trait Detector: Send + Sync {
    async fn detect(&self, frame: &Frame) -> Result<DetectionResult, DetectorError>;

    /// Whether the detector is currently able to serve requests (always
    /// true for the local detector; reflects TLS handshake + stream
    /// establishment for the remote detector).
    fn ready(&self) -> bool;

    /// Cancel in-flight work and release resources. A no-op for the
    /// local detector.
    async fn stop(&self);

    /// Drops any in-flight/queued work after a failed call (spec.md
    /// §4.2: "drain the remote's send/frame/processed queues"). A no-op
    /// for the local detector, which has no queues.
    async fn drain_queue(&self) {}

    fn name(&self) -> &str;
}

pub use local::LocalDetector;
pub use remote::RemoteDetector;

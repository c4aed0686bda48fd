//! Typed message-fabric DTOs and queue names, shared by the edge
//! (producer/consumer) and backend (mirror) sides. Grounded on
//! `original_source/rabbitMQ/dtos/dto.py` and the queue table in
//! spec.md §4.6. Payloads are JSON over MQTT (`rumqttc`), standing in
//! for the source's AMQP durable queues — topics map 1:1 to queue names,
//! QoS1 + a persistent session approximate "durable, manual ack".

pub mod backend;
pub mod edge;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const SUSPICION_FRAME_QUEUE: &str = "roadwatch/suspicion_frame";
pub const RECORDING_STATUS_QUEUE: &str = "roadwatch/recording_status";
pub const RESPONSE_QUEUE: &str = "roadwatch/response";
pub const FRAME_QUEUE: &str = "roadwatch/frame";
pub const CLOUD_PROVIDER_CONFIG_QUEUE: &str = "roadwatch/cloud_provider_config";
pub const SUSPICION_CONFIG_QUEUE: &str = "roadwatch/suspicion_config";

/// Lossy queues (frame/score/mirror) carry a millisecond TTL; stale
/// messages are dropped by the consumer rather than acted on.
pub const LOSSY_QUEUE_TTL_MS: u64 = 100;

#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("broker connection not established")]
    NotConnected,
    #[error("publish failed: {0}")]
    Publish(String),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuspicionFrameMessage {
    pub suspicion_score: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordingStatusMessage {
    pub recording: bool,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RelatedTo {
    Cloud,
    Suspicion,
    General,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseMessage {
    pub success: bool,
    pub message: String,
    pub related_to: RelatedTo,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrameMirrorMessage {
    pub jpeg_bytes: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloudProviderConfigMessage {
    pub provider_name: String,
    pub connection_ip: String,
    pub server_certification: String,
    pub delete: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuspicionConfigMessage {
    pub threshold: i64,
    #[serde(default)]
    pub class_weights: std::collections::HashMap<String, f64>,
}

/// Envelope wrapping an outgoing payload with the TTL that lossy queues
/// need and durable queues ignore.
pub struct Envelope {
    pub queue: &'static str,
    pub payload: Vec<u8>,
    pub ttl_ms: Option<u64>,
}

impl Envelope {
    pub fn durable<T: Serialize>(queue: &'static str, message: &T) -> Result<Self, BrokerError> {
        Ok(Self {
            queue,
            payload: serde_json::to_vec(message)?,
            ttl_ms: None,
        })
    }

    pub fn lossy<T: Serialize>(queue: &'static str, message: &T, ttl_ms: u64) -> Result<Self, BrokerError> {
        Ok(Self {
            queue,
            payload: serde_json::to_vec(message)?,
            ttl_ms: Some(ttl_ms),
        })
    }
}

/// P10: a lossy envelope enqueued at `enqueued_at` and still sitting in
/// the publish queue at `now` is stale once it has outlived its TTL and
/// must be dropped rather than delivered late. Durable envelopes
/// (`ttl_ms: None`) never expire.
pub fn is_expired(ttl_ms: Option<u64>, enqueued_at: std::time::Instant, now: std::time::Instant) -> bool {
    match ttl_ms {
        Some(ttl_ms) => now.saturating_duration_since(enqueued_at) > std::time::Duration::from_millis(ttl_ms),
        None => false,
    }
}

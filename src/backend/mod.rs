//! Backend process: SSE fan-out, WebSocket camera stream, and the thin
//! config-CRUD REST surface. Grounded on the teacher's `web/server.rs`
//! axum-router style and `original_source/backend/app/api/routers/`.

pub mod rest;
pub mod sse;
pub mod ws;

use crate::broker::backend::BackendBroker;
use tokio::sync::broadcast;

const SSE_FANOUT_CAPACITY: usize = 1000;
const FRAME_BROADCAST_CAPACITY: usize = 1;

#[derive(Clone)]
pub struct BackendState {
    pub broker: std::sync::Arc<BackendBroker>,
    pub sse_events: broadcast::Sender<sse::SseEvent>,
    pub frame_broadcast: broadcast::Sender<String>,
}

impl BackendState {
    pub fn new(broker: BackendBroker) -> Self {
        let (sse_tx, _) = broadcast::channel(SSE_FANOUT_CAPACITY);
        let (frame_tx, _) = broadcast::channel(FRAME_BROADCAST_CAPACITY);
        Self {
            broker: std::sync::Arc::new(broker),
            sse_events: sse_tx,
            frame_broadcast: frame_tx,
        }
    }
}

//! SSE fan-out: a single broker-consumer task forwards decoded events
//! into an in-process broadcast channel (bounded, drop-oldest via
//! `tokio::sync::broadcast`'s lagging-receiver semantics); each
//! subscriber gets its own generator that renders `event: <kind>\ndata:
//! <json>\n\n`. Grounded on
//! `original_source/backend/app/core/services/sse/server_side_events.py`
//! and `events/event_factory.py`.

use super::BackendState;
use crate::broker::backend::BackendEvent;
use axum::response::sse::{Event, Sse};
use futures::stream::Stream;
use serde_json::json;
use std::convert::Infallible;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt as _;

#[derive(Debug, Clone, serde::Serialize)]
pub struct SseEvent {
    pub kind: &'static str,
    pub data: serde_json::Value,
}

impl From<BackendEvent> for Option<SseEvent> {
    fn from(event: BackendEvent) -> Self {
        match event {
            BackendEvent::Suspicion(score) => Some(SseEvent {
                kind: "suspicion",
                data: json!({ "suspicion_score": score }),
            }),
            BackendEvent::Recording(recording) => Some(SseEvent {
                kind: "recording",
                data: json!({ "recording": recording }),
            }),
            BackendEvent::Response(response) => Some(SseEvent {
                kind: if response.success { "success" } else { "failure" },
                data: json!({ "message": response.message, "related_to": response.related_to }),
            }),
            // Frame mirrors feed the WebSocket broadcast, not SSE.
            BackendEvent::FrameMirror(_) => None,
        }
    }
}

/// Drains the broker's decoded-event channel into the SSE broadcast
/// channel, and frame mirrors into the WS broadcast channel. One
/// instance runs per backend process.
pub async fn run_fanout(mut broker_events: tokio::sync::mpsc::Receiver<BackendEvent>, state: BackendState) {
    while let Some(event) = broker_events.recv().await {
        match &event {
            BackendEvent::FrameMirror(jpeg_base64) => {
                let _ = state.frame_broadcast.send(jpeg_base64.clone());
            }
            _ => {
                if let Some(sse_event) = Option::<SseEvent>::from(event) {
                    let _ = state.sse_events.send(sse_event);
                }
            }
        }
    }
}

pub async fn sse_handler(
    axum::extract::State(state): axum::extract::State<BackendState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let receiver = state.sse_events.subscribe();
    let stream = BroadcastStream::new(receiver).filter_map(|result| {
        result.ok().map(|event| {
            Ok(Event::default()
                .event(event.kind)
                .data(event.data.to_string()))
        })
    });
    Sse::new(stream)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::{RelatedTo, ResponseMessage};

    #[test]
    fn response_success_maps_to_success_kind() {
        let event = BackendEvent::Response(ResponseMessage {
            success: true,
            message: "ok".to_string(),
            related_to: RelatedTo::Suspicion,
        });
        let sse: Option<SseEvent> = event.into();
        assert_eq!(sse.unwrap().kind, "success");
    }

    #[test]
    fn response_failure_maps_to_failure_kind() {
        let event = BackendEvent::Response(ResponseMessage {
            success: false,
            message: "bad".to_string(),
            related_to: RelatedTo::Cloud,
        });
        let sse: Option<SseEvent> = event.into();
        assert_eq!(sse.unwrap().kind, "failure");
    }

    #[test]
    fn frame_mirror_has_no_sse_event() {
        let event = BackendEvent::FrameMirror("abc".to_string());
        let sse: Option<SseEvent> = event.into();
        assert!(sse.is_none());
    }
}

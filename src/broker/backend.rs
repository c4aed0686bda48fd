//! Backend-side mirror: consumes the three event queues plus the
//! frame-mirror queue, and produces the two config queues. Grounded on
//! `original_source/backend/app/core/services/rabbitmqconsumer/
//! rabbitmq_consumer.py` (dispatcher pattern) and
//! `backend/app/dependencies.py` (queue wiring).

use super::{
    CloudProviderConfigMessage, Envelope, FrameMirrorMessage, RecordingStatusMessage,
    ResponseMessage, SuspicionConfigMessage, SuspicionFrameMessage, FRAME_QUEUE,
    RECORDING_STATUS_QUEUE, RESPONSE_QUEUE, SUSPICION_FRAME_QUEUE,
};
use crate::broker::BrokerError;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use std::time::Duration;
use tokio::sync::mpsc;

const RECONNECT_SLEEP: Duration = Duration::from_secs(5);

/// A decoded event off one of the three event queues, routed to the
/// SSE fan-out, plus frame mirrors routed to the WebSocket stream.
#[derive(Debug, Clone)]
pub enum BackendEvent {
    Suspicion(f64),
    Recording(bool),
    Response(ResponseMessage),
    FrameMirror(String),
}

pub struct BackendBroker {
    client: AsyncClient,
}

impl BackendBroker {
    pub fn connect(broker_url: &str, client_id: &str) -> (Self, mpsc::Receiver<BackendEvent>) {
        let (host, port) = super::edge::parse_broker_url(broker_url);
        let mut options = MqttOptions::new(client_id, host, port);
        options.set_keep_alive(Duration::from_secs(10));
        options.set_clean_session(false);

        let (client, mut eventloop) = AsyncClient::new(options, 64);
        let (tx, rx) = mpsc::channel(1000);

        let subscribe_client = client.clone();
        tokio::spawn(async move {
            let queues = [SUSPICION_FRAME_QUEUE, RECORDING_STATUS_QUEUE, RESPONSE_QUEUE, FRAME_QUEUE];
            loop {
                let mut all_ok = true;
                for queue in queues {
                    if subscribe_client.subscribe(queue, QoS::AtLeastOnce).await.is_err() {
                        all_ok = false;
                        break;
                    }
                }
                if all_ok {
                    break;
                }
                tokio::time::sleep(RECONNECT_SLEEP).await;
            }
        });

        tokio::spawn(async move {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        if let Some(event) = decode_event(&publish.topic, &publish.payload) {
                            let _ = tx.send(event).await;
                        }
                    }
                    Ok(_) => {}
                    Err(e) => {
                        tracing::warn!(error = %e, "backend broker connection lost, retrying");
                        tokio::time::sleep(RECONNECT_SLEEP).await;
                    }
                }
            }
        });

        (Self { client }, rx)
    }

    pub async fn publish_cloud_provider_config(&self, message: &CloudProviderConfigMessage) -> Result<(), BrokerError> {
        let envelope = Envelope::durable(super::CLOUD_PROVIDER_CONFIG_QUEUE, message)?;
        self.publish(envelope).await
    }

    pub async fn publish_suspicion_config(&self, message: &SuspicionConfigMessage) -> Result<(), BrokerError> {
        let envelope = Envelope::durable(super::SUSPICION_CONFIG_QUEUE, message)?;
        self.publish(envelope).await
    }

    async fn publish(&self, envelope: Envelope) -> Result<(), BrokerError> {
        self.client
            .publish(envelope.queue, QoS::AtLeastOnce, false, envelope.payload)
            .await
            .map_err(|e| BrokerError::Publish(e.to_string()))
    }
}

fn decode_event(topic: &str, payload: &[u8]) -> Option<BackendEvent> {
    if topic == SUSPICION_FRAME_QUEUE {
        serde_json::from_slice::<SuspicionFrameMessage>(payload)
            .ok()
            .map(|m| BackendEvent::Suspicion(m.suspicion_score))
    } else if topic == RECORDING_STATUS_QUEUE {
        serde_json::from_slice::<RecordingStatusMessage>(payload)
            .ok()
            .map(|m| BackendEvent::Recording(m.recording))
    } else if topic == RESPONSE_QUEUE {
        serde_json::from_slice::<ResponseMessage>(payload)
            .ok()
            .map(BackendEvent::Response)
    } else if topic == FRAME_QUEUE {
        serde_json::from_slice::<FrameMirrorMessage>(payload)
            .ok()
            .map(|m| BackendEvent::FrameMirror(m.jpeg_bytes))
    } else {
        None
    }
}

//! Edge-side connection manager: one shared MQTT connection, publishers
//! for the four edge→backend queues, and a single dispatcher task that
//! drains provider/suspicion config messages so side-effects never race
//! the frame pump. Grounded on
//! `original_source/rabbitMQ/consumer/connection_manager.py`
//! (`ConnectionManager`, 5 s reconnect sleep, manual ack) — `rumqttc`'s
//! `AsyncClient`/`EventLoop` are already tokio-native, so the single
//! background thread the source needs for `pika.SelectConnection`
//! becomes a plain tokio task here rather than an OS thread.

use super::{
    BrokerError, CloudProviderConfigMessage, Envelope, RelatedTo, ResponseMessage,
    SuspicionConfigMessage, CLOUD_PROVIDER_CONFIG_QUEUE, SUSPICION_CONFIG_QUEUE,
};
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

const RECONNECT_SLEEP: Duration = Duration::from_secs(5);
const LOSSY_PUBLISH_QUEUE_CAPACITY: usize = 256;

/// A control message decoded off the broker, handed to the single
/// dispatcher task that owns the Router/AppConfig (spec.md §4.6:
/// "serializes side-effects and avoids races with the frame pump").
#[derive(Debug)]
pub enum ControlMessage {
    CloudProviderConfig(CloudProviderConfigMessage),
    SuspicionConfig(SuspicionConfigMessage),
}

pub struct ConnectionManager {
    client: AsyncClient,
    lossy_tx: mpsc::Sender<(Envelope, Instant)>,
}

/// Cheaply-cloneable handle the frame pump holds to publish lossy
/// messages (frame mirror, suspicion score) without ever blocking on the
/// broker (spec.md §4.4: "non-blocking publish with drop-on-full
/// channel").
#[derive(Clone)]
pub struct LossyPublisher {
    tx: mpsc::Sender<(Envelope, Instant)>,
}

impl LossyPublisher {
    pub fn try_publish(&self, envelope: Envelope) {
        let queue = envelope.queue;
        if self.tx.try_send((envelope, Instant::now())).is_err() {
            tracing::debug!(queue, "lossy publish queue full, dropping");
        }
    }
}

impl ConnectionManager {
    /// Connects and subscribes to the two config queues; returns the
    /// manager plus a receiver of decoded control messages. The
    /// eventloop is polled on a dedicated task that reconnects forever,
    /// sleeping 5 s between attempts (spec.md §4.6).
    pub fn connect(broker_url: &str, client_id: &str) -> (Self, mpsc::Receiver<ControlMessage>) {
        let (host, port) = parse_broker_url(broker_url);
        let mut options = MqttOptions::new(client_id, host, port);
        options.set_keep_alive(Duration::from_secs(10));
        options.set_clean_session(false);

        let (client, mut eventloop) = AsyncClient::new(options, 64);
        let (tx, rx) = mpsc::channel(64);
        let (lossy_tx, mut lossy_rx) = mpsc::channel::<(Envelope, Instant)>(LOSSY_PUBLISH_QUEUE_CAPACITY);

        let lossy_client = client.clone();
        tokio::spawn(async move {
            while let Some((envelope, enqueued_at)) = lossy_rx.recv().await {
                if let Some(ttl_ms) = envelope.ttl_ms {
                    if enqueued_at.elapsed() > Duration::from_millis(ttl_ms) {
                        continue;
                    }
                }
                let _ = lossy_client
                    .publish(envelope.queue, QoS::AtMostOnce, false, envelope.payload)
                    .await;
            }
        });

        let subscribe_client = client.clone();
        tokio::spawn(async move {
            loop {
                if subscribe_client
                    .subscribe(CLOUD_PROVIDER_CONFIG_QUEUE, QoS::AtLeastOnce)
                    .await
                    .is_ok()
                    && subscribe_client
                        .subscribe(SUSPICION_CONFIG_QUEUE, QoS::AtLeastOnce)
                        .await
                        .is_ok()
                {
                    break;
                }
                tokio::time::sleep(RECONNECT_SLEEP).await;
            }
        });

        let dispatch_client = client.clone();
        tokio::spawn(async move {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        dispatch_incoming(&publish.topic, &publish.payload, &tx, &dispatch_client).await;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        tracing::warn!(error = %e, "broker connection lost, retrying");
                        tokio::time::sleep(RECONNECT_SLEEP).await;
                    }
                }
            }
        });

        (Self { client, lossy_tx }, rx)
    }

    pub async fn publish(&self, envelope: Envelope) -> Result<(), BrokerError> {
        self.client
            .publish(envelope.queue, QoS::AtLeastOnce, false, envelope.payload)
            .await
            .map_err(|e| BrokerError::Publish(e.to_string()))
    }

    pub fn lossy_publisher(&self) -> LossyPublisher {
        LossyPublisher { tx: self.lossy_tx.clone() }
    }

    pub async fn publish_response(&self, success: bool, message: impl Into<String>, related_to: RelatedTo) -> Result<(), BrokerError> {
        let envelope = Envelope::durable(
            super::RESPONSE_QUEUE,
            &ResponseMessage {
                success,
                message: message.into(),
                related_to,
            },
        )?;
        self.publish(envelope).await
    }
}

/// Decodes one incoming publish into a `ControlMessage`. A malformed
/// payload on a known control topic is logged and answered with a
/// failure `ResponseMessage{related_to: General}` rather than silently
/// dropped (spec.md §7: "Malformed control message: log, publish a
/// failure ResponseMessage with related_to='general', ack and drop").
async fn dispatch_incoming(topic: &str, payload: &[u8], tx: &mpsc::Sender<ControlMessage>, client: &AsyncClient) {
    if topic == CLOUD_PROVIDER_CONFIG_QUEUE {
        match serde_json::from_slice::<CloudProviderConfigMessage>(payload) {
            Ok(message) => {
                let _ = tx.send(ControlMessage::CloudProviderConfig(message)).await;
            }
            Err(e) => reject_malformed(client, "cloud_provider_config", &e).await,
        }
    } else if topic == SUSPICION_CONFIG_QUEUE {
        match serde_json::from_slice::<SuspicionConfigMessage>(payload) {
            Ok(message) => {
                let _ = tx.send(ControlMessage::SuspicionConfig(message)).await;
            }
            Err(e) => reject_malformed(client, "suspicion_config", &e).await,
        }
    }
}

async fn reject_malformed(client: &AsyncClient, queue: &str, error: &serde_json::Error) {
    tracing::warn!(queue, error = %error, "malformed control message, dropping");
    let response = ResponseMessage {
        success: false,
        message: format!("malformed {queue} message: {error}"),
        related_to: RelatedTo::General,
    };
    if let Ok(envelope) = Envelope::durable(super::RESPONSE_QUEUE, &response) {
        let _ = client
            .publish(envelope.queue, QoS::AtLeastOnce, false, envelope.payload)
            .await;
    }
}

pub(crate) fn parse_broker_url(url: &str) -> (String, u16) {
    let stripped = url
        .strip_prefix("mqtt://")
        .or_else(|| url.strip_prefix("amqp://"))
        .unwrap_or(url);
    match stripped.rsplit_once(':') {
        Some((host, port)) => (host.to_string(), port.parse().unwrap_or(1883)),
        None => (stripped.to_string(), 1883),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_mqtt_url_with_port() {
        assert_eq!(parse_broker_url("mqtt://localhost:1883"), ("localhost".to_string(), 1883));
    }

    #[test]
    fn defaults_to_1883_without_port() {
        assert_eq!(parse_broker_url("mqtt://broker.local"), ("broker.local".to_string(), 1883));
    }

    fn test_client() -> AsyncClient {
        let options = MqttOptions::new("dispatch-test", "127.0.0.1", 1);
        let (client, _eventloop) = AsyncClient::new(options, 8);
        client
    }

    /// spec.md §7: "Malformed control message: log, publish a failure
    /// ResponseMessage with related_to='general', ack and drop" — the
    /// decode failure must never forward a `ControlMessage`.
    #[tokio::test]
    async fn malformed_payload_on_known_topic_is_dropped_not_forwarded() {
        let (tx, mut rx) = mpsc::channel(4);
        let client = test_client();

        dispatch_incoming(CLOUD_PROVIDER_CONFIG_QUEUE, b"not json", &tx, &client).await;

        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn well_formed_payload_on_known_topic_is_forwarded() {
        let (tx, mut rx) = mpsc::channel(4);
        let client = test_client();
        let message = SuspicionConfigMessage { threshold: 50, class_weights: Default::default() };
        let payload = serde_json::to_vec(&message).unwrap();

        dispatch_incoming(SUSPICION_CONFIG_QUEUE, &payload, &tx, &client).await;

        assert!(matches!(rx.try_recv(), Ok(ControlMessage::SuspicionConfig(_))));
    }

    #[tokio::test]
    async fn unknown_topic_is_ignored() {
        let (tx, mut rx) = mpsc::channel(4);
        let client = test_client();

        dispatch_incoming("roadwatch/unrelated", b"anything", &tx, &client).await;

        assert!(rx.try_recv().is_err());
    }
}

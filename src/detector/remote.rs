//! Remote (cloud) detector: a long-lived bidirectional streaming RPC over
//! a pinned-certificate TLS connection. Grounded on
//! `original_source/gRPC/grpc_client.py`'s `CloudClient` — bounded
//! outbound queue, `frame_buffer`/`processed_frames` maps, per-frame-id
//! completion signaling, reconnect-with-backoff — generalized per
//! spec.md §9's "bounded map of frame-id -> one-shot channel" redesign
//! note (the source's dict-of-`asyncio.Event` becomes a
//! `HashMap<u64, oneshot::Sender<()>>`).

use super::{Detector, DetectorError};
use crate::net_framing::{read_frame, write_frame};
use crate::tls::pinned_client_config;
use crate::types::{BBox, Detection, DetectionResult, Frame};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio_rustls::TlsConnector;

const OUTBOUND_QUEUE_CAPACITY: usize = 30;
const BASE_RECONNECT_BACKOFF: Duration = Duration::from_secs(5);
const MAX_RECONNECT_BACKOFF: Duration = Duration::from_secs(10);

#[derive(Debug, Serialize, Deserialize)]
struct WireDetectionRequest {
    frame_id: u64,
    jpeg: Vec<u8>,
    width: u32,
    height: u32,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireDetection {
    class_name: String,
    confidence: f32,
    x1: f32,
    y1: f32,
    x2: f32,
    y2: f32,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireDetectionResponse {
    frame_id: u64,
    detections: Vec<WireDetection>,
}

struct Correlation {
    frame_buffer: Mutex<HashMap<u64, Frame>>,
    processed_frames: Mutex<HashMap<u64, DetectionResult>>,
    completions: Mutex<HashMap<u64, oneshot::Sender<()>>>,
}

impl Correlation {
    fn new() -> Self {
        Self {
            frame_buffer: Mutex::new(HashMap::new()),
            processed_frames: Mutex::new(HashMap::new()),
            completions: Mutex::new(HashMap::new()),
        }
    }

    async fn clear(&self) {
        self.frame_buffer.lock().await.clear();
        self.processed_frames.lock().await.clear();
        self.completions.lock().await.clear();
    }
}

pub struct RemoteDetector {
    name: String,
    ready: Arc<AtomicBool>,
    outbound_tx: mpsc::Sender<WireDetectionRequest>,
    correlation: Arc<Correlation>,
    shutdown_tx: Option<oneshot::Sender<()>>,
}

impl RemoteDetector {
    /// Spawns the background connection task and returns immediately;
    /// `ready()` flips true only once the TLS handshake and stream are
    /// established (spec.md §4.1.2).
    pub fn connect(name: String, address: String, pinned_cert_pem: String) -> anyhow::Result<Self> {
        let pinned_der = crate::tls::pem_to_der(&pinned_cert_pem)?;
        let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_QUEUE_CAPACITY);
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let ready = Arc::new(AtomicBool::new(false));
        let correlation = Arc::new(Correlation::new());

        tokio::spawn(connection_loop(
            address,
            pinned_der,
            outbound_rx,
            correlation.clone(),
            ready.clone(),
            shutdown_rx,
        ));

        Ok(Self {
            name,
            ready,
            outbound_tx,
            correlation,
            shutdown_tx: Some(shutdown_tx),
        })
    }

    pub async fn send_frame(&self, frame: &Frame) -> Result<(), DetectorError> {
        if !self.ready() {
            return Err(DetectorError::NotReady);
        }
        self.correlation
            .frame_buffer
            .lock()
            .await
            .insert(frame.frame_id, frame.clone());

        let request = WireDetectionRequest {
            frame_id: frame.frame_id,
            jpeg: frame.jpeg.to_vec(),
            width: frame.width,
            height: frame.height,
        };

        // Bounded, drop-oldest: if the channel is full, make room by
        // dropping whatever is currently queued behind the receiver.
        if self.outbound_tx.try_send(request).is_err() {
            tracing::warn!(detector = %self.name, "outbound queue full, dropping oldest");
        }
        Ok(())
    }

    pub async fn await_result(
        &self,
        frame_id: u64,
        timeout: Duration,
    ) -> Result<DetectionResult, DetectorError> {
        if let Some(result) = self.correlation.processed_frames.lock().await.remove(&frame_id) {
            return Ok(result);
        }

        let (tx, rx) = oneshot::channel();
        self.correlation.completions.lock().await.insert(frame_id, tx);

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(())) => self
                .correlation
                .processed_frames
                .lock()
                .await
                .remove(&frame_id)
                .ok_or(DetectorError::Timeout),
            _ => {
                self.correlation.completions.lock().await.remove(&frame_id);
                Err(DetectorError::Timeout)
            }
        }
    }

    pub async fn clear_queue(&self) {
        self.correlation.clear().await;
    }
}

#[async_trait]
impl Detector for RemoteDetector {
    async fn detect(&self, frame: &Frame) -> Result<DetectionResult, DetectorError> {
        self.send_frame(frame).await?;
        self.await_result(frame.frame_id, Duration::from_secs(1)).await
    }

    fn ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    async fn stop(&self) {
        self.clear_queue().await;
        self.ready.store(false, Ordering::SeqCst);
    }

    async fn drain_queue(&self) {
        self.clear_queue().await;
    }

    fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for RemoteDetector {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

async fn connection_loop(
    address: String,
    pinned_der: Vec<u8>,
    mut outbound_rx: mpsc::Receiver<WireDetectionRequest>,
    correlation: Arc<Correlation>,
    ready: Arc<AtomicBool>,
    mut shutdown_rx: oneshot::Receiver<()>,
) {
    let mut backoff = BASE_RECONNECT_BACKOFF;
    loop {
        if shutdown_rx.try_recv().is_ok() {
            return;
        }

        ready.store(false, Ordering::SeqCst);
        correlation.clear().await;

        match run_session(&address, &pinned_der, &mut outbound_rx, &correlation, &ready).await {
            Ok(()) => {
                // Graceful shutdown requested mid-session.
                return;
            }
            Err(e) => {
                tracing::warn!(error = %e, address = %address, "remote detector session ended, reconnecting");
            }
        }

        ready.store(false, Ordering::SeqCst);
        correlation.clear().await;

        tokio::select! {
            _ = tokio::time::sleep(backoff) => {}
            _ = &mut shutdown_rx => return,
        }
        backoff = (backoff * 2).min(MAX_RECONNECT_BACKOFF);
    }
}

async fn run_session(
    address: &str,
    pinned_der: &[u8],
    outbound_rx: &mut mpsc::Receiver<WireDetectionRequest>,
    correlation: &Arc<Correlation>,
    ready: &Arc<AtomicBool>,
) -> anyhow::Result<()> {
    let tcp = tokio::net::TcpStream::connect(address).await?;
    let config = pinned_client_config(pinned_der.to_vec());
    let connector = TlsConnector::from(config);
    let server_name = rustls::pki_types::ServerName::try_from("cloud-detector")?.to_owned();
    let tls_stream = connector.connect(server_name, tcp).await?;
    let (mut read_half, mut write_half) = tokio::io::split(tls_stream);

    ready.store(true, Ordering::SeqCst);
    tracing::info!(address, "remote detector session established");

    let reader_correlation = correlation.clone();
    let mut reader_task = tokio::spawn(async move {
        loop {
            let payload = match read_frame(&mut read_half).await {
                Ok(p) => p,
                Err(e) => {
                    tracing::warn!(error = %e, "remote detector read error");
                    return;
                }
            };
            let response: WireDetectionResponse = match serde_json::from_slice(&payload) {
                Ok(r) => r,
                Err(e) => {
                    tracing::warn!(error = %e, "remote detector decode error");
                    continue;
                }
            };
            let frame_id = response.frame_id;
            let detections = response
                .detections
                .into_iter()
                .map(|d| Detection {
                    class_id: None,
                    class_name: d.class_name,
                    confidence: d.confidence,
                    bbox: BBox {
                        x1: d.x1,
                        y1: d.y1,
                        x2: d.x2,
                        y2: d.y2,
                    },
                })
                .collect();
            reader_correlation
                .frame_buffer
                .lock()
                .await
                .remove(&frame_id);
            reader_correlation
                .processed_frames
                .lock()
                .await
                .insert(frame_id, DetectionResult { detections });
            if let Some(tx) = reader_correlation.completions.lock().await.remove(&frame_id) {
                let _ = tx.send(());
            }
        }
    });

    loop {
        tokio::select! {
            request = outbound_rx.recv() => {
                match request {
                    Some(request) => {
                        let payload = serde_json::to_vec(&request)?;
                        if write_frame(&mut write_half, &payload).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
            _ = &mut reader_task => {
                break;
            }
        }
    }

    reader_task.abort();
    write_half.shutdown().await.ok();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_request_round_trips_through_json() {
        let request = WireDetectionRequest {
            frame_id: 7,
            jpeg: vec![1, 2, 3],
            width: 640,
            height: 480,
        };
        let json = serde_json::to_vec(&request).unwrap();
        let decoded: WireDetectionRequest = serde_json::from_slice(&json).unwrap();
        assert_eq!(decoded.frame_id, 7);
        assert_eq!(decoded.jpeg, vec![1, 2, 3]);
    }

    #[test]
    fn wire_response_round_trips_through_json() {
        let response = WireDetectionResponse {
            frame_id: 9,
            detections: vec![WireDetection {
                class_name: "person".to_string(),
                confidence: 0.8,
                x1: 0.0,
                y1: 0.0,
                x2: 10.0,
                y2: 10.0,
            }],
        };
        let json = serde_json::to_vec(&response).unwrap();
        let decoded: WireDetectionResponse = serde_json::from_slice(&json).unwrap();
        assert_eq!(decoded.detections.len(), 1);
        assert_eq!(decoded.detections[0].class_name, "person");
    }
}
